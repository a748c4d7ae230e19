//! Strategy changelog: an append-only JSON log of model and configuration
//! changes, plus the strategy documentation file. Configuration updates are
//! diffed key-by-key and appended automatically by the config writer.

use crate::config::AppConfig;
use crate::errors::{EngineError, EngineResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CHANGELOG_FILENAME: &str = "changelog.json";
pub const DOCS_FILENAME: &str = "strategy_documentation.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeDetail {
    pub component: String,
    pub old_value: String,
    pub new_value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangelogEntry {
    pub id: String,
    pub date: String,
    /// added | changed | removed | fixed | initial
    pub entry_type: String,
    /// model | configuration | feature | documentation
    pub category: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub affected_components: Vec<String>,
    #[serde(default)]
    pub changes: Vec<ChangeDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChangelogFile {
    version: String,
    #[serde(default)]
    entries: Vec<ChangelogEntry>,
}

impl Default for ChangelogFile {
    fn default() -> Self {
        Self {
            version: "1.0.0".into(),
            entries: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StrategyLog {
    strategy_dir: PathBuf,
}

impl StrategyLog {
    /// Open the strategy directory, writing default changelog and
    /// documentation files on first run.
    pub fn new(strategy_dir: &Path) -> EngineResult<Self> {
        std::fs::create_dir_all(strategy_dir)?;
        let log = Self {
            strategy_dir: strategy_dir.to_path_buf(),
        };

        if !log.changelog_path().exists() {
            log.write_changelog(&ChangelogFile::default())?;
            tracing::info!("created default strategy changelog");
        }
        let docs_path = log.strategy_dir.join(DOCS_FILENAME);
        if !docs_path.exists() {
            let docs = serde_json::json!({
                "version": "1.0.0",
                "last_updated": Utc::now().to_rfc3339(),
                "models": {},
                "trading_strategy": {},
            });
            std::fs::write(&docs_path, serde_json::to_string_pretty(&docs)?)?;
            tracing::info!("created default strategy documentation");
        }

        Ok(log)
    }

    fn changelog_path(&self) -> PathBuf {
        self.strategy_dir.join(CHANGELOG_FILENAME)
    }

    fn read_changelog(&self) -> EngineResult<ChangelogFile> {
        let raw = std::fs::read_to_string(self.changelog_path())?;
        serde_json::from_str(&raw).map_err(EngineError::from)
    }

    fn write_changelog(&self, file: &ChangelogFile) -> EngineResult<()> {
        std::fs::write(self.changelog_path(), serde_json::to_string_pretty(file)?)?;
        Ok(())
    }

    /// Append one entry. Entries are never edited or removed.
    #[allow(clippy::too_many_arguments)]
    pub fn add_entry(
        &self,
        title: &str,
        description: &str,
        category: &str,
        entry_type: &str,
        affected_components: Vec<String>,
        changes: Vec<ChangeDetail>,
        author: Option<String>,
    ) -> EngineResult<ChangelogEntry> {
        let mut file = self.read_changelog().unwrap_or_default();

        let now = Utc::now();
        let entry = ChangelogEntry {
            id: format!("{}-{}", now.format("%Y-%m-%d"), file.entries.len() + 1),
            date: now.to_rfc3339(),
            entry_type: entry_type.to_string(),
            category: category.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            affected_components,
            changes,
            author,
        };

        file.entries.push(entry.clone());
        self.write_changelog(&file)?;

        tracing::info!(id = %entry.id, category = %entry.category, "changelog entry added");
        Ok(entry)
    }

    /// Entries newest-first, optionally filtered by category/type and capped.
    pub fn entries(
        &self,
        category: Option<&str>,
        entry_type: Option<&str>,
        limit: Option<usize>,
    ) -> EngineResult<Vec<ChangelogEntry>> {
        let file = self.read_changelog()?;
        let mut entries: Vec<ChangelogEntry> = file
            .entries
            .into_iter()
            .filter(|e| category.map_or(true, |c| e.category == c))
            .filter(|e| entry_type.map_or(true, |t| e.entry_type == t))
            .collect();
        entries.sort_by(|a, b| b.date.cmp(&a.date));
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    /// Diff two configurations over their tunable fields and append a
    /// `configuration` entry. No differences is an error so callers cannot
    /// silently log no-op updates.
    pub fn log_configuration_change(
        &self,
        old: &AppConfig,
        new: &AppConfig,
    ) -> EngineResult<ChangelogEntry> {
        let old_fields = old.tunable_fields();
        let new_fields = new.tunable_fields();

        let mut changes = Vec::new();
        for ((name, old_value), (_, new_value)) in old_fields.iter().zip(new_fields.iter()) {
            if old_value != new_value {
                changes.push(ChangeDetail {
                    component: (*name).to_string(),
                    old_value: old_value.clone(),
                    new_value: new_value.clone(),
                });
            }
        }

        if changes.is_empty() {
            return Err(EngineError::Config(
                "no configuration changes detected".into(),
            ));
        }

        let affected: Vec<String> = changes.iter().map(|c| c.component.clone()).collect();
        let mut title = format!(
            "Configuration change: {}",
            affected[..affected.len().min(3)].join(", ")
        );
        if affected.len() > 3 {
            title.push_str(&format!(" and {} more", affected.len() - 3));
        }
        let description = format!("{} parameter(s) changed", changes.len());

        self.add_entry(
            &title,
            &description,
            "configuration",
            "changed",
            affected,
            changes,
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;

    #[test]
    fn test_first_run_creates_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let log = StrategyLog::new(dir.path()).unwrap();
        assert!(dir.path().join(CHANGELOG_FILENAME).exists());
        assert!(dir.path().join(DOCS_FILENAME).exists());
        assert!(log.entries(None, None, None).unwrap().is_empty());
    }

    #[test]
    fn test_entries_append_only_with_sequential_ids() {
        let dir = tempfile::tempdir().unwrap();
        let log = StrategyLog::new(dir.path()).unwrap();
        let first = log
            .add_entry("a", "d", "model", "added", vec![], vec![], None)
            .unwrap();
        let second = log
            .add_entry("b", "d", "feature", "changed", vec![], vec![], None)
            .unwrap();
        assert!(first.id.ends_with("-1"));
        assert!(second.id.ends_with("-2"));
        assert_eq!(log.entries(None, None, None).unwrap().len(), 2);
    }

    #[test]
    fn test_category_filter() {
        let dir = tempfile::tempdir().unwrap();
        let log = StrategyLog::new(dir.path()).unwrap();
        log.add_entry("a", "d", "model", "added", vec![], vec![], None)
            .unwrap();
        log.add_entry("b", "d", "configuration", "changed", vec![], vec![], None)
            .unwrap();
        let configs = log.entries(Some("configuration"), None, None).unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].title, "b");
    }

    #[test]
    fn test_configuration_diff_entry() {
        let dir = tempfile::tempdir().unwrap();
        let log = StrategyLog::new(dir.path()).unwrap();
        let old = test_config(dir.path());
        let mut new = old.clone();
        new.edge_min = 0.08;
        new.kelly_cap = 0.15;

        let entry = log.log_configuration_change(&old, &new).unwrap();
        assert_eq!(entry.category, "configuration");
        assert_eq!(entry.changes.len(), 2);
        let edge = entry
            .changes
            .iter()
            .find(|c| c.component == "edge_min")
            .unwrap();
        assert_eq!(edge.old_value, "0.05");
        assert_eq!(edge.new_value, "0.08");
    }

    #[test]
    fn test_no_diff_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let log = StrategyLog::new(dir.path()).unwrap();
        let cfg = test_config(dir.path());
        assert!(log.log_configuration_change(&cfg, &cfg.clone()).is_err());
    }
}
