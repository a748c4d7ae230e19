use crate::errors::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Probability model selection for the forecast -> distribution step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelMode {
    Spread,
    Bands,
}

impl ModelMode {
    pub fn parse(s: &str) -> EngineResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "spread" => Ok(ModelMode::Spread),
            "bands" => Ok(ModelMode::Bands),
            other => Err(EngineError::Config(format!(
                "MODEL_MODE must be 'spread' or 'bands', got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    // Upstream endpoints
    pub zeus_api_base: String,
    pub zeus_api_key: String,
    pub gamma_base: String,
    pub clob_base: String,
    pub metar_api_base: String,
    pub metar_user_agent: String,

    // Trading parameters
    pub active_stations: Vec<String>,
    pub edge_min: f64,
    pub fee_bp: u32,
    pub slippage_bp: u32,
    pub kelly_cap: f64,
    pub per_market_cap: f64,
    pub liquidity_min_usd: f64,
    pub daily_bankroll_cap: f64,

    // Probability model
    pub model_mode: ModelMode,
    pub zeus_likely_pct: f64,
    pub zeus_possible_pct: f64,

    // Dynamic engine
    pub dynamic_interval_seconds: u64,
    pub dynamic_lookahead_days: u32,

    pub execution_mode: String,
    pub log_level: String,
    pub data_dir: PathBuf,
}

impl AppConfig {
    /// Load from environment, then apply overrides from `config.local.yaml`
    /// under the data root's parent (if present).
    pub fn from_env() -> EngineResult<Self> {
        dotenvy::dotenv().ok();

        let mut cfg = Self {
            zeus_api_base: env_var_or("ZEUS_API_BASE", "https://api.zeussubnet.com"),
            zeus_api_key: env_var_or("ZEUS_API_KEY", ""),
            gamma_base: env_var_or("POLY_GAMMA_BASE", "https://gamma-api.polymarket.com"),
            clob_base: env_var_or("POLY_CLOB_BASE", "https://clob.polymarket.com"),
            metar_api_base: env_var_or(
                "METAR_API_BASE",
                "https://aviationweather.gov/api/data/metar",
            ),
            metar_user_agent: env_var_or("METAR_USER_AGENT", "tempest/0.1"),
            active_stations: env_var_or("ACTIVE_STATIONS", "EGLC,KLGA")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            edge_min: parse_env("EDGE_MIN", "0.05")?,
            fee_bp: parse_env("FEE_BP", "50")?,
            slippage_bp: parse_env("SLIPPAGE_BP", "30")?,
            kelly_cap: parse_env("KELLY_CAP", "0.10")?,
            per_market_cap: parse_env("PER_MARKET_CAP", "500")?,
            liquidity_min_usd: parse_env("LIQUIDITY_MIN_USD", "1000")?,
            daily_bankroll_cap: parse_env("DAILY_BANKROLL_CAP", "3000")?,
            model_mode: ModelMode::parse(&env_var_or("MODEL_MODE", "spread"))?,
            zeus_likely_pct: parse_env("ZEUS_LIKELY_PCT", "0.80")?,
            zeus_possible_pct: parse_env("ZEUS_POSSIBLE_PCT", "0.95")?,
            dynamic_interval_seconds: parse_env("DYNAMIC_INTERVAL_SECONDS", "900")?,
            dynamic_lookahead_days: parse_env("DYNAMIC_LOOKAHEAD_DAYS", "2")?,
            execution_mode: env_var_or("EXECUTION_MODE", "paper"),
            log_level: env_var_or("LOG_LEVEL", "info"),
            data_dir: PathBuf::from(env_var_or("TEMPEST_DATA_DIR", "data")),
        };

        let override_path = PathBuf::from(env_var_or("TEMPEST_CONFIG", "config.local.yaml"));
        if override_path.exists() {
            cfg.apply_overrides_file(&override_path)?;
        }

        let problems = cfg.validate();
        if !problems.is_empty() {
            return Err(EngineError::Config(problems.join("; ")));
        }

        Ok(cfg)
    }

    fn apply_overrides_file(&mut self, path: &Path) -> EngineResult<()> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("read {}: {e}", path.display())))?;
        let overrides: ConfigOverrides = serde_yaml::from_str(&raw)
            .map_err(|e| EngineError::Config(format!("parse {}: {e}", path.display())))?;
        overrides.apply(self);
        tracing::info!(path = %path.display(), "applied config overrides");
        Ok(())
    }

    /// Validation failures as a structured list. Empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !(0.0..1.0).contains(&self.edge_min) {
            problems.push(format!("edge_min must be in [0,1): {}", self.edge_min));
        }
        if !(0.0..=1.0).contains(&self.kelly_cap) || self.kelly_cap == 0.0 {
            problems.push(format!("kelly_cap must be in (0,1]: {}", self.kelly_cap));
        }
        if self.per_market_cap <= 0.0 {
            problems.push(format!("per_market_cap must be > 0: {}", self.per_market_cap));
        }
        if self.liquidity_min_usd < 0.0 {
            problems.push(format!(
                "liquidity_min_usd must be >= 0: {}",
                self.liquidity_min_usd
            ));
        }
        if self.daily_bankroll_cap <= 0.0 {
            problems.push(format!(
                "daily_bankroll_cap must be > 0: {}",
                self.daily_bankroll_cap
            ));
        }
        if self.active_stations.is_empty() {
            problems.push("active_stations must not be empty".to_string());
        }
        if self.dynamic_interval_seconds == 0 {
            problems.push("dynamic_interval_seconds must be >= 1".to_string());
        }
        if self.dynamic_lookahead_days == 0 {
            problems.push("dynamic_lookahead_days must be >= 1".to_string());
        }
        if !(0.0..1.0).contains(&self.zeus_likely_pct)
            || !(0.0..1.0).contains(&self.zeus_possible_pct)
        {
            problems.push("zeus confidence levels must be in (0,1)".to_string());
        }
        if self.execution_mode != "paper" {
            problems.push(format!(
                "execution_mode '{}' unsupported (only 'paper')",
                self.execution_mode
            ));
        }
        problems
    }

    /// Persist an updated configuration: validate, back up the previous
    /// override file, write the new one, and append a changelog entry with
    /// the per-key diff. On validation failure nothing is written and the
    /// error carries the full problem list.
    pub fn apply_update(
        &mut self,
        updated: AppConfig,
        override_path: &Path,
        changelog: &crate::strategy::StrategyLog,
    ) -> EngineResult<()> {
        let problems = updated.validate();
        if !problems.is_empty() {
            return Err(EngineError::Config(problems.join("; ")));
        }

        if override_path.exists() {
            let backup = override_path.with_extension("yaml.bak");
            std::fs::copy(override_path, &backup)
                .map_err(|e| EngineError::Config(format!("backup config: {e}")))?;
            tracing::debug!(path = %backup.display(), "backed up previous config");
        }

        let yaml = serde_yaml::to_string(&updated)
            .map_err(|e| EngineError::Config(format!("serialize config: {e}")))?;
        std::fs::write(override_path, yaml)
            .map_err(|e| EngineError::Config(format!("write config: {e}")))?;

        if let Err(e) = changelog.log_configuration_change(self, &updated) {
            tracing::warn!(error = %e, "failed to append configuration changelog entry");
        }

        *self = updated;
        Ok(())
    }

    /// Trading and model parameters as (name, value) pairs, used for the
    /// changelog diff.
    pub fn tunable_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("edge_min", self.edge_min.to_string()),
            ("fee_bp", self.fee_bp.to_string()),
            ("slippage_bp", self.slippage_bp.to_string()),
            ("kelly_cap", self.kelly_cap.to_string()),
            ("per_market_cap", self.per_market_cap.to_string()),
            ("liquidity_min_usd", self.liquidity_min_usd.to_string()),
            ("daily_bankroll_cap", self.daily_bankroll_cap.to_string()),
            ("active_stations", self.active_stations.join(",")),
            (
                "model_mode",
                match self.model_mode {
                    ModelMode::Spread => "spread".to_string(),
                    ModelMode::Bands => "bands".to_string(),
                },
            ),
            ("zeus_likely_pct", self.zeus_likely_pct.to_string()),
            ("zeus_possible_pct", self.zeus_possible_pct.to_string()),
            (
                "dynamic_interval_seconds",
                self.dynamic_interval_seconds.to_string(),
            ),
            (
                "dynamic_lookahead_days",
                self.dynamic_lookahead_days.to_string(),
            ),
        ]
    }
}

/// Optional per-key overrides accepted from `config.local.yaml`.
/// Unknown keys are ignored; absent keys leave env values alone.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigOverrides {
    zeus_api_base: Option<String>,
    zeus_api_key: Option<String>,
    gamma_base: Option<String>,
    clob_base: Option<String>,
    metar_api_base: Option<String>,
    metar_user_agent: Option<String>,
    active_stations: Option<Vec<String>>,
    edge_min: Option<f64>,
    fee_bp: Option<u32>,
    slippage_bp: Option<u32>,
    kelly_cap: Option<f64>,
    per_market_cap: Option<f64>,
    liquidity_min_usd: Option<f64>,
    daily_bankroll_cap: Option<f64>,
    model_mode: Option<ModelMode>,
    zeus_likely_pct: Option<f64>,
    zeus_possible_pct: Option<f64>,
    dynamic_interval_seconds: Option<u64>,
    dynamic_lookahead_days: Option<u32>,
    execution_mode: Option<String>,
    log_level: Option<String>,
    data_dir: Option<PathBuf>,
}

impl ConfigOverrides {
    fn apply(self, cfg: &mut AppConfig) {
        macro_rules! set {
            ($field:ident) => {
                if let Some(v) = self.$field {
                    cfg.$field = v;
                }
            };
        }
        set!(zeus_api_base);
        set!(zeus_api_key);
        set!(gamma_base);
        set!(clob_base);
        set!(metar_api_base);
        set!(metar_user_agent);
        set!(active_stations);
        set!(edge_min);
        set!(fee_bp);
        set!(slippage_bp);
        set!(kelly_cap);
        set!(per_market_cap);
        set!(liquidity_min_usd);
        set!(daily_bankroll_cap);
        set!(model_mode);
        set!(zeus_likely_pct);
        set!(zeus_possible_pct);
        set!(dynamic_interval_seconds);
        set!(dynamic_lookahead_days);
        set!(execution_mode);
        set!(log_level);
        set!(data_dir);
    }
}

fn env_var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: &str) -> EngineResult<T>
where
    T::Err: std::fmt::Display,
{
    env_var_or(key, default)
        .parse::<T>()
        .map_err(|e| EngineError::Config(format!("{key}: {e}")))
}

#[cfg(test)]
pub fn test_config(data_dir: &Path) -> AppConfig {
    AppConfig {
        zeus_api_base: "http://localhost:0".into(),
        zeus_api_key: "test".into(),
        gamma_base: "http://localhost:0".into(),
        clob_base: "http://localhost:0".into(),
        metar_api_base: "http://localhost:0".into(),
        metar_user_agent: "tempest-test".into(),
        active_stations: vec!["EGLC".into(), "KLGA".into()],
        edge_min: 0.05,
        fee_bp: 50,
        slippage_bp: 30,
        kelly_cap: 0.10,
        per_market_cap: 500.0,
        liquidity_min_usd: 1000.0,
        daily_bankroll_cap: 3000.0,
        model_mode: ModelMode::Spread,
        zeus_likely_pct: 0.80,
        zeus_possible_pct: 0.95,
        dynamic_interval_seconds: 900,
        dynamic_lookahead_days: 2,
        execution_mode: "paper".into(),
        log_level: "info".into(),
        data_dir: data_dir.to_path_buf(),
    }
}
