//! Long-lived collaborators, built once at startup and threaded explicitly
//! into the engines. Everything here is read-only after construction; the
//! mutable pieces (ledger files, snapshot streams) live with their owners.

use crate::calibration::CalibrationStore;
use crate::config::AppConfig;
use crate::errors::EngineResult;
use crate::fetch::JitFetcher;
use crate::registry::StationRegistry;
use crate::strategy::StrategyLog;
use crate::toggles::FeatureToggles;
use std::path::PathBuf;

pub struct Services {
    pub config: AppConfig,
    pub registry: StationRegistry,
    pub calibration: CalibrationStore,
    pub toggles: FeatureToggles,
    pub fetcher: JitFetcher,
    pub strategy: StrategyLog,
}

impl Services {
    pub fn init(config: AppConfig) -> EngineResult<Self> {
        let data_dir = config.data_dir.clone();

        let registry = StationRegistry::load(&data_dir.join("registry").join("stations.csv"));
        let calibration = CalibrationStore::load(&data_dir.join("calibration"));
        let toggles = FeatureToggles::load(&data_dir.join("config").join("feature_toggles.json"));
        let fetcher = JitFetcher::new(&config);
        let strategy = StrategyLog::new(&data_dir.join("strategy"))?;

        Ok(Self {
            config,
            registry,
            calibration,
            toggles,
            fetcher,
            strategy,
        })
    }

    pub fn trades_dir(&self) -> PathBuf {
        self.config.data_dir.join("trades")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.config.data_dir.join("snapshots").join("dynamic")
    }

    pub fn price_snapshots_dir(&self) -> PathBuf {
        self.config.data_dir.join("price_snapshots")
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.config.data_dir.join("runs").join("backtests")
    }
}
