use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use reinforce_core::{OfflineService, RedbStore, SyncConfig, SyncCoordinator};
use tokio::runtime::Runtime;

pub struct Paths {
    pub db: PathBuf,
    pub config: Option<PathBuf>,
}

impl Paths {
    pub fn load_config(&self) -> anyhow::Result<SyncConfig> {
        match &self.config {
            Some(path) => SyncConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display())),
            None => Ok(SyncConfig::default()),
        }
    }
}

/// An open store plus the runtime its coordinator spawns on. Commands run
/// offline: any sync that fires fails fast and leaves local state untouched.
pub struct Session {
    pub coordinator: SyncCoordinator,
    _runtime: Runtime,
}

impl Session {
    pub fn open(paths: &Paths) -> anyhow::Result<Self> {
        let config = paths.load_config()?;
        let store = RedbStore::open(&paths.db)
            .with_context(|| format!("failed to open store {}", paths.db.display()))?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start runtime")?;
        let coordinator = SyncCoordinator::builder(Arc::new(store), Arc::new(OfflineService))
            .config(config)
            .runtime(runtime.handle().clone())
            .build()?;
        Ok(Self {
            coordinator,
            _runtime: runtime,
        })
    }
}
