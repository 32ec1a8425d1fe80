//! Application context: the explicitly-owned singletons.
//!
//! Constructed once at startup and threaded through every component; nothing
//! in the crate reaches for ambient global state.

use crate::config::Config;
use crate::error::Result;
use crate::events::EventBus;
use crate::git::WorktreeManager;
use crate::store::Store;

pub struct AppContext {
    pub config: Config,
    pub store: Store,
    pub bus: EventBus,
    pub worktrees: WorktreeManager,
}

impl AppContext {
    /// Open the store and wire the shared services.
    pub fn new(config: Config) -> Result<Self> {
        let store = Store::open(&config.db_path)?;
        Ok(Self::with_store(config, store))
    }

    /// Wire the context around an existing store (tests use the in-memory
    /// variant).
    pub fn with_store(config: Config, store: Store) -> Self {
        let worktrees =
            WorktreeManager::new(config.worktree_base_dir.clone(), config.git_path.clone());
        Self {
            config,
            store,
            bus: EventBus::new(),
            worktrees,
        }
    }
}
