use std::sync::Arc;

use crate::config::BackupJobConfig;
use crate::error::{BackupError, Result};
use crate::hooks::HookRunner;
use crate::store::{self, BackupStore};

/// Everything a backup cycle needs, built once from the job config and
/// shared by the scheduler, the one-shot runner and the menu
#[derive(Clone)]
pub struct JobContext {
    pub config: Arc<BackupJobConfig>,
    pub store: Option<Arc<dyn BackupStore>>,
    pub hooks: HookRunner,
}

impl JobContext {
    pub fn from_config(config: BackupJobConfig) -> Result<Self> {
        let store = match &config.remote {
            Some(remote) => Some(store::build_store(remote, config.request_timeout())?),
            None => None,
        };
        let hooks = HookRunner::new(config.hook_timeout());
        Ok(Self {
            config: Arc::new(config),
            store,
            hooks,
        })
    }

    /// Replace the configured store
    pub fn with_store(mut self, store: Arc<dyn BackupStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Store for remote operations, or an error naming the missing section
    pub fn require_store(&self) -> Result<Arc<dyn BackupStore>> {
        self.store
            .clone()
            .ok_or_else(|| BackupError::config("no remote configured"))
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("config", &self.config)
            .field("store", &self.store.as_ref().map(|s| s.name()))
            .field("hooks", &self.hooks)
            .finish()
    }
}
