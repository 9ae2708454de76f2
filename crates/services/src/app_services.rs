use std::sync::Arc;

use exam_core::model::ExamChain;
use exam_storage::repository::{SessionStore, Storage};

use crate::Clock;
use crate::config::RuntimeConfig;
use crate::error::ExamServicesError;
use crate::remote::{HttpRemoteAuthority, RemoteAuthority};
use crate::session::{ExamSession, ReturnToOrigin, SessionOptions};

/// Assembles the store, the remote authority and the clock for the app.
#[derive(Clone)]
pub struct ExamServices {
    clock: Clock,
    config: RuntimeConfig,
    store: Arc<dyn SessionStore>,
    remote: Arc<dyn RemoteAuthority>,
}

impl ExamServices {
    /// Build services backed by `SQLite` storage and the HTTP remote.
    ///
    /// # Errors
    ///
    /// Returns `ExamServicesError` if storage initialization or the HTTP
    /// client setup fails.
    pub async fn new_sqlite(config: RuntimeConfig, clock: Clock) -> Result<Self, ExamServicesError> {
        let remote: Arc<dyn RemoteAuthority> =
            Arc::new(HttpRemoteAuthority::new(config.remote.clone())?);
        let storage = Storage::sqlite(&config.db_url).await?;
        Ok(Self::from_parts(config, clock, storage.sessions, remote))
    }

    #[must_use]
    pub fn from_parts(
        config: RuntimeConfig,
        clock: Clock,
        store: Arc<dyn SessionStore>,
        remote: Arc<dyn RemoteAuthority>,
    ) -> Self {
        Self {
            clock,
            config,
            store,
            remote,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> Arc<dyn SessionStore> {
        Arc::clone(&self.store)
    }

    /// Mount an exam session over `chain`. `options.checkpoint_every_secs`
    /// of zero falls back to the configured cadence.
    ///
    /// # Errors
    ///
    /// Returns `ExamServicesError::Runtime` if the chain cannot be mounted.
    pub async fn start_session(
        &self,
        chain: ExamChain,
        mut options: SessionOptions,
        return_to_origin: ReturnToOrigin,
    ) -> Result<ExamSession, ExamServicesError> {
        if options.checkpoint_every_secs == 0 {
            options.checkpoint_every_secs = self.config.checkpoint_every_secs;
        }
        let session = ExamSession::mount(
            chain,
            options,
            self.clock.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.remote),
            return_to_origin,
        )
        .await?;
        Ok(session)
    }
}
