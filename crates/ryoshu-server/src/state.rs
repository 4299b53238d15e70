//! Shared state for HTTP handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ryoshu::config::Config;
use ryoshu::{Database, JobProgressBroadcaster};
use tokio::sync::watch;

use crate::auth::Authenticator;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    db: Database,
    broadcaster: JobProgressBroadcaster,
    authenticator: Authenticator,
    stream_interval: Duration,
    stream_limit: u64,
    /// Canonical `storage.upload_dir`, if configured and present.
    upload_root: Option<PathBuf>,
    /// Flips to true on shutdown; open status streams end when it does.
    shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(
        config: &Config,
        db: Database,
        broadcaster: JobProgressBroadcaster,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                db,
                broadcaster,
                authenticator: Authenticator::from_config(&config.auth),
                stream_interval: config.server.stream_interval(),
                stream_limit: config.server.stream_limit,
                upload_root: config.storage.upload_dir.as_deref().and_then(canonical_root),
                shutdown,
            }),
        }
    }

    pub fn db(&self) -> &Database {
        &self.inner.db
    }

    pub fn broadcaster(&self) -> &JobProgressBroadcaster {
        &self.inner.broadcaster
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.inner.authenticator
    }

    pub fn stream_interval(&self) -> Duration {
        self.inner.stream_interval
    }

    pub fn stream_limit(&self) -> u64 {
        self.inner.stream_limit
    }

    pub fn upload_root(&self) -> Option<&Path> {
        self.inner.upload_root.as_deref()
    }

    pub fn shutdown(&self) -> watch::Receiver<bool> {
        self.inner.shutdown.clone()
    }
}

fn canonical_root(dir: &Path) -> Option<PathBuf> {
    match std::fs::canonicalize(dir) {
        Ok(root) => Some(root),
        Err(e) => {
            tracing::warn!(
                "Upload directory {} is unusable ({}); local file references are limited to admins",
                dir.display(),
                e
            );
            None
        }
    }
}
