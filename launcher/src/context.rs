use crate::config::LauncherConfig;
use crate::layout::InstallLayout;
use crate::session::Session;
use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Timeout and cancellation applied to one long-running step
#[derive(Debug, Clone, Default)]
pub struct StepLimits {
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
}

impl StepLimits {
    pub fn new(timeout: Option<Duration>, cancel: CancellationToken) -> Self {
        Self { timeout, cancel }
    }

    /// Drive `work` until it finishes, times out or is cancelled.
    /// Dropping `work` on timeout or cancellation is what stops it, so child
    /// processes it owns must be spawned with `kill_on_drop`.
    pub async fn run<T, E>(
        &self,
        work: impl Future<Output = Result<T, E>>,
        timed_out: impl FnOnce() -> E,
        cancelled: impl FnOnce() -> E,
    ) -> Result<T, E> {
        let bounded = async {
            match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, work).await {
                    Ok(result) => result,
                    Err(_) => Err(timed_out()),
                },
                None => work.await,
            }
        };

        tokio::select! {
            result = bounded => result,
            _ = self.cancel.cancelled() => Err(cancelled()),
        }
    }
}

/// Everything a command needs, passed explicitly instead of living in globals.
/// The session is dropped (and its file removed) when verification fails, see
/// `session::SessionStore::load_verified`.
pub struct LauncherContext {
    pub config: LauncherConfig,
    pub session: Option<Session>,
    pub cancel: CancellationToken,
}

impl LauncherContext {
    pub fn new(config: LauncherConfig, session: Option<Session>) -> Self {
        Self {
            config,
            session,
            cancel: CancellationToken::new(),
        }
    }

    pub fn layout(&self, version: &str) -> Result<InstallLayout> {
        Ok(InstallLayout::new(
            &self.config.install_root()?,
            version,
            &self.config.emulator.executable,
        ))
    }

    /// Version named on the command line, or the configured default
    pub fn resolve_version(&self, requested: Option<&str>) -> String {
        requested
            .map(str::to_string)
            .unwrap_or_else(|| self.config.default_version.clone())
    }

    pub fn step_limits(&self) -> StepLimits {
        StepLimits::new(self.config.step_timeout(), self.cancel.clone())
    }
}
