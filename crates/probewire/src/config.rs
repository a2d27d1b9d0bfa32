//! Connect-time configuration.

use std::ffi::OsString;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::pipe::{ForkExec, WorkerLauncher};
use crate::resolve::Resolver;

/// Where a worker's stderr goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StderrMode {
    /// Redirect to `/dev/null`.
    Discard,
    /// Share the caller's stderr.
    Inherit,
}

impl Default for StderrMode {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Inherit
        } else {
            Self::Discard
        }
    }
}

/// How `close` collects the worker's exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReapPolicy {
    /// Single non-blocking wait. A worker that has not exited yet is left
    /// running and reported as such.
    #[default]
    NonBlocking,
    /// Wait up to the given duration, then SIGKILL and reap.
    Grace(Duration),
}

#[derive(Clone)]
pub struct ConnectOptions {
    pub search_path: Option<OsString>,
    pub stderr: StderrMode,
    pub reap_policy: ReapPolicy,
    pub verify_exec: bool,
    pub launcher: Arc<dyn WorkerLauncher>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self {
            search_path: None,
            stderr: StderrMode::default(),
            reap_policy: ReapPolicy::default(),
            verify_exec: false,
            launcher: Arc::new(ForkExec),
        }
    }

    /// Look relative identifiers up here instead of in `PATH`.
    pub fn with_search_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.search_path = Some(search_path.into());
        self
    }

    pub fn with_stderr(mut self, mode: StderrMode) -> Self {
        self.stderr = mode;
        self
    }

    pub fn with_reap_policy(mut self, policy: ReapPolicy) -> Self {
        self.reap_policy = policy;
        self
    }

    /// Make `connect` fail with `ChildExecFailed` when the worker image
    /// cannot be exec'd, instead of reporting it only at close.
    pub fn with_verify_exec(mut self, verify: bool) -> Self {
        self.verify_exec = verify;
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn WorkerLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub(crate) fn resolver(&self) -> Resolver {
        match &self.search_path {
            Some(path) => Resolver::with_search_path(path.clone()),
            None => Resolver::from_env(),
        }
    }
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("search_path", &self.search_path)
            .field("stderr", &self.stderr)
            .field("reap_policy", &self.reap_policy)
            .field("verify_exec", &self.verify_exec)
            .finish_non_exhaustive()
    }
}
