//! Orchestrator configuration.
//!
//! There is no on-disk format; hosts build [`OrchestratorSettings`] in code and may
//! overlay a few environment variables with [`OrchestratorSettings::from_env`].

use std::path::PathBuf;
use std::time::Duration;

use crate::models::CoreError;

pub const ENGINE_ENV: &str = "PKGDESK_ENGINE";
pub const ENGINE_TIMEOUT_ENV: &str = "PKGDESK_ENGINE_TIMEOUT_SECS";
pub const UNINSTALL_POLICY_ENV: &str = "PKGDESK_UNINSTALL_POLICY";

pub const DEFAULT_ENGINE_PROGRAM: &str = "choco";
/// Exit codes the engine uses for success, including "reboot initiated" and
/// "reboot required".
pub const DEFAULT_SUCCESS_EXIT_CODES: &[i32] = &[0, 1641, 3010];

/// What the cache does once a mutating engine call returns.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RefreshPolicy {
    /// Invalidate, then immediately reload the installed list.
    #[default]
    Eager,
    /// Invalidate only; the next read reloads.
    Lazy,
}

/// How an uninstall without a version is treated.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum UninstallVersionPolicy {
    /// Reject the request before the engine is called.
    #[default]
    Required,
    /// Let the engine remove whichever version is installed.
    AnyInstalled,
}

/// Which version an `Installed` event reports when it differs from the pinned request.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum VersionMismatchPolicy {
    #[default]
    PublishResolved,
    PublishRequested,
    /// Publish nothing for that install.
    Suppress,
}

/// Configuration for the engine gateway and the package orchestrator.
///
/// ```
/// use std::time::Duration;
/// use pkgdesk_core::settings::{OrchestratorSettings, UninstallVersionPolicy};
///
/// let settings = OrchestratorSettings::new()
///     .with_engine_timeout(Some(Duration::from_secs(600)))
///     .with_uninstall_policy(UninstallVersionPolicy::AnyInstalled);
/// assert_eq!(settings.engine_program().to_str(), Some("choco"));
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OrchestratorSettings {
    engine_program: PathBuf,
    engine_timeout: Option<Duration>,
    success_exit_codes: Vec<i32>,
    allow_unofficial: bool,
    refresh_policy: RefreshPolicy,
    uninstall_policy: UninstallVersionPolicy,
    version_mismatch_policy: VersionMismatchPolicy,
}

impl OrchestratorSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `PKGDESK_*` environment variables.
    pub fn from_env() -> Result<Self, CoreError> {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Overlays values produced by `lookup`; unknown or malformed values are rejected.
    pub fn overlay(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, CoreError> {
        if let Some(program) = lookup(ENGINE_ENV).filter(|value| !value.trim().is_empty()) {
            self.engine_program = PathBuf::from(program.trim());
        }

        if let Some(raw) = lookup(ENGINE_TIMEOUT_ENV) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                CoreError::invalid_input(format!(
                    "{ENGINE_TIMEOUT_ENV} must be a whole number of seconds, got '{raw}'"
                ))
            })?;
            self.engine_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Some(raw) = lookup(UNINSTALL_POLICY_ENV) {
            self.uninstall_policy = match raw.trim().to_ascii_lowercase().as_str() {
                "required" => UninstallVersionPolicy::Required,
                "any" => UninstallVersionPolicy::AnyInstalled,
                _ => {
                    return Err(CoreError::invalid_input(format!(
                        "{UNINSTALL_POLICY_ENV} must be 'required' or 'any', got '{raw}'"
                    )));
                }
            };
        }

        Ok(self)
    }

    pub fn with_engine_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.engine_program = program.into();
        self
    }

    /// `None` leaves engine calls unbounded.
    pub fn with_engine_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.engine_timeout = timeout;
        self
    }

    pub fn with_success_exit_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.success_exit_codes = codes.into_iter().collect();
        self
    }

    pub fn with_allow_unofficial(mut self, allow: bool) -> Self {
        self.allow_unofficial = allow;
        self
    }

    pub fn with_refresh_policy(mut self, policy: RefreshPolicy) -> Self {
        self.refresh_policy = policy;
        self
    }

    pub fn with_uninstall_policy(mut self, policy: UninstallVersionPolicy) -> Self {
        self.uninstall_policy = policy;
        self
    }

    pub fn with_version_mismatch_policy(mut self, policy: VersionMismatchPolicy) -> Self {
        self.version_mismatch_policy = policy;
        self
    }

    pub fn engine_program(&self) -> &std::path::Path {
        &self.engine_program
    }

    pub fn engine_timeout(&self) -> Option<Duration> {
        self.engine_timeout
    }

    pub fn success_exit_codes(&self) -> &[i32] {
        &self.success_exit_codes
    }

    pub fn allow_unofficial(&self) -> bool {
        self.allow_unofficial
    }

    pub fn refresh_policy(&self) -> RefreshPolicy {
        self.refresh_policy
    }

    pub fn uninstall_policy(&self) -> UninstallVersionPolicy {
        self.uninstall_policy
    }

    pub fn version_mismatch_policy(&self) -> VersionMismatchPolicy {
        self.version_mismatch_policy
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            engine_program: PathBuf::from(DEFAULT_ENGINE_PROGRAM),
            engine_timeout: None,
            success_exit_codes: DEFAULT_SUCCESS_EXIT_CODES.to_vec(),
            allow_unofficial: true,
            refresh_policy: RefreshPolicy::default(),
            uninstall_policy: UninstallVersionPolicy::default(),
            version_mismatch_policy: VersionMismatchPolicy::default(),
        }
    }
}
