use serde::Serialize;

use crate::models::{PackageId, PackageVersion, SourceUri};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineOperation {
    List,
    Install,
    Uninstall,
    Upgrade,
}

impl EngineOperation {
    pub fn command_name(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Install => "install",
            Self::Uninstall => "uninstall",
            Self::Upgrade => "upgrade",
        }
    }

    pub fn is_mutating(self) -> bool {
        !matches!(self, Self::List)
    }
}

/// Immutable description of one engine invocation.
///
/// Built once per call through the named constructors and `with_*` setters, then
/// handed to the gateway by reference.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct EngineCommand {
    operation: EngineOperation,
    package: Option<PackageId>,
    version: Option<PackageVersion>,
    source: Option<SourceUri>,
    local_only: bool,
    force: bool,
    allow_unofficial: bool,
}

impl EngineCommand {
    fn new(operation: EngineOperation, package: Option<PackageId>) -> Self {
        Self {
            operation,
            package,
            version: None,
            source: None,
            local_only: false,
            force: false,
            allow_unofficial: true,
        }
    }

    pub fn list_installed() -> Self {
        Self::new(EngineOperation::List, None).with_local_only(true)
    }

    pub fn install(package: PackageId) -> Self {
        Self::new(EngineOperation::Install, Some(package))
    }

    pub fn uninstall(package: PackageId) -> Self {
        Self::new(EngineOperation::Uninstall, Some(package))
    }

    pub fn upgrade(package: PackageId) -> Self {
        Self::new(EngineOperation::Upgrade, Some(package))
    }

    pub fn with_version(mut self, version: Option<PackageVersion>) -> Self {
        self.version = version;
        self
    }

    pub fn with_source(mut self, source: Option<SourceUri>) -> Self {
        self.source = source;
        self
    }

    pub fn with_local_only(mut self, local_only: bool) -> Self {
        self.local_only = local_only;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_allow_unofficial(mut self, allow_unofficial: bool) -> Self {
        self.allow_unofficial = allow_unofficial;
        self
    }

    pub fn operation(&self) -> EngineOperation {
        self.operation
    }

    pub fn package(&self) -> Option<&PackageId> {
        self.package.as_ref()
    }

    pub fn version(&self) -> Option<&PackageVersion> {
        self.version.as_ref()
    }

    pub fn source(&self) -> Option<&SourceUri> {
        self.source.as_ref()
    }

    pub fn local_only(&self) -> bool {
        self.local_only
    }

    pub fn force(&self) -> bool {
        self.force
    }

    pub fn allow_unofficial(&self) -> bool {
        self.allow_unofficial
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct EngineRunResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl EngineRunResult {
    pub fn succeeded(&self, success_codes: &[i32]) -> bool {
        success_codes.contains(&self.exit_code)
    }

    /// Most useful line to show when the run failed: last non-empty stderr line,
    /// falling back to stdout.
    pub fn failure_reason(&self) -> String {
        last_non_empty_line(&self.stderr)
            .or_else(|| last_non_empty_line(&self.stdout))
            .map_or_else(
                || format!("engine exited with code {}", self.exit_code),
                |line| format!("engine exited with code {}: {line}", self.exit_code),
            )
    }
}

fn last_non_empty_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).rfind(|line| !line.is_empty())
}
