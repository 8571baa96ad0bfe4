pub mod chocolatey;

pub use chocolatey::{ChocolateyGateway, engine_command_args, parse_installed_packages};

use crate::models::{CoreError, EngineCommand, EnginePackage, EngineRunResult};

pub type EngineResult<T> = Result<T, CoreError>;

/// Blocking adapter around the package engine.
///
/// Calls may take seconds; the orchestration layer always invokes them on the
/// blocking pool. A run that completes with a non-success exit code is returned as
/// `Ok`; `Err` is reserved for calls that could not be carried out at all.
pub trait EngineGateway: Send + Sync {
    fn list_installed(&self) -> EngineResult<Vec<EnginePackage>>;

    fn run(&self, command: &EngineCommand) -> EngineResult<EngineRunResult>;
}
