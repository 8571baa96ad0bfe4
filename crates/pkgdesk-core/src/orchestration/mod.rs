pub mod installed_cache;
pub mod orchestrator;

pub use installed_cache::{InstalledPackageCache, InstalledSnapshot};
pub use orchestrator::{InstallRequest, PackageOrchestrator, UninstallRequest, UpdateRequest};

use crate::models::CoreError;

pub type OrchestrationResult<T> = Result<T, CoreError>;
