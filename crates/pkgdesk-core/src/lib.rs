//! Package orchestration core: engine gateway, single-flight installed-package cache,
//! progress reporting and change notifications.

pub mod events;
pub mod execution;
pub mod gateway;
pub mod mapping;
pub mod models;
pub mod orchestration;
pub mod progress;
pub mod settings;

pub use events::{ChangeNotificationBus, ChangeSubscriber, SubscriptionId};
pub use orchestration::{
    InstallRequest, InstalledPackageCache, InstalledSnapshot, OrchestrationResult,
    PackageOrchestrator, UninstallRequest, UpdateRequest,
};
pub use progress::{ProgressGuard, ProgressReporter};
pub use settings::OrchestratorSettings;
