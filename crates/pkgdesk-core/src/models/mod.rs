pub mod command;
pub mod error;
pub mod event;
pub mod package;
pub mod progress;
pub mod version;

pub use command::{EngineCommand, EngineOperation, EngineRunResult};
pub use error::{CoreError, CoreErrorKind};
pub use event::{ChangeEvent, ChangeKind};
pub use package::{EnginePackage, PackageId, PackageRecord, SourceUri, highest_installed};
pub use progress::ProgressState;
pub use version::PackageVersion;
