use serde::Serialize;

use crate::models::EngineOperation;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreErrorKind {
    /// The package engine failed or could not be reached.
    Engine,
    Install,
    Uninstall,
    Update,
    InvalidInput,
    ParseFailure,
    Timeout,
    ProcessFailure,
    Internal,
}

/// Structured, attributable failure returned by every layer of the core.
///
/// Operation errors (`Install`, `Uninstall`, `Update`) keep the engine failure that
/// caused them in `cause`, which is also exposed through [`std::error::Error::source`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub operation: Option<EngineOperation>,
    pub package: Option<String>,
    pub version: Option<String>,
    pub kind: CoreErrorKind,
    pub message: String,
    #[source]
    pub cause: Option<Box<CoreError>>,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            operation: None,
            package: None,
            version: None,
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::InvalidInput, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::Internal, message)
    }

    pub fn with_operation(mut self, operation: EngineOperation) -> Self {
        self.operation = Some(operation);
        self
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_cause(mut self, cause: CoreError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Reclassifies any gateway-level failure as an engine failure.
    ///
    /// Process, timeout and parse failures keep their detail in `cause`; an error that
    /// is already `Engine` is returned untouched.
    pub fn into_engine_error(self) -> Self {
        if self.kind == CoreErrorKind::Engine {
            return self;
        }

        CoreError {
            operation: self.operation,
            package: self.package.clone(),
            version: self.version.clone(),
            kind: CoreErrorKind::Engine,
            message: self.message.clone(),
            cause: Some(Box::new(self)),
        }
    }

    /// Walks `cause` down to the innermost error.
    pub fn root_cause(&self) -> &CoreError {
        let mut current = self;
        while let Some(next) = current.cause.as_deref() {
            current = next;
        }
        current
    }
}
