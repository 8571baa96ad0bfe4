use std::sync::Arc;

use crate::events::ChangeNotificationBus;
use crate::gateway::EngineGateway;
use crate::mapping::PackageMapper;
use crate::models::{
    ChangeEvent, ChangeKind, CoreError, CoreErrorKind, EngineCommand, EngineOperation,
    EngineRunResult, PackageId, PackageRecord, PackageVersion, SourceUri, highest_installed,
};
use crate::orchestration::{InstalledPackageCache, InstalledSnapshot, OrchestrationResult};
use crate::progress::ProgressReporter;
use crate::settings::{
    OrchestratorSettings, RefreshPolicy, UninstallVersionPolicy, VersionMismatchPolicy,
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstallRequest {
    pub package: PackageId,
    pub version: Option<PackageVersion>,
    pub source: Option<SourceUri>,
    pub force: bool,
}

impl InstallRequest {
    pub fn new(package: PackageId) -> Self {
        Self {
            package,
            version: None,
            source: None,
            force: false,
        }
    }

    pub fn with_version(mut self, version: PackageVersion) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_source(mut self, source: SourceUri) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UninstallRequest {
    pub package: PackageId,
    pub version: Option<PackageVersion>,
    pub force: bool,
}

impl UninstallRequest {
    pub fn new(package: PackageId, version: Option<PackageVersion>) -> Self {
        Self {
            package,
            version,
            force: false,
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UpdateRequest {
    pub package: PackageId,
    pub source: Option<SourceUri>,
}

impl UpdateRequest {
    pub fn new(package: PackageId) -> Self {
        Self {
            package,
            source: None,
        }
    }

    pub fn with_source(mut self, source: SourceUri) -> Self {
        self.source = Some(source);
        self
    }
}

/// Coordinates engine calls, the installed-package cache, progress and change events.
///
/// Every mutating operation runs: begin progress, invoke the engine, refresh the
/// cache, publish a change event, end progress. Only the engine call decides success;
/// the cache is refreshed whether or not it succeeded, and no event is published for
/// a failed call.
pub struct PackageOrchestrator {
    gateway: Arc<dyn EngineGateway>,
    cache: InstalledPackageCache,
    progress: Arc<ProgressReporter>,
    bus: Arc<ChangeNotificationBus>,
    settings: OrchestratorSettings,
}

impl PackageOrchestrator {
    pub fn new(
        gateway: Arc<dyn EngineGateway>,
        mapper: Arc<dyn PackageMapper>,
        progress: Arc<ProgressReporter>,
        bus: Arc<ChangeNotificationBus>,
        settings: OrchestratorSettings,
    ) -> Self {
        let cache = InstalledPackageCache::new(gateway.clone(), mapper, progress.clone());
        Self {
            gateway,
            cache,
            progress,
            bus,
            settings,
        }
    }

    pub fn cache(&self) -> &InstalledPackageCache {
        &self.cache
    }

    pub fn progress(&self) -> &Arc<ProgressReporter> {
        &self.progress
    }

    pub fn bus(&self) -> &Arc<ChangeNotificationBus> {
        &self.bus
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub async fn installed_packages(&self, force: bool) -> OrchestrationResult<InstalledSnapshot> {
        self.cache.get(force).await
    }

    /// Highest installed version of `package`, from the cached listing when present.
    pub async fn find_installed(
        &self,
        package: &PackageId,
    ) -> OrchestrationResult<Option<PackageRecord>> {
        let snapshot = self.cache.get(false).await?;
        Ok(highest_installed(&snapshot, package, None).cloned())
    }

    pub async fn install(&self, request: InstallRequest) -> OrchestrationResult<()> {
        let InstallRequest {
            package,
            version,
            source,
            force,
        } = request;

        let _progress = self.progress.begin(
            "Install Package",
            "Installing package",
            Some(package.as_str()),
        );
        tracing::info!(
            package = %package,
            version = ?version.as_ref().map(PackageVersion::as_str),
            source = ?source.as_ref().map(SourceUri::as_str),
            force,
            "installing package"
        );

        let command = EngineCommand::install(package.clone())
            .with_version(version.clone())
            .with_source(source)
            .with_force(force)
            .with_allow_unofficial(self.settings.allow_unofficial());

        let outcome = self.execute(&command).await;
        let refreshed = self.refresh_after_mutation().await;
        if let Err(cause) = outcome {
            return Err(operation_error(CoreErrorKind::Install, &command, cause));
        }

        let resolved = refreshed.as_deref().and_then(|snapshot| {
            version
                .as_ref()
                .and_then(|wanted| highest_installed(snapshot, &package, Some(wanted)))
                .or_else(|| highest_installed(snapshot, &package, None))
                .map(|record| record.version.clone())
        });

        let mismatch = matches!(
            (&version, &resolved),
            (Some(requested), Some(installed)) if requested != installed
        );
        let event_version = match self.settings.version_mismatch_policy() {
            VersionMismatchPolicy::PublishResolved => resolved.or(version),
            VersionMismatchPolicy::PublishRequested => version.or(resolved),
            VersionMismatchPolicy::Suppress if mismatch => {
                tracing::info!(
                    package = %package,
                    "installed version differs from request; change event suppressed"
                );
                return Ok(());
            }
            VersionMismatchPolicy::Suppress => resolved.or(version),
        };

        self.bus.publish(&ChangeEvent::new(
            ChangeKind::Installed,
            package,
            event_version,
        ));
        Ok(())
    }

    pub async fn uninstall(&self, request: UninstallRequest) -> OrchestrationResult<()> {
        let UninstallRequest {
            package,
            version,
            force,
        } = request;

        if version.is_none() && self.settings.uninstall_policy() == UninstallVersionPolicy::Required
        {
            return Err(CoreError::invalid_input(format!(
                "uninstall of '{package}' requires a version"
            ))
            .with_operation(EngineOperation::Uninstall)
            .with_package(package.as_str()));
        }

        // Version reported in the event when the engine picks which version to remove.
        let known_version = version.clone().or_else(|| {
            self.cache.peek().and_then(|snapshot| {
                highest_installed(&snapshot, &package, None).map(|record| record.version.clone())
            })
        });

        let _progress = self.progress.begin(
            "Uninstalling",
            "Uninstalling package",
            Some(package.as_str()),
        );
        tracing::info!(
            package = %package,
            version = ?version.as_ref().map(PackageVersion::as_str),
            force,
            "uninstalling package"
        );

        let command = EngineCommand::uninstall(package.clone())
            .with_version(version)
            .with_force(force)
            .with_allow_unofficial(self.settings.allow_unofficial());

        let outcome = self.execute(&command).await;
        self.refresh_after_mutation().await;
        if let Err(cause) = outcome {
            return Err(operation_error(CoreErrorKind::Uninstall, &command, cause));
        }

        self.bus.publish(&ChangeEvent::new(
            ChangeKind::Uninstalled,
            package,
            known_version,
        ));
        Ok(())
    }

    pub async fn update(&self, request: UpdateRequest) -> OrchestrationResult<()> {
        let UpdateRequest { package, source } = request;

        let _progress =
            self.progress
                .begin("Updating", "Updating package", Some(package.as_str()));
        tracing::info!(
            package = %package,
            source = ?source.as_ref().map(SourceUri::as_str),
            "updating package"
        );

        let command = EngineCommand::upgrade(package.clone())
            .with_source(source)
            .with_allow_unofficial(self.settings.allow_unofficial());

        let outcome = self.execute(&command).await;
        let refreshed = self.refresh_after_mutation().await;
        if let Err(cause) = outcome {
            return Err(operation_error(CoreErrorKind::Update, &command, cause));
        }

        let updated_version = refreshed.as_deref().and_then(|snapshot| {
            highest_installed(snapshot, &package, None).map(|record| record.version.clone())
        });

        self.bus.publish(&ChangeEvent::new(
            ChangeKind::Updated,
            package,
            updated_version,
        ));
        Ok(())
    }

    async fn execute(&self, command: &EngineCommand) -> OrchestrationResult<EngineRunResult> {
        let operation = command.operation();
        let gateway = self.gateway.clone();
        let owned = command.clone();

        let result = tokio::task::spawn_blocking(move || gateway.run(&owned))
            .await
            .map_err(|join_error| {
                CoreError::internal(format!("engine run join failure: {join_error}"))
                    .with_operation(operation)
                    .into_engine_error()
            })?
            .map_err(|error| {
                CoreError {
                    operation: error.operation.or(Some(operation)),
                    ..error
                }
                .into_engine_error()
            })?;

        if !result.succeeded(self.settings.success_exit_codes()) {
            return Err(
                CoreError::new(CoreErrorKind::Engine, result.failure_reason())
                    .with_operation(operation),
            );
        }

        if result.exit_code != 0 {
            tracing::info!(
                operation = ?operation,
                exit_code = result.exit_code,
                "engine reported success with a reboot exit code"
            );
        }

        Ok(result)
    }

    /// Invalidates the cache and, under the eager policy, reloads it. A failed reload
    /// is logged and leaves the cache empty.
    async fn refresh_after_mutation(&self) -> Option<InstalledSnapshot> {
        let generation = self.cache.invalidate();
        if self.settings.refresh_policy() == RefreshPolicy::Lazy {
            return None;
        }

        match self.cache.refresh_since(generation).await {
            Ok(snapshot) => Some(snapshot),
            Err(error) => {
                tracing::warn!(
                    kind = ?error.kind,
                    message = %error.message,
                    "installed package refresh after mutation failed"
                );
                None
            }
        }
    }
}

fn operation_error(kind: CoreErrorKind, command: &EngineCommand, cause: CoreError) -> CoreError {
    let operation = command.operation();
    let package = command
        .package()
        .map(PackageId::as_str)
        .unwrap_or_default()
        .to_string();

    tracing::error!(
        operation = ?operation,
        package = %package,
        message = %cause.message,
        "engine operation failed"
    );

    let mut error = CoreError::new(
        kind,
        format!(
            "{} of '{package}' failed: {}",
            operation.command_name(),
            cause.message
        ),
    )
    .with_operation(operation)
    .with_package(package)
    .with_cause(cause);

    if let Some(version) = command.version() {
        error = error.with_version(version.as_str());
    }
    error
}
