use crate::models::{CoreError, EnginePackage, PackageId, PackageRecord, PackageVersion, SourceUri};

/// Converts raw engine entries into package records.
///
/// The installed flag is owned by the caller: only the installed-package refresh
/// path sets it.
pub trait PackageMapper: Send + Sync {
    fn map(&self, package: &EnginePackage) -> Result<PackageRecord, CoreError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultPackageMapper;

impl PackageMapper for DefaultPackageMapper {
    fn map(&self, package: &EnginePackage) -> Result<PackageRecord, CoreError> {
        let id = PackageId::new(package.id.as_str())?;
        let version = PackageVersion::parse(&package.version)
            .map_err(|error| error.with_package(id.as_str()))?;
        let source = package
            .source
            .as_deref()
            .filter(|source| !source.trim().is_empty())
            .map(SourceUri::new)
            .transpose()?;

        Ok(PackageRecord {
            id,
            version,
            is_installed: false,
            source,
        })
    }
}
