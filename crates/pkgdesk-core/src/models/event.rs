use serde::Serialize;

use crate::models::{PackageId, PackageVersion};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Installed,
    Uninstalled,
    Updated,
}

/// Fact describing one completed mutating operation.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub package: PackageId,
    pub version: Option<PackageVersion>,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, package: PackageId, version: Option<PackageVersion>) -> Self {
        Self {
            kind,
            package,
            version,
        }
    }
}
