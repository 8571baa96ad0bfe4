use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};

use serde::{Serialize, Serializer};

use crate::models::{CoreError, PackageVersion};

/// Package identifier, unique within a source and compared without regard to ASCII case.
#[derive(Clone, Debug)]
pub struct PackageId(String);

impl PackageId {
    pub fn new(id: impl Into<String>) -> Result<Self, CoreError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(CoreError::invalid_input("package id must not be empty"));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(CoreError::invalid_input(format!(
                "package id '{trimmed}' must not contain whitespace"
            ))
            .with_package(trimmed));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl Display for PackageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq for PackageId {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for PackageId {}

impl Hash for PackageId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.0.bytes() {
            state.write_u8(byte.to_ascii_lowercase());
        }
        state.write_u8(0xff);
    }
}

impl PartialOrd for PackageId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .bytes()
            .map(|byte| byte.to_ascii_lowercase())
            .cmp(other.0.bytes().map(|byte| byte.to_ascii_lowercase()))
    }
}

impl Serialize for PackageId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Repository location a package came from or should be restricted to.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(transparent)]
pub struct SourceUri(String);

impl SourceUri {
    pub fn new(uri: impl Into<String>) -> Result<Self, CoreError> {
        let uri = uri.into();
        let trimmed = uri.trim();
        if trimmed.is_empty() {
            return Err(CoreError::invalid_input("source uri must not be empty"));
        }
        if trimmed.contains('\0') {
            return Err(CoreError::invalid_input(
                "source uri must not contain NUL bytes",
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SourceUri {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw package entry as returned by the engine, before mapping.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct EnginePackage {
    pub id: String,
    pub version: String,
    pub source: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PackageRecord {
    pub id: PackageId,
    pub version: PackageVersion,
    pub is_installed: bool,
    pub source: Option<SourceUri>,
}

impl PackageRecord {
    pub fn is(&self, id: &PackageId) -> bool {
        &self.id == id
    }
}

/// Highest installed version of `id` in `packages`, optionally restricted to `version`.
pub fn highest_installed<'a>(
    packages: &'a [PackageRecord],
    id: &PackageId,
    version: Option<&PackageVersion>,
) -> Option<&'a PackageRecord> {
    packages
        .iter()
        .filter(|record| record.is_installed && record.is(id))
        .filter(|record| version.is_none_or(|wanted| &record.version == wanted))
        .max_by(|left, right| left.version.cmp(&right.version))
}
