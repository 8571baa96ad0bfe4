use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use semver::Prerelease;
use serde::{Serialize, Serializer};

use crate::models::{CoreError, CoreErrorKind};

/// Package version as reported by the engine.
///
/// Engine versions are SemVer-like but may carry a fourth "revision" component
/// (`1.2.3.4`) or omit trailing components (`1.2`). Missing components are zero and
/// build metadata is ignored for ordering; the original text is kept for display.
#[derive(Clone, Debug)]
pub struct PackageVersion {
    major: u64,
    minor: u64,
    patch: u64,
    revision: u64,
    pre: Prerelease,
    original: String,
}

impl PackageVersion {
    pub fn parse(text: &str) -> Result<Self, CoreError> {
        let original = text.trim();
        if original.is_empty() {
            return Err(parse_error(text, "version must not be empty"));
        }

        let without_build = original
            .split_once('+')
            .map_or(original, |(version, _build)| version);
        let (numbers, pre) = match without_build.split_once('-') {
            Some((_numbers, "")) => {
                return Err(parse_error(text, "pre-release tag must not be empty"));
            }
            Some((numbers, pre)) => {
                let pre = Prerelease::new(pre)
                    .map_err(|error| parse_error(text, &format!("invalid pre-release: {error}")))?;
                (numbers, pre)
            }
            None => (without_build, Prerelease::EMPTY),
        };

        let mut parts = [0u64; 4];
        let mut count = 0usize;
        for component in numbers.split('.') {
            if count == parts.len() {
                return Err(parse_error(text, "more than four numeric components"));
            }
            if component.is_empty() || !component.bytes().all(|byte| byte.is_ascii_digit()) {
                return Err(parse_error(
                    text,
                    &format!("component '{component}' is not numeric"),
                ));
            }
            parts[count] = component
                .parse()
                .map_err(|error| parse_error(text, &format!("{error}")))?;
            count += 1;
        }

        Ok(Self {
            major: parts[0],
            minor: parts[1],
            patch: parts[2],
            revision: parts[3],
            pre,
            original: original.to_string(),
        })
    }

    pub fn major(&self) -> u64 {
        self.major
    }

    pub fn minor(&self) -> u64 {
        self.minor
    }

    pub fn patch(&self) -> u64 {
        self.patch
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_prerelease(&self) -> bool {
        !self.pre.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.original
    }

    fn key(&self) -> (u64, u64, u64, u64, &Prerelease) {
        (self.major, self.minor, self.patch, self.revision, &self.pre)
    }
}

impl FromStr for PackageVersion {
    type Err = CoreError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Self::parse(text)
    }
}

impl Display for PackageVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.original)
    }
}

impl PartialEq for PackageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for PackageVersion {}

impl Hash for PackageVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl Serialize for PackageVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.original)
    }
}

fn parse_error(text: &str, detail: &str) -> CoreError {
    CoreError::new(
        CoreErrorKind::ParseFailure,
        format!("invalid package version '{text}': {detail}"),
    )
    .with_version(text)
}
