//! Version parsing and ordering.
//!
//! Supports:
//! - Short forms: `2`, `2.0` (missing components are zero)
//! - Full semver cores: `1.2.3`
//! - Pre-release tags: `1.2.3-beta.1`
//! - Build suffixes after `+` or `_`, as used in Android version names
//!   (`1.28.0_4124311467`). Build suffixes never affect ordering.
//!
//! Parsing never falls back to a default: unparsable input is a
//! [`VersionParseError`] and callers decide what "cannot compare" means.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use semver::{BuildMetadata, Prerelease};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while parsing a version string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionParseError {
    /// The input was empty or only whitespace.
    #[error("Empty version string")]
    Empty,

    /// The input does not follow the `major[.minor[.patch]][-pre][+build]` shape.
    #[error("Invalid version '{input}': {reason}")]
    Invalid {
        /// The offending input.
        input: String,
        /// Why the input was rejected.
        reason: String,
    },
}

/// A parsed, totally ordered version that remembers the string it came from.
///
/// Equality and hashing follow precedence, so `2.0` and `2.0.0` are equal and
/// `1.28.0_123` equals `1.28.0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModVersion {
    raw: String,
    inner: semver::Version,
}

impl ModVersion {
    /// Parse a version string.
    ///
    /// # Errors
    ///
    /// Returns [`VersionParseError::Empty`] for blank input and
    /// [`VersionParseError::Invalid`] for anything that is not one to three
    /// numeric components with optional pre-release and build suffixes.
    pub fn parse(input: &str) -> Result<Self, VersionParseError> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(VersionParseError::Empty);
        }

        let invalid = |reason: &str| VersionParseError::Invalid {
            input: raw.to_string(),
            reason: reason.to_string(),
        };

        // Build metadata is accepted but not kept: it never participates in ordering.
        let head = match raw.find(['+', '_']) {
            Some(idx) => &raw[..idx],
            None => raw,
        };

        let (core, pre) = match head.split_once('-') {
            Some((_, "")) => return Err(invalid("empty pre-release tag")),
            Some((core, pre)) => (core, Some(pre)),
            None => (head, None),
        };

        let segments: Vec<&str> = core.split('.').collect();
        if segments.len() > 3 {
            return Err(invalid("more than three numeric components"));
        }

        let mut numbers = [0u64; 3];
        for (slot, segment) in numbers.iter_mut().zip(&segments) {
            if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid("components must be numeric"));
            }
            *slot = segment
                .parse()
                .map_err(|_| invalid("numeric component out of range"))?;
        }

        let pre = match pre {
            Some(tag) => Prerelease::new(tag).map_err(|e| invalid(&e.to_string()))?,
            None => Prerelease::EMPTY,
        };

        Ok(Self {
            raw: raw.to_string(),
            inner: semver::Version {
                major: numbers[0],
                minor: numbers[1],
                patch: numbers[2],
                pre,
                build: BuildMetadata::EMPTY,
            },
        })
    }

    /// The string this version was parsed from.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Major component.
    pub fn major(&self) -> u64 {
        self.inner.major
    }

    /// Minor component.
    pub fn minor(&self) -> u64 {
        self.inner.minor
    }

    /// Patch component.
    pub fn patch(&self) -> u64 {
        self.inner.patch
    }

    /// Returns `true` if this version carries a pre-release tag.
    pub fn is_prerelease(&self) -> bool {
        !self.inner.pre.is_empty()
    }
}

/// Compare two raw version strings by precedence.
///
/// # Errors
///
/// Returns the parse error of whichever side fails to parse first. Callers
/// must treat that as "incomparable", never as "oldest".
pub fn compare(a: &str, b: &str) -> Result<Ordering, VersionParseError> {
    Ok(ModVersion::parse(a)?.cmp(&ModVersion::parse(b)?))
}

impl Ord for ModVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.inner.major, self.inner.minor, self.inner.patch)
            .cmp(&(other.inner.major, other.inner.minor, other.inner.patch))
            // semver orders an empty pre-release above any tagged one
            .then_with(|| self.inner.pre.cmp(&other.inner.pre))
    }
}

impl PartialOrd for ModVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ModVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ModVersion {}

impl Hash for ModVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.major.hash(state);
        self.inner.minor.hash(state);
        self.inner.patch.hash(state);
        self.inner.pre.hash(state);
    }
}

impl fmt::Display for ModVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl FromStr for ModVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ModVersion {
    type Error = VersionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ModVersion> for String {
    fn from(value: ModVersion) -> Self {
        value.raw
    }
}
