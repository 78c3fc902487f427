//! Validated change identifiers
//!
//! Provides [`Slug`], the unique, URL-safe identifier for a change.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Grammar: lowercase alphanumerics and internal hyphens, length 3-64,
/// first and last character alphanumeric.
static SLUG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9](?:[a-z0-9-]{1,62})[a-z0-9]$").expect("slug grammar"));

/// A validated change identifier
///
/// Invalid input never constructs a value: the only way in is
/// [`FromStr`]/[`Slug::parse`], both of which enforce the grammar.
/// Because the grammar admits no path separators or dots, a `Slug` can be
/// joined onto the sandbox root without further escaping.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Slug(String);

impl Slug {
    /// Parse and validate a candidate identifier
    ///
    /// # Errors
    /// Returns [`SlugError`] describing the first grammar violation.
    pub fn parse(candidate: &str) -> Result<Self, SlugError> {
        if candidate.len() < 3 || candidate.len() > 64 {
            return Err(SlugError::InvalidLength(candidate.len()));
        }
        if !SLUG_RE.is_match(candidate) {
            return Err(SlugError::InvalidCharacters(candidate.to_string()));
        }
        Ok(Self(candidate.to_string()))
    }

    /// The identifier as a string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the underlying string
    #[inline]
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl Display for Slug {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Slug {
    type Err = SlugError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for Slug {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Slug {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Slug::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Errors from slug validation
#[derive(Debug, Clone, thiserror::Error)]
pub enum SlugError {
    /// Length outside 3-64 characters
    #[error("slug must be 3-64 characters, got {0}")]
    InvalidLength(usize),

    /// Characters outside the grammar, or hyphen at an edge
    #[error("invalid slug '{0}': lowercase alphanumerics and internal hyphens only")]
    InvalidCharacters(String),
}

impl SlugError {
    /// Stable machine-readable code for callers
    #[inline]
    #[must_use]
    pub fn code(&self) -> &'static str {
        "EBADSLUG"
    }
}
