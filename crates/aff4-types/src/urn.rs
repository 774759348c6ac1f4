use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Scheme used for freshly minted object identifiers.
pub const AFF4_SCHEME: &str = "aff4";

/// Scheme used for objects backed by local files.
pub const FILE_SCHEME: &str = "file";

/// Globally unique identifier for any AFF4 object.
///
/// A `Urn` is an opaque string such as `aff4://2c1f...` or
/// `file:///cases/disk.zip`. It is the subject key of every attribute triple
/// and the only way one component refers to another: objects hold `Urn`s,
/// never references, and re-resolve them through the resolver on each access.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Urn(String);

impl Urn {
    /// Wrap a string without validation.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Parse and validate a URN: non-empty, no whitespace or control bytes.
    pub fn parse(value: &str) -> Result<Self, TypeError> {
        if value.is_empty() || value.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(TypeError::InvalidUrn(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    /// Mint a fresh random URN in the `aff4://` namespace.
    pub fn random() -> Self {
        Self(format!("{AFF4_SCHEME}://{}", uuid::Uuid::new_v4()))
    }

    /// Build a `file://` URN for a local path.
    pub fn from_path(path: &Path) -> Self {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        };
        Self(format!("{FILE_SCHEME}://{}", absolute.display()))
    }

    /// The local path of a `file://` URN.
    pub fn to_path(&self) -> Option<PathBuf> {
        self.0
            .strip_prefix("file://")
            .filter(|rest| !rest.is_empty())
            .map(PathBuf::from)
    }

    /// The string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The scheme, if the URN has one (`aff4`, `file`, ...).
    pub fn scheme(&self) -> Option<&str> {
        self.0.split_once("://").map(|(scheme, _)| scheme)
    }

    /// Returns `true` if this URN carries a scheme.
    pub fn is_absolute(&self) -> bool {
        self.0.contains("://")
    }

    /// Append a path component: `aff4://x` + `data/00000000`.
    pub fn join(&self, name: &str) -> Self {
        let base = self.0.trim_end_matches('/');
        let name = name.trim_start_matches('/');
        if name.is_empty() {
            return self.clone();
        }
        Self(format!("{base}/{name}"))
    }

    /// The directory part of the URN, never climbing above its authority.
    pub fn parent(&self) -> Self {
        let authority_end = self.0.find("://").map(|i| i + 3).unwrap_or(0);
        let trimmed = self.0.trim_end_matches('/');
        match trimmed[authority_end.min(trimmed.len())..].rfind('/') {
            Some(pos) => Self(trimmed[..authority_end + pos].to_string()),
            None => Self(trimmed.to_string()),
        }
    }

    /// The path of this URN below `base`, if it lies below it.
    pub fn relative_to(&self, base: &Urn) -> Option<&str> {
        let base = base.0.trim_end_matches('/');
        self.0
            .strip_prefix(base)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|rest| !rest.is_empty())
    }

    /// Resolve `reference` against this URN: absolute references are kept,
    /// relative ones are joined below it.
    pub fn resolve(&self, reference: &str) -> Self {
        if reference.contains("://") {
            Self(reference.to_string())
        } else {
            self.join(reference)
        }
    }
}

impl fmt::Debug for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Urn({})", self.0)
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Urn {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Urn {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Urn {
    fn from(value: String) -> Self {
        Self(value)
    }
}
