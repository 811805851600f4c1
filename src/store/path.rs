//! Normalized project-relative paths
//!
//! Every entry point into the store (agent tools, direct edits, sandbox
//! hydration) goes through [`ProjectPath`], so `/src/App.tsx`, `//src/App.tsx`
//! and `src/App.tsx` always resolve to the same file.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use super::StoreError;

/// A project-relative file path with all leading separators stripped.
///
/// Paths are case-sensitive and `/`-separated. The inner string is never
/// empty and never starts with `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ProjectPath(String);

impl ProjectPath {
    /// Normalize a raw path as supplied by a user or the model
    pub fn new(raw: &str) -> Result<Self, StoreError> {
        let normalized = normalize(raw);
        if normalized.is_empty() {
            return Err(StoreError::InvalidPath(raw.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Directory part of the path, if the file is not at the root
    pub fn parent(&self) -> Option<&str> {
        self.0.rfind('/').map(|idx| &self.0[..idx])
    }
}

/// Strip every leading `/` from `raw`.
pub fn normalize(raw: &str) -> &str {
    raw.trim_start_matches('/')
}

impl fmt::Display for ProjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ProjectPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Deserialization re-normalizes so documents written by older versions
// cannot smuggle in a leading slash.
impl<'de> Deserialize<'de> for ProjectPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ProjectPath::new(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_any_number_of_leading_slashes() {
        for raw in ["src/App.tsx", "/src/App.tsx", "///src/App.tsx"] {
            assert_eq!(ProjectPath::new(raw).unwrap().as_str(), "src/App.tsx");
        }
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let once = ProjectPath::new("//package.json").unwrap();
        let twice = ProjectPath::new(once.as_str()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_case_sensitive() {
        assert_ne!(
            ProjectPath::new("src/app.tsx").unwrap(),
            ProjectPath::new("src/App.tsx").unwrap()
        );
    }

    #[test]
    fn test_rejects_empty() {
        assert!(ProjectPath::new("").is_err());
        assert!(ProjectPath::new("///").is_err());
    }

    #[test]
    fn test_parent() {
        assert_eq!(ProjectPath::new("src/components/Button.tsx").unwrap().parent(), Some("src/components"));
        assert_eq!(ProjectPath::new("package.json").unwrap().parent(), None);
    }

    #[test]
    fn test_deserialize_normalizes() {
        let path: ProjectPath = serde_json::from_str("\"/index.html\"").unwrap();
        assert_eq!(path.as_str(), "index.html");
    }
}
