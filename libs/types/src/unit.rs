//! Unit files and their content addresses.
//!
//! A unit file is stored once in the registry under the digest of its
//! canonical text; jobs reference it by that hash. Only the minimal
//! section/option split needed for scheduling requirements lives here —
//! full unit-file lexing belongs to the service-manager side.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Section holding flotilla-specific scheduling options.
pub const FLOTILLA_SECTION: &str = "X-Flotilla";

/// Content address of a unit file: SHA-256 over the canonical text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitHash(String);

impl UnitHash {
    /// Compute the content address of a unit file's text.
    pub fn of(contents: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(contents.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Wrap an already-computed digest, e.g. one read back from a key path.
    pub fn from_hex(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Abbreviated form for human-facing listings.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(7)]
    }
}

impl std::fmt::Display for UnitHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single `name=value` option within a unit file section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOption {
    pub section: String,
    pub name: String,
    pub value: String,
}

/// A unit file: the canonical text plus the options split out of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFile {
    raw: String,
    options: Vec<UnitOption>,
}

impl UnitFile {
    /// Split unit file text into sections and options.
    ///
    /// Lines starting with `#` or `;` are comments; lines outside any
    /// section and lines without `=` are ignored. Repeated option names
    /// accumulate.
    pub fn parse(contents: &str) -> Self {
        let mut options = Vec::new();
        let mut section = String::new();

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                section = line[1..line.len() - 1].to_string();
                continue;
            }
            if section.is_empty() {
                continue;
            }
            if let Some((name, value)) = line.split_once('=') {
                options.push(UnitOption {
                    section: section.clone(),
                    name: name.trim().to_string(),
                    value: value.trim().to_string(),
                });
            }
        }

        Self {
            raw: contents.to_string(),
            options,
        }
    }

    /// The canonical text, exactly as submitted.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn options(&self) -> &[UnitOption] {
        &self.options
    }

    /// Content address of this unit file.
    pub fn hash(&self) -> UnitHash {
        UnitHash::of(&self.raw)
    }

    /// All values of `name` within the scheduling section, in file order.
    pub fn requirements(&self, name: &str) -> Vec<&str> {
        self.options
            .iter()
            .filter(|o| o.section == FLOTILLA_SECTION && o.name == name)
            .map(|o| o.value.as_str())
            .collect()
    }
}
