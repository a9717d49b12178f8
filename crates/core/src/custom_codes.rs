//! Custom code aliases.
//!
//! Lets the broadcaster register memorable names (e.g. `kaizo-world`) that
//! resolve to a real level code when submitted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::codec::{self, CodecConfig};
use crate::error::CoreError;

/// Maximum alias length, in characters.
pub const MAX_ALIAS_LENGTH: usize = 64;

/// A single registered alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomCode {
    /// Name as entered (original casing is kept for display).
    pub name: String,
    /// Canonical code the alias resolves to.
    pub code: String,
}

/// Alias table keyed by lower-cased name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomCodes {
    entries: BTreeMap<String, CustomCode>,
}

impl CustomCodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from stored entries. Later duplicates (by case-insensitive
    /// name) replace earlier ones.
    pub fn from_entries(entries: impl IntoIterator<Item = CustomCode>) -> Self {
        let entries = entries
            .into_iter()
            .map(|entry| (entry.name.to_lowercase(), entry))
            .collect();
        Self { entries }
    }

    /// Register an alias. The target must be a valid code (or the romhack
    /// sentinel when enabled) and the name must be free.
    pub fn add(
        &mut self,
        name: &str,
        raw_code: &str,
        codec: &CodecConfig,
    ) -> Result<&CustomCode, CoreError> {
        let name = name.trim();
        validate_alias_name(name).map_err(CoreError::Validation)?;

        let key = name.to_lowercase();
        if self.entries.contains_key(&key) {
            return Err(CoreError::Conflict(format!(
                "The custom code {name} already exists"
            )));
        }

        let validation = codec::validate(raw_code, codec);
        if !validation.is_valid() {
            return Err(CoreError::InvalidCode(validation.code));
        }

        let entry = CustomCode {
            name: name.to_string(),
            code: validation.code,
        };
        Ok(self.entries.entry(key).or_insert(entry))
    }

    /// Remove an alias by name. Returns the removed entry.
    pub fn remove(&mut self, name: &str) -> Option<CustomCode> {
        self.entries.remove(&name.trim().to_lowercase())
    }

    /// Resolve raw submission text to an aliased code, if it names one.
    pub fn resolve(&self, raw: &str) -> Option<&str> {
        self.entries
            .get(&raw.trim().to_lowercase())
            .map(|entry| entry.code.as_str())
    }

    /// Entries ordered by lower-cased name.
    pub fn entries(&self) -> impl Iterator<Item = &CustomCode> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn validate_alias_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Custom code name cannot be empty".to_string());
    }
    if name.chars().count() > MAX_ALIAS_LENGTH {
        return Err(format!(
            "Custom code name exceeds maximum length of {MAX_ALIAS_LENGTH} characters"
        ));
    }
    if name.chars().any(char::is_whitespace) {
        return Err("Custom code name cannot contain whitespace".to_string());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
