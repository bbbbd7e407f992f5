//! Symbol whitelist.
//!
//! A JSON object mapping instrument symbol to an enabled flag:
//!
//! ```json
//! { "XAUUSD": true, "XAGUSD": false }
//! ```
//!
//! Loaded once at startup and shared read-only. Symbols that are absent or
//! disabled are simply not eligible; lookups never fail.

use crate::error::{CoreError, CoreResult};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Whitelist {
    entries: HashMap<String, bool>,
}

impl Whitelist {
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, bool)>,
        S: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(|(s, on)| (s.into(), on)).collect(),
        }
    }

    /// Parse a whitelist from its JSON text.
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let entries: HashMap<String, bool> = serde_json::from_str(json)
            .map_err(|e| CoreError::InvalidWhitelist(e.to_string()))?;
        Ok(Self { entries })
    }

    pub fn from_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            CoreError::InvalidWhitelist(format!("{}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Overlay `other` on top of this whitelist. Entries in `other` win.
    pub fn merge(&mut self, other: &Whitelist) {
        for (symbol, enabled) in &other.entries {
            self.entries.insert(symbol.clone(), *enabled);
        }
    }

    /// True only if the symbol is listed and enabled.
    #[inline]
    pub fn is_eligible(&self, symbol: &str) -> bool {
        self.entries.get(symbol).copied().unwrap_or(false)
    }

    /// Enabled symbols, sorted.
    pub fn enabled_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(symbol, _)| symbol.clone())
            .collect();
        symbols.sort();
        symbols
    }

    /// Number of listed symbols, enabled or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
