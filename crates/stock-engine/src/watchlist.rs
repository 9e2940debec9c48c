//! Raw watchlist entries split into symbols and rejects

use stock_data::Symbol;
use tracing::warn;

/// A parsed watchlist.
///
/// Entries that do not parse are kept so the run summary can report them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Watchlist {
    symbols: Vec<Symbol>,
    rejected: Vec<String>,
}

impl Watchlist {
    /// Parse entries in order. Blank entries, such as the one left by a
    /// trailing comma, are not entries at all and are dropped.
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Self {
        let mut watchlist = Self::default();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            match Symbol::parse(entry) {
                Ok(symbol) => watchlist.symbols.push(symbol),
                Err(e) => {
                    warn!(entry = %entry, error = %e, "Watchlist entry is not a stock code");
                    watchlist.rejected.push(entry.to_string());
                }
            }
        }
        watchlist
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn rejected(&self) -> &[String] {
        &self.rejected
    }

    /// No entries at all, valid or not
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty() && self.rejected.is_empty()
    }
}

impl From<Vec<Symbol>> for Watchlist {
    fn from(symbols: Vec<Symbol>) -> Self {
        Self {
            symbols,
            rejected: Vec::new(),
        }
    }
}
