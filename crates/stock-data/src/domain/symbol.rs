//! Watchlist symbols and market detection

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SymbolError;

/// Market a symbol trades in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Market {
    /// Mainland A shares
    ChinaA,
    HongKong,
    Us,
}

/// Mainland exchange of an A-share code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exchange {
    Shanghai,
    Shenzhen,
    Beijing,
}

impl Exchange {
    /// Detect the exchange from a six digit code.
    ///
    /// `92`, `4` and `8` prefixes list in Beijing; `5`, `6` and `9` in
    /// Shanghai (main board, STAR, B shares and funds); everything else in
    /// Shenzhen.
    pub fn from_code(code: &str) -> Self {
        if code.starts_with("92") || code.starts_with('4') || code.starts_with('8') {
            Self::Beijing
        } else if code.starts_with('5') || code.starts_with('6') || code.starts_with('9') {
            Self::Shanghai
        } else {
            Self::Shenzhen
        }
    }

    /// Two-letter suffix used by Tushare style codes
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Shanghai => "SH",
            Self::Shenzhen => "SZ",
            Self::Beijing => "BJ",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "SH" | "SS" => Some(Self::Shanghai),
            "SZ" => Some(Self::Shenzhen),
            "BJ" => Some(Self::Beijing),
            _ => None,
        }
    }
}

/// A normalized stock symbol with exactly one market tag
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol {
    code: String,
    market: Market,
    exchange: Option<Exchange>,
}

impl Symbol {
    /// Parse a user supplied code such as `600519`, `sz000001`, `hk00700`,
    /// `0700.HK` or `brk.b`.
    pub fn parse(input: &str) -> Result<Self, SymbolError> {
        let raw = input.trim().to_ascii_uppercase();
        if raw.is_empty() {
            return Err(SymbolError::Empty);
        }

        if let Some(symbol) = Self::parse_china_a(&raw) {
            return Ok(symbol);
        }
        if let Some(symbol) = Self::parse_hong_kong(&raw) {
            return Ok(symbol);
        }
        if let Some(symbol) = Self::parse_us(&raw) {
            return Ok(symbol);
        }

        Err(SymbolError::Unrecognized(input.trim().to_string()))
    }

    fn parse_china_a(raw: &str) -> Option<Self> {
        let (digits, tag) = if let Some((code, suffix)) = raw.split_once('.') {
            (code, Some(suffix))
        } else if raw.len() == 8 && raw.is_char_boundary(2) {
            let (prefix, code) = raw.split_at(2);
            (code, Some(prefix))
        } else {
            (raw, None)
        };

        if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let exchange = match tag {
            Some(tag) => Exchange::from_tag(tag)?,
            None => Exchange::from_code(digits),
        };

        Some(Self {
            code: digits.to_string(),
            market: Market::ChinaA,
            exchange: Some(exchange),
        })
    }

    fn parse_hong_kong(raw: &str) -> Option<Self> {
        let digits = if let Some(code) = raw.strip_prefix("HK") {
            code
        } else if let Some(code) = raw.strip_suffix(".HK") {
            code
        } else if raw.len() == 5 {
            raw
        } else {
            return None;
        };

        if digits.is_empty() || digits.len() > 5 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        Some(Self {
            code: format!("{digits:0>5}"),
            market: Market::HongKong,
            exchange: None,
        })
    }

    fn parse_us(raw: &str) -> Option<Self> {
        let (root, class) = match raw.find(['.', '-']) {
            Some(pos) => (&raw[..pos], Some(&raw[pos + 1..])),
            None => (raw, None),
        };

        if root.is_empty() || root.len() > 6 || !root.bytes().all(|b| b.is_ascii_uppercase()) {
            return None;
        }

        let code = match class {
            None => root.to_string(),
            Some(class) if class.len() == 1 && class.bytes().all(|b| b.is_ascii_uppercase()) => {
                format!("{root}.{class}")
            }
            Some(_) => return None,
        };

        Some(Self {
            code,
            market: Market::Us,
            exchange: None,
        })
    }

    /// Normalized code: six digits, five digits, or an uppercase ticker
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn market(&self) -> Market {
        self.market
    }

    /// Exchange, for A shares only
    pub fn exchange(&self) -> Option<Exchange> {
        self.exchange
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code)
    }
}

impl FromStr for Symbol {
    type Err = SymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Symbol {
    type Error = SymbolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        match symbol.exchange {
            Some(exchange) => format!("{}.{}", symbol.code, exchange.suffix()),
            None => symbol.code,
        }
    }
}
