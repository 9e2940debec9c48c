use std::fmt;

use serde::Serialize;

use super::{HistorySeries, Quote};

/// Stable identifier of a data provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ProviderId(&'static str);

impl ProviderId {
    pub const EASTMONEY: Self = Self("eastmoney");
    pub const TUSHARE: Self = Self("tushare");
    pub const YAHOO: Self = Self("yahoo");

    /// Identifier for providers outside the built-in set
    pub const fn custom(name: &'static str) -> Self {
        Self(name)
    }

    pub const fn as_str(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Kind of market data a request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    Quote,
    History,
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quote => f.write_str("quote"),
            Self::History => f.write_str("history"),
        }
    }
}

/// Either kind of market data, as stored in the cache
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MarketData {
    Quote(Quote),
    History(HistorySeries),
}

impl MarketData {
    pub fn kind(&self) -> DataKind {
        match self {
            Self::Quote(_) => DataKind::Quote,
            Self::History(_) => DataKind::History,
        }
    }

    pub fn provider(&self) -> ProviderId {
        match self {
            Self::Quote(quote) => quote.provider,
            Self::History(series) => series.provider(),
        }
    }

    pub fn into_quote(self) -> Option<Quote> {
        match self {
            Self::Quote(quote) => Some(quote),
            Self::History(_) => None,
        }
    }

    pub fn into_history(self) -> Option<HistorySeries> {
        match self {
            Self::History(series) => Some(series),
            Self::Quote(_) => None,
        }
    }
}

impl From<Quote> for MarketData {
    fn from(quote: Quote) -> Self {
        Self::Quote(quote)
    }
}

impl From<HistorySeries> for MarketData {
    fn from(series: HistorySeries) -> Self {
        Self::History(series)
    }
}
