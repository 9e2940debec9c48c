//! Market data domain types

mod history;
mod provider;
mod quote;
mod symbol;

pub use history::{Bar, HistoryRange, HistorySeries};
pub use provider::{DataKind, MarketData, ProviderId};
pub use quote::Quote;
pub use symbol::{Exchange, Market, Symbol};
