//! Yahoo Finance fallback adapter
//!
//! Covers every market through `yahoo_finance_api`. Quotes are derived from
//! the last two daily bars since the chart endpoint has no snapshot call.

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use time::OffsetDateTime;
use tracing::instrument;
use yahoo_finance_api as yahoo;

use super::{Credential, ProviderAdapter, checked};
use crate::domain::{Bar, Exchange, HistoryRange, HistorySeries, Market, ProviderId, Quote, Symbol};
use crate::error::FetchError;

/// Yahoo Finance adapter
pub struct YahooAdapter {
    connector: yahoo::YahooConnector,
}

/// Daily bar as returned by the chart endpoint
#[derive(Debug, Clone, Copy, PartialEq)]
struct DailyPoint {
    timestamp: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
}

impl From<&yahoo::Quote> for DailyPoint {
    fn from(q: &yahoo::Quote) -> Self {
        Self {
            timestamp: q.timestamp as i64,
            open: q.open,
            high: q.high,
            low: q.low,
            close: q.close,
            volume: q.volume,
        }
    }
}

impl YahooAdapter {
    pub fn new() -> Result<Self, FetchError> {
        let connector = yahoo::YahooConnector::new().map_err(|e| classify_error(&e.to_string()))?;
        Ok(Self { connector })
    }
}

/// Yahoo ticker: `.SS`/`.SZ` for mainland, four digit `.HK`, dashed US classes
fn yahoo_ticker(symbol: &Symbol) -> Option<String> {
    match (symbol.market(), symbol.exchange()) {
        (Market::ChinaA, Some(Exchange::Shanghai)) => Some(format!("{}.SS", symbol.code())),
        (Market::ChinaA, Some(Exchange::Shenzhen)) => Some(format!("{}.SZ", symbol.code())),
        (Market::ChinaA, _) => None,
        (Market::HongKong, _) => Some(format!(
            "{:0>4}.HK",
            symbol.code().trim_start_matches('0')
        )),
        (Market::Us, _) => Some(symbol.code().replace('.', "-")),
    }
}

/// The client only exposes errors as text
fn classify_error(message: &str) -> FetchError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("429") || lower.contains("too many requests") {
        FetchError::RateLimited(message.to_string())
    } else if lower.contains("timed out") || lower.contains("timeout") {
        FetchError::Timeout
    } else if lower.contains("404")
        || lower.contains("not found")
        || lower.contains("no data")
        || lower.contains("empty")
        || lower.contains("no quotes")
    {
        FetchError::NotFound(message.to_string())
    } else {
        FetchError::ProtocolError(message.to_string())
    }
}

fn quote_from_points(symbol: &Symbol, points: &[DailyPoint]) -> Result<Quote, FetchError> {
    let (last, prior) = match points {
        [] => return Err(FetchError::NotFound(symbol.to_string())),
        [only] => (only, None),
        [.., prior, last] => (last, Some(prior)),
    };

    let quote = Quote {
        symbol: symbol.clone(),
        name: None,
        last: last.close,
        prior_close: prior.map_or(0.0, |p| p.close),
        volume: last.volume,
        // The chart endpoint has no traded value; approximate it
        turnover: last.close * last.volume as f64,
        timestamp: DateTime::from_timestamp(last.timestamp, 0).unwrap_or_else(Utc::now),
        provider: ProviderId::YAHOO,
    };
    checked(quote)
}

fn series_from_points(
    symbol: &Symbol,
    points: &[DailyPoint],
    range: HistoryRange,
) -> Result<HistorySeries, FetchError> {
    let bars = points
        .iter()
        .filter_map(|p| {
            let date = DateTime::from_timestamp(p.timestamp, 0)?.date_naive();
            range.contains(date).then(|| Bar {
                date,
                open: p.open,
                high: p.high,
                low: p.low,
                close: p.close,
                volume: p.volume,
                turnover: p.close * p.volume as f64,
            })
        })
        .collect();

    Ok(HistorySeries::new(symbol.clone(), ProviderId::YAHOO, bars)?)
}

fn to_offset(date: chrono::NaiveDate) -> Result<OffsetDateTime, FetchError> {
    let ts = date.and_time(NaiveTime::MIN).and_utc().timestamp();
    OffsetDateTime::from_unix_timestamp(ts)
        .map_err(|e| FetchError::ProtocolError(format!("invalid date {date}: {e}")))
}

#[async_trait]
impl ProviderAdapter for YahooAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::YAHOO
    }

    fn supports(&self, symbol: &Symbol) -> bool {
        yahoo_ticker(symbol).is_some()
    }

    #[instrument(skip(self, _credential), fields(provider = "yahoo", symbol = %symbol))]
    async fn fetch_quote(
        &self,
        symbol: &Symbol,
        _credential: &Credential,
    ) -> Result<Quote, FetchError> {
        let ticker = yahoo_ticker(symbol).ok_or(FetchError::Unsupported)?;
        let response = self
            .connector
            .get_latest_quotes(&ticker, "1d")
            .await
            .map_err(|e| classify_error(&e.to_string()))?;
        let points: Vec<DailyPoint> = response
            .quotes()
            .map_err(|e| classify_error(&e.to_string()))?
            .iter()
            .map(DailyPoint::from)
            .collect();

        quote_from_points(symbol, &points)
    }

    #[instrument(skip(self, _credential), fields(provider = "yahoo", symbol = %symbol))]
    async fn fetch_history(
        &self,
        symbol: &Symbol,
        range: HistoryRange,
        _credential: &Credential,
    ) -> Result<HistorySeries, FetchError> {
        let ticker = yahoo_ticker(symbol).ok_or(FetchError::Unsupported)?;
        let start = to_offset(range.start)?;
        // The end bound is exclusive upstream
        let end = to_offset(range.end)? + time::Duration::days(1);

        let response = self
            .connector
            .get_quote_history(&ticker, start, end)
            .await
            .map_err(|e| classify_error(&e.to_string()))?;
        let points: Vec<DailyPoint> = response
            .quotes()
            .map_err(|e| classify_error(&e.to_string()))?
            .iter()
            .map(DailyPoint::from)
            .collect();

        series_from_points(symbol, &points, range)
    }
}
