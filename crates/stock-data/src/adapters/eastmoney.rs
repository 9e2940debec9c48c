//! Eastmoney push2 endpoints (free, no key)
//!
//! Serves mainland A shares and Hong Kong stocks, with a batch quote
//! endpoint used for watchlist prefetch.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, instrument};

use super::{Credential, ProviderAdapter, checked, json_f64, status_error, transport_error};
use crate::domain::{Bar, Exchange, HistoryRange, HistorySeries, Market, ProviderId, Quote, Symbol};
use crate::error::FetchError;

const QUOTE_URL: &str = "https://push2.eastmoney.com/api/qt/stock/get";
const BATCH_URL: &str = "https://push2.eastmoney.com/api/qt/ulist.np/get";
const KLINE_URL: &str = "https://push2his.eastmoney.com/api/qt/stock/kline/get";

const QUOTE_FIELDS: &str = "f43,f47,f48,f57,f58,f60,f86";
const BATCH_FIELDS: &str = "f2,f5,f6,f12,f13,f14,f18,f124";
const KLINE_FIELDS: &str = "f51,f52,f53,f54,f55,f56,f57";

/// Eastmoney quote and kline adapter
#[derive(Debug, Clone)]
pub struct EastmoneyAdapter {
    client: Client,
}

impl EastmoneyAdapter {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (compatible; daily-stock)")
            .build()?;
        Ok(Self { client })
    }

    async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Value, FetchError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, url));
        }

        response
            .json()
            .await
            .map_err(|e| FetchError::ProtocolError(format!("invalid JSON: {e}")))
    }
}

/// `secid` used by every Eastmoney endpoint: market id and code
fn secid(symbol: &Symbol) -> Option<String> {
    match (symbol.market(), symbol.exchange()) {
        (Market::ChinaA, Some(Exchange::Shanghai)) => Some(format!("1.{}", symbol.code())),
        (Market::ChinaA, _) => Some(format!("0.{}", symbol.code())),
        (Market::HongKong, _) => Some(format!("116.{}", symbol.code())),
        (Market::Us, _) => None,
    }
}

/// A-share volumes are reported in lots of 100 shares
fn volume_multiplier(symbol: &Symbol) -> u64 {
    if symbol.market() == Market::ChinaA { 100 } else { 1 }
}

fn timestamp_or_now(value: &Value) -> DateTime<Utc> {
    value
        .as_i64()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now)
}

fn parse_quote(symbol: &Symbol, payload: &Value) -> Result<Quote, FetchError> {
    let data = payload
        .get("data")
        .filter(|d| !d.is_null())
        .ok_or_else(|| FetchError::NotFound(symbol.to_string()))?;

    let last = json_f64(&data["f43"])
        .ok_or_else(|| FetchError::NotFound(format!("{symbol}: no trade price")))?;

    let quote = Quote {
        symbol: symbol.clone(),
        name: data["f58"].as_str().map(ToString::to_string),
        last,
        prior_close: json_f64(&data["f60"]).unwrap_or(0.0),
        volume: json_f64(&data["f47"]).map_or(0, |v| v as u64) * volume_multiplier(symbol),
        turnover: json_f64(&data["f48"]).unwrap_or(0.0),
        timestamp: timestamp_or_now(&data["f86"]),
        provider: ProviderId::EASTMONEY,
    };
    checked(quote)
}

fn parse_batch(symbols: &[Symbol], payload: &Value) -> Vec<Quote> {
    let by_secid: HashMap<String, &Symbol> = symbols
        .iter()
        .filter_map(|s| secid(s).map(|id| (id, s)))
        .collect();

    let rows: Vec<&Value> = match &payload["data"]["diff"] {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => map.values().collect(),
        _ => Vec::new(),
    };

    rows.into_iter()
        .filter_map(|row| {
            let id = format!("{}.{}", row["f13"].as_i64()?, row["f12"].as_str()?);
            let symbol = *by_secid.get(&id)?;
            let quote = Quote {
                symbol: symbol.clone(),
                name: row["f14"].as_str().map(ToString::to_string),
                last: json_f64(&row["f2"])?,
                prior_close: json_f64(&row["f18"]).unwrap_or(0.0),
                volume: json_f64(&row["f5"]).map_or(0, |v| v as u64) * volume_multiplier(symbol),
                turnover: json_f64(&row["f6"]).unwrap_or(0.0),
                timestamp: timestamp_or_now(&row["f124"]),
                provider: ProviderId::EASTMONEY,
            };
            checked(quote).ok()
        })
        .collect()
}

/// Rows are `date,open,close,high,low,volume,amount`
fn parse_kline_row(row: &str, multiplier: u64) -> Result<Bar, FetchError> {
    let malformed = || FetchError::ProtocolError(format!("malformed kline row: {row}"));
    let cols: Vec<&str> = row.split(',').collect();
    if cols.len() < 7 {
        return Err(malformed());
    }

    let num = |i: usize| cols[i].trim().parse::<f64>().map_err(|_| malformed());
    let date = NaiveDate::parse_from_str(cols[0].trim(), "%Y-%m-%d").map_err(|_| malformed())?;

    Ok(Bar {
        date,
        open: num(1)?,
        close: num(2)?,
        high: num(3)?,
        low: num(4)?,
        volume: num(5)? as u64 * multiplier,
        turnover: num(6)?,
    })
}

fn parse_history(symbol: &Symbol, payload: &Value) -> Result<HistorySeries, FetchError> {
    let klines = payload["data"]["klines"]
        .as_array()
        .ok_or_else(|| FetchError::NotFound(symbol.to_string()))?;

    let multiplier = volume_multiplier(symbol);
    let bars = klines
        .iter()
        .map(|row| {
            row.as_str()
                .ok_or_else(|| FetchError::ProtocolError("kline row is not a string".to_string()))
                .and_then(|row| parse_kline_row(row, multiplier))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(HistorySeries::new(symbol.clone(), ProviderId::EASTMONEY, bars)?)
}

#[async_trait]
impl ProviderAdapter for EastmoneyAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::EASTMONEY
    }

    fn supports(&self, symbol: &Symbol) -> bool {
        secid(symbol).is_some()
    }

    #[instrument(skip(self, _credential), fields(provider = "eastmoney", symbol = %symbol))]
    async fn fetch_quote(
        &self,
        symbol: &Symbol,
        _credential: &Credential,
    ) -> Result<Quote, FetchError> {
        let id = secid(symbol).ok_or(FetchError::Unsupported)?;
        let payload = self
            .get_json(
                QUOTE_URL,
                &[("secid", id.as_str()), ("fields", QUOTE_FIELDS), ("fltt", "2")],
            )
            .await?;
        parse_quote(symbol, &payload)
    }

    #[instrument(skip(self, _credential), fields(provider = "eastmoney", symbol = %symbol))]
    async fn fetch_history(
        &self,
        symbol: &Symbol,
        range: HistoryRange,
        _credential: &Credential,
    ) -> Result<HistorySeries, FetchError> {
        let id = secid(symbol).ok_or(FetchError::Unsupported)?;
        let beg = range.start.format("%Y%m%d").to_string();
        let end = range.end.format("%Y%m%d").to_string();
        let payload = self
            .get_json(
                KLINE_URL,
                &[
                    ("secid", id.as_str()),
                    ("fields1", "f1,f2,f3"),
                    ("fields2", KLINE_FIELDS),
                    ("klt", "101"),
                    ("fqt", "1"),
                    ("beg", beg.as_str()),
                    ("end", end.as_str()),
                ],
            )
            .await?;
        parse_history(symbol, &payload)
    }

    fn supports_batch_quotes(&self) -> bool {
        true
    }

    #[instrument(skip_all, fields(provider = "eastmoney", count = symbols.len()))]
    async fn fetch_quotes(
        &self,
        symbols: &[Symbol],
        _credential: &Credential,
    ) -> Result<Vec<Quote>, FetchError> {
        let secids = symbols.iter().filter_map(secid).collect::<Vec<_>>().join(",");
        if secids.is_empty() {
            return Ok(Vec::new());
        }

        let payload = self
            .get_json(
                BATCH_URL,
                &[("secids", secids.as_str()), ("fields", BATCH_FIELDS), ("fltt", "2")],
            )
            .await?;
        let quotes = parse_batch(symbols, &payload);
        debug!(requested = symbols.len(), received = quotes.len(), "Batch quotes parsed");
        Ok(quotes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn symbol(code: &str) -> Symbol {
        Symbol::parse(code).unwrap()
    }

    #[test]
    fn test_secid_format() {
        assert_eq!(secid(&symbol("600519")).as_deref(), Some("1.600519"));
        assert_eq!(secid(&symbol("000001")).as_deref(), Some("0.000001"));
        assert_eq!(secid(&symbol("830799")).as_deref(), Some("0.830799"));
        assert_eq!(secid(&symbol("hk00700")).as_deref(), Some("116.00700"));
        assert_eq!(secid(&symbol("AAPL")), None);
    }

    #[test]
    fn test_parse_quote() {
        let payload = json!({
            "rc": 0,
            "data": {
                "f43": 1688.5, "f47": 23456, "f48": 3.95e9,
                "f57": "600519", "f58": "贵州茅台", "f60": 1670.0, "f86": 1_718_000_000
            }
        });

        let quote = parse_quote(&symbol("600519"), &payload).unwrap();
        assert_eq!(quote.name.as_deref(), Some("贵州茅台"));
        assert_eq!(quote.last, 1688.5);
        assert_eq!(quote.prior_close, 1670.0);
        assert_eq!(quote.volume, 2_345_600);
        assert_eq!(quote.timestamp.timestamp(), 1_718_000_000);
        assert_eq!(quote.provider, ProviderId::EASTMONEY);
    }

    #[test]
    fn test_parse_quote_unknown_symbol() {
        let payload = json!({"rc": 0, "data": null});
        assert!(matches!(
            parse_quote(&symbol("600000"), &payload),
            Err(FetchError::NotFound(_))
        ));
    }

    #[test]
    fn test_parse_quote_suspended() {
        let payload = json!({"data": {"f43": "-", "f60": 10.0}});
        assert!(matches!(
            parse_quote(&symbol("000001"), &payload),
            Err(FetchError::NotFound(_))
        ));
    }

    #[test]
    fn test_parse_batch_matches_by_secid() {
        let symbols = vec![symbol("600519"), symbol("000001"), symbol("hk00700")];
        let payload = json!({
            "data": {
                "total": 2,
                "diff": [
                    {"f2": 10.5, "f5": 1000, "f6": 1.05e6, "f12": "000001", "f13": 0, "f14": "平安银行", "f18": 10.0, "f124": 1_718_000_000},
                    {"f2": 380.2, "f5": 5000, "f6": 1.9e6, "f12": "00700", "f13": 116, "f14": "腾讯控股", "f18": 375.0, "f124": 1_718_000_000},
                    {"f2": 1.0, "f5": 1, "f6": 1.0, "f12": "999999", "f13": 1, "f14": "unrequested", "f18": 1.0}
                ]
            }
        });

        let quotes = parse_batch(&symbols, &payload);
        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].symbol, symbol("000001"));
        assert_eq!(quotes[0].volume, 100_000);
        assert_eq!(quotes[1].symbol, symbol("hk00700"));
        assert_eq!(quotes[1].volume, 5000);
    }

    #[test]
    fn test_parse_history() {
        let payload = json!({
            "data": {
                "code": "600519",
                "klines": [
                    "2024-03-01,1700.00,1710.00,1720.00,1690.00,30000,5.1e9",
                    "2024-03-04,1710.00,1695.50,1715.00,1690.00,28000,4.8e9"
                ]
            }
        });

        let series = parse_history(&symbol("600519"), &payload).unwrap();
        assert_eq!(series.len(), 2);
        let latest = series.latest().unwrap();
        assert_eq!(latest.close, 1695.5);
        assert_eq!(latest.high, 1715.0);
        assert_eq!(latest.volume, 2_800_000);
    }

    #[test]
    fn test_parse_history_malformed_row() {
        let payload = json!({"data": {"klines": ["2024-03-01,1700.00"]}});
        assert!(matches!(
            parse_history(&symbol("600519"), &payload),
            Err(FetchError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_parse_history_empty_is_not_found() {
        let payload = json!({"data": {"klines": []}});
        assert!(matches!(
            parse_history(&symbol("600519"), &payload),
            Err(FetchError::NotFound(_))
        ));
    }

    #[tokio::test]
    #[ignore] // Requires network access
    async fn test_fetch_quote_live() {
        let adapter = EastmoneyAdapter::new(Duration::from_secs(10)).unwrap();
        let quote = adapter
            .fetch_quote(&symbol("600519"), &Credential::Anonymous)
            .await
            .unwrap();
        assert!(quote.last > 0.0);
    }
}
