//! Tushare Pro `daily` endpoint (token required)
//!
//! Domestic A shares only. Each token gets its own client-side per-minute
//! quota, mirroring the per-account limit on the server: once a token's quota
//! is spent, calls with that token fail with `RateLimited` without touching
//! the network, while other tokens keep their own budget.

use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Days, NaiveDate, NaiveTime, TimeZone, Utc};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

use super::{Credential, ProviderAdapter, checked, json_f64, status_error, transport_error};
use crate::domain::{Bar, HistoryRange, HistorySeries, Market, ProviderId, Quote, Symbol};
use crate::error::FetchError;

const API_URL: &str = "http://api.tushare.pro";
const DAILY_FIELDS: &str = "ts_code,trade_date,open,high,low,close,pre_close,vol,amount";

/// Calendar days requested when only the latest bar is needed
const QUOTE_LOOKBACK_DAYS: u64 = 15;

type TokenRateLimiter = Arc<DefaultKeyedRateLimiter<String>>;

/// Tushare Pro adapter
#[derive(Clone)]
pub struct TushareAdapter {
    client: Client,
    rate_limiter: TokenRateLimiter,
}

// The limiter is keyed by token, so it stays out of debug output
impl fmt::Debug for TushareAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TushareAdapter")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    api_name: &'a str,
    token: &'a str,
    params: DailyParams,
    fields: &'a str,
}

#[derive(Debug, Serialize)]
struct DailyParams {
    ts_code: String,
    start_date: String,
    end_date: String,
}

/// One row of the `daily` table, converted to shares and currency units
#[derive(Debug, Clone, PartialEq)]
struct DailyRow {
    bar: Bar,
    pre_close: f64,
}

impl TushareAdapter {
    /// Create an adapter allowing `calls_per_minute` requests per token (minimum 1)
    pub fn new(timeout: Duration, calls_per_minute: u32) -> reqwest::Result<Self> {
        let quota = Quota::per_minute(NonZeroU32::new(calls_per_minute).unwrap_or(NonZeroU32::MIN));
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            rate_limiter: Arc::new(RateLimiter::keyed(quota)),
        })
    }

    async fn daily(
        &self,
        symbol: &Symbol,
        range: HistoryRange,
        credential: &Credential,
    ) -> Result<Vec<DailyRow>, FetchError> {
        let ts_code = ts_code(symbol).ok_or(FetchError::Unsupported)?;
        let token = credential.token().ok_or(FetchError::Unsupported)?;

        if self.rate_limiter.check_key(&token.to_string()).is_err() {
            debug!("Local Tushare quota exhausted for this token");
            return Err(FetchError::RateLimited(
                "local per-minute quota exhausted".to_string(),
            ));
        }

        let request = ApiRequest {
            api_name: "daily",
            token,
            params: DailyParams {
                ts_code,
                start_date: range.start.format("%Y%m%d").to_string(),
                end_date: range.end.format("%Y%m%d").to_string(),
            },
            fields: DAILY_FIELDS,
        };

        let response = self
            .client
            .post(API_URL)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, &symbol.to_string()));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| FetchError::ProtocolError(format!("invalid JSON: {e}")))?;

        parse_daily(&payload)
    }
}

/// `600519.SH` style code
fn ts_code(symbol: &Symbol) -> Option<String> {
    match (symbol.market(), symbol.exchange()) {
        (Market::ChinaA, Some(exchange)) => Some(format!("{}.{}", symbol.code(), exchange.suffix())),
        _ => None,
    }
}

/// Map a non-zero `code` to the fetch taxonomy.
///
/// Quota messages mention the per-minute or per-day limit; token errors are
/// credential-specific and rotate the same way.
fn api_error(code: i64, msg: &str) -> FetchError {
    let quota = ["每分钟", "每天", "最多访问", "频率", "limit"];
    if code == 40203 || quota.iter().any(|needle| msg.contains(needle)) {
        FetchError::RateLimited(msg.to_string())
    } else if code == 40101 || msg.contains("token") {
        FetchError::RateLimited(format!("token rejected: {msg}"))
    } else {
        FetchError::ProtocolError(format!("tushare error {code}: {msg}"))
    }
}

fn parse_daily(payload: &Value) -> Result<Vec<DailyRow>, FetchError> {
    let code = payload["code"]
        .as_i64()
        .ok_or_else(|| FetchError::ProtocolError("missing response code".to_string()))?;
    if code != 0 {
        return Err(api_error(code, payload["msg"].as_str().unwrap_or_default()));
    }

    let fields: Vec<&str> = payload["data"]["fields"]
        .as_array()
        .map(|f| f.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let column = |name: &str| {
        fields
            .iter()
            .position(|f| *f == name)
            .ok_or_else(|| FetchError::ProtocolError(format!("missing column {name}")))
    };

    let date_col = column("trade_date")?;
    let [open, high, low, close, pre_close, vol, amount] =
        ["open", "high", "low", "close", "pre_close", "vol", "amount"].map(column);
    let (open, high, low, close) = (open?, high?, low?, close?);
    let (pre_close, vol, amount) = (pre_close?, vol?, amount?);

    let items: &[Value] = payload["data"]["items"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default();
    items
        .iter()
        .map(|row| {
            let cell = |i: usize| {
                json_f64(&row[i])
                    .ok_or_else(|| FetchError::ProtocolError(format!("bad value in row {row}")))
            };
            let date = row[date_col]
                .as_str()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y%m%d").ok())
                .ok_or_else(|| FetchError::ProtocolError(format!("bad trade_date in row {row}")))?;

            Ok(DailyRow {
                bar: Bar {
                    date,
                    open: cell(open)?,
                    high: cell(high)?,
                    low: cell(low)?,
                    close: cell(close)?,
                    // lots and thousands of yuan
                    volume: (cell(vol)? * 100.0) as u64,
                    turnover: cell(amount)? * 1000.0,
                },
                pre_close: cell(pre_close)?,
            })
        })
        .collect()
}

/// Quote from the most recent row, stamped at the 15:00 Beijing close
fn latest_quote(symbol: &Symbol, rows: Vec<DailyRow>) -> Result<Quote, FetchError> {
    let row = rows
        .into_iter()
        .max_by_key(|row| row.bar.date)
        .ok_or_else(|| FetchError::NotFound(symbol.to_string()))?;

    let close_utc = NaiveTime::from_hms_opt(7, 0, 0).unwrap_or(NaiveTime::MIN);
    let quote = Quote {
        symbol: symbol.clone(),
        name: None,
        last: row.bar.close,
        prior_close: row.pre_close,
        volume: row.bar.volume,
        turnover: row.bar.turnover,
        timestamp: Utc.from_utc_datetime(&row.bar.date.and_time(close_utc)),
        provider: ProviderId::TUSHARE,
    };
    checked(quote)
}

#[async_trait]
impl ProviderAdapter for TushareAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::TUSHARE
    }

    fn supports(&self, symbol: &Symbol) -> bool {
        ts_code(symbol).is_some()
    }

    #[instrument(skip(self, credential), fields(provider = "tushare", symbol = %symbol))]
    async fn fetch_quote(
        &self,
        symbol: &Symbol,
        credential: &Credential,
    ) -> Result<Quote, FetchError> {
        let end = Utc::now().date_naive();
        let start = end
            .checked_sub_days(Days::new(QUOTE_LOOKBACK_DAYS))
            .unwrap_or(end);
        let rows = self
            .daily(symbol, HistoryRange::new(start, end), credential)
            .await?;
        latest_quote(symbol, rows)
    }

    #[instrument(skip(self, credential), fields(provider = "tushare", symbol = %symbol))]
    async fn fetch_history(
        &self,
        symbol: &Symbol,
        range: HistoryRange,
        credential: &Credential,
    ) -> Result<HistorySeries, FetchError> {
        let rows = self.daily(symbol, range, credential).await?;
        let bars = rows.into_iter().map(|row| row.bar).collect();
        Ok(HistorySeries::new(symbol.clone(), ProviderId::TUSHARE, bars)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn symbol(code: &str) -> Symbol {
        Symbol::parse(code).unwrap()
    }

    fn fixture() -> Value {
        json!({
            "request_id": "abc",
            "code": 0,
            "msg": "",
            "data": {
                "fields": ["ts_code", "trade_date", "open", "high", "low", "close", "pre_close", "vol", "amount"],
                "items": [
                    ["000001.SZ", "20240305", 10.6, 10.8, 10.5, 10.7, 10.6, 1_500_000.0, 1_600_000.0],
                    ["000001.SZ", "20240304", 10.4, 10.7, 10.3, 10.6, 10.4, 1_200_000.0, 1_250_000.0]
                ]
            }
        })
    }

    #[test]
    fn test_ts_code() {
        assert_eq!(ts_code(&symbol("600519")).as_deref(), Some("600519.SH"));
        assert_eq!(ts_code(&symbol("300750")).as_deref(), Some("300750.SZ"));
        assert_eq!(ts_code(&symbol("830799")).as_deref(), Some("830799.BJ"));
        assert_eq!(ts_code(&symbol("hk00700")), None);
        assert_eq!(ts_code(&symbol("AAPL")), None);
    }

    #[test]
    fn test_parse_daily_units() {
        let rows = parse_daily(&fixture()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].bar.volume, 150_000_000);
        assert!((rows[0].bar.turnover - 1.6e9).abs() < 1.0);
        assert_eq!(rows[0].pre_close, 10.6);
    }

    #[test]
    fn test_history_sorted_ascending() {
        let rows = parse_daily(&fixture()).unwrap();
        let bars = rows.into_iter().map(|row| row.bar).collect();
        let series = HistorySeries::new(symbol("000001"), ProviderId::TUSHARE, bars).unwrap();
        assert_eq!(
            series.bars()[0].date,
            NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
        );
    }

    #[test]
    fn test_latest_quote_uses_newest_row() {
        let rows = parse_daily(&fixture()).unwrap();
        let quote = latest_quote(&symbol("000001"), rows).unwrap();
        assert_eq!(quote.last, 10.7);
        assert_eq!(quote.prior_close, 10.6);
        assert_eq!(quote.timestamp.to_rfc3339(), "2024-03-05T07:00:00+00:00");
    }

    #[test]
    fn test_latest_quote_without_rows() {
        assert!(matches!(
            latest_quote(&symbol("000001"), Vec::new()),
            Err(FetchError::NotFound(_))
        ));
    }

    #[test]
    fn test_api_errors() {
        let limited = json!({"code": 40203, "msg": "抱歉，您每分钟最多访问该接口500次"});
        assert!(matches!(parse_daily(&limited), Err(FetchError::RateLimited(_))));

        let bad_token = json!({"code": 40101, "msg": "您的token不对，请确认。"});
        assert!(matches!(parse_daily(&bad_token), Err(FetchError::RateLimited(_))));

        let other = json!({"code": 50101, "msg": "系统内部错误"});
        assert!(matches!(parse_daily(&other), Err(FetchError::ProtocolError(_))));
    }

    #[tokio::test]
    async fn test_local_quota_short_circuits() {
        let adapter = TushareAdapter::new(Duration::from_secs(5), 1).unwrap();
        // Spend the only permit without a network call
        assert!(adapter.rate_limiter.check_key(&"t".to_string()).is_ok());

        let result = adapter
            .fetch_quote(&symbol("600519"), &Credential::Token("t".to_string()))
            .await;
        assert!(matches!(result, Err(FetchError::RateLimited(_))));
    }

    #[test]
    fn test_local_quota_is_per_token() {
        let adapter = TushareAdapter::new(Duration::from_secs(5), 1).unwrap();
        let first = "token-a".to_string();
        let second = "token-b".to_string();

        assert!(adapter.rate_limiter.check_key(&first).is_ok());
        assert!(adapter.rate_limiter.check_key(&first).is_err());
        // Exhausting one token leaves the next one its full budget
        assert!(adapter.rate_limiter.check_key(&second).is_ok());
    }

    #[tokio::test]
    async fn test_anonymous_credential_unsupported() {
        let adapter = TushareAdapter::new(Duration::from_secs(5), 10).unwrap();
        let result = adapter
            .fetch_quote(&symbol("600519"), &Credential::Anonymous)
            .await;
        assert_eq!(result, Err(FetchError::Unsupported));
    }
}
