use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{ProviderId, Symbol};

/// Latest price snapshot for one symbol
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub symbol: Symbol,
    /// Display name, when the provider returns one
    pub name: Option<String>,
    pub last: f64,
    pub prior_close: f64,
    /// Shares traded in the session
    pub volume: u64,
    /// Traded value in the quote currency
    pub turnover: f64,
    pub timestamp: DateTime<Utc>,
    pub provider: ProviderId,
}

impl Quote {
    /// Percentage change against the prior close
    pub fn change_pct(&self) -> Option<f64> {
        if self.prior_close > 0.0 {
            Some((self.last - self.prior_close) / self.prior_close * 100.0)
        } else {
            None
        }
    }

    /// Basic shape check: prices finite and positive, prior close non-negative
    pub fn is_sane(&self) -> bool {
        self.last.is_finite()
            && self.last > 0.0
            && self.prior_close.is_finite()
            && self.prior_close >= 0.0
            && self.turnover.is_finite()
            && self.turnover >= 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(last: f64, prior_close: f64) -> Quote {
        Quote {
            symbol: Symbol::parse("600519").unwrap(),
            name: None,
            last,
            prior_close,
            volume: 0,
            turnover: 0.0,
            timestamp: Utc::now(),
            provider: ProviderId::EASTMONEY,
        }
    }

    #[test]
    fn test_change_pct() {
        let pct = quote(110.0, 100.0).change_pct().unwrap();
        assert!((pct - 10.0).abs() < 1e-9);
        assert_eq!(quote(10.0, 0.0).change_pct(), None);
    }

    #[test]
    fn test_sanity() {
        assert!(quote(10.0, 9.5).is_sane());
        assert!(!quote(0.0, 9.5).is_sane());
        assert!(!quote(f64::NAN, 9.5).is_sane());
    }
}
