use chrono::{Days, NaiveDate, Utc};
use serde::Serialize;

use super::{ProviderId, Symbol};
use crate::error::HistoryError;

/// One daily bar
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Shares traded
    pub volume: u64,
    pub turnover: f64,
}

impl Bar {
    /// Prices finite and non-negative, high not below low
    pub fn is_sane(&self) -> bool {
        let prices = [self.open, self.high, self.low, self.close];
        prices.iter().all(|p| p.is_finite() && *p >= 0.0) && self.high >= self.low
    }
}

/// Daily bars for one symbol in strictly ascending date order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistorySeries {
    symbol: Symbol,
    provider: ProviderId,
    bars: Vec<Bar>,
}

impl HistorySeries {
    /// Sort the bars by date and validate them.
    ///
    /// Fails on an empty input, a duplicate date, or a bar that does not
    /// pass [`Bar::is_sane`].
    pub fn new(
        symbol: Symbol,
        provider: ProviderId,
        mut bars: Vec<Bar>,
    ) -> Result<Self, HistoryError> {
        if bars.is_empty() {
            return Err(HistoryError::Empty);
        }

        bars.sort_by_key(|bar| bar.date);

        if let Some(pair) = bars.windows(2).find(|pair| pair[0].date == pair[1].date) {
            return Err(HistoryError::DuplicateDate(pair[0].date));
        }
        if let Some(bar) = bars.iter().find(|bar| !bar.is_sane()) {
            return Err(HistoryError::InvalidBar(bar.date));
        }

        Ok(Self {
            symbol,
            provider,
            bars,
        })
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    /// Always false; an empty series cannot be constructed
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn latest(&self) -> Option<&Bar> {
        self.bars.last()
    }

    /// Close-to-close change per bar. The first bar has none.
    pub fn change_pcts(&self) -> Vec<Option<f64>> {
        std::iter::once(None)
            .chain(self.bars.windows(2).map(|pair| {
                let prev = pair[0].close;
                (prev > 0.0).then(|| (pair[1].close - prev) / prev * 100.0)
            }))
            .take(self.bars.len())
            .collect()
    }
}

/// Inclusive date range for a history request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HistoryRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl HistoryRange {
    /// Range between two dates in either order
    pub fn new(a: NaiveDate, b: NaiveDate) -> Self {
        Self {
            start: a.min(b),
            end: a.max(b),
        }
    }

    /// The last `days` calendar days up to today (UTC)
    pub fn last_days(days: u32) -> Self {
        let end = Utc::now().date_naive();
        let start = end
            .checked_sub_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MIN);
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn bar(d: u32, close: f64) -> Bar {
        Bar {
            date: date(d),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1000,
            turnover: close * 1000.0,
        }
    }

    fn symbol() -> Symbol {
        Symbol::parse("000001").unwrap()
    }

    #[test]
    fn test_series_sorted_on_construction() {
        let series =
            HistorySeries::new(symbol(), ProviderId::TUSHARE, vec![bar(5, 11.0), bar(4, 10.0)])
                .unwrap();
        assert_eq!(series.bars()[0].date, date(4));
        assert_eq!(series.latest().unwrap().date, date(5));
    }

    #[test]
    fn test_series_rejects_duplicates() {
        let result =
            HistorySeries::new(symbol(), ProviderId::TUSHARE, vec![bar(4, 10.0), bar(4, 10.5)]);
        assert!(matches!(result, Err(HistoryError::DuplicateDate(d)) if d == date(4)));
    }

    #[test]
    fn test_series_rejects_inverted_bar() {
        let mut broken = bar(4, 10.0);
        broken.high = 5.0;
        let result = HistorySeries::new(symbol(), ProviderId::TUSHARE, vec![broken]);
        assert!(matches!(result, Err(HistoryError::InvalidBar(_))));
    }

    #[test]
    fn test_series_rejects_empty() {
        let result = HistorySeries::new(symbol(), ProviderId::TUSHARE, Vec::new());
        assert!(matches!(result, Err(HistoryError::Empty)));
    }

    #[test]
    fn test_change_pcts() {
        let series = HistorySeries::new(
            symbol(),
            ProviderId::TUSHARE,
            vec![bar(4, 10.0), bar(5, 11.0), bar(6, 9.9)],
        )
        .unwrap();

        let pcts = series.change_pcts();
        assert_eq!(pcts.len(), 3);
        assert_eq!(pcts[0], None);
        assert!((pcts[1].unwrap() - 10.0).abs() < 1e-9);
        assert!((pcts[2].unwrap() + 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_range_orders_dates() {
        let range = HistoryRange::new(date(9), date(2));
        assert_eq!(range.start, date(2));
        assert!(range.contains(date(5)));
        assert!(!range.contains(date(10)));
    }
}
