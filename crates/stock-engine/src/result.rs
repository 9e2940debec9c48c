//! Task outcomes and the run summary

use std::time::Duration;

use serde::Serialize;
use stock_data::{SlotHealth, Symbol};

/// Opaque model output for one symbol
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    /// Label of the model endpoint that produced it
    pub model: String,
    pub content: String,
    /// Produced without part of the market data
    pub degraded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Neither quote nor history could be fetched
    NoData,
    /// Every model endpoint failed
    AnalysisUnavailable,
    /// The run was cancelled before the task started
    Cancelled,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::NoData => "no market data",
            Self::AnalysisUnavailable => "analysis unavailable",
            Self::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded(Verdict),
    Failed(FailureReason),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    pub fn verdict(&self) -> Option<&Verdict> {
        match self {
            Self::Succeeded(verdict) => Some(verdict),
            Self::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<FailureReason> {
        match self {
            Self::Succeeded(_) => None,
            Self::Failed(reason) => Some(*reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    /// Position in the deduplicated watchlist
    pub index: usize,
    pub symbol: Symbol,
    pub outcome: Outcome,
    /// Time spent on this task, zero for tasks that never started
    pub elapsed: Duration,
}

impl AnalysisResult {
    pub fn cancelled(index: usize, symbol: Symbol) -> Self {
        Self {
            index,
            symbol,
            outcome: Outcome::Failed(FailureReason::Cancelled),
            elapsed: Duration::ZERO,
        }
    }
}

/// Final report of one run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Distinct symbols plus rejected entries
    pub total: usize,
    pub succeeded: usize,
    /// Failed symbols in watchlist order
    pub failures: Vec<(Symbol, FailureReason)>,
    /// Watchlist entries that are not recognizable symbols
    pub rejected: Vec<String>,
    pub cancelled: bool,
    pub elapsed: Duration,
    /// Breaker and credential state of every provider at the end of the run
    #[serde(skip)]
    pub provider_health: Vec<SlotHealth>,
}

impl RunSummary {
    /// Summarize results already sorted by watchlist index
    pub fn from_results(
        results: &[AnalysisResult],
        rejected: Vec<String>,
        cancelled: bool,
        elapsed: Duration,
        provider_health: Vec<SlotHealth>,
    ) -> Self {
        let failures: Vec<_> = results
            .iter()
            .filter_map(|r| r.outcome.failure().map(|reason| (r.symbol.clone(), reason)))
            .collect();
        Self {
            total: results.len() + rejected.len(),
            succeeded: results.len() - failures.len(),
            failures,
            rejected,
            cancelled,
            elapsed,
            provider_health,
        }
    }

    /// Failed symbols and rejected entries
    pub fn failed(&self) -> usize {
        self.failures.len() + self.rejected.len()
    }

    pub fn count(&self, reason: FailureReason) -> usize {
        self.failures.iter().filter(|(_, r)| *r == reason).count()
    }
}
