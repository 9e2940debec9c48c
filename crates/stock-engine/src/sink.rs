//! Delivery of results to the outside world

use async_trait::async_trait;
use tracing::{info, warn};

use crate::result::{AnalysisResult, Outcome, RunSummary};

/// Receives results from a run.
///
/// Streaming runs call [`on_result`](ResultSink::on_result) once per task in
/// completion order; batch runs call [`on_batch`](ResultSink::on_batch) once
/// with every result in watchlist order. Both end with
/// [`on_summary`](ResultSink::on_summary).
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn on_result(&self, _result: &AnalysisResult) {}

    async fn on_batch(&self, _results: &[AnalysisResult]) {}

    async fn on_summary(&self, _summary: &RunSummary) {}
}

/// Writes every result to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TracingSink {
    fn log(result: &AnalysisResult) {
        match &result.outcome {
            Outcome::Succeeded(verdict) => info!(
                symbol = %result.symbol,
                model = %verdict.model,
                degraded = verdict.degraded,
                elapsed_ms = result.elapsed.as_millis() as u64,
                "{}",
                verdict.content
            ),
            Outcome::Failed(reason) => warn!(
                symbol = %result.symbol,
                reason = %reason,
                "Analysis failed"
            ),
        }
    }
}

#[async_trait]
impl ResultSink for TracingSink {
    async fn on_result(&self, result: &AnalysisResult) {
        Self::log(result);
    }

    async fn on_batch(&self, results: &[AnalysisResult]) {
        for result in results {
            Self::log(result);
        }
    }

    async fn on_summary(&self, summary: &RunSummary) {
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed(),
            cancelled = summary.cancelled,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Run finished"
        );
        for health in &summary.provider_health {
            info!(
                provider = %health.provider,
                quote_state = ?health.quote.state,
                history_state = ?health.history.state,
                rotations = health.rotations,
                "Provider health"
            );
        }
    }
}
