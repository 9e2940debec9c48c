//! Watchlist analysis engine
//!
//! Fans a watchlist out over a bounded pool of workers. Each task fetches a
//! quote and daily history through the [`stock_data::DataSourceManager`],
//! hands what it got to an [`Analyzer`], and reports the outcome to a
//! [`ResultSink`], either as each task completes or once the whole batch is
//! done. An optional [`stock_data::NewsService`] adds recent news to every
//! prompt and stands in with web search results when no market data
//! provider could serve a symbol.

pub mod analyzer;
pub mod config;
pub mod error;
pub mod result;
pub mod scheduler;
pub mod sink;
pub mod task;
pub mod watchlist;

pub use analyzer::{AnalysisInput, Analyzer, LlmAnalyzer, ModelEndpoint};
pub use config::{DeliveryMode, RunConfig, RunConfigBuilder};
pub use error::{EngineError, Result};
pub use result::{AnalysisResult, FailureReason, Outcome, RunSummary, Verdict};
pub use scheduler::Scheduler;
pub use sink::{ResultSink, TracingSink};
pub use task::{AnalysisTask, TaskState};
pub use watchlist::Watchlist;
