//! Per-symbol task lifecycle

use std::fmt;

use serde::Serialize;
use stock_data::Symbol;

use crate::error::{EngineError, Result};

/// Lifecycle of one analysis task. States only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Fetching,
    Analyzing,
    Succeeded,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Legal single-step transitions. Any non-terminal state may fail.
    pub fn can_advance_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Fetching)
            | (Self::Fetching, Self::Analyzing)
            | (Self::Analyzing, Self::Succeeded) => true,
            (from, Self::Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Analyzing => "analyzing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One watchlist entry on its way through the pipeline
#[derive(Debug, Clone)]
pub struct AnalysisTask {
    index: usize,
    symbol: Symbol,
    state: TaskState,
}

impl AnalysisTask {
    pub fn new(index: usize, symbol: Symbol) -> Self {
        Self {
            index,
            symbol,
            state: TaskState::Pending,
        }
    }

    /// Position in the deduplicated watchlist
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn advance(&mut self, next: TaskState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(EngineError::InvalidTransition {
                symbol: self.symbol.to_string(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}
