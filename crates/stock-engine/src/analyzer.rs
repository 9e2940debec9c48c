//! Boundary between market data and the AI model

use std::fmt::{self, Write as _};
use std::sync::Arc;

use async_trait::async_trait;
use stock_data::{HistorySeries, NewsDigest, Quote, Symbol};
use stock_llm::{CompletionRequest, LLMError, LLMProvider, Message};
use tracing::{debug, warn};

use crate::result::Verdict;

/// One model reachable through one key
#[derive(Clone)]
pub struct ModelEndpoint {
    /// Name used in logs and verdicts, never the key
    pub label: String,
    pub provider: Arc<dyn LLMProvider>,
    pub model: String,
}

impl ModelEndpoint {
    pub fn new(
        label: impl Into<String>,
        provider: Arc<dyn LLMProvider>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            provider,
            model: model.into(),
        }
    }
}

impl fmt::Debug for ModelEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelEndpoint")
            .field("label", &self.label)
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .finish()
    }
}

/// Whatever data the fetch stage managed to collect
#[derive(Debug, Clone)]
pub struct AnalysisInput {
    pub symbol: Symbol,
    pub quote: Option<Quote>,
    pub history: Option<HistorySeries>,
    /// Recent news about the stock
    pub news: Option<NewsDigest>,
    /// Price information from web search, only when no market data
    /// provider could serve the symbol
    pub web_prices: Option<NewsDigest>,
}

impl AnalysisInput {
    pub fn new(symbol: Symbol, quote: Option<Quote>, history: Option<HistorySeries>) -> Self {
        Self {
            symbol,
            quote,
            history,
            news: None,
            web_prices: None,
        }
    }

    /// Quote or history is missing
    pub fn is_degraded(&self) -> bool {
        self.quote.is_none() || self.history.is_none()
    }

    /// Something to analyze: market data or, failing that, web prices
    pub fn has_material(&self) -> bool {
        self.quote.is_some() || self.history.is_some() || self.web_prices.is_some()
    }

    /// Display name from the quote, falling back to the code
    pub fn display_name(&self) -> &str {
        self.quote
            .as_ref()
            .and_then(|q| q.name.as_deref())
            .unwrap_or_else(|| self.symbol.code())
    }
}

/// Turns market data into a verdict using one model endpoint
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(
        &self,
        endpoint: &ModelEndpoint,
        input: &AnalysisInput,
    ) -> Result<Verdict, LLMError>;
}

const DEFAULT_SYSTEM_PROMPT: &str = "You are a disciplined equity analyst. \
Given a stock's latest quote, recent daily bars and news, write a short \
decision report: trend, key levels, news sentiment, risks, and a \
buy/hold/sell call with confidence.";

/// Bars included in the prompt
const PROMPT_BARS: usize = 20;

/// Characters of a web price snippet included in the prompt
const WEB_PRICE_SNIPPET_CHARS: usize = 200;

/// Minimal prompt builder over an [`LLMProvider`]
#[derive(Debug, Clone)]
pub struct LlmAnalyzer {
    system_prompt: String,
    max_tokens: usize,
    temperature: f32,
}

impl Default for LlmAnalyzer {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tokens: 2048,
            temperature: 0.3,
        }
    }
}

impl LlmAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn build_prompt(input: &AnalysisInput) -> String {
        let mut prompt = format!("Stock: {} ({})\n", input.display_name(), input.symbol);

        match &input.quote {
            Some(quote) => {
                let _ = write!(
                    prompt,
                    "\nLatest quote ({}): last {:.2}, prior close {:.2}",
                    quote.timestamp.format("%Y-%m-%d %H:%M UTC"),
                    quote.last,
                    quote.prior_close
                );
                if let Some(pct) = quote.change_pct() {
                    let _ = write!(prompt, ", change {pct:+.2}%");
                }
                let _ = writeln!(
                    prompt,
                    ", volume {}, turnover {:.0}",
                    quote.volume, quote.turnover
                );
            }
            None => prompt.push_str("\nLatest quote: unavailable\n"),
        }

        match &input.history {
            Some(series) => {
                let bars = series.bars();
                let changes = series.change_pcts();
                let skip = bars.len().saturating_sub(PROMPT_BARS);
                prompt.push_str("\nRecent daily bars (date, open, high, low, close, volume, change%):\n");
                for (bar, change) in bars.iter().zip(changes).skip(skip) {
                    let change = change.map_or_else(|| "-".to_string(), |c| format!("{c:+.2}"));
                    let _ = writeln!(
                        prompt,
                        "{} {:.2} {:.2} {:.2} {:.2} {} {}",
                        bar.date, bar.open, bar.high, bar.low, bar.close, bar.volume, change
                    );
                }
            }
            None => prompt.push_str("\nDaily history: unavailable\n"),
        }

        if let Some(digest) = &input.web_prices {
            let _ = writeln!(
                prompt,
                "\nWeb search results about the price ({}). They may be delayed or inaccurate:",
                digest.provider
            );
            for (i, item) in digest.items.iter().enumerate() {
                let date = item
                    .published
                    .as_deref()
                    .map(|d| format!(" [{d}]"))
                    .unwrap_or_default();
                let snippet: String = item.snippet.chars().take(WEB_PRICE_SNIPPET_CHARS).collect();
                let _ = writeln!(prompt, "{}. [{}] {}{date}", i + 1, item.source, item.title);
                let _ = writeln!(prompt, "   {snippet}");
            }
        }

        match &input.news {
            Some(digest) if !digest.is_empty() => {
                let _ = writeln!(prompt, "\nRecent news ({}):", digest.provider);
                for (i, item) in digest.items.iter().enumerate() {
                    let date = item
                        .published
                        .as_deref()
                        .map(|d| format!(" ({d})"))
                        .unwrap_or_default();
                    let _ = writeln!(prompt, "{}. [{}] {}{date}", i + 1, item.source, item.title);
                    let _ = writeln!(prompt, "   {}", item.snippet);
                }
            }
            _ => prompt.push_str("\nRecent news: none found\n"),
        }

        if input.is_degraded() {
            prompt.push_str(
                "\nNote: part of the market data is missing. Say so and lower your confidence.\n",
            );
        }
        prompt
    }
}

#[async_trait]
impl Analyzer for LlmAnalyzer {
    async fn analyze(
        &self,
        endpoint: &ModelEndpoint,
        input: &AnalysisInput,
    ) -> Result<Verdict, LLMError> {
        let request = CompletionRequest::builder(&endpoint.model)
            .system(&self.system_prompt)
            .add_message(Message::user(Self::build_prompt(input)))
            .max_tokens(self.max_tokens)
            .temperature(self.temperature)
            .build();

        debug!(symbol = %input.symbol, endpoint = %endpoint.label, "Requesting analysis");
        let response = endpoint.provider.complete(request).await?;
        debug!(
            symbol = %input.symbol,
            tokens = response.usage.total(),
            "Analysis received"
        );
        if response.is_truncated() {
            warn!(symbol = %input.symbol, endpoint = %endpoint.label, "Analysis cut off at the token limit");
        }

        Ok(Verdict {
            model: endpoint.label.clone(),
            content: response.message.text().to_string(),
            degraded: input.is_degraded(),
        })
    }
}
