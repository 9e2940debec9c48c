//! Concurrent watchlist scheduler
//!
//! A run deduplicates the watchlist, warms the quote cache with one
//! prefetch, then lets `concurrency` workers pull tasks from a shared queue.
//! Each task goes fetch → analyze → emit; a failing task only fails itself.
//! With a news service attached, the fetch stage also collects recent news,
//! and a symbol no market data provider could serve falls back to price
//! information from web search before it is given up as having no data.
//! Cancelling the run token (or hitting the run deadline) stops workers from
//! picking up new tasks, and everything still queued is reported as
//! cancelled.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use stock_data::{DataError, DataKind, DataSourceManager, NewsDigest, NewsService, Symbol};
use stock_utils::{CredentialPool, RateLimitedCaller};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::analyzer::{AnalysisInput, Analyzer, ModelEndpoint};
use crate::config::{DeliveryMode, RunConfig};
use crate::error::{EngineError, Result};
use crate::result::{AnalysisResult, FailureReason, Outcome, RunSummary, Verdict};
use crate::sink::ResultSink;
use crate::task::{AnalysisTask, TaskState};
use crate::watchlist::Watchlist;

/// Runs the per-symbol pipeline over a watchlist
pub struct Scheduler {
    data: Arc<DataSourceManager>,
    news: Option<Arc<NewsService>>,
    analyzer: Arc<dyn Analyzer>,
    caller: RateLimitedCaller<ModelEndpoint>,
    config: RunConfig,
}

impl Scheduler {
    /// Create a scheduler. Fails on zero concurrency or an empty endpoint
    /// list.
    pub fn new(
        data: Arc<DataSourceManager>,
        analyzer: Arc<dyn Analyzer>,
        endpoints: Vec<ModelEndpoint>,
        config: RunConfig,
    ) -> Result<Self> {
        if config.concurrency == 0 {
            return Err(EngineError::ZeroConcurrency);
        }
        config.validate()?;
        let pool = CredentialPool::new(endpoints).map_err(|_| EngineError::NoEndpoints)?;
        let caller = RateLimitedCaller::new(Arc::new(pool), config.ai_retry.clone());

        Ok(Self {
            data,
            news: None,
            analyzer,
            caller,
            config,
        })
    }

    /// Attach a news search service
    pub fn with_news(mut self, news: Arc<NewsService>) -> Self {
        self.news = Some(news);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Model endpoints shared by every task
    pub fn endpoints(&self) -> &Arc<CredentialPool<ModelEndpoint>> {
        self.caller.pool()
    }

    pub fn data(&self) -> &Arc<DataSourceManager> {
        &self.data
    }

    /// Analyze every symbol on the watchlist and report to `sink`.
    ///
    /// Always returns a summary covering every distinct symbol, including a
    /// partial one when `cancel` fires or the deadline passes.
    pub async fn run(
        &self,
        watchlist: &[Symbol],
        sink: &dyn ResultSink,
        cancel: &CancellationToken,
    ) -> RunSummary {
        self.run_watchlist(&Watchlist::from(watchlist.to_vec()), sink, cancel)
            .await
    }

    /// Like [`run`](Self::run), with the watchlist's rejected entries
    /// reported in the summary.
    pub async fn run_watchlist(
        &self,
        watchlist: &Watchlist,
        sink: &dyn ResultSink,
        cancel: &CancellationToken,
    ) -> RunSummary {
        let started = Instant::now();
        let symbols = dedupe(watchlist.symbols());
        let total = symbols.len();
        let delivery = self.config.delivery;

        info!(
            total,
            rejected = watchlist.rejected().len(),
            concurrency = self.config.concurrency,
            delivery = %delivery,
            "Starting analysis run"
        );

        let token = cancel.child_token();
        let deadline_timer = self.config.deadline.map(|budget| {
            let token = token.clone();
            tokio::spawn(async move {
                sleep(budget).await;
                warn!(budget_secs = budget.as_secs(), "Run deadline reached, cancelling");
                token.cancel();
            })
        });

        if !token.is_cancelled() {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                report = self.data.prefetch(&symbols, DataKind::Quote) => {
                    info!(
                        hits = report.hits,
                        fetched = report.fetched,
                        failed = report.failed.len(),
                        "Quotes prefetched"
                    );
                }
            }
        }

        let queue: Mutex<VecDeque<AnalysisTask>> = Mutex::new(
            symbols
                .into_iter()
                .enumerate()
                .map(|(index, symbol)| AnalysisTask::new(index, symbol))
                .collect(),
        );
        let pacer = Pacer::new(self.config.spacing);
        let streaming = delivery == DeliveryMode::Streaming;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let workers = {
            let (queue, pacer, token) = (&queue, &pacer, &token);
            let count = self.config.concurrency.min(total.max(1));
            async move {
                join_all((0..count).map(|id| self.worker(id, queue, pacer, token, tx.clone())))
                    .await;
            }
        };
        let collector = async {
            let mut results = Vec::with_capacity(total);
            while let Some(result) = rx.recv().await {
                if streaming {
                    sink.on_result(&result).await;
                }
                results.push(result);
            }
            results
        };
        let ((), mut results) = tokio::join!(workers, collector);

        let leftover = std::mem::take(&mut *queue.lock().unwrap_or_else(PoisonError::into_inner));
        if !leftover.is_empty() {
            info!(count = leftover.len(), "Tasks cancelled before start");
        }
        for task in leftover {
            let result = AnalysisResult::cancelled(task.index(), task.symbol().clone());
            if streaming {
                sink.on_result(&result).await;
            }
            results.push(result);
        }

        if let Some(timer) = deadline_timer {
            timer.abort();
        }

        results.sort_by_key(|r| r.index);
        if !streaming {
            sink.on_batch(&results).await;
        }

        let summary = RunSummary::from_results(
            &results,
            watchlist.rejected().to_vec(),
            token.is_cancelled(),
            started.elapsed(),
            self.data.health(),
        );
        sink.on_summary(&summary).await;
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed(),
            cancelled = summary.cancelled,
            "Analysis run complete"
        );
        summary
    }

    async fn worker(
        &self,
        id: usize,
        queue: &Mutex<VecDeque<AnalysisTask>>,
        pacer: &Pacer,
        token: &CancellationToken,
        tx: mpsc::UnboundedSender<AnalysisResult>,
    ) {
        loop {
            if token.is_cancelled() {
                debug!(worker = id, "Run cancelled, worker stopping");
                break;
            }
            let Some(task) = next_task(queue) else {
                break;
            };

            let result = if pacer.wait(token).await {
                self.execute(task).await
            } else {
                AnalysisResult::cancelled(task.index(), task.symbol().clone())
            };
            if tx.send(result).is_err() {
                break;
            }
        }
    }

    #[instrument(skip_all, fields(symbol = %task.symbol()))]
    async fn execute(&self, mut task: AnalysisTask) -> AnalysisResult {
        let started = Instant::now();
        let outcome = match self.pipeline(&mut task).await {
            Ok(verdict) => {
                step(&mut task, TaskState::Succeeded);
                Outcome::Succeeded(verdict)
            }
            Err(reason) => {
                step(&mut task, TaskState::Failed);
                Outcome::Failed(reason)
            }
        };
        let elapsed = started.elapsed();
        debug!(state = %task.state(), elapsed_ms = elapsed.as_millis() as u64, "Task finished");

        AnalysisResult {
            index: task.index(),
            symbol: task.symbol().clone(),
            outcome,
            elapsed,
        }
    }

    async fn pipeline(&self, task: &mut AnalysisTask) -> std::result::Result<Verdict, FailureReason> {
        step(task, TaskState::Fetching);
        let symbol = task.symbol().clone();
        let (quote, history) = tokio::join!(self.data.quote(&symbol), self.data.history(&symbol));
        let quote = available(DataKind::Quote, quote);
        let history = available(DataKind::History, history);

        let mut input = AnalysisInput::new(symbol, quote, history);
        let name = input.display_name().to_string();
        if input.quote.is_none() && input.history.is_none() {
            input.web_prices = self.price_fallback(&input.symbol, &name).await;
        }
        if !input.has_material() {
            warn!("No market data from any provider");
            return Err(FailureReason::NoData);
        }
        input.news = self.stock_news(&input.symbol, &name).await;
        if input.is_degraded() {
            info!(
                quote = input.quote.is_some(),
                history = input.history.is_some(),
                web_prices = input.web_prices.is_some(),
                "Analyzing with partial data"
            );
        }

        step(task, TaskState::Analyzing);
        let analyzer = &self.analyzer;
        let input = &input;
        self.caller
            .call("analyze", |endpoint: ModelEndpoint| async move {
                analyzer.analyze(&endpoint, input).await
            })
            .await
            .map_err(|e| {
                warn!(error = %e, "Analysis unavailable");
                FailureReason::AnalysisUnavailable
            })
    }

    async fn stock_news(&self, symbol: &Symbol, name: &str) -> Option<NewsDigest> {
        let news = self.news.as_ref()?;
        match news.search_stock_news(symbol, name).await {
            Ok(digest) => {
                debug!(provider = %digest.provider, items = digest.len(), "News found");
                Some(digest)
            }
            Err(e) => {
                warn!(error = %e, "News unavailable");
                None
            }
        }
    }

    async fn price_fallback(&self, symbol: &Symbol, name: &str) -> Option<NewsDigest> {
        let news = self.news.as_ref()?;
        match news.search_price_fallback(symbol, name).await {
            Ok(digest) => Some(digest),
            Err(e) => {
                warn!(error = %e, "Web price search found nothing");
                None
            }
        }
    }
}

/// Spaces task starts at least `spacing` apart across all workers
struct Pacer {
    spacing: Duration,
    next: Mutex<Instant>,
}

impl Pacer {
    fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            next: Mutex::new(Instant::now()),
        }
    }

    /// Reserve the next start slot and wait for it. Returns false when the
    /// run is cancelled first.
    async fn wait(&self, token: &CancellationToken) -> bool {
        if self.spacing.is_zero() {
            return !token.is_cancelled();
        }
        let start = {
            let mut next = self.next.lock().unwrap_or_else(PoisonError::into_inner);
            let start = (*next).max(Instant::now());
            *next = start + self.spacing;
            start
        };

        tokio::select! {
            biased;
            () = token.cancelled() => false,
            () = sleep_until(start) => true,
        }
    }
}

fn next_task(queue: &Mutex<VecDeque<AnalysisTask>>) -> Option<AnalysisTask> {
    queue
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .pop_front()
}

/// First occurrence wins, order kept
fn dedupe(watchlist: &[Symbol]) -> Vec<Symbol> {
    let mut seen = HashSet::new();
    watchlist
        .iter()
        .filter(|symbol| seen.insert(*symbol))
        .cloned()
        .collect()
}

fn available<T>(kind: DataKind, result: std::result::Result<T, DataError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(%kind, error = %e, "Market data unavailable");
            None
        }
    }
}

fn step(task: &mut AnalysisTask, next: TaskState) {
    if let Err(e) = task.advance(next) {
        error!(error = %e, "Task lifecycle violated");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};
    use stock_data::{
        Bar, CircuitBreakerConfig, Credential, FetchError, HistoryRange, HistorySeries, NewsItem,
        NewsProvider, NewsSlot, ProviderAdapter, ProviderId, ProviderSlot, Quote,
    };
    use stock_llm::{CompletionRequest, CompletionResponse, LLMError, LLMProvider};
    use stock_utils::RetryPolicy;

    use super::*;

    const FAKE: ProviderId = ProviderId::custom("fake");

    #[derive(Default)]
    struct FakeMarket {
        no_quote: HashSet<&'static str>,
        no_history: HashSet<&'static str>,
    }

    #[async_trait]
    impl ProviderAdapter for FakeMarket {
        fn id(&self) -> ProviderId {
            FAKE
        }

        fn supports(&self, _symbol: &Symbol) -> bool {
            true
        }

        async fn fetch_quote(
            &self,
            symbol: &Symbol,
            _credential: &Credential,
        ) -> std::result::Result<Quote, FetchError> {
            if self.no_quote.contains(symbol.code()) {
                return Err(FetchError::NotFound(symbol.to_string()));
            }
            Ok(Quote {
                symbol: symbol.clone(),
                name: None,
                last: 10.5,
                prior_close: 10.0,
                volume: 100,
                turnover: 1_050.0,
                timestamp: Utc::now(),
                provider: FAKE,
            })
        }

        async fn fetch_history(
            &self,
            symbol: &Symbol,
            _range: HistoryRange,
            _credential: &Credential,
        ) -> std::result::Result<HistorySeries, FetchError> {
            if self.no_history.contains(symbol.code()) {
                return Err(FetchError::NotFound(symbol.to_string()));
            }
            let bars = vec![Bar {
                date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
                open: 10.0,
                high: 11.0,
                low: 9.5,
                close: 10.5,
                volume: 100,
                turnover: 1_050.0,
            }];
            Ok(HistorySeries::new(symbol.clone(), FAKE, bars)?)
        }
    }

    #[derive(Default)]
    struct FakeAnalyzer {
        delays: HashMap<&'static str, Duration>,
        failing: HashSet<&'static str>,
        limited_endpoints: HashSet<&'static str>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        inputs: Mutex<Vec<AnalysisInput>>,
    }

    impl FakeAnalyzer {
        fn input_for(&self, code: &str) -> AnalysisInput {
            self.inputs
                .lock()
                .unwrap()
                .iter()
                .find(|input| input.symbol.code() == code)
                .cloned()
                .unwrap()
        }
    }

    #[async_trait]
    impl Analyzer for FakeAnalyzer {
        async fn analyze(
            &self,
            endpoint: &ModelEndpoint,
            input: &AnalysisInput,
        ) -> std::result::Result<Verdict, LLMError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inputs.lock().unwrap().push(input.clone());
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);

            let code = input.symbol.code();
            if let Some(delay) = self.delays.get(code) {
                sleep(*delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.limited_endpoints.contains(endpoint.label.as_str()) {
                return Err(LLMError::RateLimitExceeded("429".to_string()));
            }
            if self.failing.contains(code) {
                return Err(LLMError::InvalidRequest("prompt rejected".to_string()));
            }
            Ok(Verdict {
                model: endpoint.label.clone(),
                content: format!("verdict for {code}"),
                degraded: input.is_degraded(),
            })
        }
    }

    /// Search provider that answers every query with one hit, or fails
    struct FakeSearch {
        down: bool,
        queries: AtomicUsize,
    }

    impl FakeSearch {
        fn new(down: bool) -> Arc<Self> {
            Arc::new(Self {
                down,
                queries: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl NewsProvider for FakeSearch {
        fn name(&self) -> &'static str {
            "fake-search"
        }

        async fn search(
            &self,
            query: &str,
            _max_results: usize,
            _credential: &Credential,
        ) -> std::result::Result<Vec<NewsItem>, FetchError> {
            let n = self.queries.fetch_add(1, Ordering::SeqCst);
            if self.down {
                return Err(FetchError::ProtocolError("503".to_string()));
            }
            Ok(vec![NewsItem {
                title: query.to_string(),
                snippet: "snippet".to_string(),
                url: format!("https://example.com/{n}"),
                source: "example.com".to_string(),
                published: None,
            }])
        }
    }

    fn news(search: Arc<FakeSearch>) -> Arc<NewsService> {
        let slot = NewsSlot::new(search, vec!["key".to_string()]).unwrap();
        Arc::new(NewsService::new(vec![slot]).with_query_spacing(Duration::ZERO))
    }

    struct NullProvider;

    #[async_trait]
    impl LLMProvider for NullProvider {
        async fn complete(&self, _request: CompletionRequest) -> stock_llm::Result<CompletionResponse> {
            Err(LLMError::ConfigurationError("not wired".to_string()))
        }

        fn name(&self) -> &str {
            "null"
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        streamed: Mutex<Vec<AnalysisResult>>,
        batch: Mutex<Option<Vec<AnalysisResult>>>,
        summary: Mutex<Option<RunSummary>>,
    }

    impl CollectingSink {
        fn streamed_codes(&self) -> Vec<String> {
            codes(&self.streamed.lock().unwrap())
        }

        fn batch_codes(&self) -> Option<Vec<String>> {
            self.batch.lock().unwrap().as_deref().map(codes)
        }
    }

    fn codes(results: &[AnalysisResult]) -> Vec<String> {
        results.iter().map(|r| r.symbol.code().to_string()).collect()
    }

    #[async_trait]
    impl ResultSink for CollectingSink {
        async fn on_result(&self, result: &AnalysisResult) {
            self.streamed.lock().unwrap().push(result.clone());
        }

        async fn on_batch(&self, results: &[AnalysisResult]) {
            *self.batch.lock().unwrap() = Some(results.to_vec());
        }

        async fn on_summary(&self, summary: &RunSummary) {
            *self.summary.lock().unwrap() = Some(summary.clone());
        }
    }

    fn symbols(codes: &[&str]) -> Vec<Symbol> {
        codes.iter().map(|c| Symbol::parse(c).unwrap()).collect()
    }

    fn endpoints(labels: &[&str]) -> Vec<ModelEndpoint> {
        labels
            .iter()
            .map(|label| ModelEndpoint::new(*label, Arc::new(NullProvider), "test-model"))
            .collect()
    }

    fn scheduler(
        market: FakeMarket,
        analyzer: Arc<FakeAnalyzer>,
        labels: &[&str],
        config: RunConfig,
    ) -> Scheduler {
        let slot = ProviderSlot::anonymous(
            Arc::new(market),
            RetryPolicy::no_retry(),
            CircuitBreakerConfig::default(),
        );
        let data = Arc::new(DataSourceManager::new(vec![slot]).unwrap());
        Scheduler::new(data, analyzer, endpoints(labels), config).unwrap()
    }

    fn config(concurrency: usize, delivery: DeliveryMode) -> RunConfig {
        RunConfig::builder()
            .concurrency(concurrency)
            .delivery(delivery)
            .ai_retry(RetryPolicy::fast())
            .build()
            .unwrap()
    }

    #[test]
    fn test_dedupe_keeps_first_occurrence() {
        let list = symbols(&["600519", "AAPL", "sh600519", "600519.SH", "00700"]);
        assert_eq!(codes_of(&dedupe(&list)), vec!["600519", "AAPL", "00700"]);
    }

    fn codes_of(symbols: &[Symbol]) -> Vec<&str> {
        symbols.iter().map(Symbol::code).collect()
    }

    #[test]
    fn test_rejects_contract_violations() {
        let slot = ProviderSlot::anonymous(
            Arc::new(FakeMarket::default()),
            RetryPolicy::no_retry(),
            CircuitBreakerConfig::default(),
        );
        let data = Arc::new(DataSourceManager::new(vec![slot]).unwrap());
        let analyzer: Arc<dyn Analyzer> = Arc::new(FakeAnalyzer::default());

        let zero = RunConfig {
            concurrency: 0,
            ..RunConfig::default()
        };
        let err = Scheduler::new(data.clone(), analyzer.clone(), endpoints(&["a"]), zero);
        assert!(matches!(err, Err(EngineError::ZeroConcurrency)));

        let err = Scheduler::new(data, analyzer, Vec::new(), RunConfig::default());
        assert!(matches!(err, Err(EngineError::NoEndpoints)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_analysis_failure_is_isolated() {
        let watchlist = symbols(&["600519", "000001", "300750", "AAPL", "00700"]);
        let analyzer = Arc::new(FakeAnalyzer {
            failing: HashSet::from(["300750"]),
            delays: watchlist
                .iter()
                .map(|s| (leak(s.code()), Duration::from_millis(50)))
                .collect(),
            ..FakeAnalyzer::default()
        });
        let scheduler = scheduler(
            FakeMarket::default(),
            analyzer.clone(),
            &["primary"],
            config(2, DeliveryMode::Batch),
        );
        let sink = CollectingSink::default();

        let summary = scheduler
            .run(&watchlist, &sink, &CancellationToken::new())
            .await;

        assert_eq!(summary.total, 5);
        assert_eq!(summary.succeeded, 4);
        // Two workers, and both were busy at the same time
        assert_eq!(analyzer.max_in_flight.load(Ordering::SeqCst), 2);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].0.code(), "300750");
        assert_eq!(summary.failures[0].1, FailureReason::AnalysisUnavailable);
        assert!(!summary.cancelled);
        assert_eq!(summary.provider_health.len(), 1);
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 5);

        assert!(sink.streamed.lock().unwrap().is_empty());
        assert_eq!(
            sink.batch_codes().unwrap(),
            vec!["600519", "000001", "300750", "AAPL", "00700"]
        );
        assert_eq!(sink.summary.lock().unwrap().as_ref().unwrap().succeeded, 4);
    }

    fn leak(code: &str) -> &'static str {
        Box::leak(code.to_string().into_boxed_str())
    }

    fn staggered() -> Arc<FakeAnalyzer> {
        Arc::new(FakeAnalyzer {
            delays: HashMap::from([
                ("600519", Duration::from_millis(300)),
                ("000001", Duration::from_millis(100)),
                ("300750", Duration::from_millis(200)),
            ]),
            ..FakeAnalyzer::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_delivers_in_completion_order() {
        let scheduler = scheduler(
            FakeMarket::default(),
            staggered(),
            &["primary"],
            config(3, DeliveryMode::Streaming),
        );
        let sink = CollectingSink::default();
        let watchlist = symbols(&["600519", "000001", "300750"]);

        let summary = scheduler
            .run(&watchlist, &sink, &CancellationToken::new())
            .await;

        assert_eq!(summary.succeeded, 3);
        assert_eq!(sink.streamed_codes(), vec!["000001", "300750", "600519"]);
        assert!(sink.batch_codes().is_none());
        assert!(sink.summary.lock().unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_delivers_in_watchlist_order() {
        let scheduler = scheduler(
            FakeMarket::default(),
            staggered(),
            &["primary"],
            config(3, DeliveryMode::Batch),
        );
        let sink = CollectingSink::default();
        let watchlist = symbols(&["600519", "000001", "300750"]);

        scheduler
            .run(&watchlist, &sink, &CancellationToken::new())
            .await;

        assert_eq!(
            sink.batch_codes().unwrap(),
            vec!["600519", "000001", "300750"]
        );
        let batch = sink.batch.lock().unwrap();
        let indexes: Vec<_> = batch.as_ref().unwrap().iter().map(|r| r.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_no_data_and_degraded_paths() {
        let market = FakeMarket {
            no_quote: HashSet::from(["000001", "600519"]),
            no_history: HashSet::from(["000001"]),
        };
        let analyzer = Arc::new(FakeAnalyzer::default());
        let scheduler = scheduler(
            market,
            analyzer.clone(),
            &["primary"],
            config(2, DeliveryMode::Batch),
        );
        let sink = CollectingSink::default();
        let watchlist = symbols(&["600519", "000001", "AAPL"]);

        let summary = scheduler
            .run(&watchlist, &sink, &CancellationToken::new())
            .await;

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.count(FailureReason::NoData), 1);
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 2);

        let batch = sink.batch.lock().unwrap();
        let batch = batch.as_ref().unwrap();
        assert!(batch[0].outcome.verdict().unwrap().degraded);
        assert_eq!(batch[1].outcome, Outcome::Failed(FailureReason::NoData));
        assert!(!batch[2].outcome.verdict().unwrap().degraded);
    }

    #[tokio::test]
    async fn test_rate_limited_endpoint_falls_back() {
        let analyzer = Arc::new(FakeAnalyzer {
            limited_endpoints: HashSet::from(["primary"]),
            ..FakeAnalyzer::default()
        });
        let scheduler = scheduler(
            FakeMarket::default(),
            analyzer.clone(),
            &["primary", "fallback"],
            config(1, DeliveryMode::Batch),
        );
        let sink = CollectingSink::default();
        let watchlist = symbols(&["600519", "AAPL"]);

        let summary = scheduler
            .run(&watchlist, &sink, &CancellationToken::new())
            .await;

        assert_eq!(summary.succeeded, 2);
        let batch = sink.batch.lock().unwrap();
        for result in batch.as_ref().unwrap() {
            assert_eq!(result.outcome.verdict().unwrap().model, "fallback");
        }
        // the pool stays on the fallback once rotated
        assert_eq!(scheduler.endpoints().rotations(), 1);
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let analyzer = Arc::new(FakeAnalyzer::default());
        let scheduler = scheduler(
            FakeMarket::default(),
            analyzer.clone(),
            &["primary"],
            config(2, DeliveryMode::Streaming),
        );
        let sink = CollectingSink::default();
        let token = CancellationToken::new();
        token.cancel();

        let summary = scheduler
            .run(&symbols(&["600519", "AAPL"]), &sink, &token)
            .await;

        assert!(summary.cancelled);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.count(FailureReason::Cancelled), 2);
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(sink.streamed.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_unstarted_tasks() {
        let analyzer = Arc::new(FakeAnalyzer::default());
        let config = RunConfig::builder()
            .concurrency(1)
            .spacing(Duration::from_secs(10))
            .deadline(Duration::from_secs(15))
            .ai_retry(RetryPolicy::fast())
            .build()
            .unwrap();
        let scheduler = scheduler(FakeMarket::default(), analyzer.clone(), &["primary"], config);
        let sink = CollectingSink::default();
        let token = CancellationToken::new();

        let summary = scheduler
            .run(&symbols(&["600519", "000001", "300750", "AAPL"]), &sink, &token)
            .await;

        assert!(summary.cancelled);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.count(FailureReason::Cancelled), 2);
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 2);
        // the caller's token is untouched
        assert!(!token.is_cancelled());

        let batch = sink.batch.lock().unwrap();
        let failed: Vec<_> = batch
            .as_ref()
            .unwrap()
            .iter()
            .filter(|r| !r.outcome.is_success())
            .map(|r| r.symbol.code().to_string())
            .collect();
        assert_eq!(failed, vec!["300750", "AAPL"]);
    }

    #[tokio::test]
    async fn test_news_reaches_the_analyzer() {
        let search = FakeSearch::new(false);
        let analyzer = Arc::new(FakeAnalyzer::default());
        let scheduler = scheduler(
            FakeMarket::default(),
            analyzer.clone(),
            &["primary"],
            config(1, DeliveryMode::Batch),
        )
        .with_news(news(search.clone()));
        let sink = CollectingSink::default();

        let summary = scheduler
            .run(&symbols(&["600519"]), &sink, &CancellationToken::new())
            .await;

        assert_eq!(summary.succeeded, 1);
        let input = analyzer.input_for("600519");
        let digest = input.news.unwrap();
        assert_eq!(digest.provider, "fake-search");
        assert_eq!(digest.items[0].title, "600519 股票 最新消息");
        assert!(input.web_prices.is_none());
        assert_eq!(search.queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_web_prices_rescue_symbol_without_market_data() {
        let market = FakeMarket {
            no_quote: HashSet::from(["000001"]),
            no_history: HashSet::from(["000001"]),
        };
        let search = FakeSearch::new(false);
        let analyzer = Arc::new(FakeAnalyzer::default());
        let scheduler = scheduler(
            market,
            analyzer.clone(),
            &["primary"],
            config(1, DeliveryMode::Batch),
        )
        .with_news(news(search.clone()));
        let sink = CollectingSink::default();

        let summary = scheduler
            .run(&symbols(&["000001"]), &sink, &CancellationToken::new())
            .await;

        assert_eq!(summary.succeeded, 1);
        let batch = sink.batch.lock().unwrap();
        assert!(batch.as_ref().unwrap()[0].outcome.verdict().unwrap().degraded);

        let input = analyzer.input_for("000001");
        assert!(input.quote.is_none() && input.history.is_none());
        // Three fallback queries, then the news search
        assert_eq!(input.web_prices.unwrap().len(), 3);
        assert!(input.news.is_some());
        assert_eq!(search.queries.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_failed_web_search_still_means_no_data() {
        let market = FakeMarket {
            no_quote: HashSet::from(["000001"]),
            no_history: HashSet::from(["000001"]),
        };
        let analyzer = Arc::new(FakeAnalyzer::default());
        let scheduler = scheduler(
            market,
            analyzer.clone(),
            &["primary"],
            config(1, DeliveryMode::Batch),
        )
        .with_news(news(FakeSearch::new(true)));
        let sink = CollectingSink::default();

        let summary = scheduler
            .run(&symbols(&["000001", "600519"]), &sink, &CancellationToken::new())
            .await;

        assert_eq!(summary.count(FailureReason::NoData), 1);
        assert_eq!(summary.succeeded, 1);
        // News failures never fail a symbol that has market data
        assert!(analyzer.input_for("600519").news.is_none());
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_entries_reported_in_summary() {
        let analyzer = Arc::new(FakeAnalyzer::default());
        let scheduler = scheduler(
            FakeMarket::default(),
            analyzer.clone(),
            &["primary"],
            config(2, DeliveryMode::Batch),
        );
        let sink = CollectingSink::default();
        let watchlist = Watchlist::parse(&["600519", "not-a-code!", "AAPL"]);

        let summary = scheduler
            .run_watchlist(&watchlist, &sink, &CancellationToken::new())
            .await;

        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.rejected, vec!["not-a-code!"]);
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            sink.summary.lock().unwrap().as_ref().unwrap().rejected,
            vec!["not-a-code!"]
        );
    }
}
