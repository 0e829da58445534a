//! Request lifecycle.
//!
//! ```text
//! admitted ─┬─ local_hit                                   (terminal)
//!           ├─ cache_hit                                   (terminal)
//!           └─ classified → budgeted → context_built → history_built
//!                → streaming ─┬─ done                      (terminal)
//!                             └─ errored                   (terminal)
//! ```
//!
//! Admission and configuration failures are returned from
//! [`ChatPipeline::start`] before any event exists. Everything after that is
//! reported in-band on the [`ChatStream`], which always yields
//! `meta, text*, (done | error)`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::Utc;
use futures::{Stream, StreamExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use dispatch_core::{
    ChatQuery, ChatStreamEvent, ChatTurn, CompletionRequest, LlmProvider, ModelTier, RequestId,
    SessionId, StreamEvent, TokenUsage, UsageEvent,
};
use dispatch_settings::{DispatchSettings, HistorySettings, TierSettings};
use dispatch_store::UsageLedger;
use dispatch_telemetry::{Degradation, Outcome, PipelineMetrics};

use crate::annotations::{self, Annotations};
use crate::budget::BudgetGovernor;
use crate::cache::{self, CacheEntry, MemoryResponseCache, ResponseCache};
use crate::classify::{classify_query, KeywordClassifier, QueryClassifier, QueryType};
use crate::context::{self, DomainDataSource, ReportAssembler, SYSTEM_PROMPT};
use crate::error::PipelineError;
use crate::history::{HistoryCompressor, HistoryMode};
use crate::local;
use crate::rate_limit::RateLimiter;

/// Query type recorded for rule-computed answers.
pub const LOCAL_QUERY_TYPE: &str = "local";
/// Query type recorded for cache replays.
pub const CACHE_HIT_QUERY_TYPE: &str = "cache_hit";
/// Query type recorded for the auxiliary history summary call.
pub const HISTORY_SUMMARY_QUERY_TYPE: &str = "history_summary";

/// Settings the orchestrator reads on every request.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub tiers: TierSettings,
    pub history: HistorySettings,
    pub cache_deep_answers: bool,
    /// Deadline for the provider stream. Expiry behaves like cancellation.
    pub request_timeout: Option<Duration>,
}

impl PipelineConfig {
    pub fn from_settings(settings: &DispatchSettings) -> Self {
        Self {
            tiers: settings.tiers.clone(),
            history: settings.history.clone(),
            cache_deep_answers: settings.cache.cache_deep_answers,
            request_timeout: settings.server.request_timeout(),
        }
    }

    fn label(&self, tier: ModelTier) -> String {
        self.tiers.profile(tier).label.clone()
    }

    fn caches(&self, tier: ModelTier) -> bool {
        tier != ModelTier::Deep || self.cache_deep_answers
    }
}

/// The composed pipeline. Cheap to clone; every stage is shared.
#[derive(Clone)]
pub struct ChatPipeline {
    config: Arc<PipelineConfig>,
    provider: Option<Arc<dyn LlmProvider>>,
    history: Option<Arc<HistoryCompressor>>,
    rate_limiter: Arc<RateLimiter>,
    cache: Arc<dyn ResponseCache>,
    classifier: Arc<dyn QueryClassifier>,
    governor: Arc<BudgetGovernor>,
    domain: Arc<dyn DomainDataSource>,
    ledger: Arc<dyn UsageLedger>,
    metrics: Arc<PipelineMetrics>,
}

impl ChatPipeline {
    /// Pipeline with in-memory cache, keyword classifier and no report
    /// sources. `provider` is `None` when credentials are missing; every
    /// request then fails with a configuration error.
    pub fn new(
        settings: &DispatchSettings,
        provider: Option<Arc<dyn LlmProvider>>,
        ledger: Arc<dyn UsageLedger>,
    ) -> Self {
        let config = PipelineConfig::from_settings(settings);
        let history = provider.as_ref().map(|p| {
            Arc::new(HistoryCompressor::new(
                p.clone(),
                config.tiers.cheap.model.clone(),
                config.history.clone(),
            ))
        });
        Self {
            rate_limiter: Arc::new(RateLimiter::new(
                settings.rate_limit.max_requests,
                settings.rate_limit.window(),
            )),
            cache: Arc::new(MemoryResponseCache::new()),
            classifier: Arc::new(KeywordClassifier::new()),
            governor: Arc::new(BudgetGovernor::new(ledger.clone(), settings.budget.clone())),
            domain: Arc::new(ReportAssembler::new(Vec::new())),
            metrics: Arc::new(PipelineMetrics::new()),
            config: Arc::new(config),
            provider,
            history,
            ledger,
        }
    }

    pub fn with_domain(mut self, domain: Arc<dyn DomainDataSource>) -> Self {
        self.domain = domain;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn QueryClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_rate_limiter(mut self, rate_limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    pub fn with_history(mut self, history: Arc<HistoryCompressor>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn provider_configured(&self) -> bool {
        self.provider.is_some()
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn cache(&self) -> &Arc<dyn ResponseCache> {
        &self.cache
    }

    pub fn governor(&self) -> &Arc<BudgetGovernor> {
        &self.governor
    }

    pub fn ledger(&self) -> &Arc<dyn UsageLedger> {
        &self.ledger
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Run the pre-stream stages and return the event stream.
    ///
    /// Dropping the stream, or cancelling `cancel`, aborts the upstream
    /// provider call. An aborted request writes nothing to the cache or the
    /// ledger.
    pub fn start(
        &self,
        query: ChatQuery,
        session: SessionId,
        cancel: CancellationToken,
    ) -> Result<ChatStream, PipelineError> {
        let request_id = RequestId::new();
        let span = info_span!("chat", request_id = %request_id, session_id = %session);
        let _entered = span.enter();
        self.metrics.request_received();

        let Some(provider) = self.provider.clone() else {
            warn!("no language-model provider configured");
            return Err(PipelineError::Configuration(
                "no language-model provider is configured".into(),
            ));
        };

        let admission = self.rate_limiter.admit(&session);
        if !admission.allowed {
            info!("rate limit exceeded");
            self.metrics.outcome(Outcome::AdmissionDenied);
            return Err(PipelineError::RateLimited {
                remaining: 0,
                retry_after: admission.retry_after.unwrap_or_default(),
            });
        }
        let remaining = admission.remaining;
        let page = query.current_page.clone();

        // A forced deep request always goes to the model.
        if !query.force_deep {
            if let Some(answer) = local::try_local(&query.raw_text, query.snapshot.as_ref()) {
                debug!(rule = answer.rule, "local answer");
                self.append_usage(UsageEvent::free_answer(
                    session,
                    ModelTier::Cheap,
                    LOCAL_QUERY_TYPE,
                    page,
                    false,
                ));
                self.metrics.outcome(Outcome::LocalHit);
                return Ok(ChatStream::replay(
                    ModelTier::Cheap,
                    self.config.label(ModelTier::Cheap),
                    false,
                    answer.text,
                    Annotations::default(),
                    remaining,
                ));
            }
        }

        let query_key = cache::cache_key(&query.raw_text, &page);
        if let (false, Some(key)) = (query.force_deep, &query_key) {
            if let Some(entry) = self.cache.get(key) {
                debug!(tier = %entry.tier, "cache hit");
                self.append_usage(UsageEvent::free_answer(
                    session,
                    entry.tier,
                    CACHE_HIT_QUERY_TYPE,
                    page,
                    true,
                ));
                self.metrics.outcome(Outcome::CacheHit);
                let annotations = Annotations {
                    suggestions: entry.suggestions,
                    actions: entry.actions,
                };
                return Ok(ChatStream::replay(
                    entry.tier,
                    self.config.label(entry.tier),
                    true,
                    entry.response_text,
                    annotations,
                    remaining,
                ));
            }
        }

        let classification = classify_query(&*self.classifier, &query.raw_text, query.force_deep);
        let budget = self.governor.status();
        let tier = budget.apply(classification.tier);
        if tier < classification.tier {
            info!(
                classified = %classification.tier,
                effective = %tier,
                spend_usd = budget.spend_usd,
                "tier capped by budget"
            );
        }
        debug!(%tier, query_type = %classification.query_type, "classified");

        let profile = self.config.tiers.profile(tier);
        let request = RequestState {
            span: span.clone(),
            session,
            query,
            query_key,
            tier,
            tier_label: profile.label.clone(),
            query_type: classification.query_type,
            model: profile.model.clone(),
            max_tokens: profile.max_output_tokens,
            remaining,
        };
        let events = self.clone().run(request, provider, cancel);
        Ok(ChatStream {
            tier,
            remaining,
            cached: false,
            local: false,
            events: Box::pin(events),
        })
    }

    fn run(
        self,
        request: RequestState,
        provider: Arc<dyn LlmProvider>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = ChatStreamEvent> + Send + 'static {
        async_stream::stream! {
            let mut outcome = OutcomeGuard::new(self.metrics.clone());
            yield ChatStreamEvent::Meta {
                tier: request.tier,
                tier_label: request.tier_label.clone(),
                cached: false,
                local: false,
            };

            let prepared = guarded(&cancel, None, self.prepare(&request))
                .instrument(request.span.clone())
                .await;
            let completion = match prepared {
                Ok(completion) => completion,
                Err(interrupt) => {
                    request.span.in_scope(|| info!(reason = interrupt.reason(), "request aborted"));
                    outcome.finish(Outcome::Cancelled);
                    yield ChatStreamEvent::error(interrupt.message());
                    return;
                }
            };

            let deadline = self.config.request_timeout.and_then(|t| Instant::now().checked_add(t));
            let opened_at = Instant::now();
            self.metrics.model_call_opened();
            let opened = guarded(&cancel, deadline, provider.stream(&completion))
                .instrument(request.span.clone())
                .await;
            let mut upstream = match opened {
                Ok(Ok(upstream)) => upstream,
                Ok(Err(failure)) => {
                    request.span.in_scope(|| error!(kind = failure.error_kind(), error = %failure, "provider call failed"));
                    outcome.finish(Outcome::Errored);
                    yield ChatStreamEvent::error(failure.user_message());
                    return;
                }
                Err(interrupt) => {
                    request.span.in_scope(|| info!(reason = interrupt.reason(), "request aborted"));
                    outcome.finish(Outcome::Cancelled);
                    yield ChatStreamEvent::error(interrupt.message());
                    return;
                }
            };

            let mut answer = String::new();
            let usage = loop {
                let next = guarded(&cancel, deadline, upstream.next()).await;
                match next {
                    Ok(Some(StreamEvent::Start)) => {}
                    Ok(Some(StreamEvent::TextDelta { delta })) => {
                        if !delta.is_empty() {
                            answer.push_str(&delta);
                            yield ChatStreamEvent::Text { text: delta };
                        }
                    }
                    Ok(Some(StreamEvent::Done { usage, .. })) => break usage,
                    Ok(Some(StreamEvent::Error { error: failure })) => {
                        request.span.in_scope(|| error!(kind = failure.error_kind(), error = %failure, "provider stream failed"));
                        outcome.finish(Outcome::Errored);
                        yield ChatStreamEvent::error(failure.user_message());
                        return;
                    }
                    Ok(None) => {
                        request.span.in_scope(|| error!("provider stream ended without completing"));
                        outcome.finish(Outcome::Errored);
                        yield ChatStreamEvent::error("The answer was cut off. Please try again.");
                        return;
                    }
                    Err(interrupt) => {
                        // dropping the provider stream aborts the upstream request
                        drop(upstream);
                        request.span.in_scope(|| info!(reason = interrupt.reason(), "request aborted"));
                        outcome.finish(Outcome::Cancelled);
                        yield ChatStreamEvent::error(interrupt.message());
                        return;
                    }
                }
            };
            self.metrics.observe_stream_seconds(opened_at.elapsed().as_secs_f64());

            let finished = request.span.in_scope(|| self.complete(&request, &answer, usage));
            match finished {
                Ok(done) => {
                    outcome.finish(Outcome::Completed);
                    yield done;
                }
                Err(message) => {
                    outcome.finish(Outcome::Errored);
                    yield ChatStreamEvent::error(message);
                }
            }
        }
    }

    /// Context, history and the final provider request.
    async fn prepare(&self, request: &RequestState) -> CompletionRequest {
        let page = request.query.current_page.as_str();
        let system_data = self.build_context(page, request.tier).await;

        let mut messages = self.build_history(request).await;
        messages.push(ChatTurn::user(request.query.raw_text.clone()));

        CompletionRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens,
            system: format!("{}\n\n# System data\n\n{system_data}", SYSTEM_PROMPT.trim_end()),
            messages,
        }
    }

    async fn build_context(&self, page: &str, tier: ModelTier) -> String {
        match self.domain.assemble(page).await {
            Ok(raw) => {
                if raw.is_degraded() {
                    self.metrics.degraded(Degradation::PartialContext);
                }
                context::compress(&raw, page, tier.detail_level())
            }
            Err(failure) => {
                warn!(error = %failure, "context assembly failed, using fallback");
                self.metrics.degraded(Degradation::FallbackContext);
                context::fallback_context(Utc::now().date_naive(), page)
            }
        }
    }

    async fn build_history(&self, request: &RequestState) -> Vec<ChatTurn> {
        let history = &request.query.conversation_history;
        let Some(compressor) = &self.history else {
            return history.clone();
        };
        let compressed = compressor.compress(history).await;
        match compressed.mode {
            HistoryMode::Unchanged => {}
            HistoryMode::Summarized { usage } => {
                self.metrics.degraded(Degradation::HistorySummarized);
                self.append_usage(UsageEvent::model_call(
                    request.session.clone(),
                    ModelTier::Cheap,
                    compressor.model(),
                    usage,
                    HISTORY_SUMMARY_QUERY_TYPE,
                    request.query.current_page.clone(),
                ));
            }
            HistoryMode::Truncated => self.metrics.degraded(Degradation::HistoryTruncated),
        }
        compressed.turns
    }

    /// Post-process a finished answer. `Err` carries the user-facing message
    /// for an answer that cannot be delivered.
    fn complete(
        &self,
        request: &RequestState,
        answer: &str,
        usage: TokenUsage,
    ) -> Result<ChatStreamEvent, &'static str> {
        let extracted = annotations::extract(answer).map_err(|failure| {
            warn!(error = %failure, "malformed answer annotation");
            "The answer could not be processed. Please try again."
        })?;

        if let (true, Some(query_key)) = (self.config.caches(request.tier), &request.query_key) {
            let entry = CacheEntry {
                query_key: query_key.clone(),
                tier: request.tier,
                response_text: extracted.text,
                suggestions: extracted.annotations.suggestions.clone(),
                actions: extracted.annotations.actions.clone(),
                input_tokens: usage.total_input(),
                output_tokens: usage.output_tokens,
                created_at: Utc::now(),
            };
            match self.cache.put(entry) {
                Ok(()) => self.metrics.cache_written(),
                Err(failure) => {
                    warn!(error = %failure, "response cache write failed");
                    self.metrics.degraded(Degradation::CacheWriteFailed);
                }
            }
        }

        self.append_usage(UsageEvent::model_call(
            request.session.clone(),
            request.tier,
            request.model.clone(),
            usage,
            request.query_type.as_str(),
            request.query.current_page.clone(),
        ));
        info!(
            tier = %request.tier,
            input_tokens = usage.total_input(),
            output_tokens = usage.output_tokens,
            "answer complete"
        );

        Ok(ChatStreamEvent::Done {
            tier: request.tier,
            tier_label: request.tier_label.clone(),
            cached: false,
            local: false,
            usage,
            remaining: request.remaining,
            suggestions: extracted.annotations.suggestions,
            actions: extracted.annotations.actions,
        })
    }

    /// Best effort: the caller already has the answer.
    fn append_usage(&self, event: UsageEvent) {
        if let Err(failure) = self.ledger.append(&event) {
            warn!(error = %failure, query_type = %event.query_type, "usage ledger write failed");
            self.metrics.degraded(Degradation::LedgerWriteFailed);
        }
    }
}

/// Per-request values carried into the stream.
struct RequestState {
    span: Span,
    session: SessionId,
    query: ChatQuery,
    /// `None` for questions that are never cached.
    query_key: Option<String>,
    tier: ModelTier,
    tier_label: String,
    query_type: QueryType,
    model: String,
    max_tokens: u32,
    remaining: u32,
}

/// Event stream for one request plus the values the transport reports as
/// headers.
pub struct ChatStream {
    pub tier: ModelTier,
    pub remaining: u32,
    pub cached: bool,
    pub local: bool,
    events: Pin<Box<dyn Stream<Item = ChatStreamEvent> + Send>>,
}

impl ChatStream {
    /// `meta, text, done` for an answer that needed no model call.
    fn replay(
        tier: ModelTier,
        tier_label: String,
        cached: bool,
        text: String,
        annotations: Annotations,
        remaining: u32,
    ) -> Self {
        let local = !cached;
        let events = vec![
            ChatStreamEvent::Meta {
                tier,
                tier_label: tier_label.clone(),
                cached,
                local,
            },
            ChatStreamEvent::Text {
                text: annotations::render(&text, &annotations),
            },
            ChatStreamEvent::Done {
                tier,
                tier_label,
                cached,
                local,
                usage: TokenUsage::default(),
                remaining,
                suggestions: annotations.suggestions,
                actions: annotations.actions,
            },
        ];
        Self {
            tier,
            remaining,
            cached,
            local,
            events: Box::pin(futures::stream::iter(events)),
        }
    }
}

impl Stream for ChatStream {
    type Item = ChatStreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for ChatStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStream")
            .field("tier", &self.tier)
            .field("remaining", &self.remaining)
            .field("cached", &self.cached)
            .field("local", &self.local)
            .finish_non_exhaustive()
    }
}

/// Why a request stopped before its provider stream finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Interrupt {
    Cancelled,
    TimedOut,
}

impl Interrupt {
    fn reason(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        }
    }

    fn message(&self) -> &'static str {
        match self {
            Self::Cancelled => "The request was cancelled.",
            Self::TimedOut => "The answer took too long and was stopped.",
        }
    }
}

async fn guarded<F: Future>(
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    work: F,
) -> Result<F::Output, Interrupt> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupt::Cancelled),
        _ = wait_deadline(deadline) => Err(Interrupt::TimedOut),
        output = work => Ok(output),
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Records exactly one terminal outcome per streamed request. A stream
/// dropped before finishing counts as cancelled.
struct OutcomeGuard {
    metrics: Arc<PipelineMetrics>,
    finished: bool,
}

impl OutcomeGuard {
    fn new(metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            metrics,
            finished: false,
        }
    }

    fn finish(&mut self, outcome: Outcome) {
        if !self.finished {
            self.finished = true;
            self.metrics.outcome(outcome);
        }
    }
}

impl Drop for OutcomeGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.metrics.outcome(Outcome::Cancelled);
        }
    }
}
