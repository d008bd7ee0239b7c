pub mod testing;

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use relay_clients::{Assistant, ClientError, DeliveryOutcome, RecordStore, ReplyGateway};
use relay_core::{
    compose, DialogueEngine, DialogueScript, ErrorKind, HistoryEntry, InboundEvent, IntentRouter,
    OutboundMessage, Reply, RiskScanner, Role, Route, RoutableEvent, SkipReason, UserSession,
    WebhookPayload,
};
use relay_observability::AppMetrics;
use relay_storage::{SessionError, SessionHandle, SessionRepository, SessionStore};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

#[derive(Clone)]
pub struct Collaborators {
    pub gateway: Arc<dyn ReplyGateway>,
    pub assistant: Arc<dyn Assistant>,
    pub records: Arc<dyn RecordStore>,
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub upstream_timeout: Duration,
    pub admin_user_id: Option<String>,
    pub log_conversations: bool,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            upstream_timeout: Duration::from_secs(8),
            admin_user_id: None,
            log_conversations: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Skipped(SkipReason),
    Duplicate,
    Delivered { route: &'static str },
    NothingToSend { route: &'static str },
    DeliveryFailed { route: &'static str, kind: ErrorKind },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub received: usize,
    pub delivered: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: &[EventOutcome]) -> Self {
        let mut summary = Self {
            received: outcomes.len(),
            ..Self::default()
        };
        for outcome in outcomes {
            match outcome {
                EventOutcome::Skipped(_) => summary.skipped += 1,
                EventOutcome::Duplicate => summary.duplicates += 1,
                EventOutcome::Delivered { .. } => summary.delivered += 1,
                EventOutcome::NothingToSend { .. } => {}
                EventOutcome::DeliveryFailed { .. } => summary.failed += 1,
            }
        }
        summary
    }
}

#[derive(Clone)]
pub struct Dispatcher<S>
where
    S: SessionRepository,
{
    router: Arc<IntentRouter>,
    engine: DialogueEngine,
    sessions: SessionStore<S>,
    risk: RiskScanner,
    collaborators: Collaborators,
    metrics: Arc<AppMetrics>,
    settings: DispatchSettings,
}

impl<S> Dispatcher<S>
where
    S: SessionRepository,
{
    pub fn new(
        script: Arc<DialogueScript>,
        sessions: SessionStore<S>,
        collaborators: Collaborators,
        metrics: Arc<AppMetrics>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            router: Arc::new(IntentRouter::standard(script.clone())),
            engine: DialogueEngine::new(script),
            sessions,
            risk: RiskScanner::default(),
            collaborators,
            metrics,
            settings,
        }
    }

    pub fn with_risk_scanner(mut self, risk: RiskScanner) -> Self {
        self.risk = risk;
        self
    }

    pub fn sessions(&self) -> &SessionStore<S> {
        &self.sessions
    }

    pub fn script(&self) -> &DialogueScript {
        self.router.script()
    }

    pub fn metrics(&self) -> Arc<AppMetrics> {
        self.metrics.clone()
    }

    #[instrument(skip_all, fields(events = payload.events.len()))]
    pub async fn dispatch_payload(&self, payload: WebhookPayload) -> BatchSummary {
        let mut lanes: Vec<(Option<String>, Vec<InboundEvent>)> = Vec::new();
        for event in payload.events.into_iter().map(InboundEvent::from) {
            match lanes.iter_mut().find(|(user, _)| *user == event.user_id) {
                Some((_, events)) => events.push(event),
                None => lanes.push((event.user_id.clone(), vec![event])),
            }
        }

        let outcomes = join_all(lanes.into_iter().map(|(_, events)| async move {
            let mut outcomes = Vec::with_capacity(events.len());
            for event in events {
                outcomes.push(self.handle_event(event).await);
            }
            outcomes
        }))
        .await
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();

        let summary = BatchSummary::from_outcomes(&outcomes);
        info!(
            received = summary.received,
            delivered = summary.delivered,
            skipped = summary.skipped,
            duplicates = summary.duplicates,
            failed = summary.failed,
            "webhook batch handled"
        );
        summary
    }

    #[instrument(skip_all, fields(event_id = %event.event_id, redelivery = event.redelivery))]
    pub async fn handle_event(&self, event: InboundEvent) -> EventOutcome {
        let started = Instant::now();
        self.metrics.inc_event();

        let RoutableEvent {
            event_id,
            reply_handle,
            user_id,
            text,
            ..
        } = match event.into_routable() {
            Ok(event) => event,
            Err(reason) => {
                self.metrics.inc_skipped();
                debug!(reason = reason.as_str(), "event not routed");
                return EventOutcome::Skipped(reason);
            }
        };

        let (message, route) = {
            let handle = self.sessions.open(&user_id).await;
            match handle.first_delivery(&event_id).await {
                Ok(true) => {}
                Ok(false) => {
                    self.metrics.inc_duplicate();
                    info!(user_id = %user_id, "duplicate delivery ignored");
                    return EventOutcome::Duplicate;
                }
                Err(err) => {
                    warn!(user_id = %user_id, error = %err, "event ledger unavailable")
                }
            }

            let session = handle.get().await.unwrap_or_else(|err| {
                warn!(user_id = %user_id, error = %err, "session read failed");
                None
            });
            let (route, rule) = self.router.route(&text, session.as_ref());
            let kind = route.kind();
            debug!(user_id = %user_id, rule, route = kind, "event routed");

            let reply = self.resolve(route, &handle, session.as_ref()).await;
            (compose(&reply), kind)
        };

        let outcome = self.deliver(reply_handle, message, route).await;
        self.alert_if_risky(&user_id, &text).await;
        self.log_conversation(&user_id, &text).await;
        self.metrics.observe_latency(started.elapsed());
        outcome
    }

    async fn resolve(
        &self,
        route: Route,
        handle: &SessionHandle<'_, S>,
        session: Option<&UserSession>,
    ) -> Reply {
        match route {
            Route::StartTopic { topic, restart } => {
                self.metrics.inc_dialogue_turn();
                if restart {
                    info!(user_id = handle.user_id(), topic = %topic, "topic restarted");
                }
                if let Err(err) = handle.start(&topic).await {
                    warn!(user_id = handle.user_id(), error = %err, "session write failed");
                    return Reply::Unavailable;
                }
                match self.engine.opening(&topic) {
                    Ok(step) => step.into(),
                    Err(err) => {
                        warn!(error = %err, kind = err.kind().as_str(), "topic has no script");
                        self.help()
                    }
                }
            }
            Route::ContinueDialogue { topic, .. } => {
                self.metrics.inc_dialogue_turn();
                let advanced = match handle.advance().await {
                    Ok(session) => session,
                    Err(SessionError::NotFound(_)) => return self.help(),
                    Err(err) => {
                        warn!(user_id = handle.user_id(), error = %err, "session write failed");
                        return Reply::Unavailable;
                    }
                };

                let step = match self.engine.step_at(&topic, advanced.step) {
                    Ok(step) => step,
                    Err(err) => {
                        warn!(error = %err, kind = err.kind().as_str(), "topic has no script");
                        self.clear(handle).await;
                        return self.help();
                    }
                };
                if step.is_complete() {
                    info!(user_id = handle.user_id(), topic = %topic, "dialogue completed");
                    self.clear(handle).await;
                }
                step.into()
            }
            Route::FormLinks => Reply::FormLinks(self.router.script().forms.clone()),
            Route::Lookup { name } => {
                self.metrics.inc_lookup();
                match self
                    .bounded("record_store", self.collaborators.records.find_by_name(&name))
                    .await
                {
                    Ok(records) => {
                        info!(name = %name, records = records.len(), "lookup finished");
                        Reply::LookupReport { name, records }
                    }
                    Err(err) => {
                        self.metrics.inc_fallback();
                        warn!(error = %err, kind = err.kind().as_str(), "lookup failed");
                        Reply::Unavailable
                    }
                }
            }
            Route::Assistant { text } => self.ask_assistant(handle, session, text).await,
        }
    }

    async fn ask_assistant(
        &self,
        handle: &SessionHandle<'_, S>,
        session: Option<&UserSession>,
        text: String,
    ) -> Reply {
        self.metrics.inc_assistant_call();
        let history: Vec<HistoryEntry> = session
            .map(|session| session.history.iter().cloned().collect())
            .unwrap_or_default();

        match self
            .bounded("openai", self.collaborators.assistant.respond(&history, &text))
            .await
        {
            Ok(answer) if !answer.trim().is_empty() => {
                let entries = vec![
                    HistoryEntry {
                        role: Role::User,
                        content: text,
                    },
                    HistoryEntry {
                        role: Role::Assistant,
                        content: answer.clone(),
                    },
                ];
                if let Err(err) = handle.push_history(entries).await {
                    warn!(user_id = handle.user_id(), error = %err, "history not saved");
                }
                Reply::Assistant(answer)
            }
            Ok(_) => {
                self.metrics.inc_fallback();
                warn!(kind = ErrorKind::ClassificationMiss.as_str(), "assistant returned nothing");
                self.help()
            }
            Err(err) => {
                self.metrics.inc_fallback();
                warn!(error = %err, kind = err.kind().as_str(), "assistant unavailable");
                self.help()
            }
        }
    }

    async fn deliver(
        &self,
        reply_handle: relay_core::ReplyHandle,
        message: OutboundMessage,
        route: &'static str,
    ) -> EventOutcome {
        if message.is_empty() {
            debug!(route, "nothing to send");
            return EventOutcome::NothingToSend { route };
        }

        let kind = message.kind();
        match self
            .bounded("line", self.collaborators.gateway.deliver(reply_handle, message))
            .await
        {
            Ok(DeliveryOutcome::Sent) => {
                self.metrics.inc_delivery();
                debug!(route, message = kind, "reply delivered");
                EventOutcome::Delivered { route }
            }
            Ok(DeliveryOutcome::Skipped) => EventOutcome::NothingToSend { route },
            Err(err) => {
                self.metrics.inc_delivery_failure();
                warn!(route, error = %err, kind = err.kind().as_str(), "reply delivery failed");
                EventOutcome::DeliveryFailed {
                    route,
                    kind: err.kind(),
                }
            }
        }
    }

    async fn alert_if_risky(&self, user_id: &str, text: &str) {
        let Some(found) = self.risk.scan(text) else {
            return;
        };
        warn!(user_id, phrase = %found.phrase, "risk phrase detected");

        let Some(admin) = self.settings.admin_user_id.as_deref() else {
            return;
        };
        let alert = OutboundMessage::PlainText(self.risk.alert_text(user_id, text, &found));
        match self
            .bounded("line", self.collaborators.gateway.push(admin, alert))
            .await
        {
            Ok(_) => self.metrics.inc_risk_alert(),
            Err(err) => warn!(error = %err, kind = err.kind().as_str(), "risk alert not pushed"),
        }
    }

    async fn log_conversation(&self, user_id: &str, text: &str) {
        if !self.settings.log_conversations {
            return;
        }
        if let Err(err) = self
            .bounded("record_store", self.collaborators.records.log_message(user_id, text))
            .await
        {
            debug!(error = %err, "conversation log skipped");
        }
    }

    async fn clear(&self, handle: &SessionHandle<'_, S>) {
        if let Err(err) = handle.clear().await {
            warn!(user_id = handle.user_id(), error = %err, "session clear failed");
        }
    }

    fn help(&self) -> Reply {
        Reply::Help {
            triggers: self.router.script().trigger_phrases(),
        }
    }

    async fn bounded<T, F>(&self, service: &'static str, call: F) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        match tokio::time::timeout(self.settings.upstream_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout { service }),
        }
    }
}
