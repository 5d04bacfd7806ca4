//! Webhook gateway: signature check, payload parsing, classification, and
//! dispatch to the sinks configured for each endpoint.
//!
//! Every route acknowledges with a fixed `Ok` regardless of internal
//! outcome; a rejected signature or an unattributable event produces no
//! observable difference to the caller.

pub mod payload;
pub mod signature;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::Router;
use crier_classify::{classify, find_comment, is_new_object, EventKind, ObjectType, COMMENT_WINDOW_SECS};
use crier_compose::Notification;
use crier_core::{Config, ConfigError};
use crier_sinks::{Connector, JenkinsSink, SinkEvent};
use crier_tracker::TrackerApi;

pub use payload::parse_event;
pub use signature::{verify_signature, SIGNATURE_HEADER};

/// Fixed acknowledgement; identical on success, suppression and rejection.
const ACK: &str = "Ok";

pub struct GatewayState {
    config: Arc<Config>,
    tracker: Arc<dyn TrackerApi>,
    chat: Arc<dyn Connector>,
    jenkins: Option<Arc<JenkinsSink>>,
    launchpad: Option<Arc<dyn Connector>>,
}

impl GatewayState {
    /// Wires the gateway. Endpoint/sink consistency is checked here so a
    /// hook pointing at an unconfigured sink fails startup, not requests.
    pub fn new(
        config: Arc<Config>,
        tracker: Arc<dyn TrackerApi>,
        chat: Arc<dyn Connector>,
        jenkins: Option<Arc<JenkinsSink>>,
        launchpad: Option<Arc<dyn Connector>>,
    ) -> Result<Self, ConfigError> {
        if config.tracker.hook_secret("jenkins").is_some() && jenkins.is_none() {
            return Err(ConfigError::MissingKey { key: "jenkins" });
        }
        if config.tracker.hook_secret("jenkinsnag").is_some() && jenkins.is_none() {
            return Err(ConfigError::MissingKey { key: "jenkins" });
        }
        if config.tracker.hook_secret("commithook").is_some() && launchpad.is_none() {
            return Err(ConfigError::MissingKey { key: "launchpad" });
        }
        Ok(Self {
            config,
            tracker,
            chat,
            jenkins,
            launchpad,
        })
    }

    fn authorized(&self, endpoint: &str, headers: &HeaderMap, body: &[u8]) -> bool {
        let Some(secret) = self.config.tracker.hook_secret(endpoint) else {
            // Routes are only registered for configured hooks.
            return false;
        };
        let presented = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        let valid = verify_signature(secret, body, presented);
        if !valid {
            tracing::info!(%endpoint, "webhook signature rejected");
        }
        valid
    }

    /// The `/irc` path: classify the event and, unless suppressed, send one
    /// composed notice to the chat sink.
    pub async fn process_chat_event(&self, body: &[u8]) -> Result<()> {
        let Some(event) = parse_event(body)? else {
            return Ok(());
        };
        let history = self
            .tracker
            .transaction_history(&event.object_phid)
            .await
            .context("transaction history lookup failed")?;
        if history.entries.is_empty() {
            tracing::debug!(phid = %event.object_phid, "empty history, nothing to report");
            return Ok(());
        }

        // Without the author we cannot attribute the event; suppress.
        let Some(author) = self.author_of(&history).await else {
            return Ok(());
        };

        let comment = find_comment(&history.entries, event.action_epoch, COMMENT_WINDOW_SECS);
        let kind = classify(
            event.object_type,
            is_new_object(&history.entries),
            &comment,
        );
        let Some(verb_phrase) = kind.verb_phrase() else {
            tracing::debug!(phid = %event.object_phid, "event already reported, suppressing");
            return Ok(());
        };

        let strings = self
            .tracker
            .object_strings(&event.object_phid)
            .await
            .context("object lookup failed")?;

        let link = match kind {
            EventKind::Commit => {
                format!("{}{}", self.config.tracker.web_base(), strings.name)
            }
            _ if kind.wants_anchor() => match &comment.anchor_comment_id {
                Some(anchor) => format!("{}#{}", strings.uri, anchor),
                None => strings.uri.clone(),
            },
            _ => strings.uri.clone(),
        };

        let notification = Notification {
            subject_label: strings.full_name.clone(),
            author,
            verb_phrase: verb_phrase.to_string(),
            link,
        };
        self.chat.send(&SinkEvent::Chat(notification)).await
    }

    /// The `/commithook` path: commits feed the bug-tracker sink.
    pub async fn process_commit_event(&self, body: &[u8]) -> Result<()> {
        let Some(sink) = &self.launchpad else {
            return Ok(());
        };
        let Some(event) = self.attributed_commit(body).await? else {
            return Ok(());
        };
        sink.send(&event).await
    }

    /// The `/jenkins` path: commits feed the build-trigger sink.
    pub async fn process_build_trigger(&self, body: &[u8]) -> Result<()> {
        let Some(sink) = &self.jenkins else {
            return Ok(());
        };
        let Some(event) = self.attributed_commit(body).await? else {
            return Ok(());
        };
        sink.send(&event).await
    }

    /// Shared commit handling: parse, require a commit, require an author,
    /// and derive the repository name and commit message.
    async fn attributed_commit(&self, body: &[u8]) -> Result<Option<SinkEvent>> {
        let Some(event) = parse_event(body)? else {
            return Ok(None);
        };
        if event.object_type != ObjectType::Commit {
            return Ok(None);
        }
        let history = self
            .tracker
            .transaction_history(&event.object_phid)
            .await
            .context("transaction history lookup failed")?;
        if self.author_of(&history).await.is_none() {
            return Ok(None);
        }
        let strings = self
            .tracker
            .object_strings(&event.object_phid)
            .await
            .context("object lookup failed")?;
        Ok(Some(SinkEvent::Commit {
            repository: strings.name.clone(),
            message: strings.commit_message(),
        }))
    }

    async fn author_of(&self, history: &crier_tracker::TransactionHistory) -> Option<String> {
        let author_phid = history.first_author_phid.as_deref()?;
        let author = self.tracker.author_display_name(author_phid).await;
        if author.is_none() {
            tracing::info!("author unavailable, suppressing event");
        }
        author
    }

    /// The `/jenkinsnag` path: detached poll of the job named in the
    /// payload, after a settle delay that gives the build system time to
    /// register the run.
    fn spawn_status_poll(self: &Arc<Self>, body: &[u8]) {
        let Some(jenkins) = self.jenkins.clone() else {
            return;
        };
        let job = serde_json::from_slice::<serde_json::Value>(body)
            .ok()
            .and_then(|value| {
                value
                    .get("name")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string)
            });
        let Some(job) = job else {
            tracing::debug!("status payload without job name, ignoring");
            return;
        };

        let state = Arc::clone(self);
        let settle = Duration::from_millis(
            self.config
                .jenkins
                .as_ref()
                .map(|jenkins| jenkins.status_settle_ms)
                .unwrap_or(10_000),
        );
        tokio::spawn(async move {
            tokio::time::sleep(settle).await;
            match jenkins.status_transition(&job).await {
                Ok(Some(transition)) => {
                    let label = state
                        .config
                        .jenkins
                        .as_ref()
                        .map(|jenkins| jenkins.status_label.clone())
                        .unwrap_or_else(|| "CI".to_string());
                    let notification = Notification {
                        subject_label: label,
                        author: transition.job,
                        verb_phrase: transition.phrase.to_string(),
                        link: transition.url,
                    };
                    if let Err(error) = state.chat.send(&SinkEvent::Chat(notification)).await {
                        tracing::warn!(%error, "failed to send build-status notice");
                    }
                }
                Ok(None) => tracing::debug!(%job, "build status unchanged, suppressing"),
                Err(error) => tracing::warn!(%error, %job, "build status poll failed"),
            }
        });
    }
}

/// Builds the router with one POST route per configured hook.
pub fn router(state: Arc<GatewayState>) -> Router {
    let mut router = Router::new();
    let hooks = &state.config.tracker.hooks;
    if hooks.contains_key("irc") {
        router = router.route("/irc", post(chat_hook));
    }
    if hooks.contains_key("commithook") {
        router = router.route("/commithook", post(commit_hook));
    }
    if hooks.contains_key("jenkins") {
        router = router.route("/jenkins", post(build_trigger_hook));
    }
    if hooks.contains_key("jenkinsnag") {
        router = router.route("/jenkinsnag", post(build_status_hook));
    }
    router.with_state(state)
}

async fn chat_hook(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> &'static str {
    if state.authorized("irc", &headers, &body) {
        if let Err(error) = state.process_chat_event(&body).await {
            tracing::warn!(%error, "chat webhook processing failed");
        }
    }
    ACK
}

async fn commit_hook(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> &'static str {
    if state.authorized("commithook", &headers, &body) {
        if let Err(error) = state.process_commit_event(&body).await {
            tracing::warn!(%error, "commit webhook processing failed");
        }
    }
    ACK
}

async fn build_trigger_hook(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> &'static str {
    if state.authorized("jenkins", &headers, &body) {
        if let Err(error) = state.process_build_trigger(&body).await {
            tracing::warn!(%error, "build trigger processing failed");
        }
    }
    ACK
}

async fn build_status_hook(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> &'static str {
    if state.authorized("jenkinsnag", &headers, &body) {
        state.spawn_status_poll(&body);
    }
    ACK
}
