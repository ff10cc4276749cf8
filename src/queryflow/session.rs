//! Session orchestration: chat messages in, workflow runs out.
//!
//! One [`SessionOrchestrator`] serves every connection. Each connection is
//! attached to a [`Session`] (new, or resumed by id on reconnect) that
//! holds the caller's context map, a rolling conversation log, and the
//! currently attached outbound channel. Every `chat` frame spawns one
//! workflow run; runs on the same session proceed independently, but all
//! their frames funnel through the session's single outbound channel, so
//! the client observes them in production order.
//!
//! Disconnect semantics: when the inbound stream ends, every in-flight run
//! for that connection is cancelled, the session detaches its outbound
//! channel (so no further frames are produced), and the session entry —
//! context and conversation log, not run state — is retained so a
//! reconnect presenting the session id resumes where the conversation left
//! off.

use crate::queryflow::cancel::{CancelHandle, CancelToken};
use crate::queryflow::config::QueryFlowConfig;
use crate::queryflow::error::ErrorKind;
use crate::queryflow::event::WorkflowEvent;
use crate::queryflow::router::NodeName;
use crate::queryflow::state::AgentState;
use crate::queryflow::transport::ServerFrame;
use crate::queryflow::transport::{ClientFrame, OUTBOUND_BUFFER};
use crate::queryflow::workflow::WorkflowDriver;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// How many past exchanges are surfaced to the planner as context.
const HISTORY_LIMIT: usize = 20;

/// One completed exchange in a session's rolling log.
#[derive(Debug, Clone)]
pub struct ConversationEntry {
    pub query: String,
    pub response: String,
    pub at: DateTime<Utc>,
}

/// Reconnection-visible per-session state.
pub struct Session {
    pub id: String,
    context: Mutex<HashMap<String, Value>>,
    log: Mutex<Vec<ConversationEntry>>,
    outbound: Mutex<Option<mpsc::Sender<ServerFrame>>>,
    last_outbound: Mutex<tokio::time::Instant>,
}

impl Session {
    fn new(id: String) -> Self {
        Self {
            id,
            context: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            outbound: Mutex::new(None),
            last_outbound: Mutex::new(tokio::time::Instant::now()),
        }
    }

    /// Point the session at a (new) connection's outbound channel.
    fn reattach(&self, sender: mpsc::Sender<ServerFrame>) {
        *self.outbound.lock().unwrap() = Some(sender);
    }

    /// Drop the outbound channel; frames produced afterwards go nowhere.
    fn detach(&self) {
        *self.outbound.lock().unwrap() = None;
    }

    /// Send one frame to the currently attached connection. Returns false
    /// when the session is detached or the connection is gone.
    pub async fn send(&self, frame: ServerFrame) -> bool {
        let sender = self.outbound.lock().unwrap().clone();
        match sender {
            Some(sender) => {
                let delivered = sender.send(frame).await.is_ok();
                if delivered {
                    *self.last_outbound.lock().unwrap() = tokio::time::Instant::now();
                }
                delivered
            }
            None => false,
        }
    }

    /// Time since the last outbound frame.
    fn idle_for(&self) -> std::time::Duration {
        self.last_outbound.lock().unwrap().elapsed()
    }

    /// Merge entries into the session context, last write wins per key.
    pub fn merge_context(&self, entries: HashMap<String, Value>) {
        let mut context = self.context.lock().unwrap();
        for (key, value) in entries {
            context.insert(key, value);
        }
    }

    /// A copy of the current context map.
    pub fn context_snapshot(&self) -> HashMap<String, Value> {
        self.context.lock().unwrap().clone()
    }

    fn push_log(&self, query: String, response: String) {
        let mut log = self.log.lock().unwrap();
        log.push(ConversationEntry {
            query,
            response,
            at: Utc::now(),
        });
        let overflow = log.len().saturating_sub(HISTORY_LIMIT);
        if overflow > 0 {
            log.drain(..overflow);
        }
    }

    /// The rolling conversation log as a JSON value for planner context.
    fn history_value(&self) -> Option<Value> {
        let log = self.log.lock().unwrap();
        if log.is_empty() {
            return None;
        }
        Some(Value::Array(
            log.iter()
                .map(|entry| {
                    json!({
                        "query": entry.query,
                        "response": entry.response,
                        "at": entry.at.to_rfc3339(),
                    })
                })
                .collect(),
        ))
    }

    /// Number of completed exchanges retained.
    pub fn exchange_count(&self) -> usize {
        self.log.lock().unwrap().len()
    }
}

/// Accepts chat frames, spawns one workflow run per message, and fans the
/// runs' events back out as ordered server frames.
pub struct SessionOrchestrator {
    driver: Arc<WorkflowDriver>,
    config: QueryFlowConfig,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionOrchestrator {
    pub fn new(driver: Arc<WorkflowDriver>, config: QueryFlowConfig) -> Self {
        Self {
            driver,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &QueryFlowConfig {
        &self.config
    }

    /// A bounded outbound channel pair sized for this transport.
    pub fn outbound_channel() -> (mpsc::Sender<ServerFrame>, mpsc::Receiver<ServerFrame>) {
        mpsc::channel(OUTBOUND_BUFFER)
    }

    /// Look up a live session by id.
    pub fn session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().unwrap().get(id).cloned()
    }

    /// Forget a session entirely (context and log included).
    pub fn end_session(&self, id: &str) {
        self.sessions.lock().unwrap().remove(id);
    }

    /// Send a decorative frame (filter/visualization) to a session, if it
    /// is currently attached.
    pub async fn decorate(&self, session_id: &str, frame: ServerFrame) -> bool {
        match self.session(session_id) {
            Some(session) => session.send(frame).await,
            None => false,
        }
    }

    /// Service one connection until its inbound stream ends.
    ///
    /// `resume` carries the session id presented by a reconnecting client;
    /// when the server still holds that session it is reattached, otherwise
    /// a fresh session is issued. Either way the first outbound frame is
    /// `connection_established` with the session id in effect.
    pub async fn run_connection(
        self: &Arc<Self>,
        mut inbound: mpsc::Receiver<ClientFrame>,
        outbound: mpsc::Sender<ServerFrame>,
        resume: Option<String>,
    ) {
        let session = self.attach(resume, outbound);
        if !session
            .send(ServerFrame::ConnectionEstablished {
                session_id: session.id.clone(),
            })
            .await
        {
            session.detach();
            return;
        }

        let mut runs: Vec<CancelHandle> = Vec::new();
        let mut idle = tokio::time::interval(self.config.idle_ping_interval);
        idle.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                maybe = inbound.recv() => match maybe {
                    None => break,
                    Some(ClientFrame::Chat { content, id, context }) => {
                        if let Some(context) = context {
                            session.merge_context(context);
                        }
                        if !session
                            .send(ServerFrame::MessageReceived { id: id.clone() })
                            .await
                        {
                            break;
                        }
                        let (handle, token) = CancelToken::new();
                        runs.push(handle);
                        let this = self.clone();
                        let session = session.clone();
                        tokio::spawn(async move {
                            this.run_chat(session, id, content, token).await;
                        });
                    }
                    Some(ClientFrame::ContextUpdate { context }) => {
                        session.merge_context(context);
                    }
                    Some(ClientFrame::Ping) => {
                        if !session.send(ServerFrame::Pong).await {
                            break;
                        }
                    }
                    Some(ClientFrame::Unknown) => {
                        log::warn!("session {}: ignoring unknown message type", session.id);
                    }
                },
                _ = idle.tick() => {
                    if session.idle_for() >= self.config.idle_ping_interval {
                        if !session.send(ServerFrame::Ping).await {
                            break;
                        }
                    }
                }
            }
        }

        // Disconnect: cancel in-flight runs and stop producing frames. The
        // session entry itself is retained for reconnection.
        for handle in &runs {
            handle.cancel();
        }
        session.detach();
        log::info!("session {} disconnected", session.id);
    }

    /// One chat message: run the workflow, forward progress, finish with
    /// exactly one terminal frame (unless the run was cancelled).
    async fn run_chat(
        self: Arc<Self>,
        session: Arc<Session>,
        id: String,
        content: String,
        cancel: CancelToken,
    ) {
        let mut context = session.context_snapshot();
        if let Some(history) = session.history_value() {
            context.insert("history".to_string(), history);
        }
        let state = AgentState::new(content.clone(), context);

        let (event_tx, mut event_rx) = mpsc::channel::<WorkflowEvent>(16);
        let driver = self.driver.clone();
        let run_cancel = cancel.clone();
        let run = tokio::spawn(async move {
            driver.run(state, Some(event_tx), &run_cancel).await
        });

        while let Some(event) = event_rx.recv().await {
            if cancel.is_cancelled() {
                break;
            }
            if let WorkflowEvent::NodeStarted { node, .. } = &event {
                if *node != NodeName::End {
                    let frame = ServerFrame::WorkflowProgress {
                        node: node.as_str().to_string(),
                        id: id.clone(),
                    };
                    if !session.send(frame).await {
                        break;
                    }
                }
            }
        }
        // Closing the receiver lets a still-running workflow notice its
        // subscriber is gone instead of blocking on a full channel.
        drop(event_rx);

        let final_state = match run.await {
            Ok(final_state) => final_state,
            Err(err) => {
                log::error!("workflow task failed: {}", err);
                if !cancel.is_cancelled() {
                    session
                        .send(ServerFrame::Error {
                            message: failure_message(&[]),
                            id: Some(id),
                        })
                        .await;
                }
                return;
            }
        };

        if cancel.is_cancelled() {
            return;
        }

        match final_state.final_response {
            Some(text) => {
                session
                    .send(ServerFrame::StreamChunk {
                        content: text.clone(),
                        id: id.clone(),
                    })
                    .await;
                session.send(ServerFrame::StreamComplete { id }).await;
                session.push_log(content, text);
            }
            None => {
                let kinds: Vec<ErrorKind> =
                    final_state.errors.iter().map(|e| e.kind).collect();
                session
                    .send(ServerFrame::Error {
                        message: failure_message(&kinds),
                        id: Some(id),
                    })
                    .await;
            }
        }
    }

    fn attach(&self, resume: Option<String>, outbound: mpsc::Sender<ServerFrame>) -> Arc<Session> {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(id) = resume {
            if let Some(session) = sessions.get(&id) {
                log::info!("session {} resumed", id);
                session.reattach(outbound);
                return session.clone();
            }
            log::info!("session {} not retained, issuing a new one", id);
        }
        let session = Arc::new(Session::new(Uuid::new_v4().to_string()));
        session.reattach(outbound);
        sessions.insert(session.id.clone(), session.clone());
        session
    }
}

/// The kind-level failure text shown to users. Raw backend errors never
/// appear here.
fn failure_message(kinds: &[ErrorKind]) -> String {
    if kinds.contains(&ErrorKind::PlanError) {
        "I couldn't find a data source that can answer that question.".to_string()
    } else {
        "I ran into a problem retrieving data from one of our systems.".to_string()
    }
}
