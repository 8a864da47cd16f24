//! The conversation session: one model loop over the tool registry.
//!
//! A turn walks `Idle -> AwaitingModel -> ExecutingTools -> ...` until
//! the model answers without tool calls. Tool calls run in the order the
//! model issued them, each producing exactly one result before the next
//! model request. Tool failures are reported back to the model as
//! results; only a provider failure or a dead host thread ends the turn.

pub mod doom_loop;
pub mod events;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::errors::{AgentError, AgentResult};
use crate::gateway::GatewayClient;
use crate::host::{canonicalize_command, is_state_changing, CommandOutcome, HostBridge};
use crate::models::content::Content;
use crate::models::message::{Message, ToolRequest};
use crate::models::tool::ToolCall;
use crate::providers::Provider;
use crate::registry::{ToolCapability, ToolRegistry};
use crate::settings::Settings;

pub use doom_loop::{DoomLoopDetector, DoomLoopWarning};
pub use events::{EventSink, SessionEvent};

const AUTO_VALIDATION_ID: &str = "auto_capture_snapshot_1";
const SLOW_TOOL_WARN_AFTER: Duration = Duration::from_secs(8);
const TRUNCATION_MARKER: &str = "... [truncated]";

pub const SYSTEM_PROMPT: &str = "\
You are a molecular viewer desktop agent.
You can either:
1) call tools to act in the viewer, or
2) provide a final direct answer without tool calls.

Rules:
- Use tool calls when an action/query in the viewer is needed.
- If tool results already answer the user, return a concise final answer and DO NOT call tools.
- Do not use shell commands.
- Prefer continuing current session state; avoid redundant fetch/load.
- capture_snapshot is INTERNAL validation only. The user cannot see this image in chat.
- Never say you are taking a screenshot \"to show\" the user.
- If you use capture_snapshot, describe it as internal validation of viewer state.
- After state-changing commands, use capture_snapshot to verify the scene actually reflects the requested outcome.
- Do not claim completion until scene validation has been performed (or explicitly explain why validation failed).
- gateway_* tools query a remote biology-data service; check a tool's schema before invoking it.
- Do not repeat the same setup sentence or intent text step after step.
- If a strategy fails repeatedly, switch approach or ask the user for clarification.
- Do not re-run the same successful command in the same request unless you clearly explain why.
- Keep answers concise and practical.
";

/// Observable lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingModel,
    ExecutingTools,
    Complete,
    Disabled,
    Cancelled,
    Failed,
}

/// How a turn ended when it did not error.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Answer(String),
    Cancelled,
}

/// Cancels the owning session's current turn from any thread. A host
/// call that was already dispatched still completes; its result is
/// discarded.
#[derive(Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct ConversationSession {
    id: Uuid,
    provider: Arc<dyn Provider>,
    registry: ToolRegistry,
    host: HostBridge,
    gateway: Option<GatewayClient>,
    settings: Settings,
    events: EventSink,
    history: Vec<Message>,
    state: SessionState,
    cancel: CancelHandle,
    doom: DoomLoopDetector,
}

impl std::fmt::Debug for ConversationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ConversationSession {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: ToolRegistry,
        host: HostBridge,
        gateway: Option<GatewayClient>,
        settings: Settings,
        events: EventSink,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider,
            registry,
            host,
            gateway,
            settings,
            events,
            history: Vec::new(),
            state: SessionState::Idle,
            cancel: CancelHandle::default(),
            doom: DoomLoopDetector::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Append-only conversation history.
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// The embedding host calls this when the runtime gate flips after
    /// the session was created (key cleared, kill switch set).
    pub fn set_enabled(&mut self, enabled: bool) {
        if !enabled {
            self.state = SessionState::Disabled;
        } else if self.state == SessionState::Disabled {
            self.state = SessionState::Idle;
        }
    }

    /// Run one viewer command directly, bypassing the model. This is
    /// the command input mode; the transcript records it so a later AI
    /// turn sees what the user did by hand.
    pub async fn run_command(&mut self, command: &str) -> AgentResult<CommandOutcome> {
        let (command, note) = canonicalize_command(command);
        if let Some(note) = note {
            self.events.notice(note);
        }
        let outcome = self.host.execute(&command).await?;
        self.events.emit(SessionEvent::ToolFinished {
            id: format!("cli:{}", command),
            name: crate::registry::TOOL_RUN_HOST_COMMAND.to_string(),
            ok: outcome.ok,
            summary: format!("Executed: {}", command),
        });
        self.push_history(Message::user().with_text(format!("CLI command: {}", command)));
        Ok(outcome)
    }

    /// Run one user request to completion.
    pub async fn run_turn(&mut self, prompt: &str) -> AgentResult<TurnOutcome> {
        if self.state == SessionState::Disabled {
            return Err(AgentError::CredentialUnavailable(
                "assistant disabled".to_string(),
            ));
        }
        if self.state == SessionState::Failed {
            return Err(AgentError::Internal(
                "session has failed; start a new session".to_string(),
            ));
        }
        self.doom.clear();
        if self.cancel.is_cancelled() {
            return Ok(self.finish_cancelled());
        }

        debug!(session = %self.id, chars = prompt.len(), "turn started");
        self.push_history(Message::user().with_text(prompt));
        let tools = self.registry.tools();

        let mut pending_validation = false;
        let mut validation_done = false;
        let mut slow_notice_emitted = false;
        let mut last_text = String::new();

        for _ in 0..self.settings.max_agent_steps {
            self.state = SessionState::AwaitingModel;
            let system = self.system_prompt().await?;
            let reply = match self
                .provider
                .complete(&system, &self.history, &tools)
                .await
            {
                Ok((reply, usage)) => {
                    debug!(total_tokens = ?usage.total_tokens, "model turn received");
                    reply
                }
                Err(err) => {
                    error!(%err, "model request failed");
                    self.events.emit(SessionEvent::Error(err.to_string()));
                    self.state = SessionState::Failed;
                    self.cancel.clear();
                    return Err(err);
                }
            };
            if self.cancel.is_cancelled() {
                return Ok(self.finish_cancelled());
            }

            let text = reply.text();
            if !text.is_empty() {
                last_text = text.clone();
                self.events.emit(SessionEvent::AssistantText(text));
            }
            let requests: Vec<ToolRequest> =
                reply.tool_requests().into_iter().cloned().collect();
            self.push_history(reply);

            if requests.is_empty() {
                if self.settings.snapshot_validate_required
                    && pending_validation
                    && !validation_done
                {
                    self.auto_validate().await;
                }
                self.state = SessionState::Complete;
                self.cancel.clear();
                return Ok(TurnOutcome::Answer(last_text));
            }

            self.state = SessionState::ExecutingTools;
            let mut responses = Message::tool();
            for request in &requests {
                let result = self
                    .execute_request(
                        request,
                        &mut pending_validation,
                        &mut validation_done,
                        &mut slow_notice_emitted,
                    )
                    .await?;
                if self.cancel.is_cancelled() {
                    // The dispatched call completed against host state;
                    // the incomplete turn (request and results) is
                    // dropped so history never carries a request
                    // without its responses.
                    self.history.pop();
                    return Ok(self.finish_cancelled());
                }
                responses = responses.with_tool_response(request.id.clone(), result);
            }
            self.push_history(responses);
        }

        warn!(
            max_steps = self.settings.max_agent_steps,
            "turn hit the step bound"
        );
        self.events
            .notice("reached the maximum number of agent steps for this request");
        self.state = SessionState::Complete;
        self.cancel.clear();
        Ok(TurnOutcome::Answer(last_text))
    }

    /// Execute one tool request. The outer error is fatal to the turn
    /// (the host thread died); everything else comes back as the tool's
    /// result, success or failure.
    async fn execute_request(
        &mut self,
        request: &ToolRequest,
        pending_validation: &mut bool,
        validation_done: &mut bool,
        slow_notice_emitted: &mut bool,
    ) -> AgentResult<AgentResult<Vec<Content>>> {
        let call = match &request.tool_call {
            Ok(call) => call.clone(),
            Err(err) => {
                self.events.emit(SessionEvent::ToolFinished {
                    id: request.id.clone(),
                    name: String::new(),
                    ok: false,
                    summary: err.to_string(),
                });
                return Ok(Err(err.clone()));
            }
        };

        self.events.emit(SessionEvent::ToolStarted {
            id: request.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        });

        let Some(capability) = self.registry.resolve(&call.name).map(|d| d.capability) else {
            warn!(tool = %call.name, "model requested an unknown tool");
            self.events
                .notice(format!("model requested unknown tool {}", call.name));
            return Ok(Err(AgentError::UnknownTool(call.name)));
        };

        if let Some(warning) = self.doom.add_call(&call.name, &call.arguments) {
            self.events.notice(format!(
                "{} was called {} times in a row with identical arguments; consider a different approach",
                warning.tool_name, warning.call_count
            ));
        }

        let result = match capability {
            ToolCapability::HostCommand => {
                self.run_host_command(&request.id, &call, pending_validation, slow_notice_emitted)
                    .await?
            }
            ToolCapability::HostSnapshot => {
                let result = self.run_snapshot(&request.id).await?;
                *validation_done = true;
                *pending_validation = false;
                result
            }
            ToolCapability::GatewayCall(op) => {
                let started = Instant::now();
                let result = match &self.gateway {
                    Some(client) => match client.call(op, &call.arguments).await {
                        Ok(value) => Ok(vec![Content::text(self.truncated(value.to_string()))]),
                        Err(err) => Err(err.into()),
                    },
                    None => Err(AgentError::GatewayUnavailable(
                        "no gateway credential is configured".to_string(),
                    )),
                };
                self.maybe_slow_notice(started.elapsed(), slow_notice_emitted);
                self.events.emit(SessionEvent::ToolFinished {
                    id: request.id.clone(),
                    name: call.name.clone(),
                    ok: result.is_ok(),
                    summary: format!("Executed: {}", call.name),
                });
                result
            }
        };
        Ok(result)
    }

    async fn run_host_command(
        &mut self,
        request_id: &str,
        call: &ToolCall,
        pending_validation: &mut bool,
        slow_notice_emitted: &mut bool,
    ) -> AgentResult<AgentResult<Vec<Content>>> {
        let raw = call
            .arguments
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim();
        if raw.is_empty() {
            return Ok(Err(AgentError::InvalidParameters(
                "command is required".to_string(),
            )));
        }

        let (command, note) = canonicalize_command(raw);
        if let Some(note) = note {
            self.events.notice(note);
        }

        let started = Instant::now();
        let outcome = self.host.execute(&command).await?;
        self.maybe_slow_notice(started.elapsed(), slow_notice_emitted);

        if is_state_changing(&outcome.command) {
            *pending_validation = true;
        }

        self.events.emit(SessionEvent::ToolFinished {
            id: request_id.to_string(),
            name: crate::registry::TOOL_RUN_HOST_COMMAND.to_string(),
            ok: outcome.ok,
            summary: format!("Executed: {}", command),
        });

        let payload = json!({
            "ok": outcome.ok,
            "command": outcome.command,
            "error": outcome.error,
            "feedback_lines": outcome.feedback_lines,
        });
        Ok(Ok(vec![Content::text(self.truncated(payload.to_string()))]))
    }

    async fn run_snapshot(&mut self, request_id: &str) -> AgentResult<AgentResult<Vec<Content>>> {
        let started = Instant::now();
        let snapshot = self
            .host
            .snapshot(
                self.settings.screenshot_width,
                self.settings.screenshot_height,
            )
            .await?;
        let (state, recent) = self.host.state_summary().await?;
        debug!(
            ok = snapshot.ok,
            bytes = snapshot.meta.bytes,
            elapsed = ?started.elapsed(),
            "snapshot captured"
        );

        let mut state_summary =
            serde_json::to_value(&state).map_err(|e| AgentError::Internal(e.to_string()))?;
        state_summary["recent_tool_results"] =
            serde_json::to_value(&recent).map_err(|e| AgentError::Internal(e.to_string()))?;

        let payload = json!({
            "ok": snapshot.ok,
            "error": snapshot.error,
            "meta": snapshot.meta,
            "state_summary": state_summary,
            "used_screenshot": snapshot.ok,
        });

        self.events.emit(SessionEvent::ToolFinished {
            id: request_id.to_string(),
            name: crate::registry::TOOL_CAPTURE_SNAPSHOT.to_string(),
            ok: snapshot.ok,
            summary: if snapshot.ok {
                "validated: screenshot+state".to_string()
            } else {
                "validated: state-only (screenshot failed)".to_string()
            },
        });

        let mut contents = vec![Content::text(payload.to_string())];
        if let Some((data, mime)) = snapshot.image_parts() {
            contents.push(Content::image(data, mime));
        }
        Ok(Ok(contents))
    }

    /// The model finished a turn with unvalidated state changes; run the
    /// snapshot on its behalf so the transcript records what the scene
    /// actually looks like. Failures here never fail the answer.
    async fn auto_validate(&mut self) {
        self.events.notice("running automatic scene validation");
        match self.run_snapshot(AUTO_VALIDATION_ID).await {
            Ok(result) => {
                let message =
                    Message::tool().with_tool_response(AUTO_VALIDATION_ID, result);
                self.push_history(message);
            }
            Err(err) => warn!(%err, "automatic validation skipped"),
        }
    }

    /// System prompt plus a compact JSON summary of live viewer state,
    /// rebuilt before every model request.
    async fn system_prompt(&self) -> AgentResult<String> {
        let (state, recent) = self.host.state_summary().await?;
        let mut summary =
            serde_json::to_value(&state).map_err(|e| AgentError::Internal(e.to_string()))?;
        summary["recent_tool_results"] =
            serde_json::to_value(&recent).map_err(|e| AgentError::Internal(e.to_string()))?;
        Ok(format!(
            "{}\nCurrent viewer state (compact JSON):\n{}",
            SYSTEM_PROMPT, summary
        ))
    }

    fn maybe_slow_notice(&self, elapsed: Duration, emitted: &mut bool) {
        if *emitted || elapsed < SLOW_TOOL_WARN_AFTER {
            return;
        }
        self.events.notice(format!(
            "tool step took {:.1}s; the UI may be busy during heavy viewer operations",
            elapsed.as_secs_f64()
        ));
        *emitted = true;
    }

    fn truncated(&self, text: String) -> String {
        let max = self.settings.tool_result_max_chars;
        if text.chars().count() <= max {
            return text;
        }
        let mut cut: String = text.chars().take(max).collect();
        cut.push_str(TRUNCATION_MARKER);
        cut
    }

    fn push_history(&mut self, message: Message) {
        self.history.push(message);
        let max = self.settings.max_history_turns;
        if self.history.len() > max {
            let excess = self.history.len() - max;
            self.history.drain(..excess);
        }
    }

    fn finish_cancelled(&mut self) -> TurnOutcome {
        debug!("turn cancelled");
        self.events.emit(SessionEvent::Cancelled);
        self.state = SessionState::Cancelled;
        self.cancel.clear();
        TurnOutcome::Cancelled
    }
}
