//! Agent loop — the conversation state machine.
//!
//! One inbound message drives one turn: model call, an optional sequential
//! tool round followed by a second model call, then parsing of the
//! structured reply. A `can_continue` flag lets the model keep working
//! without new user input; continuations are iterative and bounded by
//! `max_continuations`, never unbounded recursion.

use anyhow::Result;
use rig::completion::request::{CompletionError, CompletionRequest};
use rig::completion::ToolDefinition;
use rig::message::{AssistantContent, Message, ToolResultContent, UserContent};
use rig::OneOrMany;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn, Instrument};

use crate::agent::context::{ConversationContext, PromptBuilder};
use crate::agent::session::SessionStore;
use crate::backend::CompletionBackend;
use crate::bus::{InboundMessage, OutboundMessage};
use crate::tools::{ToolCall, ToolRegistry};

const APOLOGY_REPLY: &str =
    "Sorry, something went wrong while handling that. Your conversation is intact; please try again.";
const PARSE_FAILURE_REPLY: &str =
    "Sorry, I could not produce a well-formed reply this time. Please try again.";
const DEPTH_LIMIT_NOTICE: &str =
    "Stopping here: the autonomous continuation limit for this run was reached.";
const CORRECTIVE_INSTRUCTION: &str = "Your previous reply was not the required JSON object. Answer \
again with exactly one JSON object of the form {\"text_response\": \"<message>\", \
\"can_continue\": <bool>} and nothing else.";

/// Structured payload the model must answer with.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AgentReply {
    pub text_response: String,
    #[serde(default)]
    pub can_continue: bool,
}

/// Parse the candidate payload. Tolerates markdown fences and prose around
/// the JSON object by scanning for the outermost braces.
pub fn parse_reply(raw: &str) -> Option<AgentReply> {
    let trimmed = raw.trim();
    if let Ok(reply) = serde_json::from_str::<AgentReply>(trimmed) {
        return Some(reply);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

enum TurnOutcome {
    Reply(AgentReply),
    /// Corrective retry also failed; the turn is surfaced as a parse failure.
    ParseFailure,
}

pub struct AgentLoop {
    backend: Arc<dyn CompletionBackend>,
    tools: Arc<ToolRegistry>,
    workspace: PathBuf,
    max_continuations: u32,
    inbound_rx: mpsc::Receiver<InboundMessage>,
    outbound_tx: broadcast::Sender<OutboundMessage>,
    sessions: HashMap<String, ConversationContext>,
    session_store: SessionStore,
}

impl AgentLoop {
    pub async fn new(
        backend: Arc<dyn CompletionBackend>,
        workspace: &Path,
        tools: Arc<ToolRegistry>,
        max_continuations: u32,
        inbound_rx: mpsc::Receiver<InboundMessage>,
        outbound_tx: broadcast::Sender<OutboundMessage>,
    ) -> Self {
        let session_store = SessionStore::new(&crate::config::sessions_dir(workspace));
        let sessions = match session_store.load_all().await {
            Ok(s) => {
                if !s.is_empty() {
                    info!(count = s.len(), "Restored persisted sessions");
                }
                s
            }
            Err(e) => {
                warn!(error = %e, "Failed to load persisted sessions, starting fresh");
                HashMap::new()
            }
        };
        Self {
            backend,
            tools,
            workspace: workspace.to_path_buf(),
            max_continuations,
            inbound_rx,
            outbound_tx,
            sessions,
            session_store,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        info!("Agent loop started");
        while let Some(msg) = self.inbound_rx.recv().await {
            if let Err(e) = self.handle_message(msg).await {
                error!("Error handling message: {e:#}");
            }
        }
        Ok(())
    }

    /// Process one inbound message to a terminal reply, then hand the
    /// mutated context back to the session map for the next turn.
    pub async fn handle_message(&mut self, msg: InboundMessage) -> Result<()> {
        let span = tracing::info_span!(
            "handle_message",
            channel = %msg.channel,
            chat = %msg.chat_id,
        );
        async {
            let session_key = msg.session_key();

            if msg.content.trim().eq_ignore_ascii_case("/reset") {
                self.sessions.remove(&session_key);
                if let Err(e) = self.session_store.reset(&session_key).await {
                    warn!(session_key = %session_key, error = %e, "Failed to delete session file");
                }
                self.emit(&msg, "Session reset.");
                return Ok(());
            }

            // Missing content rules are a configuration error: report and
            // abort this session, never the process.
            let system_prompt = match PromptBuilder::new(&self.workspace).build_system_prompt() {
                Ok(p) => p,
                Err(e) => {
                    error!(error = %e, "Cannot assemble system prompt");
                    self.emit(&msg, &format!("postpilot is not configured: {e:#}"));
                    return Ok(());
                }
            };

            let mut context = self.sessions.remove(&session_key).unwrap_or_default();
            context.continuation_depth = 0;
            context.messages.push(Message::user(&msg.content));

            let start = std::time::Instant::now();
            let continuations = drive_turn(
                self.backend.as_ref(),
                &self.tools,
                &system_prompt,
                &mut context,
                self.max_continuations,
                &msg.channel,
                &msg.chat_id,
                &self.outbound_tx,
            )
            .await;
            info!(
                session_key = %session_key,
                continuations,
                duration_ms = start.elapsed().as_millis() as u64,
                "Turn complete"
            );

            if let Err(e) = self.session_store.save(&session_key, &context).await {
                warn!(session_key = %session_key, error = %e, "Failed to persist session");
            }
            self.sessions.insert(session_key, context);
            Ok(())
        }
        .instrument(span)
        .await
    }

    fn emit(&self, msg: &InboundMessage, text: &str) {
        let _ = self.outbound_tx.send(OutboundMessage::chat(
            msg.channel.clone(),
            msg.chat_id.clone(),
            text.to_string(),
            vec![],
        ));
    }
}

// ---------------------------------------------------------------------------
// Standalone turn driver
// ---------------------------------------------------------------------------

/// Drive one turn to its terminal reply, including bounded autonomous
/// continuations. Returns the number of continuations taken.
///
/// Failure semantics: a model-call error aborts the turn with an apology;
/// the context accumulated so far stays intact so the next message resumes
/// with history. Tool failures never reach this level — dispatch turns them
/// into error-shaped results the model reacts to.
#[allow(clippy::too_many_arguments)]
pub async fn drive_turn(
    backend: &dyn CompletionBackend,
    tools: &ToolRegistry,
    system_prompt: &str,
    context: &mut ConversationContext,
    max_continuations: u32,
    channel: &str,
    chat_id: &str,
    outbound_tx: &broadcast::Sender<OutboundMessage>,
) -> u32 {
    let tool_defs = tools.definitions();
    let emit = |text: String| {
        let _ = outbound_tx.send(OutboundMessage::chat(
            channel.to_string(),
            chat_id.to_string(),
            text,
            vec![],
        ));
    };

    loop {
        let outcome = complete_once(
            backend,
            tools,
            &tool_defs,
            system_prompt,
            context,
            channel,
            chat_id,
            outbound_tx,
        )
        .await;

        match outcome {
            Err(e) => {
                error!(error = %e, "Model call failed, aborting turn");
                emit(APOLOGY_REPLY.to_string());
                break;
            }
            Ok(TurnOutcome::ParseFailure) => {
                warn!("Structured reply still unparseable after corrective retry");
                emit(PARSE_FAILURE_REPLY.to_string());
                break;
            }
            Ok(TurnOutcome::Reply(reply)) => {
                if !reply.text_response.is_empty() {
                    emit(reply.text_response);
                }
                if !reply.can_continue {
                    break;
                }
                if context.continuation_depth >= max_continuations {
                    warn!(
                        max_continuations,
                        "Continuation limit reached, terminating turn"
                    );
                    emit(DEPTH_LIMIT_NOTICE.to_string());
                    break;
                }
                // Continue with empty input: no new user message is pushed.
                context.continuation_depth += 1;
            }
        }
    }
    context.continuation_depth
}

async fn model_call(
    backend: &dyn CompletionBackend,
    system_prompt: &str,
    history: &[Message],
    tool_defs: &[ToolDefinition],
) -> Result<OneOrMany<AssistantContent>, CompletionError> {
    let request = CompletionRequest {
        preamble: Some(system_prompt.to_string()),
        chat_history: history.to_vec(),
        prompt: Message::user(""),
        tools: tool_defs.to_vec(),
        documents: vec![],
        temperature: None,
        max_tokens: None,
        additional_params: None,
    };
    backend.completion(request).await
}

/// One pass of the state machine: model call, optional tool round plus
/// second model call, then structured-reply parsing with exactly one
/// corrective retry.
#[allow(clippy::too_many_arguments)]
async fn complete_once(
    backend: &dyn CompletionBackend,
    tools: &ToolRegistry,
    tool_defs: &[ToolDefinition],
    system_prompt: &str,
    context: &mut ConversationContext,
    channel: &str,
    chat_id: &str,
    outbound_tx: &broadcast::Sender<OutboundMessage>,
) -> Result<TurnOutcome, CompletionError> {
    let response = model_call(backend, system_prompt, &context.messages, tool_defs).await?;

    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();
    let mut assistant_contents = Vec::new();
    for content in response.iter() {
        match content {
            AssistantContent::Text(t) => {
                text_parts.push(t.text.clone());
                assistant_contents.push(content.clone());
            }
            AssistantContent::ToolCall(tc) => {
                tool_calls.push(ToolCall {
                    id: tc.id.clone(),
                    name: tc.function.name.clone(),
                    arguments: tc.function.arguments.clone(),
                });
                assistant_contents.push(content.clone());
            }
        }
    }
    if !assistant_contents.is_empty() {
        let content = match assistant_contents.len() {
            1 => OneOrMany::one(assistant_contents.into_iter().next().unwrap()),
            _ => OneOrMany::many(assistant_contents).expect("non-empty"),
        };
        context.messages.push(Message::Assistant { content });
    }

    let mut candidate = text_parts.join("");

    if !tool_calls.is_empty() {
        // Dispatch strictly in the order the model requested: a later call
        // may depend on an earlier one's side effect (generate an image,
        // then attach it to a draft).
        for call in &tool_calls {
            let result = tools.dispatch(call).await;
            let status = if result.is_error() { "failure" } else { "success" };
            let _ = outbound_tx.send(OutboundMessage::tool_progress(
                channel.to_string(),
                chat_id.to_string(),
                call.name.clone(),
                status.to_string(),
                preview(&result.content, 200),
            ));
            context.messages.push(Message::User {
                content: OneOrMany::one(UserContent::tool_result(
                    result.tool_call_id,
                    OneOrMany::one(ToolResultContent::text(result.content)),
                )),
            });
        }

        // Second pass over the enriched context yields the candidate payload.
        let response = model_call(backend, system_prompt, &context.messages, tool_defs).await?;
        let second_text: Vec<String> = response
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text(t) => Some(t.text.clone()),
                AssistantContent::ToolCall(_) => None,
            })
            .collect();
        candidate = second_text.join("");
        if !candidate.is_empty() {
            context.messages.push(Message::assistant(&candidate));
        }
    }

    if let Some(reply) = parse_reply(&candidate) {
        return Ok(TurnOutcome::Reply(reply));
    }

    // Exactly one corrective retry before giving up.
    context.messages.push(Message::user(CORRECTIVE_INSTRUCTION));
    let response = model_call(backend, system_prompt, &context.messages, tool_defs).await?;
    let retry_text: Vec<String> = response
        .iter()
        .filter_map(|c| match c {
            AssistantContent::Text(t) => Some(t.text.clone()),
            AssistantContent::ToolCall(_) => None,
        })
        .collect();
    let candidate = retry_text.join("");
    if !candidate.is_empty() {
        context.messages.push(Message::assistant(&candidate));
    }
    match parse_reply(&candidate) {
        Some(reply) => Ok(TurnOutcome::Reply(reply)),
        None => Ok(TurnOutcome::ParseFailure),
    }
}

fn preview(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
