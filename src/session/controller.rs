//! Session controller: the per-conversation turn loop
//!
//! Drives one conversation through its states: Idle -> Sending ->
//! {Streaming | AwaitingResponse} -> (ExecutingTools -> Sending)* -> Idle.
//! Only one turn may be active at a time; starting a turn, loading, or
//! regenerating while one is in flight fails with `TurnInProgress` and the
//! caller must cancel first. Terminal failures (other than cancellation)
//! are converted here, and only here, into a persisted error-role message.

use crate::client::{ApiClient, ApiRequest, ApiResponse, Content, Part};
use crate::config::EngineConfig;
use crate::error::{is_cancellation, EngineError, Result};
use crate::session::branch::{BranchManager, Direction};
use crate::session::conversation::{Attachment, Conversation, Message, ModelMessage};
use crate::session::retry::{ErrorClass, RetryPolicy};
use crate::session::stream::{StreamAssembler, StreamObserver};
use crate::storage::ConversationStore;
use crate::tools::{ToolCallDispatcher, ToolRegistry};
use anyhow::bail;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Turn-loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No turn in flight
    Idle,
    /// Building and issuing the API call
    Sending,
    /// Consuming a streamed response
    Streaming,
    /// Waiting on a single-shot response
    AwaitingResponse,
    /// Running a tool-call batch
    ExecutingTools,
}

/// Orchestrates turns for one active conversation
///
/// Holds the working copy of the conversation; the store owns the durable
/// record and every mutation here is written back through a full-record
/// replace. The controller is the only writer for its conversation id.
pub struct SessionController {
    client: Arc<dyn ApiClient>,
    store: ConversationStore,
    dispatcher: ToolCallDispatcher,
    config: EngineConfig,
    retry: RetryPolicy,
    conversation: Conversation,
    branches: BranchManager,
    state: SessionState,
    cancel: CancellationToken,
}

impl SessionController {
    /// Creates a controller over an empty, unsaved conversation
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Config` if the configuration is invalid.
    pub fn new(
        client: Arc<dyn ApiClient>,
        store: ConversationStore,
        tools: Arc<ToolRegistry>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let retry = RetryPolicy::from_config(&config);
        let conversation = Conversation::new();
        let branches = BranchManager::build(&conversation.messages);

        Ok(Self {
            client,
            store,
            dispatcher: ToolCallDispatcher::new(tools),
            config,
            retry,
            conversation,
            branches,
            state: SessionState::Idle,
            cancel: CancellationToken::new(),
        })
    }

    /// Current turn-loop state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The working copy of the active conversation
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Fires the cancellation signal for the active turn
    ///
    /// Safe to call when idle; the next turn gets a fresh token.
    pub fn cancel(&self) {
        info!("cancellation requested");
        self.cancel.cancel();
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(EngineError::TurnInProgress.into());
        }
        Ok(())
    }

    /// Swaps in an empty, unsaved conversation
    pub fn new_conversation(&mut self) -> Result<()> {
        self.ensure_idle()?;
        self.conversation = Conversation::new();
        self.branches = BranchManager::build(&self.conversation.messages);
        Ok(())
    }

    /// Loads a stored conversation as the working copy
    ///
    /// Runs cascade normalization; if the repair changed anything, the
    /// repaired record is written back immediately.
    pub fn load(&mut self, id: &str) -> Result<()> {
        self.ensure_idle()?;

        let Some(mut conversation) = self.store.get(id)? else {
            return Err(EngineError::Storage(format!("conversation not found: {id}")).into());
        };

        let repaired = BranchManager::normalize_conversation(&mut conversation);
        if repaired {
            debug!(id, "cascade selection repaired on load");
            self.store.put(&mut conversation)?;
        }

        self.branches = BranchManager::build(&conversation.messages);
        self.conversation = conversation;
        Ok(())
    }

    /// Appends a user message and runs the turn loop to completion
    ///
    /// On a terminal failure the error is recorded as an error-role message,
    /// persisted, and also returned. Cancellation returns
    /// `EngineError::Cancelled` without appending anything; partial content
    /// already persisted stays in place.
    pub async fn send_message(
        &mut self,
        text: impl Into<String>,
        attachments: Vec<Attachment>,
        observer: &mut dyn StreamObserver,
    ) -> Result<()> {
        self.ensure_idle()?;
        Attachment::validate_batch(&attachments, &self.config)?;

        self.conversation
            .messages
            .push(Message::user(text, attachments));
        self.persist()?;

        self.cancel = CancellationToken::new();
        let result = self.run_turn(observer).await;
        self.state = SessionState::Idle;
        self.record_outcome(result)
    }

    /// Generates an alternative completion for an existing model message
    ///
    /// The request is built from the history up to that message's user turn.
    /// The new completion joins (or creates) the turn's cascade group and
    /// becomes selected. Tool calls requested by a regenerated completion
    /// are attached but not executed.
    pub async fn regenerate(
        &mut self,
        message_index: usize,
        observer: &mut dyn StreamObserver,
    ) -> Result<()> {
        self.ensure_idle()?;

        if self
            .conversation
            .messages
            .get(message_index)
            .and_then(Message::as_model)
            .is_none()
        {
            bail!("message at index {message_index} is not a model message");
        }
        let Some(anchor) = self.conversation.anchor_user_index(message_index) else {
            bail!("no user turn precedes message index {message_index}");
        };

        self.cancel = CancellationToken::new();
        let cancel = self.cancel.clone();
        let request = self.build_request(anchor + 1);
        self.state = SessionState::Sending;
        let result = self.complete_with_retry(request, observer, &cancel).await;
        self.state = SessionState::Idle;

        match result {
            Ok(model) => {
                self.branches
                    .add_alternative(&mut self.conversation, message_index, model)?;
                self.persist()?;
                Ok(())
            }
            Err(err) => self.record_outcome(Err(err)),
        }
    }

    /// Moves cascade selection within a group and persists the change
    pub fn select_sibling(&mut self, group_id: &str, direction: Direction) -> Result<bool> {
        self.ensure_idle()?;
        let moved = self
            .branches
            .select(&mut self.conversation, group_id, direction);
        if moved {
            self.persist()?;
        }
        Ok(moved)
    }

    /// Removes one cascade group member and persists the change
    pub fn remove_sibling(&mut self, message_index: usize) -> Result<()> {
        self.ensure_idle()?;
        self.branches
            .remove_sibling(&mut self.conversation, message_index)?;
        self.persist()?;
        Ok(())
    }

    /// Splices a whole turn: the user message at `message_index` and every
    /// following message up to (not including) the next user message.
    pub fn delete_turn(&mut self, message_index: usize) -> Result<()> {
        self.ensure_idle()?;

        if !matches!(
            self.conversation.messages.get(message_index),
            Some(Message::User(_))
        ) {
            bail!("message at index {message_index} is not a user message");
        }

        let end = self
            .conversation
            .messages
            .iter()
            .enumerate()
            .skip(message_index + 1)
            .find(|(_, m)| matches!(m, Message::User(_)))
            .map(|(i, _)| i)
            .unwrap_or(self.conversation.messages.len());

        self.conversation.messages.drain(message_index..end);
        self.branches = BranchManager::build(&self.conversation.messages);
        self.persist()?;
        Ok(())
    }

    /// Converts the turn outcome: terminal failures become a persisted
    /// error-role message; cancellation is passed through untouched.
    fn record_outcome(&mut self, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(err) if is_cancellation(&err) => {
                info!("turn cancelled by caller");
                Err(err)
            }
            Err(err) => {
                warn!(error = %err, "turn failed");
                self.conversation.messages.push(Message::error(format!(
                    "Request failed: {err}"
                )));
                self.persist()?;
                Err(err)
            }
        }
    }

    async fn run_turn(&mut self, observer: &mut dyn StreamObserver) -> Result<()> {
        let cancel = self.cancel.clone();
        let limit = self.config.max_tool_iterations;

        for iteration in 0..limit {
            debug!(iteration, limit, "turn loop iteration");
            self.state = SessionState::Sending;

            let request = self.build_request(self.conversation.messages.len());
            let model = self.complete_with_retry(request, observer, &cancel).await?;

            if model.has_tool_calls() {
                let calls = model.tool_calls.clone().unwrap_or_default();
                self.conversation.messages.push(Message::Model(model));
                self.persist()?;

                self.state = SessionState::ExecutingTools;
                let results = self.dispatcher.dispatch(&calls).await;
                self.conversation.messages.extend(results);
                self.persist()?;
                continue;
            }

            self.conversation.messages.push(Message::Model(model));
            self.persist()?;
            info!(iterations = iteration + 1, "turn complete");
            return Ok(());
        }

        Err(EngineError::LoopLimitExceeded { limit }.into())
    }

    /// Issues the API call under the retry policy
    ///
    /// `retry_count` on the returned message is the number of failed
    /// attempts consumed before success.
    async fn complete_with_retry(
        &mut self,
        request: ApiRequest,
        observer: &mut dyn StreamObserver,
        cancel: &CancellationToken,
    ) -> Result<ModelMessage> {
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled.into());
            }

            match self.attempt_once(request.clone(), observer, cancel).await {
                Ok(mut model) => {
                    model.retry_count = attempt;
                    return Ok(model);
                }
                Err(err) => {
                    if is_cancellation(&err) {
                        return Err(err);
                    }
                    match RetryPolicy::classify(&err) {
                        ErrorClass::Terminal => return Err(err),
                        ErrorClass::Retryable => {
                            attempt += 1;
                            if attempt > self.retry.max_retries() {
                                warn!(attempts = attempt, "retry budget exhausted");
                                return Err(err);
                            }
                            debug!(attempt, error = %err, "retryable failure");
                            self.retry.wait_before_retry(attempt, cancel).await?;
                        }
                    }
                }
            }
        }
    }

    async fn attempt_once(
        &mut self,
        request: ApiRequest,
        observer: &mut dyn StreamObserver,
        cancel: &CancellationToken,
    ) -> Result<ModelMessage> {
        if self.config.streaming {
            self.state = SessionState::Streaming;
            let stream = tokio::select! {
                _ = cancel.cancelled() => return Err(EngineError::Cancelled.into()),
                stream = self.client.generate_stream(request) => stream?,
            };

            let assembled = StreamAssembler::new()
                .assemble(stream, observer, cancel)
                .await?;

            let mut model = ModelMessage::new(assembled.content);
            model.thought_summary = assembled.thought_summary;
            if !assembled.tool_calls.is_empty() {
                model.tool_calls = Some(assembled.tool_calls);
            }
            model.metadata = assembled.metadata;
            Ok(model)
        } else {
            self.state = SessionState::AwaitingResponse;
            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(EngineError::Cancelled.into()),
                response = self.client.generate(request) => response?,
            };
            parse_single_response(response)
        }
    }

    /// Serializes the first `history_len` messages into the request payload
    ///
    /// Unselected cascade alternatives and messages producing no parts are
    /// dropped. Generation parameters are attached only when at least one
    /// is explicitly set.
    fn build_request(&self, history_len: usize) -> ApiRequest {
        let mut contents = Vec::new();

        for message in &self.conversation.messages[..history_len] {
            let content = match message {
                Message::User(user) => {
                    let mut parts = Vec::new();
                    if !user.content.is_empty() {
                        parts.push(Part::Text {
                            text: user.content.clone(),
                        });
                    }
                    for attachment in &user.attachments {
                        parts.push(Part::InlineData {
                            mime_type: attachment.mime_type.clone(),
                            data: attachment.data.clone(),
                        });
                    }
                    Content {
                        role: "user".to_string(),
                        parts,
                    }
                }
                Message::Model(model) => {
                    // Only the selected alternative continues the thread
                    if model.is_cascaded && !model.is_selected {
                        continue;
                    }
                    let mut parts = Vec::new();
                    if !model.content.is_empty() {
                        parts.push(Part::Text {
                            text: model.content.clone(),
                        });
                    }
                    for call in model.tool_calls.iter().flatten() {
                        parts.push(Part::FunctionCall {
                            name: call.name.clone(),
                            args: call.args.clone(),
                        });
                    }
                    Content {
                        role: "model".to_string(),
                        parts,
                    }
                }
                Message::Tool(tool) => Content {
                    role: "tool".to_string(),
                    parts: vec![Part::FunctionResponse {
                        name: tool.name.clone(),
                        response: tool.response.clone(),
                    }],
                },
                // Error records never feed back into the model
                Message::Error(_) => continue,
            };

            if !content.parts.is_empty() {
                contents.push(content);
            }
        }

        ApiRequest {
            contents,
            generation: if self.config.generation.is_empty() {
                None
            } else {
                Some(self.config.generation.clone())
            },
            system_instruction: if self.conversation.system_prompt.is_empty() {
                None
            } else {
                Some(self.conversation.system_prompt.clone())
            },
            tools: self.dispatcher.registry().declarations(),
        }
    }

    /// Full-record write-back of the working copy
    ///
    /// `put` adopts a fresh id when the stored row vanished externally, so
    /// the working copy always tracks the id actually written.
    fn persist(&mut self) -> Result<()> {
        self.store.put(&mut self.conversation)?;
        Ok(())
    }
}

/// Extracts a model message from a single-shot response
///
/// A response with no candidate is a terminal failure carrying the block
/// reason when one was reported.
fn parse_single_response(response: ApiResponse) -> Result<ModelMessage> {
    let Some(candidate) = response.candidates.first() else {
        let reason = response
            .block_reason
            .unwrap_or_else(|| "response contained no candidates".to_string());
        return Err(EngineError::BlockedContent(reason).into());
    };

    let mut model = ModelMessage::new(candidate.text());
    model.thought_summary = candidate.thought();
    let calls = candidate.tool_calls();
    if !calls.is_empty() {
        model.tool_calls = Some(calls);
    }
    model.metadata = candidate.metadata.clone();
    Ok(model)
}
