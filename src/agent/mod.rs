//! Conversation orchestrator - drives one turn at a time per session
//!
//! RECOVER → AWAITING MODEL → MODEL RESPONDED → DISPATCHING TOOLS? → ... → DONE
//!
//! Every stable point (assistant reply, batch of tool results) is committed
//! to the checkpoint store before the turn moves on.

use crate::checkpoint::CheckpointStore;
use crate::config::TurnConfig;
use crate::dispatch::ToolDispatcher;
use crate::error::OrchestrationError;
use crate::llm::{ChatModel, ModelEvent, ModelResponse, ToolDefinition};
use crate::models::{ConversationState, Message, ToolCallRequest};
use crate::stream::{FragmentEmitter, TurnReport, TurnStream};
use crate::tools::ToolRegistry;
use crate::Result;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Position of a turn in the model/tool loop.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnPhase {
    AwaitingModel,
    ModelResponded(ModelResponse),
    DispatchingTools(Vec<ToolCallRequest>),
    Done,
}

/// Working state of a single turn.
struct TurnContext {
    session_id: String,
    version: u64,
    state: ConversationState,
    /// Messages this turn has appended, in order. Replayed on conflict.
    appended: Vec<Message>,
    seen_call_ids: HashSet<String>,
    report: TurnReport,
}

impl TurnContext {
    fn new(session_id: &str, version: u64, state: ConversationState) -> Self {
        let seen_call_ids = call_ids(&state).collect();

        Self {
            session_id: session_id.to_string(),
            version,
            state,
            appended: Vec::new(),
            seen_call_ids,
            report: TurnReport {
                session_id: session_id.to_string(),
                version,
                ..TurnReport::default()
            },
        }
    }

    fn append(&mut self, message: Message) {
        self.state.push(message.clone());
        self.appended.push(message);
    }
}

fn call_ids(state: &ConversationState) -> impl Iterator<Item = String> + '_ {
    state
        .messages()
        .iter()
        .flat_map(|m| m.tool_calls.iter().map(|c| c.call_id.clone()))
}

/// Time left for the model within one invocation.
struct ModelBudget {
    limit: Duration,
    remaining: Duration,
}

impl ModelBudget {
    fn new(limit: Duration) -> Self {
        Self {
            limit,
            remaining: limit,
        }
    }

    /// Await a model-side future, charging its wait to the budget.
    async fn run<F: Future>(&mut self, future: F) -> Result<F::Output> {
        let started = tokio::time::Instant::now();
        let output = tokio::time::timeout(self.remaining, future)
            .await
            .map_err(|_| OrchestrationError::ModelTimeout(self.limit.as_secs()))?;
        self.remaining = self.remaining.saturating_sub(started.elapsed());
        Ok(output)
    }
}

/// Main orchestrator shared by every session
pub struct Orchestrator {
    model: Arc<dyn ChatModel>,
    registry: Arc<ToolRegistry>,
    dispatcher: ToolDispatcher,
    checkpoints: Arc<dyn CheckpointStore>,
    config: TurnConfig,
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(
        model: Arc<dyn ChatModel>,
        registry: Arc<ToolRegistry>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: TurnConfig,
    ) -> Self {
        Self {
            model,
            dispatcher: ToolDispatcher::new(registry.clone()),
            registry,
            checkpoints,
            config,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Start a turn and return its fragment stream.
    ///
    /// The turn runs on its own task; dropping the stream stops delivery
    /// but not the work.
    pub fn submit_turn(self: &Arc<Self>, session_id: &str, user_text: &str) -> TurnStream {
        let (emitter, rx) = FragmentEmitter::channel(self.config.fragment_buffer);
        let this = Arc::clone(self);
        let session_id = session_id.to_string();
        let user_text = user_text.to_string();

        let handle = tokio::spawn(async move { this.run_turn(session_id, user_text, emitter).await });

        TurnStream::new(rx, handle)
    }

    async fn run_turn(
        &self,
        session_id: String,
        user_text: String,
        mut emitter: FragmentEmitter,
    ) -> TurnReport {
        let lock = self.session_lock(&session_id).await;
        let guard = lock.lock().await;
        let started = Instant::now();

        info!(session_id = %session_id, "Turn started");

        let mut report = match self.execute(&session_id, &user_text, &mut emitter).await {
            Ok(report) => report,
            Err((e, mut report)) => {
                error!(session_id = %session_id, error = %e, "Turn failed");
                emitter.emit(&format!("Error during streaming: {}", e)).await;
                report.error = Some(e.to_string());
                report
            }
        };
        report.session_id = session_id.clone();
        report.fragments = emitter.emitted();

        if emitter.is_closed() {
            info!(session_id = %session_id, "Caller went away before the turn finished");
        }

        info!(
            session_id = %session_id,
            round_trips = report.round_trips,
            fragments = report.fragments,
            tool_calls = report.tool_calls,
            checkpoint_writes = report.checkpoint_writes,
            version = report.version,
            completed = report.completed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Turn finished"
        );

        drop(guard);
        drop(lock);
        self.release_session_lock(&session_id).await;

        report
    }

    /// Runs the turn. On failure the partial report travels with the error.
    async fn execute(
        &self,
        session_id: &str,
        user_text: &str,
        emitter: &mut FragmentEmitter,
    ) -> std::result::Result<TurnReport, (OrchestrationError, TurnReport)> {
        let checkpoint = match self
            .checkpoints
            .load(session_id, &self.config.namespace)
            .await
        {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                let report = TurnReport {
                    session_id: session_id.to_string(),
                    ..TurnReport::default()
                };
                return Err((e, report));
            }
        };

        let mut turn = TurnContext::new(session_id, checkpoint.version, checkpoint.state);

        match self.drive(&mut turn, user_text, emitter).await {
            Ok(()) => {
                turn.report.completed = true;
                Ok(turn.report)
            }
            Err(e) => Err((e, turn.report)),
        }
    }

    async fn drive(
        &self,
        turn: &mut TurnContext,
        user_text: &str,
        emitter: &mut FragmentEmitter,
    ) -> Result<()> {
        self.recover_pending_calls(turn).await?;

        turn.append(Message::user(user_text));

        let mut phase = TurnPhase::AwaitingModel;
        loop {
            phase = match phase {
                TurnPhase::AwaitingModel => {
                    if turn.report.round_trips >= self.config.max_round_trips {
                        return Err(OrchestrationError::MaxRoundTripsExceeded(
                            self.config.max_round_trips,
                        ));
                    }
                    let response = self.invoke_model(turn, emitter).await?;
                    TurnPhase::ModelResponded(response)
                }
                TurnPhase::ModelResponded(response) => {
                    let calls = response.tool_calls.clone();
                    turn.append(Message::assistant(response.content, response.tool_calls));
                    self.commit(turn).await?;

                    if calls.is_empty() {
                        TurnPhase::Done
                    } else {
                        TurnPhase::DispatchingTools(calls)
                    }
                }
                TurnPhase::DispatchingTools(calls) => {
                    self.dispatch_and_commit(turn, &calls).await?;
                    TurnPhase::AwaitingModel
                }
                TurnPhase::Done => return Ok(()),
            };
        }
    }

    /// Finish tool calls a previous turn requested but never answered.
    async fn recover_pending_calls(&self, turn: &mut TurnContext) -> Result<()> {
        let pending = turn.state.pending_tool_calls();
        if pending.is_empty() {
            return Ok(());
        }

        warn!(
            session_id = %turn.session_id,
            pending = pending.len(),
            "Resuming unanswered tool calls from previous turn"
        );
        self.dispatch_and_commit(turn, &pending).await
    }

    async fn dispatch_and_commit(
        &self,
        turn: &mut TurnContext,
        calls: &[ToolCallRequest],
    ) -> Result<()> {
        debug!(session_id = %turn.session_id, count = calls.len(), "Dispatching tools");

        let results = self.dispatcher.dispatch(&turn.session_id, calls).await;
        turn.report.tool_calls += calls.len();

        for result in results {
            turn.append(Message::tool(result));
        }

        self.commit(turn).await
    }

    async fn invoke_model(
        &self,
        turn: &mut TurnContext,
        emitter: &mut FragmentEmitter,
    ) -> Result<ModelResponse> {
        turn.report.round_trips += 1;
        let round_trip = turn.report.round_trips;
        let tools = self.registry.definitions();

        debug!(
            session_id = %turn.session_id,
            round_trip,
            history = turn.state.len(),
            "Invoking model"
        );

        let mut response = self
            .stream_response(turn.state.messages(), &tools, emitter)
            .await?;

        response.normalize_call_ids(&mut turn.seen_call_ids);
        Ok(response)
    }

    /// Forward fragments as they arrive and return the final response.
    /// Only time spent waiting on the model counts against the deadline.
    async fn stream_response(
        &self,
        history: &[Message],
        tools: &[ToolDefinition],
        emitter: &mut FragmentEmitter,
    ) -> Result<ModelResponse> {
        let mut budget = ModelBudget::new(self.config.model_timeout);

        let mut stream = budget
            .run(self.model.stream(&self.config.system_prompt, history, tools))
            .await??;

        while let Some(event) = budget.run(stream.next()).await? {
            match event? {
                ModelEvent::Fragment(fragment) => emitter.emit(&fragment).await,
                ModelEvent::Completed(response) => return Ok(response),
            }
        }

        Err(OrchestrationError::ModelError(
            "model stream ended without a response".to_string(),
        ))
    }

    /// Persist the turn's state. A version conflict is resolved by replaying
    /// this turn's messages on the latest checkpoint and retrying once.
    async fn commit(&self, turn: &mut TurnContext) -> Result<()> {
        let saved = self
            .checkpoints
            .save(
                &turn.session_id,
                &self.config.namespace,
                &turn.state,
                turn.version,
            )
            .await;

        match saved {
            Ok(version) => {
                self.committed(turn, version);
                Ok(())
            }
            Err(e) if e.is_version_conflict() => {
                warn!(session_id = %turn.session_id, error = %e, "Checkpoint conflict, rebasing turn");
                self.rebase_and_retry(turn).await
            }
            Err(e) => Err(e),
        }
    }

    async fn rebase_and_retry(&self, turn: &mut TurnContext) -> Result<()> {
        let latest = self
            .checkpoints
            .load(&turn.session_id, &self.config.namespace)
            .await?;

        let Some(rebased) = latest.state.rebase_turn(&turn.appended) else {
            return Err(OrchestrationError::CheckpointConflict(format!(
                "session {} was modified by another writer during the turn",
                turn.session_id
            )));
        };

        match self
            .checkpoints
            .save(
                &turn.session_id,
                &self.config.namespace,
                &rebased,
                latest.version,
            )
            .await
        {
            Ok(version) => {
                // Ids introduced by the other writer are taken too.
                turn.seen_call_ids.extend(call_ids(&rebased));
                turn.state = rebased;
                self.committed(turn, version);
                Ok(())
            }
            Err(e) if e.is_version_conflict() => {
                Err(OrchestrationError::CheckpointConflict(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    fn committed(&self, turn: &mut TurnContext, version: u64) {
        turn.version = version;
        turn.report.version = version;
        turn.report.checkpoint_writes += 1;
        debug!(session_id = %turn.session_id, version, messages = turn.state.len(), "Turn state committed");
    }

    async fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.lock().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the session's lock entry once no turn holds or awaits it.
    async fn release_session_lock(&self, session_id: &str) {
        let mut locks = self.session_locks.lock().await;
        if locks
            .get(session_id)
            .map_or(false, |lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(session_id);
        }
    }
}
