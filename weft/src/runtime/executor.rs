//! Session executor: one cooperative task per playbook run.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use timeline_event::WireEvent;

use crate::context::ExecutionContext;
use crate::domain::{
    CostLedger, DangerLevel, ExecutionSession, PauseReason, ResolvedPlaybook, SessionStatus,
    StepError, StepRecord, StepSpec, StepSpecKind, StepState, ToolCallRecord,
};
use crate::error::{CoreError, StoreError};
use crate::events::append_best_effort;
use crate::llm::extract_json;
use crate::playbook::PlaybookLoader;
use crate::ports::{
    ArtifactStorePort, ChatMessage, EventLogPort, LlmClient, NewEvent, PlaybookExecutorPort,
    ToolDecl,
};
use crate::router::{CapabilityProfile, CapabilityRouter};
use crate::store::StoreSet;
use crate::tools::{idempotency_key, ToolDispatcher};

use super::cost::check_budget;
use super::ir::{ir_context, lookup_path, render_template};

/// Nested sub-playbook depth guard.
const MAX_SUB_DEPTH: usize = 4;

/// Runtime-wide defaults; playbooks override per step.
#[derive(Clone, Debug)]
pub struct RuntimeDefaults {
    pub step_timeout: Duration,
    pub session_wall_clock: Duration,
    pub max_parallel: usize,
    pub retry_base_delay: Duration,
}

impl Default for RuntimeDefaults {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(120),
            session_wall_clock: Duration::from_secs(30 * 60),
            max_parallel: 4,
            retry_base_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Clone)]
struct SessionHandle {
    cancel: CancellationToken,
    pause: Arc<AtomicBool>,
    done: Arc<Notify>,
}

impl SessionHandle {
    fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            pause: Arc::new(AtomicBool::new(false)),
            done: Arc::new(Notify::new()),
        }
    }
}

enum DriveEnd {
    Completed,
    Paused,
}

struct StepFailure {
    record: StepRecord,
    error: CoreError,
}

struct StepSuccess {
    record: StepRecord,
}

/// Drives playbook sessions. Implements the executor port; the composition
/// root hands it every collaborator explicitly.
#[derive(Clone)]
pub struct ExecutorService {
    inner: Arc<Inner>,
}

struct Inner {
    stores: StoreSet,
    log: Arc<dyn EventLogPort>,
    llm: Arc<dyn LlmClient>,
    router: Arc<CapabilityRouter>,
    dispatcher: Arc<ToolDispatcher>,
    artifacts: Arc<dyn ArtifactStorePort>,
    loader: Arc<PlaybookLoader>,
    defaults: RuntimeDefaults,
    handles: DashMap<String, SessionHandle>,
}

impl ExecutorService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stores: StoreSet,
        log: Arc<dyn EventLogPort>,
        llm: Arc<dyn LlmClient>,
        router: Arc<CapabilityRouter>,
        dispatcher: Arc<ToolDispatcher>,
        artifacts: Arc<dyn ArtifactStorePort>,
        loader: Arc<PlaybookLoader>,
        defaults: RuntimeDefaults,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                stores,
                log,
                llm,
                router,
                dispatcher,
                artifacts,
                loader,
                defaults,
                handles: DashMap::new(),
            }),
        }
    }

    /// Resolves the playbook for a request from stored variants and connections.
    pub async fn resolve(
        &self,
        ctx: &ExecutionContext,
        code: &str,
        variant_id: Option<&str>,
    ) -> Result<ResolvedPlaybook, CoreError> {
        self.inner.resolve(ctx, code, variant_id).await
    }
}

impl Inner {
    async fn resolve(
        &self,
        ctx: &ExecutionContext,
        code: &str,
        variant_id: Option<&str>,
    ) -> Result<ResolvedPlaybook, CoreError> {
        let variants = match variant_id {
            Some(id) => self
                .stores
                .variants
                .get(id)
                .await?
                .into_iter()
                .collect::<Vec<_>>(),
            None => {
                self.stores
                    .variants
                    .list_visible(ctx.workspace_id(), ctx.actor_id())
                    .await?
            }
        };
        let connections = self.stores.connections.list(ctx.workspace_id()).await?;
        self.loader
            .load(code, ctx.locale(), &variants, &connections)
    }

    /// Persists a session write, retrying once under the workspace lock on an
    /// optimistic conflict. Terminal-state rejections propagate.
    async fn persist_session(&self, session: &mut ExecutionSession) -> Result<(), CoreError> {
        match self.stores.executions.update_session(session).await {
            Ok(stored) => {
                *session = stored;
                Ok(())
            }
            Err(StoreError::Conflict { .. }) => {
                let _guard = self.stores.locks.lock(&session.workspace_id).await;
                let current = self
                    .stores
                    .executions
                    .get_session(&session.execution_id)
                    .await?
                    .ok_or_else(|| StoreError::NotFound {
                        entity: "executions".into(),
                        id: session.execution_id.clone(),
                    })?;
                session.version = current.version;
                let stored = self.stores.executions.update_session(session).await?;
                *session = stored;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn set_status(
        &self,
        session: &mut ExecutionSession,
        to: SessionStatus,
    ) -> Result<(), CoreError> {
        let from = session.status;
        if from == to {
            return Ok(());
        }
        if !from.allows(to) {
            return Err(CoreError::PersistenceConflict {
                entity: "executions".into(),
                message: format!("illegal transition {} -> {}", from.as_str(), to.as_str()),
            });
        }
        session.status = to;
        if to.is_terminal() {
            session.completed_at = Some(Utc::now());
        }
        if to != SessionStatus::Paused {
            session.paused_reason = None;
        }
        self.persist_session(session).await?;
        append_best_effort(
            &self.log,
            NewEvent::session(
                &session.workspace_id,
                &session.execution_id,
                &WireEvent::SessionStatusChanged {
                    from: from.as_str().to_string(),
                    to: to.as_str().to_string(),
                },
            ),
        )
        .await;
        Ok(())
    }

    fn spec_timeout(&self, spec: &StepSpec) -> Duration {
        spec.timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.defaults.step_timeout)
    }

    /// Runs a session task to its end state and releases the handle.
    async fn drive_and_finalize(
        self: Arc<Self>,
        ctx: ExecutionContext,
        resolved: Arc<ResolvedPlaybook>,
        execution_id: String,
        handle: SessionHandle,
    ) {
        let result = self
            .drive_top(&ctx, &resolved, &execution_id, &handle)
            .await;
        if let Err(e) = result {
            warn!(execution_id = %execution_id, error = %e, "session task ended with error");
        }
        handle.done.notify_waiters();
        self.handles.remove(&execution_id);
    }

    async fn drive_top(
        &self,
        ctx: &ExecutionContext,
        resolved: &ResolvedPlaybook,
        execution_id: &str,
        handle: &SessionHandle,
    ) -> Result<(), CoreError> {
        let mut session = self
            .stores
            .executions
            .get_session(execution_id)
            .await?
            .ok_or_else(|| CoreError::PersistenceConflict {
                entity: "executions".into(),
                message: format!("session {execution_id} not found"),
            })?;
        let mut records = self.stores.executions.get_steps(execution_id).await?;
        let ledger = Arc::new(Mutex::new(session.cost.clone()));

        let outcome = self
            .drive(
                ctx,
                resolved,
                &mut session,
                &mut records,
                ledger.clone(),
                &handle.cancel,
                &handle.pause,
                0,
            )
            .await;

        session.cost = ledger.lock().await.clone();
        self.finalize(&mut session, outcome).await
    }

    async fn finalize(
        &self,
        session: &mut ExecutionSession,
        outcome: Result<DriveEnd, CoreError>,
    ) -> Result<(), CoreError> {
        let report = WireEvent::CostReport {
            total_usd: session.cost.total_usd,
            by_profile: serde_json::to_value(&session.cost.by_profile).unwrap_or(Value::Null),
        };
        match outcome {
            Ok(DriveEnd::Completed) => {
                self.set_status(session, SessionStatus::Completed).await?;
                info!(execution_id = %session.execution_id, "session completed");
            }
            Ok(DriveEnd::Paused) => {
                // Pause already persisted at the suspension point.
                return Ok(());
            }
            Err(CoreError::Cancelled) => {
                self.set_status(session, SessionStatus::Cancelled).await?;
                append_best_effort(
                    &self.log,
                    NewEvent::session(
                        &session.workspace_id,
                        &session.execution_id,
                        &WireEvent::Cancelled {},
                    ),
                )
                .await;
            }
            Err(e) => {
                append_best_effort(
                    &self.log,
                    NewEvent::session(
                        &session.workspace_id,
                        &session.execution_id,
                        &WireEvent::SessionError {
                            code: e.code().to_string(),
                            message: e.to_string(),
                            details: json!(e.details()),
                        },
                    ),
                )
                .await;
                self.set_status(session, SessionStatus::Failed).await?;
            }
        }
        append_best_effort(
            &self.log,
            NewEvent::session(&session.workspace_id, &session.execution_id, &report),
        )
        .await;
        Ok(())
    }

    /// The run loop. Boxed for sub-playbook recursion.
    #[allow(clippy::too_many_arguments)]
    fn drive<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        resolved: &'a ResolvedPlaybook,
        session: &'a mut ExecutionSession,
        records: &'a mut Vec<StepRecord>,
        ledger: Arc<Mutex<CostLedger>>,
        cancel: &'a CancellationToken,
        pause: &'a Arc<AtomicBool>,
        depth: usize,
    ) -> Pin<Box<dyn Future<Output = Result<DriveEnd, CoreError>> + Send + 'a>> {
        Box::pin(async move {
            let specs: HashMap<&str, &StepSpec> = resolved
                .steps
                .iter()
                .map(|s| (s.id.as_str(), s))
                .collect();
            let resumed = session.status == SessionStatus::Paused;
            if matches!(session.status, SessionStatus::Pending | SessionStatus::Paused) {
                self.set_status(session, SessionStatus::Running).await?;
                if resumed {
                    append_best_effort(
                        &self.log,
                        NewEvent::session(
                            &session.workspace_id,
                            &session.execution_id,
                            &WireEvent::SessionResumed {},
                        ),
                    )
                    .await;
                }
            }
            let deadline = session.started_at
                + chrono::Duration::from_std(self.defaults.session_wall_clock).unwrap_or_default();

            while session.current_step_index < records.len() {
                if cancel.is_cancelled() {
                    return Err(CoreError::Cancelled);
                }
                if pause.load(Ordering::SeqCst) {
                    session.paused_reason = Some(PauseReason::UserRequested);
                    self.set_status(session, SessionStatus::Paused).await?;
                    append_best_effort(
                        &self.log,
                        NewEvent::session(
                            &session.workspace_id,
                            &session.execution_id,
                            &WireEvent::SessionPaused {
                                reason: "user_requested".to_string(),
                            },
                        ),
                    )
                    .await;
                    return Ok(DriveEnd::Paused);
                }
                if Utc::now() > deadline {
                    return Err(CoreError::StepTimeout {
                        step_id: "session_wall_clock".to_string(),
                        timeout_ms: self.defaults.session_wall_clock.as_millis() as u64,
                    });
                }

                let idx = session.current_step_index;
                if matches!(records[idx].state, StepState::Succeeded | StepState::Skipped) {
                    session.current_step_index += 1;
                    self.persist_session(session).await?;
                    continue;
                }

                // Group: contiguous siblings sharing a parallel_group run
                // together; otherwise the single step at the index.
                let group_end = {
                    let spec = specs[records[idx].step_id.as_str()];
                    match &spec.parallel_group {
                        Some(group) => {
                            let mut end = idx + 1;
                            while end < records.len()
                                && specs[records[end].step_id.as_str()].parallel_group.as_ref()
                                    == Some(group)
                            {
                                end += 1;
                            }
                            end
                        }
                        None => idx + 1,
                    }
                };

                // A crash can leave records mid-flight; they re-run from
                // scratch on resume (their outputs were never recorded).
                for record in records[idx..group_end].iter_mut() {
                    if matches!(record.state, StepState::Running | StepState::WaitingTool) {
                        record.state = StepState::Pending;
                    }
                }

                // Approval gate: a high-danger write pauses before dispatch.
                for record in records[idx..group_end].iter() {
                    let spec = specs[record.step_id.as_str()];
                    if record.state == StepState::Pending {
                        if let Some(step_id) = self.approval_needed(ctx, session, spec).await? {
                            session.paused_reason =
                                Some(PauseReason::ApprovalRequired { step_id: step_id.clone() });
                            self.set_status(session, SessionStatus::Paused).await?;
                            append_best_effort(
                                &self.log,
                                NewEvent::session(
                                    &session.workspace_id,
                                    &session.execution_id,
                                    &WireEvent::SessionPaused {
                                        reason: format!("approval_required:{step_id}"),
                                    },
                                ),
                            )
                            .await;
                            return Ok(DriveEnd::Paused);
                        }
                    }
                }

                let has_tool_step = records[idx..group_end].iter().any(|r| {
                    matches!(specs[r.step_id.as_str()].kind, StepSpecKind::ToolCall { .. })
                });
                if has_tool_step {
                    self.set_status(session, SessionStatus::AwaitingTool).await?;
                }

                let ir = ir_context(&session.inputs, records);
                let session_snapshot = session.clone();
                let mut outcomes = Vec::new();
                // Bounded fan-out: at most max_parallel siblings in flight.
                let pending: Vec<StepRecord> = records[idx..group_end]
                    .iter()
                    .filter(|r| r.state == StepState::Pending)
                    .cloned()
                    .collect();
                for chunk in pending.chunks(self.defaults.max_parallel.max(1)) {
                    let futures: Vec<_> = chunk
                        .iter()
                        .map(|record| {
                            let spec = specs[record.step_id.as_str()];
                            self.execute_step(
                                ctx,
                                resolved,
                                &session_snapshot,
                                spec,
                                record.clone(),
                                ir.clone(),
                                ledger.clone(),
                                cancel,
                                pause,
                                depth,
                            )
                        })
                        .collect();
                    outcomes.extend(futures_util::future::join_all(futures).await);
                }

                if has_tool_step && !cancel.is_cancelled() {
                    self.set_status(session, SessionStatus::Running).await?;
                }

                // Fold outcomes back into the record set.
                let mut failure: Option<CoreError> = None;
                for outcome in outcomes {
                    let (record, error) = match outcome {
                        Ok(StepSuccess { record }) => (record, None),
                        Err(StepFailure { record, error }) => (record, Some(error)),
                    };
                    let spec = specs[record.step_id.as_str()];
                    let position = records
                        .iter()
                        .position(|r| r.step_id == record.step_id)
                        .unwrap_or(idx);
                    self.stores.executions.upsert_step(&record).await?;
                    append_best_effort(
                        &self.log,
                        NewEvent::session(
                            &session.workspace_id,
                            &session.execution_id,
                            &WireEvent::StepFinished {
                                step_id: record.step_id.clone(),
                                state: step_state_str(record.state).to_string(),
                                error_code: record.errors.last().map(|e| e.code.clone()),
                            },
                        ),
                    )
                    .await;
                    records[position] = record;

                    if let Some(error) = error {
                        if error.is_session_fatal() || !spec.continue_on_error {
                            failure.get_or_insert(error);
                        } else {
                            debug!(
                                step_id = %spec.id,
                                error = %error,
                                "step failed; continue_on_error"
                            );
                        }
                    }
                }

                {
                    let snapshot = ledger.lock().await.clone();
                    session.cost = snapshot;
                }
                if let Some(error) = failure {
                    self.persist_session(session).await?;
                    return Err(error);
                }

                // Decision steps prune the branch not taken.
                for record in records[idx..group_end].to_vec() {
                    if record.state == StepState::Succeeded {
                        if let Some(not_chosen) = record
                            .outputs_ir
                            .as_ref()
                            .and_then(|o| o.get("not_chosen"))
                            .and_then(|v| v.as_str())
                        {
                            mark_skipped(records, not_chosen);
                            for r in records.iter() {
                                if r.state == StepState::Skipped {
                                    self.stores.executions.upsert_step(r).await?;
                                }
                            }
                        }
                    }
                }

                session.current_step_index = group_end;
                self.persist_session(session).await?;
            }

            Ok(DriveEnd::Completed)
        })
    }

    /// High-danger write-classified tool steps need a recorded approval.
    async fn approval_needed(
        &self,
        ctx: &ExecutionContext,
        session: &ExecutionSession,
        spec: &StepSpec,
    ) -> Result<Option<String>, CoreError> {
        let StepSpecKind::ToolCall { tool_type, writes, .. } = &spec.kind else {
            return Ok(None);
        };
        if !*writes || session.approved_steps.contains(&spec.id) {
            return Ok(None);
        }
        let connection = self
            .stores
            .connections
            .find_by_tool_type(ctx.workspace_id(), tool_type)
            .await?;
        match connection {
            Some(c) if c.danger_level == DangerLevel::High => Ok(Some(spec.id.clone())),
            _ => Ok(None),
        }
    }

    /// Executes one step with retry, timeout, and cancellation. Returns the
    /// updated record either way.
    #[allow(clippy::too_many_arguments)]
    async fn execute_step(
        &self,
        ctx: &ExecutionContext,
        resolved: &ResolvedPlaybook,
        session: &ExecutionSession,
        spec: &StepSpec,
        mut record: StepRecord,
        ir: Value,
        ledger: Arc<Mutex<CostLedger>>,
        cancel: &CancellationToken,
        pause: &Arc<AtomicBool>,
        depth: usize,
    ) -> Result<StepSuccess, StepFailure> {
        record.state = StepState::Running;
        record.started_at = Some(Utc::now());
        record.inputs_ir = ir.clone();
        record.capability_profile = Some(self.profile_for(spec).as_str().to_string());
        if let Err(e) = self.stores.executions.upsert_step(&record).await {
            return Err(StepFailure {
                record,
                error: e.into(),
            });
        }
        append_best_effort(
            &self.log,
            NewEvent::session(
                &session.workspace_id,
                &session.execution_id,
                &WireEvent::StepStarted {
                    step_id: spec.id.clone(),
                    kind: spec.kind.name().to_string(),
                },
            ),
        )
        .await;

        let timeout = self.spec_timeout(spec);
        let mut attempt: u32 = 0;
        let result = loop {
            let run = self.run_step_kind(
                ctx,
                resolved,
                session,
                spec,
                &mut record,
                &ir,
                ledger.clone(),
                cancel,
                pause,
                depth,
            );
            let outcome = match tokio::time::timeout(timeout, run).await {
                Ok(r) => r,
                Err(_) => Err(CoreError::StepTimeout {
                    step_id: spec.id.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
            };
            match outcome {
                Ok(outputs) => break Ok(outputs),
                Err(e) if e.is_transient() && attempt < spec.max_retries => {
                    record.errors.push(StepError {
                        code: e.code().to_string(),
                        message: e.to_string(),
                        details: json!(e.details()),
                    });
                    let delay = self.defaults.retry_base_delay * 2u32.pow(attempt);
                    debug!(step_id = %spec.id, attempt, delay_ms = delay.as_millis() as u64, "retrying step");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => break Err(CoreError::Cancelled),
                    }
                    attempt += 1;
                }
                Err(e) => break Err(e),
            }
        };

        record.finished_at = Some(Utc::now());
        match result {
            Ok(outputs) => {
                record.outputs_ir = Some(outputs);
                record.state = StepState::Succeeded;
                Ok(StepSuccess { record })
            }
            Err(error) => {
                record.errors.push(StepError {
                    code: error.code().to_string(),
                    message: error.to_string(),
                    details: json!(error.details()),
                });
                record.state = StepState::Failed;
                Err(StepFailure { record, error })
            }
        }
    }

    fn profile_for(&self, spec: &StepSpec) -> CapabilityProfile {
        spec.profile.unwrap_or(match spec.kind {
            StepSpecKind::ToolCall { .. } => CapabilityProfile::ToolStrict,
            _ => CapabilityProfile::Standard,
        })
    }

    /// One attempt at the step body; retries wrap this.
    #[allow(clippy::too_many_arguments)]
    async fn run_step_kind(
        &self,
        ctx: &ExecutionContext,
        resolved: &ResolvedPlaybook,
        session: &ExecutionSession,
        spec: &StepSpec,
        record: &mut StepRecord,
        ir: &Value,
        ledger: Arc<Mutex<CostLedger>>,
        cancel: &CancellationToken,
        pause: &Arc<AtomicBool>,
        depth: usize,
    ) -> Result<Value, CoreError> {
        match &spec.kind {
            StepSpecKind::LlmCall {
                prompt,
                output_schema,
            } => {
                let profile = self.profile_for(spec);
                let handle = self.router.resolve(profile)?;
                {
                    let ledger = ledger.lock().await;
                    check_budget(&ledger, profile, &handle, self.router.config())?;
                }
                let messages = [
                    ChatMessage::system(resolved.body.clone()),
                    ChatMessage::user(render_template(prompt, ir)),
                ];
                let response = self
                    .llm
                    .chat(&handle, &messages, Some(output_schema), None, cancel)
                    .await?;
                let cost = handle.cost_usd(
                    response.usage.prompt_tokens,
                    response.usage.completion_tokens,
                );
                ledger.lock().await.record(profile.as_str(), cost);
                let outputs = match response.json {
                    Some(v) => v,
                    None => {
                        let v = extract_json(&response.content, &spec.id)?;
                        output_schema.validate(&v, &spec.id)?;
                        v
                    }
                };
                Ok(outputs)
            }

            StepSpecKind::ToolCall {
                tool_type, prompt, writes,
            } => {
                let profile = self.profile_for(spec);
                let handle = self.router.resolve(profile)?;
                {
                    let ledger = ledger.lock().await;
                    check_budget(&ledger, profile, &handle, self.router.config())?;
                }
                let connection = self
                    .stores
                    .connections
                    .find_by_tool_type(ctx.workspace_id(), tool_type)
                    .await?
                    .ok_or_else(|| CoreError::PlaybookUnusable {
                        code: resolved.code.clone(),
                        message: format!("no connection for tool `{tool_type}`"),
                    })?;

                let decl = ToolDecl {
                    name: tool_type.clone(),
                    description: format!(
                        "Invoke the {tool_type} tool. Call with name `{tool_type}.<action>`."
                    ),
                    parameters: json!({"type": "object"}),
                };
                let messages = [
                    ChatMessage::system(resolved.body.clone()),
                    ChatMessage::user(render_template(prompt, ir)),
                ];
                let response = self
                    .llm
                    .chat(&handle, &messages, None, Some(&[decl]), cancel)
                    .await?;
                let cost = handle.cost_usd(
                    response.usage.prompt_tokens,
                    response.usage.completion_tokens,
                );
                ledger.lock().await.record(profile.as_str(), cost);

                if response.tool_calls.is_empty() && profile == CapabilityProfile::ToolStrict {
                    return Err(CoreError::ToolCallMalformed {
                        message: format!("step `{}` produced no tool calls", spec.id),
                    });
                }

                let mut results = Vec::new();
                for call in &response.tool_calls {
                    let (called_type, action) = match call.name.split_once('.') {
                        Some((t, a)) => (t, a),
                        None => (call.name.as_str(), "invoke"),
                    };
                    if called_type != tool_type {
                        return Err(CoreError::ToolCallMalformed {
                            message: format!(
                                "step `{}` called `{}` but declares tool `{tool_type}`",
                                spec.id, call.name
                            ),
                        });
                    }
                    let key = idempotency_key(&session.execution_id, &spec.id, &call.args);
                    append_best_effort(
                        &self.log,
                        NewEvent::session(
                            &session.workspace_id,
                            &session.execution_id,
                            &WireEvent::ToolInvoked {
                                tool_type: tool_type.clone(),
                                action: action.to_string(),
                                connection_id: connection.id.clone(),
                            },
                        ),
                    )
                    .await;
                    let result = self
                        .dispatcher
                        .invoke(
                            &connection,
                            action,
                            &call.args,
                            ctx,
                            Some(&session.execution_id),
                            *writes,
                            Some(&key),
                            cancel,
                        )
                        .await?;
                    append_best_effort(
                        &self.log,
                        NewEvent::session(
                            &session.workspace_id,
                            &session.execution_id,
                            &WireEvent::ToolCompleted {
                                tool_type: tool_type.clone(),
                                action: action.to_string(),
                                success: result.success,
                            },
                        ),
                    )
                    .await;
                    record.tool_calls.push(ToolCallRecord {
                        tool_type: tool_type.clone(),
                        action: action.to_string(),
                        args: call.args.clone(),
                        idempotency_key: key,
                        result: result.success.then(|| result.result.clone()),
                        error: (!result.success).then(|| StepError {
                            code: result
                                .error_code
                                .clone()
                                .unwrap_or_else(|| "tool_error".to_string()),
                            message: result.error_message.clone().unwrap_or_default(),
                            details: Value::Null,
                        }),
                    });
                    // Application-level failures are data for downstream
                    // steps, never retried.
                    results.push(json!({
                        "tool_type": tool_type,
                        "action": action,
                        "success": result.success,
                        "result": result.result,
                        "error_code": result.error_code,
                    }));
                }
                Ok(json!({ "results": results }))
            }

            StepSpecKind::Decision { decision } => {
                let value = lookup_path(ir, &decision.path);
                let matched = match &decision.equals {
                    Some(expected) => value == Some(expected),
                    None => match value {
                        None | Some(Value::Null) => false,
                        Some(Value::Bool(b)) => *b,
                        Some(Value::String(s)) => !s.is_empty(),
                        Some(Value::Array(a)) => !a.is_empty(),
                        Some(_) => true,
                    },
                };
                let (chosen, not_chosen) = if matched {
                    (Some(decision.then_step.clone()), decision.else_step.clone())
                } else {
                    (decision.else_step.clone(), Some(decision.then_step.clone()))
                };
                Ok(json!({
                    "matched": matched,
                    "chosen": chosen,
                    "not_chosen": not_chosen,
                }))
            }

            StepSpecKind::SubPlaybook { playbook_code } => {
                if depth >= MAX_SUB_DEPTH {
                    return Err(CoreError::PlaybookUnusable {
                        code: playbook_code.clone(),
                        message: format!("sub-playbook nesting exceeds {MAX_SUB_DEPTH}"),
                    });
                }
                let child_ctx = ctx.child();
                let child_resolved = self.resolve(&child_ctx, playbook_code, None).await?;
                let mut child = ExecutionSession::new(
                    ctx.workspace_id(),
                    ctx.project_id().map(|p| p.to_string()),
                    playbook_code.clone(),
                    child_resolved.variant_id.clone(),
                    ir.clone(),
                );
                child.parent_execution_id = Some(session.execution_id.clone());
                self.stores.executions.create_session(&child).await?;
                let mut child_records = make_records(&child, &child_resolved.steps);
                for r in &child_records {
                    self.stores.executions.upsert_step(r).await?;
                }
                append_best_effort(
                    &self.log,
                    NewEvent::session(
                        &child.workspace_id,
                        &child.execution_id,
                        &WireEvent::SessionStarted {
                            playbook_code: playbook_code.clone(),
                            project_id: child.project_id.clone(),
                        },
                    ),
                )
                .await;

                // Cost attribution: the child charges the parent's ledger.
                let end = self
                    .drive(
                        &child_ctx,
                        &child_resolved,
                        &mut child,
                        &mut child_records,
                        ledger,
                        cancel,
                        pause,
                        depth + 1,
                    )
                    .await;
                match end {
                    Ok(DriveEnd::Completed) => {
                        self.set_status(&mut child, SessionStatus::Completed).await?;
                        Ok(json!({
                            "execution_id": child.execution_id,
                            "status": "completed",
                        }))
                    }
                    Ok(DriveEnd::Paused) => Err(CoreError::PermissionDenied {
                        action: format!("sub_playbook:{playbook_code}"),
                        message: "nested sessions cannot pause for approval".to_string(),
                    }),
                    Err(e) => {
                        let _ = self.finalize(&mut child, Err(e.clone())).await;
                        Err(e)
                    }
                }
            }

            StepSpecKind::ArtifactEmit {
                path,
                content_from,
                mime,
            } => {
                let content = lookup_path(ir, content_from).ok_or_else(|| {
                    CoreError::SchemaViolation {
                        location: spec.id.clone(),
                        message: format!("no IR value at `{content_from}`"),
                    }
                })?;
                let bytes = match content {
                    Value::String(s) => s.clone().into_bytes(),
                    other => serde_json::to_vec_pretty(other).unwrap_or_default(),
                };
                let key = idempotency_key(
                    &session.execution_id,
                    &spec.id,
                    &json!({"path": path}),
                );
                let artifact = self
                    .artifacts
                    .write(
                        ctx,
                        &session.execution_id,
                        path,
                        &bytes,
                        mime,
                        &spec.id,
                        &key,
                    )
                    .await?;
                append_best_effort(
                    &self.log,
                    NewEvent::session(
                        &session.workspace_id,
                        &session.execution_id,
                        &WireEvent::ArtifactRegistered {
                            artifact_id: artifact.id.clone(),
                            path: artifact.path.clone(),
                        },
                    ),
                )
                .await;
                Ok(json!({
                    "artifact_id": artifact.id,
                    "path": artifact.path,
                }))
            }
        }
    }
}

fn step_state_str(state: StepState) -> &'static str {
    match state {
        StepState::Pending => "pending",
        StepState::Running => "running",
        StepState::WaitingTool => "waiting_tool",
        StepState::Succeeded => "succeeded",
        StepState::Failed => "failed",
        StepState::Skipped => "skipped",
    }
}

/// Marks a step and everything downstream of it skipped.
fn mark_skipped(records: &mut [StepRecord], target: &str) {
    let mut skipped: Vec<String> = Vec::new();
    for r in records.iter_mut() {
        if r.step_id == target && r.state == StepState::Pending {
            r.state = StepState::Skipped;
            skipped.push(r.step_id.clone());
        }
    }
    // Anything depending on a skipped step is unreachable.
    loop {
        let mut changed = false;
        for i in 0..records.len() {
            if records[i].state != StepState::Pending {
                continue;
            }
            let depends_on_skipped = records[i]
                .inputs_ir
                .get("__depends_on") // filled below at record creation
                .and_then(|v| v.as_array())
                .map(|deps| {
                    deps.iter()
                        .filter_map(|d| d.as_str())
                        .any(|d| skipped.iter().any(|s| s == d))
                })
                .unwrap_or(false);
            if depends_on_skipped {
                records[i].state = StepState::Skipped;
                skipped.push(records[i].step_id.clone());
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

/// Builds pending records, one per resolved step, in declaration order.
fn make_records(session: &ExecutionSession, steps: &[StepSpec]) -> Vec<StepRecord> {
    steps
        .iter()
        .enumerate()
        .map(|(i, spec)| {
            let mut record =
                StepRecord::pending(&session.execution_id, &spec.id, i, spec.kind.name());
            // Dependency list rides along for branch pruning after restarts.
            record.inputs_ir = json!({ "__depends_on": spec.depends_on });
            record
        })
        .collect()
}

#[async_trait]
impl PlaybookExecutorPort for ExecutorService {
    async fn start(
        &self,
        ctx: &ExecutionContext,
        playbook_code: &str,
        variant_id: Option<&str>,
        inputs: Value,
    ) -> Result<String, CoreError> {
        let inner = &self.inner;
        let resolved = inner.resolve(ctx, playbook_code, variant_id).await?;
        let session = ExecutionSession::new(
            ctx.workspace_id(),
            ctx.project_id().map(|p| p.to_string()),
            playbook_code,
            resolved.variant_id.clone(),
            inputs,
        );
        inner.stores.executions.create_session(&session).await?;
        for record in make_records(&session, &resolved.steps) {
            inner.stores.executions.upsert_step(&record).await?;
        }
        append_best_effort(
            &inner.log,
            NewEvent::session(
                &session.workspace_id,
                &session.execution_id,
                &WireEvent::SessionStarted {
                    playbook_code: playbook_code.to_string(),
                    project_id: session.project_id.clone(),
                },
            ),
        )
        .await;

        let handle = SessionHandle::new();
        inner
            .handles
            .insert(session.execution_id.clone(), handle.clone());
        let task_inner = inner.clone();
        let task_ctx = ctx.clone();
        let execution_id = session.execution_id.clone();
        let task_id = execution_id.clone();
        tokio::spawn(async move {
            task_inner
                .drive_and_finalize(task_ctx, Arc::new(resolved), task_id, handle)
                .await;
        });
        Ok(execution_id)
    }

    async fn wait(&self, execution_id: &str) -> Result<ExecutionSession, CoreError> {
        loop {
            let session = self
                .inner
                .stores
                .executions
                .get_session(execution_id)
                .await?
                .ok_or_else(|| CoreError::PersistenceConflict {
                    entity: "executions".into(),
                    message: format!("session {execution_id} not found"),
                })?;
            if session.status.is_terminal() || session.status == SessionStatus::Paused {
                return Ok(session);
            }
            match self.inner.handles.get(execution_id).map(|h| h.done.clone()) {
                Some(done) => {
                    let _ = tokio::time::timeout(Duration::from_millis(200), done.notified()).await;
                }
                None => tokio::time::sleep(Duration::from_millis(100)).await,
            }
        }
    }

    async fn pause(&self, execution_id: &str) -> Result<(), CoreError> {
        if let Some(handle) = self.inner.handles.get(execution_id) {
            handle.pause.store(true, Ordering::SeqCst);
            return Ok(());
        }
        // No live task; only already-paused or terminal sessions are valid here.
        let session = self
            .inner
            .stores
            .executions
            .get_session(execution_id)
            .await?;
        match session {
            Some(s) if s.status == SessionStatus::Paused || s.status.is_terminal() => Ok(()),
            Some(_) | None => Err(CoreError::PersistenceConflict {
                entity: "executions".into(),
                message: format!("session {execution_id} has no running task to pause"),
            }),
        }
    }

    async fn resume(&self, ctx: &ExecutionContext, execution_id: &str) -> Result<(), CoreError> {
        let inner = &self.inner;
        let mut session = inner
            .stores
            .executions
            .get_session(execution_id)
            .await?
            .ok_or_else(|| CoreError::PersistenceConflict {
                entity: "executions".into(),
                message: format!("session {execution_id} not found"),
            })?;
        if session.status != SessionStatus::Paused {
            return Err(CoreError::PersistenceConflict {
                entity: "executions".into(),
                message: format!(
                    "session {execution_id} is {}, not paused",
                    session.status.as_str()
                ),
            });
        }
        if let Some(PauseReason::ApprovalRequired { step_id }) = session.paused_reason.clone() {
            // Resuming an approval pause is the approval.
            if !session.approved_steps.contains(&step_id) {
                session.approved_steps.push(step_id);
                inner.persist_session(&mut session).await?;
            }
        }
        let resolved = inner
            .resolve(ctx, &session.playbook_code, session.variant_id.as_deref())
            .await?;

        let handle = SessionHandle::new();
        inner
            .handles
            .insert(execution_id.to_string(), handle.clone());
        let task_inner = inner.clone();
        let task_ctx = ctx.clone();
        let task_id = execution_id.to_string();
        tokio::spawn(async move {
            task_inner
                .drive_and_finalize(task_ctx, Arc::new(resolved), task_id, handle)
                .await;
        });
        Ok(())
    }

    async fn cancel(&self, execution_id: &str) -> Result<(), CoreError> {
        if let Some(handle) = self.inner.handles.get(execution_id) {
            handle.cancel.cancel();
            return Ok(());
        }
        let session = self
            .inner
            .stores
            .executions
            .get_session(execution_id)
            .await?;
        match session {
            // Cancellation after completion is ignored.
            Some(s) if s.status.is_terminal() => Ok(()),
            Some(mut s) => {
                self.inner.set_status(&mut s, SessionStatus::Cancelled).await?;
                append_best_effort(
                    &self.inner.log,
                    NewEvent::session(&s.workspace_id, &s.execution_id, &WireEvent::Cancelled {}),
                )
                .await;
                Ok(())
            }
            None => Err(CoreError::PersistenceConflict {
                entity: "executions".into(),
                message: format!("session {execution_id} not found"),
            }),
        }
    }

    async fn status(
        &self,
        execution_id: &str,
    ) -> Result<(ExecutionSession, Vec<StepRecord>), CoreError> {
        let session = self
            .inner
            .stores
            .executions
            .get_session(execution_id)
            .await?
            .ok_or_else(|| CoreError::PersistenceConflict {
                entity: "executions".into(),
                message: format!("session {execution_id} not found"),
            })?;
        let steps = self.inner.stores.executions.get_steps(execution_id).await?;
        Ok((session, steps))
    }
}
