//! Conversational flow engine
//!
//! One user drives at most one flow at a time. The engine owns per-user
//! session slots; each advance locks only that user's slot, so slow
//! extraction calls for one user never stall another. The engine never
//! touches the ledger store itself: confirm produces a commit outcome
//! the dispatcher executes, and the result is reported back via
//! `mark_entry_committed` / `clear`.

pub mod confirm;
pub mod steps;

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::error::{BotError, Result};
use crate::models::{CandidateRecord, ExpenseCategory};

pub use confirm::{ConfirmAction, ObjectDraft, PendingCommit, PendingPayload};
pub use steps::{FieldValue, InputKind, StepDef};

/// Which conversation a user is in the middle of.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowKind {
    AddObject,
    AddExpense {
        object_id: Uuid,
        category: ExpenseCategory,
    },
    AddAdvance {
        object_id: Uuid,
    },
    ReportPeriod {
        object_id: Uuid,
    },
}

impl FlowKind {
    fn steps(&self) -> &'static [StepDef] {
        match self {
            FlowKind::AddObject => &steps::OBJECT_STEPS,
            FlowKind::AddExpense { .. } | FlowKind::AddAdvance { .. } => &steps::ENTRY_STEPS,
            FlowKind::ReportPeriod { .. } => &steps::REPORT_STEPS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConversationState {
    pub flow: FlowKind,
    pub step: usize,
    pub data: HashMap<&'static str, FieldValue>,
    pub pending: Option<PendingCommit>,
}

impl ConversationState {
    fn new(flow: FlowKind) -> Self {
        Self {
            flow,
            step: 0,
            data: HashMap::new(),
            pending: None,
        }
    }

    fn current_step(&self) -> Option<&'static StepDef> {
        self.flow.steps().get(self.step)
    }

    fn money(&self, name: &str) -> Result<Decimal> {
        self.data
            .get(name)
            .and_then(FieldValue::as_money)
            .ok_or_else(|| BotError::Validation(format!("missing field {}", name)))
    }

    fn text(&self, name: &str) -> Result<String> {
        self.data
            .get(name)
            .and_then(FieldValue::as_text)
            .map(str::to_string)
            .ok_or_else(|| BotError::Validation(format!("missing field {}", name)))
    }

    fn object_draft(&self) -> Result<ObjectDraft> {
        Ok(ObjectDraft {
            name: self.text("name")?,
            address: self.text("address")?,
            foreman_name: self.text("foreman_name")?,
            prepayment: self.money("prepayment")?,
            final_payment: self.money("final_payment")?,
            contract_estimate: self.money("contract_estimate")?,
            discount: self.money("discount")?,
            works_estimate: self.money("works_estimate")?,
            consumables_estimate: self.money("consumables_estimate")?,
            overhead_estimate: self.money("overhead_estimate")?,
            transport_estimate: self.money("transport_estimate")?,
        })
    }
}

/// Input handed to `advance`; the dispatcher decides which variant a raw
/// channel event becomes (running extraction first for unstructured steps).
#[derive(Debug, Clone)]
pub enum FlowInput {
    Text(String),
    Candidate(CandidateRecord),
    Confirm(ConfirmAction),
}

/// What the dispatcher should do next.
#[derive(Debug, Clone)]
pub enum FlowOutcome {
    /// Send this prompt and wait for the next input.
    Prompt { text: String },
    /// Candidate assembled; present it and wait for a decision.
    AwaitConfirmation { text: String },
    /// Confirmed object draft, ready to persist under this token.
    CommitObject { token: Uuid, draft: ObjectDraft },
    /// Confirmed ledger entry, ready to persist under this token.
    CommitEntry {
        token: Uuid,
        object_id: Uuid,
        category: Option<ExpenseCategory>,
        candidate: CandidateRecord,
    },
    /// Duplicate confirm for an already persisted record; nothing to do.
    AlreadyCommitted,
    /// Report flow finished; render for this period.
    ReportRequest {
        object_id: Uuid,
        year: i32,
        month: u32,
    },
    /// Candidate rejected; send this text (flow may continue or end).
    Rejected { text: String },
}

type SessionSlot = Arc<Mutex<Option<ConversationState>>>;

pub struct FlowEngine {
    sessions: RwLock<HashMap<Uuid, SessionSlot>>,
}

impl FlowEngine {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    async fn slot(&self, user_id: Uuid) -> SessionSlot {
        if let Some(slot) = self.sessions.read().await.get(&user_id) {
            return slot.clone();
        }
        let mut sessions = self.sessions.write().await;
        sessions.entry(user_id).or_default().clone()
    }

    /// Begin a flow. A user with a conversation already in progress must
    /// cancel it first.
    pub async fn start(&self, user_id: Uuid, flow: FlowKind) -> Result<FlowOutcome> {
        let slot = self.slot(user_id).await;
        let mut state = slot.lock().await;
        if state.is_some() {
            return Err(BotError::Conflict(
                "Сначала завершите или отмените текущий диалог (/cancel).".to_string(),
            ));
        }
        let fresh = ConversationState::new(flow);
        let prompt = fresh
            .current_step()
            .map(|s| s.prompt.to_string())
            .ok_or_else(|| BotError::Validation("flow has no steps".to_string()))?;
        debug!(%user_id, flow = ?fresh.flow, "Flow started");
        *state = Some(fresh);
        Ok(FlowOutcome::Prompt { text: prompt })
    }

    /// Drop any in-progress conversation. Returns false when there was
    /// nothing to cancel. Uncommitted pending data is discarded.
    pub async fn cancel(&self, user_id: Uuid) -> bool {
        let slot = self.slot(user_id).await;
        let mut state = slot.lock().await;
        let had = state.is_some();
        *state = None;
        had
    }

    /// What kind of input the user's current step expects, or None when
    /// no flow is active. A pending confirmation expects a choice.
    pub async fn expected_kind(&self, user_id: Uuid) -> Option<InputKind> {
        let slot = self.slot(user_id).await;
        let state = slot.lock().await;
        let state = state.as_ref()?;
        if state.pending.is_some() {
            return Some(InputKind::Choice);
        }
        state.current_step().map(|s| s.kind)
    }

    /// The flow the user is currently in, if any.
    pub async fn current_flow(&self, user_id: Uuid) -> Option<FlowKind> {
        let slot = self.slot(user_id).await;
        let state = slot.lock().await;
        state.as_ref().map(|s| s.flow.clone())
    }

    /// Entry id awaiting an optional receipt photo, if any.
    pub async fn awaiting_photo(&self, user_id: Uuid) -> Option<Uuid> {
        let slot = self.slot(user_id).await;
        let state = slot.lock().await;
        state
            .as_ref()
            .and_then(|s| s.pending.as_ref())
            .filter(|p| p.committed)
            .and_then(|p| p.committed_entry)
    }

    /// Record that the dispatcher persisted the pending entry. The
    /// session stays alive for the optional photo follow-up.
    pub async fn mark_entry_committed(&self, user_id: Uuid, entry_id: Uuid) {
        let slot = self.slot(user_id).await;
        let mut state = slot.lock().await;
        if let Some(pending) = state.as_mut().and_then(|s| s.pending.as_mut()) {
            pending.committed = true;
            pending.committed_entry = Some(entry_id);
        }
    }

    /// Revert a hand-off whose persistence ultimately failed, so the
    /// user can confirm again with the same token. A no-op once an
    /// entry id has been recorded.
    pub async fn reopen_pending(&self, user_id: Uuid) {
        let slot = self.slot(user_id).await;
        let mut state = slot.lock().await;
        if let Some(pending) = state.as_mut().and_then(|s| s.pending.as_mut()) {
            if pending.committed_entry.is_none() {
                pending.committed = false;
            }
        }
    }

    /// End the session after a commit or photo follow-up.
    pub async fn clear(&self, user_id: Uuid) {
        let slot = self.slot(user_id).await;
        *slot.lock().await = None;
    }

    pub async fn advance(&self, user_id: Uuid, input: FlowInput) -> Result<FlowOutcome> {
        let slot = self.slot(user_id).await;
        let mut guard = slot.lock().await;
        if guard.is_none() {
            return Err(BotError::Validation(
                "Нет активного диалога. Выберите действие в меню.".to_string(),
            ));
        }

        match input {
            FlowInput::Confirm(action) => Self::handle_confirm(&mut guard, action),
            FlowInput::Text(text) => {
                let has_pending = guard
                    .as_ref()
                    .map(|s| s.pending.is_some())
                    .unwrap_or(false);
                if has_pending {
                    // Free text while a confirmation is pending: accept it
                    // if it parses as a decision, otherwise re-present.
                    match ConfirmAction::parse(&text) {
                        Some(action) => Self::handle_confirm(&mut guard, action),
                        None => {
                            let text = guard
                                .as_ref()
                                .and_then(|s| s.pending.as_ref())
                                .map(|p| confirm::present(&p.payload))
                                .unwrap_or_default();
                            Ok(FlowOutcome::AwaitConfirmation { text })
                        }
                    }
                } else {
                    Self::handle_step_text(&mut guard, &text)
                }
            }
            FlowInput::Candidate(candidate) => Self::handle_candidate(&mut guard, candidate),
        }
    }

    fn handle_step_text(
        guard: &mut Option<ConversationState>,
        text: &str,
    ) -> Result<FlowOutcome> {
        let Some(state) = guard.as_mut() else {
            return Err(BotError::Validation("Нет активного диалога.".to_string()));
        };
        let step = state
            .current_step()
            .ok_or_else(|| BotError::Validation("Диалог уже завершен.".to_string()))?;

        if matches!(step.kind, InputKind::Unstructured | InputKind::Choice) {
            return Err(BotError::Validation(
                "Этот шаг обрабатывается через распознавание.".to_string(),
            ));
        }

        let value = match steps::validate(step.kind, text) {
            Ok(v) => v,
            // Re-prompt with the reason; the step index does not move.
            Err(BotError::Validation(reason)) => {
                return Ok(FlowOutcome::Prompt {
                    text: format!("{}\n{}", reason, step.prompt),
                });
            }
            Err(e) => return Err(e),
        };

        state.data.insert(step.name, value);
        state.step += 1;

        if let Some(next) = state.current_step() {
            return Ok(FlowOutcome::Prompt {
                text: next.prompt.to_string(),
            });
        }

        // All steps collected.
        match state.flow.clone() {
            FlowKind::AddObject => {
                let draft = state.object_draft()?;
                let pending = PendingCommit::new(PendingPayload::Object(draft));
                let text = confirm::present(&pending.payload);
                state.pending = Some(pending);
                Ok(FlowOutcome::AwaitConfirmation { text })
            }
            FlowKind::ReportPeriod { object_id } => {
                let year = state
                    .data
                    .get("year")
                    .and_then(FieldValue::as_int)
                    .ok_or_else(|| BotError::Validation("missing field year".to_string()))?
                    as i32;
                let month = state
                    .data
                    .get("month")
                    .and_then(FieldValue::as_int)
                    .ok_or_else(|| BotError::Validation("missing field month".to_string()))?
                    as u32;
                *guard = None;
                Ok(FlowOutcome::ReportRequest {
                    object_id,
                    year,
                    month,
                })
            }
            FlowKind::AddExpense { .. } | FlowKind::AddAdvance { .. } => Err(BotError::Validation(
                "Этот шаг обрабатывается через распознавание.".to_string(),
            )),
        }
    }

    fn handle_candidate(
        guard: &mut Option<ConversationState>,
        candidate: CandidateRecord,
    ) -> Result<FlowOutcome> {
        let Some(state) = guard.as_mut() else {
            return Err(BotError::Validation("Нет активного диалога.".to_string()));
        };
        if state.pending.is_some() {
            return Err(BotError::Validation(
                "Сначала подтвердите или отклоните текущую запись.".to_string(),
            ));
        }
        let (object_id, category) = match &state.flow {
            FlowKind::AddExpense {
                object_id,
                category,
            } => (*object_id, Some(*category)),
            FlowKind::AddAdvance { object_id } => (*object_id, None),
            _ => {
                return Err(BotError::Validation(
                    "Распознанные данные здесь не ожидаются.".to_string(),
                ));
            }
        };
        if category.is_none() && candidate.worker_name.is_none() {
            return Ok(FlowOutcome::Prompt {
                text: format!(
                    "Не удалось определить рабочего. {}",
                    steps::ENTRY_STEPS[0].prompt
                ),
            });
        }
        let pending = PendingCommit::new(PendingPayload::Entry {
            object_id,
            category,
            candidate,
        });
        let text = confirm::present(&pending.payload);
        state.pending = Some(pending);
        Ok(FlowOutcome::AwaitConfirmation { text })
    }

    fn handle_confirm(
        guard: &mut Option<ConversationState>,
        action: ConfirmAction,
    ) -> Result<FlowOutcome> {
        let Some(state) = guard.as_mut() else {
            return Err(BotError::Validation("Нет активного диалога.".to_string()));
        };
        let Some(pending) = state.pending.as_mut() else {
            return Err(BotError::Validation(
                "Сейчас нечего подтверждать.".to_string(),
            ));
        };
        // Once the record is persisted, retransmitted decisions are inert.
        if pending.committed {
            return Ok(FlowOutcome::AlreadyCommitted);
        }

        match action {
            ConfirmAction::Confirm => match pending.payload.clone() {
                PendingPayload::Object(draft) => {
                    // The draft is handed off at most once; a confirm
                    // retransmitted while the first commit is in flight
                    // hits the committed check above instead of minting
                    // a second object.
                    pending.committed = true;
                    Ok(FlowOutcome::CommitObject {
                        token: pending.token,
                        draft,
                    })
                }
                PendingPayload::Entry {
                    object_id,
                    category,
                    candidate,
                } => Ok(FlowOutcome::CommitEntry {
                    token: pending.token,
                    object_id,
                    category,
                    candidate,
                }),
            },
            ConfirmAction::Reject => {
                // Back to input: the object flow restarts from the first
                // question, entry flows re-prompt the free-form step.
                let restart = matches!(pending.payload, PendingPayload::Object(_));
                state.pending = None;
                state.step = 0;
                if restart {
                    state.data.clear();
                }
                let prompt = state
                    .current_step()
                    .map(|s| s.prompt)
                    .unwrap_or(steps::ENTRY_STEPS[0].prompt);
                Ok(FlowOutcome::Rejected {
                    text: format!("Хорошо, попробуем еще раз. {}", prompt),
                })
            }
            ConfirmAction::Edit { field, value } => {
                match &mut pending.payload {
                    PendingPayload::Entry { candidate, .. } => {
                        if let Err(BotError::Validation(reason)) =
                            confirm::apply_edit(candidate, &field, &value)
                        {
                            return Ok(FlowOutcome::AwaitConfirmation {
                                text: format!("{}\n{}", reason, confirm::present(&pending.payload)),
                            });
                        }
                    }
                    PendingPayload::Object(_) => {
                        return Ok(FlowOutcome::AwaitConfirmation {
                            text: format!(
                                "Поля объекта не редактируются по одному. Отклоните и начните заново.\n{}",
                                confirm::present(&pending.payload)
                            ),
                        });
                    }
                }
                Ok(FlowOutcome::AwaitConfirmation {
                    text: confirm::present(&pending.payload),
                })
            }
        }
    }
}

impl Default for FlowEngine {
    fn default() -> Self {
        Self::new()
    }
}
