//! Confirmation loop
//!
//! Nothing reaches the ledger without an explicit confirm. A pending
//! payload carries a one-time commit token and a committed flag; together
//! with the store's token-keyed insert they give the at-most-once
//! guarantee for retransmitted confirms.

use chrono::Utc;
use rust_decimal::Decimal;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;
use uuid::Uuid;

use crate::error::{BotError, Result};
use crate::extraction::parse;
use crate::models::{
    CandidateRecord, ConstructionObject, EntryKind, ExpenseCategory, LedgerEntry, ObjectStatus,
};
use crate::report::format_currency;

const MAX_COMMIT_ATTEMPTS: u32 = 3;
const COMMIT_BACKOFF: Duration = Duration::from_millis(200);

/// All collected object-creation fields, ready to become a
/// `ConstructionObject` on confirm.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDraft {
    pub name: String,
    pub address: String,
    pub foreman_name: String,
    pub prepayment: Decimal,
    pub final_payment: Decimal,
    pub contract_estimate: Decimal,
    pub discount: Decimal,
    pub works_estimate: Decimal,
    pub consumables_estimate: Decimal,
    pub overhead_estimate: Decimal,
    pub transport_estimate: Decimal,
}

impl ObjectDraft {
    pub fn into_object(self, created_by: Uuid) -> ConstructionObject {
        ConstructionObject {
            object_id: Uuid::new_v4(),
            name: self.name,
            address: self.address,
            foreman_name: self.foreman_name,
            status: ObjectStatus::Active,
            prepayment: self.prepayment,
            final_payment: self.final_payment,
            contract_estimate: self.contract_estimate,
            discount: self.discount,
            works_estimate: self.works_estimate,
            consumables_estimate: self.consumables_estimate,
            overhead_estimate: self.overhead_estimate,
            transport_estimate: self.transport_estimate,
            created_by,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PendingPayload {
    Object(ObjectDraft),
    Entry {
        object_id: Uuid,
        /// `Some` for a categorized expense, `None` for a worker advance.
        category: Option<ExpenseCategory>,
        candidate: CandidateRecord,
    },
}

/// Pending confirmation state attached to a conversation.
#[derive(Debug, Clone)]
pub struct PendingCommit {
    pub token: Uuid,
    pub payload: PendingPayload,
    pub committed: bool,
    /// Entry id once committed; target for an optional file attachment.
    pub committed_entry: Option<Uuid>,
}

impl PendingCommit {
    pub fn new(payload: PendingPayload) -> Self {
        Self {
            token: Uuid::new_v4(),
            payload,
            committed: false,
            committed_entry: None,
        }
    }
}

/// User decision on a presented candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmAction {
    Confirm,
    Reject,
    Edit { field: String, value: String },
}

impl ConfirmAction {
    /// Parse a button payload or short command: "confirm", "reject",
    /// "edit:amount 6000".
    pub fn parse(data: &str) -> Option<Self> {
        let trimmed = data.trim();
        match trimmed.to_lowercase().as_str() {
            "confirm" | "да" | "верно" => return Some(ConfirmAction::Confirm),
            "reject" | "нет" | "заново" => return Some(ConfirmAction::Reject),
            _ => {}
        }
        let rest = trimmed.strip_prefix("edit:")?;
        let (field, value) = rest.split_once(' ')?;
        Some(ConfirmAction::Edit {
            field: field.to_string(),
            value: value.trim().to_string(),
        })
    }
}

/// Apply a single-field edit to a pending candidate, re-validating the
/// value by field kind. Kind and owning object are not editable.
pub fn apply_edit(candidate: &mut CandidateRecord, field: &str, value: &str) -> Result<()> {
    match field {
        "amount" => {
            candidate.amount = parse::parse_amount(value)
                .map_err(|_| BotError::Validation("Не удалось разобрать сумму.".to_string()))?;
        }
        "date" => {
            candidate.date = parse::resolve_date(Some(value), Utc::now().date_naive())
                .map_err(|_| BotError::Validation("Не удалось разобрать дату.".to_string()))?;
        }
        "description" => {
            candidate.description = value.trim().to_string();
        }
        "worker_name" => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Err(BotError::Validation("Имя не может быть пустым.".to_string()));
            }
            candidate.worker_name = Some(trimmed.to_string());
        }
        "work_type" => {
            candidate.work_type = Some(value.trim().to_string());
        }
        other => {
            return Err(BotError::Validation(format!(
                "Поле «{}» нельзя изменить.",
                other
            )));
        }
    }
    Ok(())
}

/// Render a pending payload for user review.
pub fn present(payload: &PendingPayload) -> String {
    match payload {
        PendingPayload::Object(draft) => format!(
            "Проверьте данные объекта:\n\
             Название: {}\n\
             Адрес: {}\n\
             Прораб: {}\n\
             Аванс: {}\n\
             Окончательный расчет: {}\n\
             Контракт: {} (скидка {})\n\
             Работы: {}\n\
             Расходники: {}\n\
             Накладные: {}\n\
             Транспорт: {}\n\n\
             Все верно? (confirm / reject)",
            draft.name,
            draft.address,
            draft.foreman_name,
            format_currency(draft.prepayment),
            format_currency(draft.final_payment),
            format_currency(draft.contract_estimate),
            format_currency(draft.discount),
            format_currency(draft.works_estimate),
            format_currency(draft.consumables_estimate),
            format_currency(draft.overhead_estimate),
            format_currency(draft.transport_estimate),
        ),
        PendingPayload::Entry {
            category,
            candidate,
            ..
        } => {
            let mut out = String::from("Проверьте данные:\n");
            match category {
                Some(cat) => out.push_str(&format!("Тип: {}\n", cat.label())),
                None => {
                    out.push_str("Тип: аванс\n");
                    if let Some(worker) = &candidate.worker_name {
                        out.push_str(&format!("Рабочий: {}\n", worker));
                    }
                    if let Some(work) = &candidate.work_type {
                        out.push_str(&format!("Вид работ: {}\n", work));
                    }
                }
            }
            out.push_str(&format!(
                "Дата: {}\nСумма: {}\nОписание: {}\n\nВсе верно? (confirm / reject / edit:<поле> <значение>)",
                candidate.date.format("%d.%m.%Y"),
                format_currency(candidate.amount),
                candidate.description,
            ));
            out
        }
    }
}

/// Build the ledger entry for a pending entry payload.
pub fn build_entry(
    object_id: Uuid,
    category: Option<ExpenseCategory>,
    candidate: &CandidateRecord,
    created_by: Uuid,
) -> Result<LedgerEntry> {
    if candidate.amount <= Decimal::ZERO {
        return Err(BotError::Validation("Сумма должна быть больше нуля.".to_string()));
    }

    let kind = match category {
        Some(category) => EntryKind::Expense { category },
        None => EntryKind::Advance {
            worker_name: candidate
                .worker_name
                .clone()
                .ok_or_else(|| BotError::Validation("Не указан рабочий.".to_string()))?,
            work_type: candidate.work_type.clone().unwrap_or_default(),
        },
    };

    Ok(LedgerEntry {
        entry_id: Uuid::new_v4(),
        object_id,
        kind,
        amount: candidate.amount,
        date: candidate.date,
        description: candidate.description.clone(),
        file_ref: None,
        created_by,
        created_at: Utc::now(),
    })
}

/// Commit through the idempotent store primitive, retrying transient
/// persistence failures a bounded number of times with backoff. The
/// token makes retries safe: a commit that landed but failed to report
/// will not insert twice.
pub async fn commit_entry_with_retry(
    store: &dyn crate::store::LedgerStore,
    token: Uuid,
    entry: &LedgerEntry,
) -> Result<Uuid> {
    let mut attempt = 0u32;
    loop {
        match store.commit_entry(token, entry.clone()).await {
            Ok(entry_id) => return Ok(entry_id),
            Err(BotError::Persistence(msg)) if attempt + 1 < MAX_COMMIT_ATTEMPTS => {
                attempt += 1;
                warn!(attempt, %msg, "Ledger commit failed, retrying");
                sleep(COMMIT_BACKOFF * attempt).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Object twin of `commit_entry_with_retry`, keyed on the same kind of
/// confirmation token.
pub async fn commit_object_with_retry(
    store: &dyn crate::store::LedgerStore,
    token: Uuid,
    object: &ConstructionObject,
) -> Result<Uuid> {
    let mut attempt = 0u32;
    loop {
        match store.commit_object(token, object.clone()).await {
            Ok(object_id) => return Ok(object_id),
            Err(BotError::Persistence(msg)) if attempt + 1 < MAX_COMMIT_ATTEMPTS => {
                attempt += 1;
                warn!(attempt, %msg, "Object commit failed, retrying");
                sleep(COMMIT_BACKOFF * attempt).await;
            }
            Err(e) => return Err(e),
        }
    }
}
