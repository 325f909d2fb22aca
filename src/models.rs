//! Core data models for the construction-finance ledger

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Deterministic uuid derived from a string identity. Re-registering the
/// same channel user always yields the same internal id.
pub fn stable_uuid(input: &str) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    // Version 4 / RFC 4122 variant bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    Uuid::from_bytes(bytes)
}

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserRole {
    Admin,
    Foreman,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ObjectStatus {
    Active,
    Completed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExpenseCategory {
    Consumables,
    Transport,
    Overhead,
}

impl ExpenseCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpenseCategory::Consumables => "CONSUMABLES",
            ExpenseCategory::Transport => "TRANSPORT",
            ExpenseCategory::Overhead => "OVERHEAD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "CONSUMABLES" => Some(ExpenseCategory::Consumables),
            "TRANSPORT" => Some(ExpenseCategory::Transport),
            "OVERHEAD" => Some(ExpenseCategory::Overhead),
            _ => None,
        }
    }

    /// Human label used in prompts (genitive, matches the prompt wording).
    pub fn label(&self) -> &'static str {
        match self {
            ExpenseCategory::Consumables => "расходники",
            ExpenseCategory::Transport => "транспорт",
            ExpenseCategory::Overhead => "накладные",
        }
    }
}

/// What a ledger entry records: a categorized expense, or an advance
/// paid to a worker against payroll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "UPPERCASE")]
pub enum EntryKind {
    Expense { category: ExpenseCategory },
    Advance { worker_name: String, work_type: String },
}

//
// ================= User =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: Uuid,
    /// Identity assigned by the conversation channel (e.g. a messenger id).
    pub external_id: i64,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub role: UserRole,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(external_id: i64, role: UserRole, full_name: Option<String>) -> Self {
        Self {
            user_id: stable_uuid(&format!("user:{}", external_id)),
            external_id,
            username: None,
            full_name,
            role,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

//
// ================= Construction object =================
//

/// A tracked construction project with its signed estimate sheet.
/// Money fields are fixed-point; never floats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstructionObject {
    pub object_id: Uuid,
    pub name: String,
    pub address: String,
    pub foreman_name: String,
    pub status: ObjectStatus,

    // Receipts
    pub prepayment: Decimal,
    pub final_payment: Decimal,

    // Estimate
    pub contract_estimate: Decimal,
    pub discount: Decimal,
    pub works_estimate: Decimal,
    pub consumables_estimate: Decimal,
    pub overhead_estimate: Decimal,
    pub transport_estimate: Decimal,

    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ConstructionObject {
    pub fn total_receipts(&self) -> Decimal {
        self.prepayment + self.final_payment
    }
}

//
// ================= Ledger entry =================
//

/// One committed expense or advance. Kind and amount are immutable
/// after commit; only a file attachment may be added later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: Uuid,
    pub object_id: Uuid,
    pub kind: EntryKind,
    pub amount: Decimal,
    pub date: NaiveDate,
    pub description: String,
    pub file_ref: Option<FileRef>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

//
// ================= Candidate record =================
//

/// Unconfirmed structured result from extraction, pending user approval.
/// `date` and `amount` are mandatory; `description` is always present
/// but may be empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateRecord {
    pub date: NaiveDate,
    pub amount: Decimal,
    pub description: String,
    pub worker_name: Option<String>,
    pub work_type: Option<String>,
}

//
// ================= Files =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileRef {
    pub file_id: Uuid,
    pub filename: Option<String>,
    pub mime_type: Option<String>,
    pub size: u64,
    /// Hex sha256 of the stored bytes.
    pub checksum: String,
}

/// Opaque reference to transcribable audio held by the channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioRef {
    pub channel_file_id: String,
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UserRole::Admin => "ADMIN",
            UserRole::Foreman => "FOREMAN",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for ObjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObjectStatus::Active => "ACTIVE",
            ObjectStatus::Completed => "COMPLETED",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_uuid_is_deterministic() {
        let a = stable_uuid("user:42");
        let b = stable_uuid("user:42");
        let c = stable_uuid("user:43");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.get_version_num(), 4);
    }

    #[test]
    fn users_with_same_external_id_share_internal_id() {
        let a = User::new(42, UserRole::Admin, None);
        let b = User::new(42, UserRole::Foreman, Some("Иванов".to_string()));
        assert_eq!(a.user_id, b.user_id);
    }
}
