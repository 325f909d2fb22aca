//! Ledger repository
//!
//! Durable storage of users, objects and ledger entries behind a trait.
//! The in-memory backend serves development and tests; `postgres` holds
//! the durable sqlx implementation.

pub mod postgres;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{BotError, Result};
use crate::models::{ConstructionObject, FileRef, LedgerEntry, ObjectStatus, User};

/// Trait for the ledger repository. Writes from distinct users must not
/// contend on any cross-user lock.
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    // ---- users ----
    async fn create_user(&self, user: User) -> Result<Uuid>;
    async fn user_by_external_id(&self, external_id: i64) -> Result<Option<User>>;
    async fn list_users(&self) -> Result<Vec<User>>;
    async fn set_user_active(&self, external_id: i64, active: bool) -> Result<Option<User>>;
    async fn remove_user(&self, external_id: i64) -> Result<bool>;

    // ---- objects ----
    /// Idempotent like `commit_entry`: replaying the same `token`
    /// returns the object id of the first commit without inserting again.
    async fn commit_object(&self, token: Uuid, object: ConstructionObject) -> Result<Uuid>;
    async fn object_by_id(&self, object_id: Uuid) -> Result<Option<ConstructionObject>>;
    async fn objects_by_status(&self, status: ObjectStatus) -> Result<Vec<ConstructionObject>>;
    /// The only legal transition is ACTIVE → COMPLETED.
    async fn complete_object(&self, object_id: Uuid) -> Result<ConstructionObject>;

    // ---- ledger ----
    /// Idempotent commit primitive: committing the same `token` twice
    /// returns the entry id of the first commit without inserting again.
    async fn commit_entry(&self, token: Uuid, entry: LedgerEntry) -> Result<Uuid>;
    async fn entries_for_object(&self, object_id: Uuid) -> Result<Vec<LedgerEntry>>;
    async fn attach_file(&self, entry_id: Uuid, file_ref: FileRef) -> Result<()>;
}

/// In-memory ledger store for development and tests
pub struct InMemoryLedgerStore {
    users: Arc<RwLock<HashMap<i64, User>>>,
    objects: Arc<RwLock<HashMap<Uuid, ConstructionObject>>>,
    entries: Arc<RwLock<HashMap<Uuid, LedgerEntry>>>,
    committed_tokens: Arc<RwLock<HashMap<Uuid, Uuid>>>, // token → entry_id
    committed_object_tokens: Arc<RwLock<HashMap<Uuid, Uuid>>>, // token → object_id
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self {
            users: Arc::new(RwLock::new(HashMap::new())),
            objects: Arc::new(RwLock::new(HashMap::new())),
            entries: Arc::new(RwLock::new(HashMap::new())),
            committed_tokens: Arc::new(RwLock::new(HashMap::new())),
            committed_object_tokens: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn create_user(&self, user: User) -> Result<Uuid> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.external_id) {
            return Err(BotError::Conflict(format!(
                "user {} already exists",
                user.external_id
            )));
        }
        let user_id = user.user_id;
        users.insert(user.external_id, user);
        Ok(user_id)
    }

    async fn user_by_external_id(&self, external_id: i64) -> Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users.get(&external_id).cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let users = self.users.read().await;
        let mut all: Vec<User> = users.values().cloned().collect();
        all.sort_by_key(|u| u.created_at);
        Ok(all)
    }

    async fn set_user_active(&self, external_id: i64, active: bool) -> Result<Option<User>> {
        let mut users = self.users.write().await;
        Ok(users.get_mut(&external_id).map(|user| {
            user.is_active = active;
            user.clone()
        }))
    }

    async fn remove_user(&self, external_id: i64) -> Result<bool> {
        let mut users = self.users.write().await;
        Ok(users.remove(&external_id).is_some())
    }

    async fn commit_object(&self, token: Uuid, object: ConstructionObject) -> Result<Uuid> {
        let mut tokens = self.committed_object_tokens.write().await;
        if let Some(existing) = tokens.get(&token) {
            return Ok(*existing);
        }

        let object_id = object.object_id;
        {
            let mut objects = self.objects.write().await;
            objects.insert(object_id, object);
        }
        tokens.insert(token, object_id);
        Ok(object_id)
    }

    async fn object_by_id(&self, object_id: Uuid) -> Result<Option<ConstructionObject>> {
        let objects = self.objects.read().await;
        Ok(objects.get(&object_id).cloned())
    }

    async fn objects_by_status(&self, status: ObjectStatus) -> Result<Vec<ConstructionObject>> {
        let objects = self.objects.read().await;
        let mut matched: Vec<ConstructionObject> = objects
            .values()
            .filter(|obj| obj.status == status)
            .cloned()
            .collect();
        matched.sort_by_key(|obj| obj.created_at);
        Ok(matched)
    }

    async fn complete_object(&self, object_id: Uuid) -> Result<ConstructionObject> {
        let mut objects = self.objects.write().await;
        let object = objects
            .get_mut(&object_id)
            .ok_or_else(|| BotError::Validation(format!("object {} not found", object_id)))?;

        if object.status != ObjectStatus::Active {
            return Err(BotError::Conflict(format!(
                "object {} is already {}",
                object_id, object.status
            )));
        }

        object.status = ObjectStatus::Completed;
        object.completed_at = Some(Utc::now());
        Ok(object.clone())
    }

    async fn commit_entry(&self, token: Uuid, entry: LedgerEntry) -> Result<Uuid> {
        let mut tokens = self.committed_tokens.write().await;
        if let Some(existing) = tokens.get(&token) {
            return Ok(*existing);
        }

        let entry_id = entry.entry_id;
        {
            let mut entries = self.entries.write().await;
            entries.insert(entry_id, entry);
        }
        tokens.insert(token, entry_id);
        Ok(entry_id)
    }

    async fn entries_for_object(&self, object_id: Uuid) -> Result<Vec<LedgerEntry>> {
        let entries = self.entries.read().await;
        let mut matched: Vec<LedgerEntry> = entries
            .values()
            .filter(|entry| entry.object_id == object_id)
            .cloned()
            .collect();
        matched.sort_by_key(|entry| entry.created_at);
        Ok(matched)
    }

    async fn attach_file(&self, entry_id: Uuid, file_ref: FileRef) -> Result<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(&entry_id)
            .ok_or_else(|| BotError::Validation(format!("entry {} not found", entry_id)))?;
        entry.file_ref = Some(file_ref);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntryKind, ExpenseCategory, UserRole};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn sample_object(created_by: Uuid) -> ConstructionObject {
        ConstructionObject {
            object_id: Uuid::new_v4(),
            name: "Дом на Лесной".to_string(),
            address: "ул. Лесная, 5".to_string(),
            foreman_name: "Петров".to_string(),
            status: ObjectStatus::Active,
            prepayment: dec!(100000),
            final_payment: dec!(50000),
            contract_estimate: dec!(150000),
            discount: dec!(0),
            works_estimate: dec!(100000),
            consumables_estimate: dec!(20000),
            overhead_estimate: dec!(10000),
            transport_estimate: dec!(5000),
            created_by,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    fn sample_entry(object_id: Uuid, created_by: Uuid) -> LedgerEntry {
        LedgerEntry {
            entry_id: Uuid::new_v4(),
            object_id,
            kind: EntryKind::Expense {
                category: ExpenseCategory::Consumables,
            },
            amount: dec!(5000),
            date: NaiveDate::from_ymd_opt(2026, 8, 25).unwrap(),
            description: "Цемент".to_string(),
            file_ref: None,
            created_by,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn commit_is_idempotent_per_token() {
        let store = InMemoryLedgerStore::new();
        let user_id = Uuid::new_v4();
        let object = sample_object(user_id);
        let object_id = store.commit_object(Uuid::new_v4(), object).await.unwrap();

        let token = Uuid::new_v4();
        let first = store
            .commit_entry(token, sample_entry(object_id, user_id))
            .await
            .unwrap();
        let second = store
            .commit_entry(token, sample_entry(object_id, user_id))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(store.entries_for_object(object_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn distinct_tokens_create_distinct_entries() {
        let store = InMemoryLedgerStore::new();
        let user_id = Uuid::new_v4();
        let object_id = store
            .commit_object(Uuid::new_v4(), sample_object(user_id))
            .await
            .unwrap();

        store
            .commit_entry(Uuid::new_v4(), sample_entry(object_id, user_id))
            .await
            .unwrap();
        store
            .commit_entry(Uuid::new_v4(), sample_entry(object_id, user_id))
            .await
            .unwrap();

        assert_eq!(store.entries_for_object(object_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn object_commit_is_idempotent_per_token() {
        let store = InMemoryLedgerStore::new();
        let user_id = Uuid::new_v4();

        // A retransmitted confirm carries the same token but a freshly
        // built object value; only the first one may land.
        let token = Uuid::new_v4();
        let first = store
            .commit_object(token, sample_object(user_id))
            .await
            .unwrap();
        let second = store
            .commit_object(token, sample_object(user_id))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(
            store
                .objects_by_status(ObjectStatus::Active)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn completed_object_cannot_be_completed_again() {
        let store = InMemoryLedgerStore::new();
        let object_id = store
            .commit_object(Uuid::new_v4(), sample_object(Uuid::new_v4()))
            .await
            .unwrap();

        let completed = store.complete_object(object_id).await.unwrap();
        assert_eq!(completed.status, ObjectStatus::Completed);
        assert!(completed.completed_at.is_some());

        let err = store.complete_object(object_id).await.unwrap_err();
        assert!(matches!(err, BotError::Conflict(_)));
    }

    #[tokio::test]
    async fn duplicate_user_is_a_conflict() {
        let store = InMemoryLedgerStore::new();
        store
            .create_user(User::new(42, UserRole::Foreman, None))
            .await
            .unwrap();
        let err = store
            .create_user(User::new(42, UserRole::Admin, None))
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::Conflict(_)));
    }

    #[tokio::test]
    async fn attach_file_after_commit() {
        let store = InMemoryLedgerStore::new();
        let user_id = Uuid::new_v4();
        let object_id = store
            .commit_object(Uuid::new_v4(), sample_object(user_id))
            .await
            .unwrap();
        let entry_id = store
            .commit_entry(Uuid::new_v4(), sample_entry(object_id, user_id))
            .await
            .unwrap();

        let file_ref = FileRef {
            file_id: Uuid::new_v4(),
            filename: Some("receipt.jpg".to_string()),
            mime_type: Some("image/jpeg".to_string()),
            size: 1024,
            checksum: "ab".repeat(32),
        };
        store.attach_file(entry_id, file_ref.clone()).await.unwrap();

        let entries = store.entries_for_object(object_id).await.unwrap();
        assert_eq!(entries[0].file_ref, Some(file_ref));
    }
}
