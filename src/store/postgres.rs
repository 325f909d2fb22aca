//! Postgres-backed ledger store
//!
//! Durable implementation of `LedgerStore` over sqlx. Schema is created
//! lazily on first use; the `commit_token` unique columns on objects and
//! ledger entries are the database-level at-most-once guard for commits.

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;
use uuid::Uuid;

use super::LedgerStore;
use crate::error::{BotError, Result};
use crate::models::{
    ConstructionObject, EntryKind, ExpenseCategory, FileRef, LedgerEntry, ObjectStatus, User,
    UserRole,
};

pub struct PgLedgerStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

fn db_err(context: &str, e: sqlx::Error) -> BotError {
    BotError::Persistence(format!("{}: {}", context, e))
}

impl PgLedgerStore {
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .map_err(|e| db_err("failed to build pool", e))?;

        info!("Ledger store backend: postgres");
        Ok(Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        })
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS users (
                      user_id UUID PRIMARY KEY,
                      external_id BIGINT NOT NULL UNIQUE,
                      username TEXT,
                      full_name TEXT,
                      role TEXT NOT NULL,
                      is_active BOOLEAN NOT NULL DEFAULT TRUE,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS objects (
                      object_id UUID PRIMARY KEY,
                      commit_token UUID NOT NULL UNIQUE,
                      name TEXT NOT NULL,
                      address TEXT NOT NULL,
                      foreman_name TEXT NOT NULL,
                      status TEXT NOT NULL,
                      prepayment NUMERIC(14,2) NOT NULL,
                      final_payment NUMERIC(14,2) NOT NULL,
                      contract_estimate NUMERIC(14,2) NOT NULL,
                      discount NUMERIC(14,2) NOT NULL,
                      works_estimate NUMERIC(14,2) NOT NULL,
                      consumables_estimate NUMERIC(14,2) NOT NULL,
                      overhead_estimate NUMERIC(14,2) NOT NULL,
                      transport_estimate NUMERIC(14,2) NOT NULL,
                      created_by UUID NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                      completed_at TIMESTAMPTZ
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS ledger_entries (
                      entry_id UUID PRIMARY KEY,
                      commit_token UUID NOT NULL UNIQUE,
                      object_id UUID NOT NULL REFERENCES objects(object_id),
                      kind TEXT NOT NULL,
                      category TEXT,
                      worker_name TEXT,
                      work_type TEXT,
                      amount NUMERIC(14,2) NOT NULL CHECK (amount > 0),
                      entry_date DATE NOT NULL,
                      description TEXT NOT NULL,
                      file_ref JSONB,
                      created_by UUID NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_ledger_entries_object
                    ON ledger_entries (object_id, created_at);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| db_err("failed to initialize ledger schema", e))?;

        Ok(())
    }

    fn role_to_db(role: UserRole) -> &'static str {
        match role {
            UserRole::Admin => "ADMIN",
            UserRole::Foreman => "FOREMAN",
        }
    }

    fn role_from_db(role: &str) -> UserRole {
        match role {
            "ADMIN" => UserRole::Admin,
            _ => UserRole::Foreman,
        }
    }

    fn status_to_db(status: ObjectStatus) -> &'static str {
        match status {
            ObjectStatus::Active => "ACTIVE",
            ObjectStatus::Completed => "COMPLETED",
        }
    }

    fn status_from_db(status: &str) -> ObjectStatus {
        match status {
            "COMPLETED" => ObjectStatus::Completed,
            _ => ObjectStatus::Active,
        }
    }

    fn user_from_row(row: &sqlx::postgres::PgRow) -> Result<User> {
        let role: String = row.try_get("role").map_err(|e| db_err("users.role", e))?;
        Ok(User {
            user_id: row.try_get("user_id").map_err(|e| db_err("users.user_id", e))?,
            external_id: row
                .try_get("external_id")
                .map_err(|e| db_err("users.external_id", e))?,
            username: row.try_get("username").ok(),
            full_name: row.try_get("full_name").ok(),
            role: Self::role_from_db(&role),
            is_active: row
                .try_get("is_active")
                .map_err(|e| db_err("users.is_active", e))?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| db_err("users.created_at", e))?,
        })
    }

    fn object_from_row(row: &sqlx::postgres::PgRow) -> Result<ConstructionObject> {
        let status: String = row
            .try_get("status")
            .map_err(|e| db_err("objects.status", e))?;
        let money = |col: &str| -> Result<Decimal> {
            row.try_get(col).map_err(|e| db_err(col, e))
        };
        Ok(ConstructionObject {
            object_id: row
                .try_get("object_id")
                .map_err(|e| db_err("objects.object_id", e))?,
            name: row.try_get("name").map_err(|e| db_err("objects.name", e))?,
            address: row
                .try_get("address")
                .map_err(|e| db_err("objects.address", e))?,
            foreman_name: row
                .try_get("foreman_name")
                .map_err(|e| db_err("objects.foreman_name", e))?,
            status: Self::status_from_db(&status),
            prepayment: money("prepayment")?,
            final_payment: money("final_payment")?,
            contract_estimate: money("contract_estimate")?,
            discount: money("discount")?,
            works_estimate: money("works_estimate")?,
            consumables_estimate: money("consumables_estimate")?,
            overhead_estimate: money("overhead_estimate")?,
            transport_estimate: money("transport_estimate")?,
            created_by: row
                .try_get("created_by")
                .map_err(|e| db_err("objects.created_by", e))?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| db_err("objects.created_at", e))?,
            completed_at: row.try_get("completed_at").ok(),
        })
    }

    fn entry_from_row(row: &sqlx::postgres::PgRow) -> Result<LedgerEntry> {
        let kind: String = row
            .try_get("kind")
            .map_err(|e| db_err("ledger_entries.kind", e))?;
        let kind = match kind.as_str() {
            "ADVANCE" => EntryKind::Advance {
                worker_name: row.try_get("worker_name").unwrap_or_default(),
                work_type: row.try_get("work_type").unwrap_or_default(),
            },
            _ => {
                let category: String = row
                    .try_get("category")
                    .map_err(|e| db_err("ledger_entries.category", e))?;
                EntryKind::Expense {
                    category: ExpenseCategory::parse(&category).ok_or_else(|| {
                        BotError::Persistence(format!("unknown expense category: {}", category))
                    })?,
                }
            }
        };

        let file_ref: Option<serde_json::Value> = row.try_get("file_ref").ok();
        let file_ref = file_ref
            .map(serde_json::from_value::<FileRef>)
            .transpose()?;

        Ok(LedgerEntry {
            entry_id: row
                .try_get("entry_id")
                .map_err(|e| db_err("ledger_entries.entry_id", e))?,
            object_id: row
                .try_get("object_id")
                .map_err(|e| db_err("ledger_entries.object_id", e))?,
            kind,
            amount: row
                .try_get("amount")
                .map_err(|e| db_err("ledger_entries.amount", e))?,
            date: row
                .try_get("entry_date")
                .map_err(|e| db_err("ledger_entries.entry_date", e))?,
            description: row
                .try_get("description")
                .map_err(|e| db_err("ledger_entries.description", e))?,
            file_ref,
            created_by: row
                .try_get("created_by")
                .map_err(|e| db_err("ledger_entries.created_by", e))?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| db_err("ledger_entries.created_at", e))?,
        })
    }
}

#[async_trait::async_trait]
impl LedgerStore for PgLedgerStore {
    async fn create_user(&self, user: User) -> Result<Uuid> {
        self.ensure_schema().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO users (user_id, external_id, username, full_name, role, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (external_id) DO NOTHING
            "#,
        )
        .bind(user.user_id)
        .bind(user.external_id)
        .bind(&user.username)
        .bind(&user.full_name)
        .bind(Self::role_to_db(user.role))
        .bind(user.is_active)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to insert user", e))?;

        if result.rows_affected() == 0 {
            return Err(BotError::Conflict(format!(
                "user {} already exists",
                user.external_id
            )));
        }
        Ok(user.user_id)
    }

    async fn user_by_external_id(&self, external_id: i64) -> Result<Option<User>> {
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT * FROM users WHERE external_id = $1")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err("failed to load user", e))?;

        row.as_ref().map(Self::user_from_row).transpose()
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        self.ensure_schema().await?;

        let rows = sqlx::query("SELECT * FROM users ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err("failed to list users", e))?;

        rows.iter().map(Self::user_from_row).collect()
    }

    async fn set_user_active(&self, external_id: i64, active: bool) -> Result<Option<User>> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            "UPDATE users SET is_active = $2 WHERE external_id = $1 RETURNING *",
        )
        .bind(external_id)
        .bind(active)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("failed to update user status", e))?;

        row.as_ref().map(Self::user_from_row).transpose()
    }

    async fn remove_user(&self, external_id: i64) -> Result<bool> {
        self.ensure_schema().await?;

        let result = sqlx::query("DELETE FROM users WHERE external_id = $1")
            .bind(external_id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err("failed to delete user", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn commit_object(&self, token: Uuid, object: ConstructionObject) -> Result<Uuid> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO objects
              (object_id, commit_token, name, address, foreman_name, status,
               prepayment, final_payment, contract_estimate, discount,
               works_estimate, consumables_estimate, overhead_estimate, transport_estimate,
               created_by, created_at, completed_at)
            VALUES
              ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (commit_token) DO NOTHING
            "#,
        )
        .bind(object.object_id)
        .bind(token)
        .bind(&object.name)
        .bind(&object.address)
        .bind(&object.foreman_name)
        .bind(Self::status_to_db(object.status))
        .bind(object.prepayment)
        .bind(object.final_payment)
        .bind(object.contract_estimate)
        .bind(object.discount)
        .bind(object.works_estimate)
        .bind(object.consumables_estimate)
        .bind(object.overhead_estimate)
        .bind(object.transport_estimate)
        .bind(object.created_by)
        .bind(object.created_at)
        .bind(object.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to insert object", e))?;

        // Read back by token: a replayed confirm returns the id of the
        // object that actually landed.
        let row = sqlx::query("SELECT object_id FROM objects WHERE commit_token = $1")
            .bind(token)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_err("failed to read back committed object", e))?;

        row.try_get("object_id")
            .map_err(|e| db_err("objects.object_id", e))
    }

    async fn object_by_id(&self, object_id: Uuid) -> Result<Option<ConstructionObject>> {
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT * FROM objects WHERE object_id = $1")
            .bind(object_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err("failed to load object", e))?;

        row.as_ref().map(Self::object_from_row).transpose()
    }

    async fn objects_by_status(&self, status: ObjectStatus) -> Result<Vec<ConstructionObject>> {
        self.ensure_schema().await?;

        let rows = sqlx::query("SELECT * FROM objects WHERE status = $1 ORDER BY created_at")
            .bind(Self::status_to_db(status))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err("failed to list objects", e))?;

        rows.iter().map(Self::object_from_row).collect()
    }

    async fn complete_object(&self, object_id: Uuid) -> Result<ConstructionObject> {
        self.ensure_schema().await?;

        // The status guard lives in the WHERE clause so a concurrent
        // completion cannot apply twice.
        let row = sqlx::query(
            r#"
            UPDATE objects SET status = 'COMPLETED', completed_at = $2
            WHERE object_id = $1 AND status = 'ACTIVE'
            RETURNING *
            "#,
        )
        .bind(object_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("failed to complete object", e))?;

        match row {
            Some(row) => Self::object_from_row(&row),
            None => Err(BotError::Conflict(format!(
                "object {} is not active",
                object_id
            ))),
        }
    }

    async fn commit_entry(&self, token: Uuid, entry: LedgerEntry) -> Result<Uuid> {
        self.ensure_schema().await?;

        let (kind, category, worker_name, work_type) = match &entry.kind {
            EntryKind::Expense { category } => {
                ("EXPENSE", Some(category.as_str()), None, None)
            }
            EntryKind::Advance {
                worker_name,
                work_type,
            } => (
                "ADVANCE",
                None,
                Some(worker_name.as_str()),
                Some(work_type.as_str()),
            ),
        };

        let file_ref = entry
            .file_ref
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO ledger_entries
              (entry_id, commit_token, object_id, kind, category, worker_name, work_type,
               amount, entry_date, description, file_ref, created_by, created_at)
            VALUES
              ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (commit_token) DO NOTHING
            "#,
        )
        .bind(entry.entry_id)
        .bind(token)
        .bind(entry.object_id)
        .bind(kind)
        .bind(category)
        .bind(worker_name)
        .bind(work_type)
        .bind(entry.amount)
        .bind(entry.date)
        .bind(&entry.description)
        .bind(file_ref)
        .bind(entry.created_by)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to commit ledger entry", e))?;

        // Read back by token: on a duplicate confirm this returns the
        // entry id of the original commit.
        let row = sqlx::query("SELECT entry_id FROM ledger_entries WHERE commit_token = $1")
            .bind(token)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_err("failed to read back committed entry", e))?;

        row.try_get("entry_id")
            .map_err(|e| db_err("ledger_entries.entry_id", e))
    }

    async fn entries_for_object(&self, object_id: Uuid) -> Result<Vec<LedgerEntry>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            "SELECT * FROM ledger_entries WHERE object_id = $1 ORDER BY created_at",
        )
        .bind(object_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("failed to list ledger entries", e))?;

        rows.iter().map(Self::entry_from_row).collect()
    }

    async fn attach_file(&self, entry_id: Uuid, file_ref: FileRef) -> Result<()> {
        self.ensure_schema().await?;

        let result = sqlx::query("UPDATE ledger_entries SET file_ref = $2 WHERE entry_id = $1")
            .bind(entry_id)
            .bind(serde_json::to_value(&file_ref)?)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err("failed to attach file", e))?;

        if result.rows_affected() == 0 {
            return Err(BotError::Validation(format!(
                "entry {} not found",
                entry_id
            )));
        }
        Ok(())
    }
}
