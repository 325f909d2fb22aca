//! Event dispatcher
//!
//! Glue between the conversation channel and everything else: the auth
//! gate, command routing, the flow engine, extraction, commits and
//! report rendering. Extraction runs while no session lock is held, so
//! one user's slow voice message never blocks another user's flow.

use std::sync::Arc;

use chrono::Datelike;
use tracing::{info, warn};
use uuid::Uuid;

use crate::admin::{self, AdminCommand};
use crate::calc::{self, EstimateSheet};
use crate::channel::{ConversationChannel, InboundEvent};
use crate::error::{BotError, Result};
use crate::extraction::{CategoryHint, ExtractionAdapter, ExtractionInput};
use crate::files::{FileMetadata, FileStore};
use crate::flow::{steps, ConfirmAction, FlowEngine, FlowInput, FlowKind, FlowOutcome, InputKind};
use crate::flow::confirm;
use crate::models::{AudioRef, ConstructionObject, ObjectStatus, User};
use crate::report;
use crate::store::LedgerStore;

const MENU_TEXT: &str = "Доступные действия:\n\
    /objects — список объектов\n\
    Кнопки: добавить объект, расход, аванс, отчет, завершить объект\n\
    /cancel — отменить текущий диалог";

pub struct Dispatcher {
    store: Arc<dyn LedgerStore>,
    files: Arc<dyn FileStore>,
    adapter: ExtractionAdapter,
    flows: FlowEngine,
    channel: Arc<dyn ConversationChannel>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        files: Arc<dyn FileStore>,
        adapter: ExtractionAdapter,
        channel: Arc<dyn ConversationChannel>,
    ) -> Self {
        Self {
            store,
            files,
            adapter,
            flows: FlowEngine::new(),
            channel,
        }
    }

    /// Handle one inbound event end to end. Domain errors become a
    /// user-facing reply; only channel delivery failures propagate.
    pub async fn handle(&self, event: InboundEvent) -> Result<()> {
        let from = event.from();
        if let Err(e) = self.process(event).await {
            warn!(from, error = %e, "Event handling failed");
            self.channel.send(from, &e.user_message()).await?;
        }
        Ok(())
    }

    async fn process(&self, event: InboundEvent) -> Result<()> {
        let user = self.authorize(event.from()).await?;
        match event {
            InboundEvent::Text { text, .. } => self.handle_text(&user, &text).await,
            InboundEvent::Choice { data, .. } => self.handle_choice(&user, &data).await,
            InboundEvent::Audio { audio, .. } => self.handle_audio(&user, audio).await,
            InboundEvent::Photo {
                bytes,
                filename,
                mime_type,
                ..
            } => self.handle_photo(&user, bytes, filename, mime_type).await,
        }
    }

    /// Every event passes this gate; unknown and blocked users are
    /// rejected before any routing.
    async fn authorize(&self, external_id: i64) -> Result<User> {
        let user = self
            .store
            .user_by_external_id(external_id)
            .await?
            .ok_or_else(|| BotError::Authorization(format!("unknown user {}", external_id)))?;
        if !user.is_active {
            return Err(BotError::Authorization(format!(
                "blocked user {}",
                external_id
            )));
        }
        Ok(user)
    }

    async fn handle_text(&self, user: &User, text: &str) -> Result<()> {
        let trimmed = text.trim();
        let lowered = trimmed.to_lowercase();

        if lowered == "/cancel" || lowered == "отмена" {
            let reply = if self.flows.cancel(user.user_id).await {
                "Действие отменено."
            } else {
                "Нечего отменять."
            };
            return self.channel.send(user.external_id, reply).await;
        }
        if trimmed == "/start" {
            return self.channel.send(user.external_id, MENU_TEXT).await;
        }
        if trimmed == "/objects" {
            return self.list_objects(user).await;
        }
        if let Some(command) = AdminCommand::parse(trimmed) {
            let reply = admin::execute(self.store.as_ref(), user.external_id, command).await?;
            return self.channel.send(user.external_id, &reply).await;
        }

        // Photo follow-up accepts a skip keyword instead of a photo.
        if self.flows.awaiting_photo(user.user_id).await.is_some() {
            if lowered == "пропустить" {
                self.flows.clear(user.user_id).await;
                return self
                    .channel
                    .send(user.external_id, "Запись сохранена без фото.")
                    .await;
            }
            return self
                .channel
                .send(user.external_id, steps::PHOTO_STEP.prompt)
                .await;
        }

        match self.flows.expected_kind(user.user_id).await {
            Some(InputKind::Unstructured) => {
                self.run_extraction(user, ExtractionInput::Text(trimmed.to_string()))
                    .await
            }
            Some(_) => {
                let outcome = self
                    .flows
                    .advance(user.user_id, FlowInput::Text(trimmed.to_string()))
                    .await?;
                self.deliver(user, outcome).await
            }
            None => self.channel.send(user.external_id, MENU_TEXT).await,
        }
    }

    async fn handle_choice(&self, user: &User, data: &str) -> Result<()> {
        if data == "cancel" {
            self.flows.cancel(user.user_id).await;
            return self.channel.send(user.external_id, "Действие отменено.").await;
        }
        if let Some(action) = ConfirmAction::parse(data) {
            let outcome = self
                .flows
                .advance(user.user_id, FlowInput::Confirm(action))
                .await?;
            return self.deliver(user, outcome).await;
        }

        if data == "object:add" {
            self.require_admin(user)?;
            let outcome = self.flows.start(user.user_id, FlowKind::AddObject).await?;
            return self.deliver(user, outcome).await;
        }
        if let Some(rest) = data.strip_prefix("expense:add:") {
            let (category_raw, id_raw) = rest
                .split_once(':')
                .ok_or_else(|| BotError::Validation("Неизвестная команда.".to_string()))?;
            let category = crate::models::ExpenseCategory::parse(category_raw)
                .ok_or_else(|| BotError::Validation("Неизвестная категория.".to_string()))?;
            let object = self.active_object(id_raw).await?;
            let outcome = self
                .flows
                .start(
                    user.user_id,
                    FlowKind::AddExpense {
                        object_id: object.object_id,
                        category,
                    },
                )
                .await?;
            return self.deliver(user, outcome).await;
        }
        if let Some(id_raw) = data.strip_prefix("advance:add:") {
            let object = self.active_object(id_raw).await?;
            let outcome = self
                .flows
                .start(
                    user.user_id,
                    FlowKind::AddAdvance {
                        object_id: object.object_id,
                    },
                )
                .await?;
            return self.deliver(user, outcome).await;
        }
        if let Some(id_raw) = data.strip_prefix("object:complete:") {
            self.require_admin(user)?;
            let object_id = parse_object_id(id_raw)?;
            let object = match self.store.complete_object(object_id).await {
                Ok(object) => object,
                Err(BotError::Conflict(_)) => {
                    return Err(BotError::Conflict("Объект уже завершен.".to_string()));
                }
                Err(BotError::Validation(_)) => {
                    return Err(BotError::Validation("Объект не найден.".to_string()));
                }
                Err(e) => return Err(e),
            };
            info!(%object_id, "Object completed");
            return self
                .channel
                .send(
                    user.external_id,
                    &format!("Объект «{}» завершен.", object.name),
                )
                .await;
        }
        if let Some(id_raw) = data.strip_prefix("report:") {
            self.require_admin(user)?;
            let object_id = parse_object_id(id_raw)?;
            // Reports are available for completed objects too.
            self.store
                .object_by_id(object_id)
                .await?
                .ok_or_else(|| BotError::Validation("Объект не найден.".to_string()))?;
            let outcome = self
                .flows
                .start(user.user_id, FlowKind::ReportPeriod { object_id })
                .await?;
            return self.deliver(user, outcome).await;
        }

        Err(BotError::Validation("Неизвестная команда.".to_string()))
    }

    async fn handle_audio(&self, user: &User, audio: AudioRef) -> Result<()> {
        match self.flows.expected_kind(user.user_id).await {
            Some(InputKind::Unstructured) => {
                self.run_extraction(user, ExtractionInput::Audio(audio)).await
            }
            _ => Err(BotError::Validation(
                "Голосовое сообщение здесь не ожидается.".to_string(),
            )),
        }
    }

    async fn handle_photo(
        &self,
        user: &User,
        bytes: Vec<u8>,
        filename: Option<String>,
        mime_type: Option<String>,
    ) -> Result<()> {
        let entry_id = self
            .flows
            .awaiting_photo(user.user_id)
            .await
            .ok_or_else(|| BotError::Validation("Фото здесь не ожидается.".to_string()))?;

        let file_ref = self
            .files
            .store(bytes, FileMetadata {
                filename,
                mime_type,
            })
            .await?;
        self.store.attach_file(entry_id, file_ref).await?;
        self.flows.clear(user.user_id).await;
        info!(%entry_id, "Receipt attached");
        self.channel
            .send(user.external_id, "Фото чека прикреплено. Запись сохранена.")
            .await
    }

    /// Extraction runs here, outside any session lock. The flow is
    /// re-checked when the candidate comes back; a cancel issued while
    /// the service was busy simply drops the result.
    async fn run_extraction(&self, user: &User, input: ExtractionInput) -> Result<()> {
        let hint = match self.flows.current_flow(user.user_id).await {
            Some(FlowKind::AddExpense { category, .. }) => CategoryHint::Expense(category),
            Some(FlowKind::AddAdvance { .. }) => CategoryHint::Advance,
            _ => {
                return Err(BotError::Validation(
                    "Свободный ввод здесь не ожидается.".to_string(),
                ));
            }
        };

        let candidate = self.adapter.extract(input, hint).await?;
        let outcome = self
            .flows
            .advance(user.user_id, FlowInput::Candidate(candidate))
            .await?;
        self.deliver(user, outcome).await
    }

    async fn deliver(&self, user: &User, outcome: FlowOutcome) -> Result<()> {
        match outcome {
            FlowOutcome::Prompt { text }
            | FlowOutcome::AwaitConfirmation { text }
            | FlowOutcome::Rejected { text } => self.channel.send(user.external_id, &text).await,
            FlowOutcome::AlreadyCommitted => {
                self.channel
                    .send(user.external_id, "Запись уже сохранена.")
                    .await
            }
            FlowOutcome::CommitObject { token, draft } => {
                let object = draft.into_object(user.user_id);
                let name = object.name.clone();
                let object_id =
                    match confirm::commit_object_with_retry(self.store.as_ref(), token, &object)
                        .await
                    {
                        Ok(object_id) => object_id,
                        Err(e) => {
                            // Let the user confirm again with the same token.
                            self.flows.reopen_pending(user.user_id).await;
                            return Err(e);
                        }
                    };
                self.flows.clear(user.user_id).await;
                info!(%object_id, "Object created");
                self.channel
                    .send(user.external_id, &format!("Объект «{}» создан.", name))
                    .await
            }
            FlowOutcome::CommitEntry {
                token,
                object_id,
                category,
                candidate,
            } => {
                // Entries land only on active objects; the object may have
                // been completed while this conversation was open.
                let object = self
                    .store
                    .object_by_id(object_id)
                    .await?
                    .ok_or_else(|| BotError::Validation("Объект не найден.".to_string()))?;
                if object.status != ObjectStatus::Active {
                    self.flows.clear(user.user_id).await;
                    return Err(BotError::Conflict(
                        "Объект завершен, записи больше не принимаются.".to_string(),
                    ));
                }

                let entry = confirm::build_entry(object_id, category, &candidate, user.user_id)?;
                let entry_id =
                    confirm::commit_entry_with_retry(self.store.as_ref(), token, &entry).await?;
                self.flows.mark_entry_committed(user.user_id, entry_id).await;
                info!(%entry_id, %object_id, "Ledger entry committed");

                if category.is_some() {
                    self.channel
                        .send(user.external_id, steps::PHOTO_STEP.prompt)
                        .await
                } else {
                    self.flows.clear(user.user_id).await;
                    self.channel.send(user.external_id, "Аванс записан.").await
                }
            }
            FlowOutcome::ReportRequest {
                object_id,
                year,
                month,
            } => self.render_report(user, object_id, year, month).await,
        }
    }

    async fn render_report(
        &self,
        user: &User,
        object_id: Uuid,
        year: i32,
        month: u32,
    ) -> Result<()> {
        let object = self
            .store
            .object_by_id(object_id)
            .await?
            .ok_or_else(|| BotError::Validation("Объект не найден.".to_string()))?;
        let entries = self.store.entries_for_object(object_id).await?;
        let in_period: Vec<_> = entries
            .into_iter()
            .filter(|e| e.date.year() == year && e.date.month() == month)
            .collect();

        let actuals = calc::actual_totals(&in_period);
        let profit = calc::calculate(&EstimateSheet::from(&object), &actuals);
        let text = format!(
            "Период: {:02}.{}\n\n{}",
            month,
            year,
            report::object_report(&object, &actuals, &profit)
        );
        self.channel.send(user.external_id, &text).await
    }

    async fn list_objects(&self, user: &User) -> Result<()> {
        let objects = self.store.objects_by_status(ObjectStatus::Active).await?;
        if objects.is_empty() {
            return self
                .channel
                .send(user.external_id, "Активных объектов нет.")
                .await;
        }
        let mut out = String::from("Активные объекты:\n");
        for object in objects {
            out.push_str(&format!(
                "{} — {} ({})\n",
                object.name, object.address, object.object_id
            ));
        }
        self.channel.send(user.external_id, &out).await
    }

    async fn active_object(&self, id_raw: &str) -> Result<ConstructionObject> {
        let object_id = parse_object_id(id_raw)?;
        let object = self
            .store
            .object_by_id(object_id)
            .await?
            .ok_or_else(|| BotError::Validation("Объект не найден.".to_string()))?;
        if object.status != ObjectStatus::Active {
            return Err(BotError::Conflict(
                "Объект завершен, записи больше не принимаются.".to_string(),
            ));
        }
        Ok(object)
    }

    fn require_admin(&self, user: &User) -> Result<()> {
        if user.is_admin() {
            Ok(())
        } else {
            Err(BotError::Authorization(format!(
                "admin rights required for user {}",
                user.external_id
            )))
        }
    }
}

fn parse_object_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| BotError::Validation("Неизвестная команда.".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RecordingChannel;
    use crate::extraction::{RawExtraction, StubExtractionService};
    use crate::files::InMemoryFileStore;
    use crate::models::UserRole;
    use crate::store::InMemoryLedgerStore;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    const ADMIN_ID: i64 = 1;
    const FOREMAN_ID: i64 = 2;

    struct Harness {
        dispatcher: Dispatcher,
        store: Arc<InMemoryLedgerStore>,
        channel: Arc<RecordingChannel>,
    }

    async fn harness(stub: StubExtractionService) -> Harness {
        let store = Arc::new(InMemoryLedgerStore::new());
        store
            .create_user(User::new(ADMIN_ID, UserRole::Admin, None))
            .await
            .unwrap();
        store
            .create_user(User::new(FOREMAN_ID, UserRole::Foreman, None))
            .await
            .unwrap();
        let channel = Arc::new(RecordingChannel::new());
        let dispatcher = Dispatcher::new(
            store.clone(),
            Arc::new(InMemoryFileStore::new()),
            ExtractionAdapter::new(Arc::new(stub), Duration::from_millis(500)),
            channel.clone(),
        );
        Harness {
            dispatcher,
            store,
            channel,
        }
    }

    fn expense_fields() -> RawExtraction {
        RawExtraction {
            date: Some("2026-08-25".to_string()),
            amount: Some(serde_json::Value::String("пять тысяч".to_string())),
            description: Some("Цемент".to_string()),
            worker_name: None,
            work_type: None,
        }
    }

    async fn create_object(h: &Harness) -> Uuid {
        h.dispatcher
            .handle(InboundEvent::Choice {
                from: ADMIN_ID,
                data: "object:add".to_string(),
            })
            .await
            .unwrap();
        let answers = [
            "Дом на Лесной",
            "ул. Лесная, 12",
            "Петров",
            "400000",
            "300000",
            "1000000",
            "50000",
            "450000",
            "200000",
            "150000",
            "100000",
        ];
        for answer in answers {
            h.dispatcher
                .handle(InboundEvent::Text {
                    from: ADMIN_ID,
                    text: answer.to_string(),
                })
                .await
                .unwrap();
        }
        h.dispatcher
            .handle(InboundEvent::Choice {
                from: ADMIN_ID,
                data: "confirm".to_string(),
            })
            .await
            .unwrap();

        let objects = h.store.objects_by_status(ObjectStatus::Active).await.unwrap();
        assert_eq!(objects.len(), 1);
        objects[0].object_id
    }

    #[tokio::test]
    async fn unknown_and_blocked_users_are_denied() {
        let h = harness(StubExtractionService::failing("unused")).await;
        h.dispatcher
            .handle(InboundEvent::Text {
                from: 999,
                text: "/start".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(h.channel.last().await.unwrap().text, "Доступ запрещен.");

        h.store.set_user_active(FOREMAN_ID, false).await.unwrap();
        h.dispatcher
            .handle(InboundEvent::Text {
                from: FOREMAN_ID,
                text: "/start".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(h.channel.last().await.unwrap().text, "Доступ запрещен.");
    }

    #[tokio::test]
    async fn object_creation_round_trip() {
        let h = harness(StubExtractionService::failing("unused")).await;
        let object_id = create_object(&h).await;
        let object = h.store.object_by_id(object_id).await.unwrap().unwrap();
        assert_eq!(object.name, "Дом на Лесной");
        assert_eq!(object.works_estimate, dec!(450000));
        assert!(h.channel.last().await.unwrap().text.contains("создан"));
    }

    #[tokio::test]
    async fn object_creation_requires_admin() {
        let h = harness(StubExtractionService::failing("unused")).await;
        h.dispatcher
            .handle(InboundEvent::Choice {
                from: FOREMAN_ID,
                data: "object:add".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(h.channel.last().await.unwrap().text, "Доступ запрещен.");
    }

    #[tokio::test]
    async fn expense_path_commits_once_and_asks_for_photo() {
        let h = harness(StubExtractionService::returning(expense_fields())).await;
        let object_id = create_object(&h).await;

        h.dispatcher
            .handle(InboundEvent::Choice {
                from: FOREMAN_ID,
                data: format!("expense:add:CONSUMABLES:{}", object_id),
            })
            .await
            .unwrap();
        h.dispatcher
            .handle(InboundEvent::Text {
                from: FOREMAN_ID,
                text: "Купил цемент на пять тысяч".to_string(),
            })
            .await
            .unwrap();
        assert!(h
            .channel
            .last()
            .await
            .unwrap()
            .text
            .contains("Проверьте данные"));

        h.dispatcher
            .handle(InboundEvent::Choice {
                from: FOREMAN_ID,
                data: "confirm".to_string(),
            })
            .await
            .unwrap();
        assert!(h.channel.last().await.unwrap().text.contains("фото"));

        // Retransmitted confirm does not commit a second entry.
        h.dispatcher
            .handle(InboundEvent::Choice {
                from: FOREMAN_ID,
                data: "confirm".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(
            h.channel.last().await.unwrap().text,
            "Запись уже сохранена."
        );

        let entries = h.store.entries_for_object(object_id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].amount, dec!(5000.00));
    }

    #[tokio::test]
    async fn photo_attaches_to_committed_entry() {
        let h = harness(StubExtractionService::returning(expense_fields())).await;
        let object_id = create_object(&h).await;

        h.dispatcher
            .handle(InboundEvent::Choice {
                from: FOREMAN_ID,
                data: format!("expense:add:OVERHEAD:{}", object_id),
            })
            .await
            .unwrap();
        h.dispatcher
            .handle(InboundEvent::Text {
                from: FOREMAN_ID,
                text: "аренда лесов десять тысяч".to_string(),
            })
            .await
            .unwrap();
        h.dispatcher
            .handle(InboundEvent::Choice {
                from: FOREMAN_ID,
                data: "confirm".to_string(),
            })
            .await
            .unwrap();
        h.dispatcher
            .handle(InboundEvent::Photo {
                from: FOREMAN_ID,
                bytes: vec![1, 2, 3],
                filename: Some("receipt.jpg".to_string()),
                mime_type: Some("image/jpeg".to_string()),
            })
            .await
            .unwrap();

        let entries = h.store.entries_for_object(object_id).await.unwrap();
        assert!(entries[0].file_ref.is_some());
        assert!(h.channel.last().await.unwrap().text.contains("прикреплено"));
    }

    #[tokio::test]
    async fn advance_via_voice_records_worker() {
        let h = harness(StubExtractionService::returning(RawExtraction {
            date: None,
            amount: Some(serde_json::Value::Number(30000.into())),
            description: Some("Аванс за штукатурку".to_string()),
            worker_name: Some("Иванов".to_string()),
            work_type: Some("штукатурка".to_string()),
        }))
        .await;
        let object_id = create_object(&h).await;

        h.dispatcher
            .handle(InboundEvent::Choice {
                from: FOREMAN_ID,
                data: format!("advance:add:{}", object_id),
            })
            .await
            .unwrap();
        h.dispatcher
            .handle(InboundEvent::Audio {
                from: FOREMAN_ID,
                audio: AudioRef {
                    channel_file_id: "voice-1".to_string(),
                    bytes: vec![0; 16],
                    mime_type: "audio/ogg".to_string(),
                },
            })
            .await
            .unwrap();
        h.dispatcher
            .handle(InboundEvent::Choice {
                from: FOREMAN_ID,
                data: "confirm".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(h.channel.last().await.unwrap().text, "Аванс записан.");

        let entries = h.store.entries_for_object(object_id).await.unwrap();
        assert_eq!(entries.len(), 1);
        match &entries[0].kind {
            crate::models::EntryKind::Advance { worker_name, .. } => {
                assert_eq!(worker_name, "Иванов");
            }
            other => panic!("expected advance, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn completed_object_rejects_new_entries() {
        let h = harness(StubExtractionService::returning(expense_fields())).await;
        let object_id = create_object(&h).await;
        h.dispatcher
            .handle(InboundEvent::Choice {
                from: ADMIN_ID,
                data: format!("object:complete:{}", object_id),
            })
            .await
            .unwrap();
        assert!(h.channel.last().await.unwrap().text.contains("завершен"));

        h.dispatcher
            .handle(InboundEvent::Choice {
                from: FOREMAN_ID,
                data: format!("expense:add:TRANSPORT:{}", object_id),
            })
            .await
            .unwrap();
        assert!(h
            .channel
            .last()
            .await
            .unwrap()
            .text
            .contains("завершен"));
        assert!(h
            .store
            .entries_for_object(object_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn report_renders_for_selected_period() {
        let h = harness(StubExtractionService::returning(expense_fields())).await;
        let object_id = create_object(&h).await;

        h.dispatcher
            .handle(InboundEvent::Choice {
                from: FOREMAN_ID,
                data: format!("expense:add:CONSUMABLES:{}", object_id),
            })
            .await
            .unwrap();
        h.dispatcher
            .handle(InboundEvent::Text {
                from: FOREMAN_ID,
                text: "цемент пять тысяч".to_string(),
            })
            .await
            .unwrap();
        h.dispatcher
            .handle(InboundEvent::Choice {
                from: FOREMAN_ID,
                data: "confirm".to_string(),
            })
            .await
            .unwrap();
        h.dispatcher
            .handle(InboundEvent::Text {
                from: FOREMAN_ID,
                text: "пропустить".to_string(),
            })
            .await
            .unwrap();

        h.dispatcher
            .handle(InboundEvent::Choice {
                from: ADMIN_ID,
                data: format!("report:{}", object_id),
            })
            .await
            .unwrap();
        h.dispatcher
            .handle(InboundEvent::Text {
                from: ADMIN_ID,
                text: "2026".to_string(),
            })
            .await
            .unwrap();
        h.dispatcher
            .handle(InboundEvent::Text {
                from: ADMIN_ID,
                text: "8".to_string(),
            })
            .await
            .unwrap();

        let text = h.channel.last().await.unwrap().text;
        assert!(text.contains("Отчет по объекту: Дом на Лесной"));
        assert!(text.contains("Период: 08.2026"));
        // The August expense shows up in the actuals column.
        assert!(text.contains("5 000.00₽"));
    }

    #[tokio::test]
    async fn extraction_failure_reprompts_without_advancing() {
        let h = harness(StubExtractionService::failing("no amount")).await;
        let object_id = create_object(&h).await;

        h.dispatcher
            .handle(InboundEvent::Choice {
                from: FOREMAN_ID,
                data: format!("expense:add:CONSUMABLES:{}", object_id),
            })
            .await
            .unwrap();
        h.dispatcher
            .handle(InboundEvent::Text {
                from: FOREMAN_ID,
                text: "невнятный текст".to_string(),
            })
            .await
            .unwrap();
        assert!(h
            .channel
            .last()
            .await
            .unwrap()
            .text
            .contains("Не удалось разобрать"));
        assert!(h
            .store
            .entries_for_object(object_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn admin_commands_route_through_dispatcher() {
        let h = harness(StubExtractionService::failing("unused")).await;
        h.dispatcher
            .handle(InboundEvent::Text {
                from: ADMIN_ID,
                text: "/adduser 77 foreman Сидоров".to_string(),
            })
            .await
            .unwrap();
        assert!(h.channel.last().await.unwrap().text.contains("добавлен"));
        assert!(h
            .store
            .user_by_external_id(77)
            .await
            .unwrap()
            .is_some());
    }
}
