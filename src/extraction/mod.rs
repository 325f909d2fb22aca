//! Extraction adapter
//!
//! Narrow boundary around the external speech/language service: raw text
//! or transcribable audio plus a category hint goes in, a validated
//! `CandidateRecord` comes out. The service itself is a trait so the
//! parsing contract is testable against a stub.

pub mod gemini;
pub mod parse;

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{BotError, Result};
use crate::models::{AudioRef, CandidateRecord, ExpenseCategory};

/// What kind of record the caller expects; steers the service prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryHint {
    Expense(ExpenseCategory),
    Advance,
}

/// Loosely-typed fields as returned by the external service, before
/// deterministic normalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawExtraction {
    pub date: Option<String>,
    pub amount: Option<serde_json::Value>,
    pub description: Option<String>,
    pub worker_name: Option<String>,
    pub work_type: Option<String>,
}

/// External extraction capability. Transcription failures and extraction
/// failures are distinct error kinds.
#[async_trait::async_trait]
pub trait ExtractionService: Send + Sync {
    async fn transcribe(&self, audio: &AudioRef) -> Result<String>;
    async fn extract_fields(&self, text: &str, hint: CategoryHint) -> Result<RawExtraction>;
}

#[derive(Debug, Clone)]
pub enum ExtractionInput {
    Text(String),
    Audio(AudioRef),
}

/// Adapter owning the external service plus the timeout policy. The
/// calling flow suspends on `extract`; a timeout converts into an
/// `Extraction` error instead of blocking indefinitely.
pub struct ExtractionAdapter {
    service: Arc<dyn ExtractionService>,
    timeout: Duration,
}

impl ExtractionAdapter {
    pub fn new(service: Arc<dyn ExtractionService>, timeout: Duration) -> Self {
        Self { service, timeout }
    }

    pub async fn extract(
        &self,
        input: ExtractionInput,
        hint: CategoryHint,
    ) -> Result<CandidateRecord> {
        let text = match input {
            ExtractionInput::Text(text) => text,
            ExtractionInput::Audio(audio) => {
                let transcribed = tokio::time::timeout(self.timeout, self.service.transcribe(&audio))
                    .await
                    .map_err(|_| BotError::Transcription("transcription timed out".to_string()))??;
                if transcribed.trim().is_empty() {
                    return Err(BotError::Transcription(
                        "empty transcription result".to_string(),
                    ));
                }
                debug!(len = transcribed.len(), "Voice transcribed");
                transcribed
            }
        };

        let raw = tokio::time::timeout(self.timeout, self.service.extract_fields(&text, hint))
            .await
            .map_err(|_| BotError::Extraction("extraction timed out".to_string()))??;

        self.normalize(raw, hint, Utc::now().date_naive())
    }

    /// Deterministic part of the contract: identical raw fields always
    /// produce an identical candidate (given the same reference date).
    fn normalize(
        &self,
        raw: RawExtraction,
        hint: CategoryHint,
        today: NaiveDate,
    ) -> Result<CandidateRecord> {
        let amount_raw = match raw.amount {
            Some(serde_json::Value::String(s)) => s,
            Some(serde_json::Value::Number(n)) => n.to_string(),
            Some(other) => {
                warn!(?other, "Unexpected amount shape from extraction service");
                return Err(BotError::Extraction("amount missing".to_string()));
            }
            None => return Err(BotError::Extraction("amount missing".to_string())),
        };

        let amount = parse::parse_amount(&amount_raw)?;
        let date = parse::resolve_date(raw.date.as_deref(), today)?;
        let description = raw.description.unwrap_or_default().trim().to_string();

        let (worker_name, work_type) = match hint {
            CategoryHint::Advance => {
                let worker = raw
                    .worker_name
                    .map(|w| w.trim().to_string())
                    .filter(|w| !w.is_empty())
                    .ok_or_else(|| BotError::Extraction("worker name missing".to_string()))?;
                (Some(worker), raw.work_type)
            }
            CategoryHint::Expense(_) => (None, None),
        };

        Ok(CandidateRecord {
            date,
            amount,
            description,
            worker_name,
            work_type,
        })
    }
}

/// Canned service for unit tests and the demo binary.
pub struct StubExtractionService {
    pub transcript: Option<String>,
    pub fields: std::result::Result<RawExtraction, String>,
    pub delay: Option<Duration>,
}

impl StubExtractionService {
    pub fn returning(fields: RawExtraction) -> Self {
        Self {
            transcript: Some("распознанный текст".to_string()),
            fields: Ok(fields),
            delay: None,
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            transcript: None,
            fields: Err(reason.to_string()),
            delay: None,
        }
    }
}

#[async_trait::async_trait]
impl ExtractionService for StubExtractionService {
    async fn transcribe(&self, _audio: &AudioRef) -> Result<String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.transcript
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| BotError::Transcription("stub transcription failure".to_string()))
    }

    async fn extract_fields(&self, _text: &str, _hint: CategoryHint) -> Result<RawExtraction> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.fields
            .clone()
            .map_err(BotError::Extraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn adapter(service: StubExtractionService) -> ExtractionAdapter {
        ExtractionAdapter::new(Arc::new(service), Duration::from_millis(200))
    }

    fn raw(amount: &str, date: Option<&str>, description: &str) -> RawExtraction {
        RawExtraction {
            date: date.map(String::from),
            amount: Some(serde_json::Value::String(amount.to_string())),
            description: Some(description.to_string()),
            worker_name: None,
            work_type: None,
        }
    }

    #[tokio::test]
    async fn extracts_expense_candidate() {
        let adapter = adapter(StubExtractionService::returning(raw(
            "пять тысяч",
            Some("2026-08-25"),
            "Цемент",
        )));
        let record = adapter
            .extract(
                ExtractionInput::Text("Купил цемент на пять тысяч 25 августа".to_string()),
                CategoryHint::Expense(ExpenseCategory::Consumables),
            )
            .await
            .unwrap();

        assert_eq!(record.amount, dec!(5000.00));
        assert_eq!(record.description, "Цемент");
        assert_eq!(
            record.date,
            chrono::NaiveDate::from_ymd_opt(2026, 8, 25).unwrap()
        );
    }

    #[tokio::test]
    async fn identical_input_yields_identical_candidate() {
        let make = || {
            adapter(StubExtractionService::returning(raw(
                "3 500,50 руб",
                Some("2026-01-10"),
                "Доставка",
            )))
        };
        let input = || {
            (
                ExtractionInput::Text("Доставка 3500".to_string()),
                CategoryHint::Expense(ExpenseCategory::Transport),
            )
        };
        let (i1, h1) = input();
        let (i2, h2) = input();
        let a = make().extract(i1, h1).await.unwrap();
        let b = make().extract(i2, h2).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn missing_amount_is_extraction_failure() {
        let mut fields = raw("5000", None, "x");
        fields.amount = None;
        let adapter = adapter(StubExtractionService::returning(fields));
        let err = adapter
            .extract(
                ExtractionInput::Text("…".to_string()),
                CategoryHint::Expense(ExpenseCategory::Overhead),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::Extraction(_)));
    }

    #[tokio::test]
    async fn advance_requires_worker_name() {
        let adapter = adapter(StubExtractionService::returning(raw(
            "15000",
            None,
            "Кладка",
        )));
        let err = adapter
            .extract(
                ExtractionInput::Text("Аванс 15000".to_string()),
                CategoryHint::Advance,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::Extraction(_)));
    }

    #[tokio::test]
    async fn timeout_maps_to_extraction_failure() {
        let mut service = StubExtractionService::returning(raw("5000", None, "x"));
        service.delay = Some(Duration::from_millis(500));
        let adapter = ExtractionAdapter::new(Arc::new(service), Duration::from_millis(20));
        let err = adapter
            .extract(
                ExtractionInput::Text("…".to_string()),
                CategoryHint::Expense(ExpenseCategory::Consumables),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::Extraction(_)));
    }

    #[tokio::test]
    async fn transcription_failure_is_distinct() {
        let adapter = adapter(StubExtractionService::failing("no parse"));
        let audio = AudioRef {
            channel_file_id: "f1".to_string(),
            bytes: vec![0u8; 4],
            mime_type: "audio/ogg".to_string(),
        };
        let err = adapter
            .extract(ExtractionInput::Audio(audio), CategoryHint::Advance)
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::Transcription(_)));
    }
}
