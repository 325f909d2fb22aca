//! Gemini-backed extraction service
//!
//! Implements the `ExtractionService` contract over the Gemini
//! generateContent API. Uses a long-lived reqwest::Client for connection
//! pooling. Responses are required to be strict JSON; markdown fences
//! are stripped before parsing.

use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

use super::{CategoryHint, ExtractionService, RawExtraction};
use crate::error::{BotError, Result};
use crate::models::AudioRef;

const BASE_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent";

pub struct GeminiExtractor {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiExtractor {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: BASE_URL.to_string(),
        })
    }

    async fn generate(&self, parts: Vec<Part>, system_prompt: String) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(BotError::Extraction(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!("{}?key={}", self.base_url, self.api_key);

        let request = GeminiRequest {
            contents: vec![Content { parts }],
            generation_config: GenerationConfig {
                temperature: 0.1,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 256,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part::text(system_prompt)],
            },
        };

        info!("Calling Gemini extraction API");

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Gemini API error response: {}", error_text);
            return Err(BotError::Extraction(format!(
                "Gemini API error: {}",
                error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            BotError::Extraction(format!("Gemini parse error: {}", e))
        })?;

        gemini_response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .and_then(|p| p.text)
            .ok_or_else(|| BotError::Extraction("empty response from Gemini".to_string()))
    }
}

#[async_trait::async_trait]
impl ExtractionService for GeminiExtractor {
    async fn transcribe(&self, audio: &AudioRef) -> Result<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&audio.bytes);
        let parts = vec![
            Part::text("Транскрибируй эту аудиозапись на русском языке. Верни только текст без комментариев.".to_string()),
            Part::inline(audio.mime_type.clone(), encoded),
        ];

        self.generate(parts, "Ты - сервис транскрибации речи.".to_string())
            .await
            .map_err(|e| BotError::Transcription(e.to_string()))
    }

    async fn extract_fields(&self, text: &str, hint: CategoryHint) -> Result<RawExtraction> {
        let prompt = build_extraction_prompt(hint);
        let answer = self
            .generate(vec![Part::text(text.to_string())], prompt)
            .await?;

        let json_str = strip_json_fences(&answer);
        serde_json::from_str::<RawExtraction>(json_str).map_err(|e| {
            BotError::Extraction(format!("service returned non-JSON fields: {}", e))
        })
    }
}

/// System prompt steering extraction per category hint. Amounts and dates
/// are returned raw; all normalization happens in the adapter.
fn build_extraction_prompt(hint: CategoryHint) -> String {
    match hint {
        CategoryHint::Expense(category) => format!(
            r#"Ты - ассистент для извлечения данных о расходах ({}).
Извлеки из сообщения пользователя:
1. date - дата словами пользователя или в формате YYYY-MM-DD; null если не указана
2. amount - сумма как в сообщении (числом или словами)
3. description - краткое описание расхода

Верни результат СТРОГО в формате JSON:
{{"date": "...", "amount": "...", "description": "..."}}"#,
            category.label()
        ),
        CategoryHint::Advance => r#"Ты - ассистент для извлечения данных об авансах рабочим.
Извлеки из сообщения пользователя:
1. worker_name - имя рабочего
2. work_type - вид работ
3. amount - сумма аванса как в сообщении (числом или словами)
4. date - дата словами пользователя или в формате YYYY-MM-DD; null если не указана

Верни результат СТРОГО в формате JSON:
{"worker_name": "...", "work_type": "...", "amount": "...", "date": "..."}"#
            .to_string(),
    }
}

/// The model sometimes wraps its JSON in a ```json fenced block.
fn strip_json_fences(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    trimmed
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
    #[serde(rename = "systemInstruction")]
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "inlineData", skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            inline_data: None,
        }
    }

    fn inline(mime_type: String, data: String) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData { mime_type, data }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "topP")]
    top_p: f32,
    #[serde(rename = "topK")]
    top_k: i32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: i32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}
