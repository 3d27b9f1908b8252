//! Pluggable extraction backend for `Extract` steps (§4.7, design note 9: "the
//! engine must not embed an extractor implementation").
//!
//! The engine only needs a source value, a prompt, and an optional target
//! schema name; what turns that into structured output (an LLM call, a
//! regex, a hand-written parser) is the caller's choice.

use async_trait::async_trait;
use serde_json::Value;

use super::error::WorkflowError;

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, source: &Value, prompt: &str, schema_name: Option<&str>) -> Result<Value, WorkflowError>;
}

/// An `Extractor` that delegates to an `LlmClient`, asking it to return JSON
/// matching the (freeform) schema name and parsing the response.
pub struct LlmExtractor {
    llm: std::sync::Arc<dyn crate::llm::LlmClient>,
}

impl LlmExtractor {
    pub fn new(llm: std::sync::Arc<dyn crate::llm::LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Extractor for LlmExtractor {
    async fn extract(&self, source: &Value, prompt: &str, schema_name: Option<&str>) -> Result<Value, WorkflowError> {
        use crate::llm::{CompletionRequest, Message};

        let schema_hint = schema_name
            .map(|s| format!(" Respond with JSON matching the '{s}' schema."))
            .unwrap_or_else(|| " Respond with a single JSON value.".to_string());
        let system_prompt = format!("Extract structured data from the given input.{schema_hint}");
        let user_text = format!("{prompt}\n\nInput:\n{source}");

        let request = CompletionRequest {
            system_prompt,
            messages: vec![Message::user(user_text)],
            tools: vec![],
            max_tokens: 2048,
        };

        let response = self
            .llm
            .complete(request)
            .await
            .map_err(|e| WorkflowError::SchemaValidationFailure(e.to_string()))?;

        let text = response
            .content
            .ok_or_else(|| WorkflowError::SchemaValidationFailure("extractor LLM returned no content".to_string()))?;

        serde_json::from_str(text.trim())
            .or_else(|_| Ok(Value::String(text)))
            .map_err(|_: serde_json::Error| WorkflowError::SchemaValidationFailure("unreachable".to_string()))
    }
}

/// Canned-response extractor for tests, mirroring `llm::client::mock::MockLlmClient`.
#[cfg(test)]
pub struct MockExtractor {
    pub responses: std::sync::Mutex<Vec<Value>>,
}

#[cfg(test)]
impl MockExtractor {
    pub fn new(responses: Vec<Value>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl Extractor for MockExtractor {
    async fn extract(&self, _source: &Value, _prompt: &str, _schema_name: Option<&str>) -> Result<Value, WorkflowError> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(WorkflowError::SchemaValidationFailure("no more mock responses".to_string()));
        }
        Ok(responses.remove(0))
    }
}
