//! Text analysis gateway
//!
//! [`TextAnalysis`] is the contract of the external provider. The
//! [`TextAnalysisGateway`] wraps a provider with a bounded timeout and turns
//! unsuccessful responses into [`GatewayError`]s, so callers only ever see a
//! value or an error they can degrade on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::GatewayError;

/// Response of a validation call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub success: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// What an analysis call should compute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "task")]
pub enum AnalysisTask {
    /// Expand text into search keywords
    Keywords,
    DetectLanguage,
    /// Score similarity of the text against `reference`, in `0.0..=1.0`
    Similarity { reference: String },
    /// Normalize text for storage alongside the original
    Process,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub text: String,
    #[serde(flatten)]
    pub task: AnalysisTask,
    pub context: String,
    #[serde(default)]
    pub options: Value,
}

impl AnalysisRequest {
    pub fn new(text: impl Into<String>, task: AnalysisTask, context: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            task,
            context: context.into(),
            options: Value::Null,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub processed: Option<Value>,
    #[serde(default)]
    pub similarity: Option<f64>,
}

/// Response of an analysis call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub success: bool,
    #[serde(default)]
    pub result: Option<AnalysisResult>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl AnalysisOutcome {
    pub fn ok(result: AnalysisResult) -> Self {
        Self {
            success: true,
            result: Some(result),
            confidence: None,
            error: None,
        }
    }
}

/// External text analysis provider
#[async_trait]
pub trait TextAnalysis: Send + Sync {
    async fn validate(&self, text: &str, context: &str) -> Result<ValidationOutcome, GatewayError>;

    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisOutcome, GatewayError>;
}

/// Timeout-bounded adapter over a [`TextAnalysis`] provider
#[derive(Clone)]
pub struct TextAnalysisGateway {
    provider: Arc<dyn TextAnalysis>,
    timeout: Duration,
}

impl std::fmt::Debug for TextAnalysisGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextAnalysisGateway")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl TextAnalysisGateway {
    pub fn new(provider: Arc<dyn TextAnalysis>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, GatewayError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| GatewayError::Timeout(self.timeout))?
    }

    /// Validation verdict; an unsuccessful verdict is returned as a value, not an error
    pub async fn validate(&self, text: &str, context: &str) -> Result<ValidationOutcome, GatewayError> {
        self.bounded(self.provider.validate(text, context)).await
    }

    async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisResult, GatewayError> {
        let outcome = self.bounded(self.provider.analyze(&request)).await?;
        if !outcome.success {
            return Err(GatewayError::Unsuccessful(
                outcome.error.unwrap_or_else(|| "no reason given".to_string()),
            ));
        }
        outcome.result.ok_or(GatewayError::MissingResult("result"))
    }

    /// Keyword expansion of `term`; the term itself always comes first
    pub async fn keywords(&self, term: &str, context: &str) -> Result<Vec<String>, GatewayError> {
        let result = self
            .analyze(AnalysisRequest::new(term, AnalysisTask::Keywords, context))
            .await?;
        let keywords = result
            .keywords
            .ok_or(GatewayError::MissingResult("keywords"))?;

        let mut seen = HashSet::new();
        Ok(std::iter::once(term.to_string())
            .chain(keywords)
            .map(|keyword| keyword.trim().to_string())
            .filter(|keyword| !keyword.is_empty() && seen.insert(keyword.to_lowercase()))
            .collect())
    }

    pub async fn detect_language(&self, text: &str, context: &str) -> Result<String, GatewayError> {
        self.analyze(AnalysisRequest::new(text, AnalysisTask::DetectLanguage, context))
            .await?
            .language
            .ok_or(GatewayError::MissingResult("language"))
    }

    /// Processed form and language of `text`
    pub async fn process(&self, text: &str, context: &str) -> Result<AnalysisResult, GatewayError> {
        self.analyze(AnalysisRequest::new(text, AnalysisTask::Process, context))
            .await
    }

    pub async fn similarity(&self, text: &str, reference: &str, context: &str) -> Result<f64, GatewayError> {
        let task = AnalysisTask::Similarity {
            reference: reference.to_string(),
        };
        self.analyze(AnalysisRequest::new(text, task, context))
            .await?
            .similarity
            .ok_or(GatewayError::MissingResult("similarity"))
    }
}
