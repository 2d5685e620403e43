//! Contract between the engine and the tree-sitter language providers.
//!
//! Providers live outside this workspace; the server only needs the trait
//! and the data shapes that cross the boundary.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use crate::error::MorfxErr;
use crate::error::Result;

/// A named node the caller wants to address, e.g. `{type: "function",
/// name: "main"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
}

impl std::fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformMethod {
    Replace,
    Delete,
    InsertBefore,
    InsertAfter,
    Append,
}

impl TransformMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            TransformMethod::Replace => "replace",
            TransformMethod::Delete => "delete",
            TransformMethod::InsertBefore => "insert_before",
            TransformMethod::InsertAfter => "insert_after",
            TransformMethod::Append => "append",
        }
    }
}

impl std::fmt::Display for TransformMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentQuery {
    pub target: TargetSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMatch {
    pub kind: String,
    pub name: String,
    pub line: u32,
    pub column: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub matches: Vec<QueryMatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformOp {
    pub method: TransformMethod,
    pub target: TargetSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfidenceLevel::Low => "low",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::High => "high",
        }
    }
}

impl std::fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider-reported score in `[0, 1]` with itemised factors explaining it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Confidence {
    pub score: f64,
    pub level: ConfidenceLevel,
    pub factors: Vec<ConfidenceFactor>,
}

impl Confidence {
    /// Categorise a raw score the way providers are expected to.
    pub fn from_score(score: f64) -> Self {
        let level = if score >= 0.8 {
            ConfidenceLevel::High
        } else if score >= 0.5 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        };
        Self {
            score,
            level,
            factors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceFactor {
    pub name: String,
    pub impact: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformResult {
    pub modified: String,
    pub diff: String,
    pub confidence: Confidence,
    pub match_count: u32,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

pub trait Provider: Send + Sync {
    fn language(&self) -> &'static str;

    fn query(&self, source: &str, query: &AgentQuery) -> Result<QueryResult>;

    fn transform(&self, source: &str, op: &TransformOp) -> Result<TransformResult>;
}

/// Language name to provider. Built once at startup and handed to the
/// server as an explicit dependency.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers
            .insert(provider.language().to_string(), provider);
    }

    pub fn get(&self, language: &str) -> Result<Arc<dyn Provider>> {
        self.providers
            .get(language)
            .cloned()
            .ok_or_else(|| MorfxErr::LanguageNotFound(language.to_string()))
    }

    pub fn languages(&self) -> Vec<String> {
        let mut languages: Vec<String> = self.providers.keys().cloned().collect();
        languages.sort();
        languages
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
