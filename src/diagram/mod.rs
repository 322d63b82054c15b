//! Architecture diagram pipeline.
//!
//! Three LLM stages: prose explanation of the architecture, binding of
//! components to concrete repository paths, and flowchart synthesis. The
//! post-processor enforces the structural invariants from
//! [`graph`]; each LLM-facing stage gets exactly one repair round before the
//! pipeline fails with `validation_failed`.

pub mod graph;
mod prompts;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::ingest::tree::paths_from_rendered;
use crate::llm::{strip_code_fences, ChatMessage, ChatParams, LlmClient};
use graph::Diagram;

/// One component bound to repository paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentMapping {
    pub component: String,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub role: String,
}

/// Output of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagramResult {
    /// Validated flowchart text.
    pub diagram_code: String,
    /// The stage-1 prose explanation.
    pub explanation: String,
}

/// The three-stage diagram pipeline with an in-process result cache.
pub struct DiagramPipeline {
    llm: Arc<dyn LlmClient>,
    model_id: String,
    cache: Mutex<HashMap<String, DiagramResult>>,
}

impl DiagramPipeline {
    /// Create a pipeline over the given LLM.
    pub fn new(llm: Arc<dyn LlmClient>, model_id: impl Into<String>) -> Self {
        Self {
            llm,
            model_id: model_id.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Cache key for a full diagram result.
    pub fn cache_key(&self, normalized_url: &str, content_hash: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(normalized_url.as_bytes());
        hasher.update(content_hash.as_bytes());
        hasher.update(self.model_id.as_bytes());
        crate::ingest::hex(&hasher.finalize())
    }

    /// Run the pipeline for a rendered file tree and README.
    ///
    /// When `cache_key` is given and a cached result exists it is returned
    /// without touching the LLM.
    ///
    /// # Errors
    ///
    /// `validation_failed` when a stage's output still fails after its
    /// repair round; provider errors pass through.
    pub async fn generate(
        &self,
        tree_text: &str,
        readme: &str,
        cache_key: Option<&str>,
    ) -> Result<DiagramResult> {
        if let Some(key) = cache_key {
            if let Ok(cache) = self.cache.lock() {
                if let Some(hit) = cache.get(key) {
                    tracing::debug!(key, "diagram cache hit");
                    return Ok(hit.clone());
                }
            }
        }

        let explanation = self.explain(tree_text, readme).await?;
        let mapping = self.map_components(&explanation, tree_text).await?;
        let mapping_json =
            serde_json::to_string_pretty(&mapping).unwrap_or_else(|_| "[]".to_owned());
        let diagram_code = self.synthesize(&explanation, &mapping_json).await?;

        let result = DiagramResult {
            diagram_code,
            explanation,
        };
        if let Some(key) = cache_key {
            if let Ok(mut cache) = self.cache.lock() {
                cache.insert(key.to_owned(), result.clone());
            }
        }
        Ok(result)
    }

    /// Stage 1: prose description of the architecture.
    async fn explain(&self, tree_text: &str, readme: &str) -> Result<String> {
        let params = ChatParams::default()
            .with_temperature(0.3)
            .with_max_output_tokens(1_200)
            .with_system(prompts::EXPLANATION_SYSTEM);
        let prompt = prompts::explanation_prompt(tree_text, readme);
        let text = self
            .llm
            .chat(&[ChatMessage::user(prompt)], &params)
            .await?;
        Ok(text.trim().to_owned())
    }

    /// Stage 2: bind components to paths, rejecting hallucinated ones.
    async fn map_components(
        &self,
        explanation: &str,
        tree_text: &str,
    ) -> Result<Vec<ComponentMapping>> {
        let known: HashSet<String> = paths_from_rendered(tree_text).into_iter().collect();
        let params = ChatParams::default()
            .with_temperature(0.0)
            .with_max_output_tokens(1_000)
            .with_system(prompts::MAPPING_SYSTEM);

        let prompt = prompts::mapping_prompt(explanation, tree_text);
        let raw = self
            .llm
            .chat(&[ChatMessage::user(prompt)], &params)
            .await?;
        let (mut mapping, rejected) = parse_mapping(&raw, &known)?;

        if !rejected.is_empty() {
            tracing::debug!(rejected = rejected.len(), "re-prompting for hallucinated paths");
            let prompt = prompts::mapping_repair_prompt(explanation, tree_text, &rejected);
            let raw = self
                .llm
                .chat(&[ChatMessage::user(prompt)], &params)
                .await?;
            // After the one repair round, anything still invalid is dropped.
            let (repaired, _) = parse_mapping(&raw, &known)?;
            mapping = repaired;
        }
        Ok(mapping)
    }

    /// Stage 3: synthesize and validate the flowchart.
    async fn synthesize(&self, explanation: &str, mapping_json: &str) -> Result<String> {
        let params = ChatParams::default()
            .with_temperature(0.0)
            .with_max_output_tokens(2_000)
            .with_system(prompts::SYNTHESIS_SYSTEM);

        let prompt = prompts::synthesis_prompt(explanation, mapping_json);
        let raw = self
            .llm
            .chat(&[ChatMessage::user(prompt)], &params)
            .await?;
        let cleaned = graph::sanitize(&raw);

        let parse_error = match Diagram::parse(&cleaned) {
            Ok(mut diagram) => {
                diagram.normalize();
                return Ok(diagram.to_text());
            }
            Err(e) => e,
        };

        tracing::debug!(error = %parse_error, "diagram parse failed, repairing");
        let prompt = prompts::synthesis_repair_prompt(&cleaned, &parse_error.to_string());
        let raw = self
            .llm
            .chat(&[ChatMessage::user(prompt)], &params)
            .await?;
        let cleaned = graph::sanitize(&raw);
        match Diagram::parse(&cleaned) {
            Ok(mut diagram) => {
                diagram.normalize();
                Ok(diagram.to_text())
            }
            Err(e) => Err(Error::ValidationFailed(format!(
                "diagram failed to parse after repair: {e}"
            ))),
        }
    }
}

/// Parse the mapping JSON and partition paths into valid and rejected.
fn parse_mapping(
    raw: &str,
    known: &HashSet<String>,
) -> Result<(Vec<ComponentMapping>, Vec<String>)> {
    let cleaned = strip_code_fences(raw);
    let parsed: Vec<ComponentMapping> = serde_json::from_str(cleaned.trim())
        .map_err(|e| Error::ValidationFailed(format!("component mapping is not JSON: {e}")))?;

    let mut rejected = Vec::new();
    let mapping = parsed
        .into_iter()
        .map(|mut m| {
            m.paths.retain(|p| {
                let ok = known.contains(p);
                if !ok {
                    rejected.push(p.clone());
                }
                ok
            });
            m
        })
        .collect();
    Ok((mapping, rejected))
}
