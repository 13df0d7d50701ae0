/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Equipment shortcut
//!
//! When Admin detects a request matches a registered deterministic script,
//! it stamps `equipment_hint` on the work order and the Dispatcher runs the
//! script instead of calling a model. A successful run is treated
//! identically to a model success for QA purposes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, SchedulerError};
use crate::model_client::ModelResponse;

#[async_trait]
pub trait EquipmentScript: Send + Sync {
    /// Returns true if `compressed_context` looks like this script's job.
    /// Admin calls this over the registry to produce `equipment_hint`.
    fn matches(&self, compressed_context: &str) -> bool;

    /// Runs the script against the work order's context, producing output
    /// shaped like a `ModelResponse` (zero cost, since no model was called).
    async fn run(&self, compressed_context: &str) -> Result<ModelResponse>;
}

/// Echoes back the text following the word "echo" in the request, or the
/// whole context if no such marker is found. Deliberately trivial — it
/// exists to exercise the equipment-shortcut path end to end.
pub struct EchoScript;

#[async_trait]
impl EquipmentScript for EchoScript {
    fn matches(&self, compressed_context: &str) -> bool {
        compressed_context.to_lowercase().contains("echo")
    }

    async fn run(&self, compressed_context: &str) -> Result<ModelResponse> {
        let output = match compressed_context.to_lowercase().find("echo") {
            Some(idx) => compressed_context[idx + "echo".len()..].trim().to_string(),
            None => compressed_context.to_string(),
        };
        let output = if output.is_empty() {
            compressed_context.to_string()
        } else {
            output
        };
        Ok(ModelResponse {
            output,
            prompt_tokens: 0,
            completion_tokens: 0,
            cost_usd: 0.0,
        })
    }
}

/// Checks the context for a short, fixed list of lint red flags
/// (`TODO`, `FIXME`, tab characters) and reports them as plain text. Stands
/// in for a real static-analysis equipment script.
pub struct LintCheckScript;

const LINT_MARKERS: &[&str] = &["TODO", "FIXME", "\t"];

#[async_trait]
impl EquipmentScript for LintCheckScript {
    fn matches(&self, compressed_context: &str) -> bool {
        compressed_context.to_lowercase().contains("lint")
    }

    async fn run(&self, compressed_context: &str) -> Result<ModelResponse> {
        let findings: Vec<&str> = LINT_MARKERS
            .iter()
            .filter(|marker| compressed_context.contains(*marker))
            .copied()
            .collect();
        let output = if findings.is_empty() {
            "lint check passed: no issues found".to_string()
        } else {
            format!("lint check failed: found {}", findings.join(", "))
        };
        Ok(ModelResponse {
            output,
            prompt_tokens: 0,
            completion_tokens: 0,
            cost_usd: 0.0,
        })
    }
}

/// Maps `equipment_hint` names to their script implementation.
#[derive(Clone)]
pub struct EquipmentRegistry {
    scripts: HashMap<String, Arc<dyn EquipmentScript>>,
}

impl Default for EquipmentRegistry {
    fn default() -> Self {
        let mut scripts: HashMap<String, Arc<dyn EquipmentScript>> = HashMap::new();
        scripts.insert("echo".to_string(), Arc::new(EchoScript));
        scripts.insert("lint_check".to_string(), Arc::new(LintCheckScript));
        Self { scripts }
    }
}

impl EquipmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the first registered script name whose `matches` returns
    /// true, in an unspecified but stable iteration order.
    pub fn detect(&self, compressed_context: &str) -> Option<String> {
        let mut names: Vec<&String> = self.scripts.keys().collect();
        names.sort();
        names
            .into_iter()
            .find(|name| self.scripts[*name].matches(compressed_context))
            .cloned()
    }

    pub async fn run(&self, name: &str, compressed_context: &str) -> Result<ModelResponse> {
        let script = self
            .scripts
            .get(name)
            .ok_or_else(|| SchedulerError::Configuration(format!("unknown equipment script: {name}")))?;
        script.run(compressed_context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_script_strips_marker() {
        let script = EchoScript;
        assert!(script.matches("please echo hello"));
        let response = script.run("please echo hello").await.unwrap();
        assert_eq!(response.output, "hello");
    }

    #[tokio::test]
    async fn lint_check_reports_findings() {
        let script = LintCheckScript;
        assert!(script.matches("run a lint pass"));
        let response = script.run("run a lint pass // TODO fix this").await.unwrap();
        assert!(response.output.contains("TODO"));
    }

    #[test]
    fn registry_detects_echo_over_context() {
        let registry = EquipmentRegistry::new();
        assert_eq!(registry.detect("echo hello"), Some("echo".to_string()));
        assert_eq!(registry.detect("nothing matches here"), None);
    }
}
