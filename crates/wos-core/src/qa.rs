/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # QA Validator
//!
//! Runs a work order's output through the (optional) sections of its
//! declarative `QASpec` and produces a verdict. Security always runs first
//! and its failures are always terminal — never `retry_recommended`.

use regex::Regex;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use wos_models::models::qa_specs::QaSpecDefinition;

/// The outcome of validating one output against a spec.
#[derive(Debug, Clone, Default)]
pub struct QaVerdict {
    pub passed: bool,
    pub failed_reasons: Vec<String>,
    pub retry_recommended: bool,
    /// Set when the `security` section failed. The Dispatcher treats this
    /// as a permanent failure regardless of retry budget.
    pub security_failed: bool,
}

impl QaVerdict {
    fn pass() -> Self {
        Self {
            passed: true,
            failed_reasons: Vec::new(),
            retry_recommended: false,
            security_failed: false,
        }
    }
}

/// Policy the validator needs from configuration: whether `command`/
/// `execute_in_sandbox` checks are allowed to run at all, the sandbox
/// timeout ceiling, and whether any failure should be treated as terminal
/// (`qa.strict_mode`).
#[derive(Debug, Clone)]
pub struct QaPolicy {
    pub allow_command_checks: bool,
    pub sandbox_timeout_s: u64,
    pub strict_mode: bool,
}

pub struct QaValidator {
    policy: QaPolicy,
}

impl QaValidator {
    pub fn new(policy: QaPolicy) -> Self {
        Self { policy }
    }

    /// Validates `output` against `spec`. A work order with no `qa_spec_ref`
    /// (spec = `None`) has nothing declarative to check and passes.
    pub async fn validate(&self, output: &str, spec: Option<&QaSpecDefinition>) -> QaVerdict {
        let Some(spec) = spec else {
            return QaVerdict::pass();
        };

        let mut reasons = Vec::new();
        let mut security_failed = false;

        if let Some(security) = &spec.security {
            if let Err(reason) = check_security(output, security) {
                reasons.push(reason);
                security_failed = true;
            }
        }

        if let Some(format) = &spec.format {
            if let Err(reason) = check_format(output, format) {
                reasons.push(reason);
            }
        }

        if let Some(completeness) = &spec.completeness {
            if let Err(reason) = check_completeness(output, completeness) {
                reasons.push(reason);
            }
        }

        if let Some(code_execution) = &spec.code_execution {
            match check_code_execution(output, code_execution, &self.policy).await {
                Ok(()) => {}
                Err(reason) => reasons.push(reason),
            }
        }

        if let Some(command) = &spec.command {
            match check_command(output, command, &self.policy).await {
                Ok(()) => {}
                Err(reason) => reasons.push(reason),
            }
        }

        if reasons.is_empty() {
            return QaVerdict::pass();
        }

        let retry_recommended = !security_failed && !self.policy.strict_mode;
        QaVerdict {
            passed: false,
            failed_reasons: reasons,
            retry_recommended,
            security_failed,
        }
    }
}

fn check_format(output: &str, format: &wos_models::models::qa_specs::FormatSpec) -> Result<(), String> {
    use wos_models::models::qa_specs::{FORMAT_JSON, FORMAT_REGEX, FORMAT_TEXT};
    match format.format_type.as_str() {
        FORMAT_TEXT => Ok(()),
        FORMAT_JSON => {
            let value: serde_json::Value = serde_json::from_str(output)
                .map_err(|e| format!("format: output is not valid JSON: {e}"))?;
            if let Some(required_keys) = &format.required_keys {
                let object = value
                    .as_object()
                    .ok_or_else(|| "format: JSON output is not an object".to_string())?;
                let missing: Vec<&String> = required_keys
                    .iter()
                    .filter(|k| !object.contains_key(k.as_str()))
                    .collect();
                if !missing.is_empty() {
                    return Err(format!(
                        "format: missing required keys: {:?}",
                        missing
                    ));
                }
            }
            Ok(())
        }
        FORMAT_REGEX => {
            let pattern = format
                .pattern
                .as_ref()
                .ok_or_else(|| "format: regex type with no pattern".to_string())?;
            let re = Regex::new(pattern).map_err(|e| format!("format: invalid pattern: {e}"))?;
            if re.is_match(output) {
                Ok(())
            } else {
                Err("format: output does not match required pattern".to_string())
            }
        }
        other => Err(format!("format: unrecognized type {other}")),
    }
}

fn check_completeness(
    output: &str,
    spec: &wos_models::models::qa_specs::CompletenessSpec,
) -> Result<(), String> {
    let mut problems = Vec::new();
    for required in &spec.required_substrings {
        if !output.contains(required.as_str()) {
            problems.push(format!("missing required substring {required:?}"));
        }
    }
    for forbidden in &spec.forbidden_substrings {
        if output.contains(forbidden.as_str()) {
            problems.push(format!("contains forbidden substring {forbidden:?}"));
        }
    }
    if let Some(min) = spec.min_length {
        if output.len() < min {
            problems.push(format!("output shorter than min_length {min}"));
        }
    }
    if let Some(max) = spec.max_length {
        if output.len() > max {
            problems.push(format!("output longer than max_length {max}"));
        }
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(format!("completeness: {}", problems.join("; ")))
    }
}

const PLACEHOLDER_MARKERS: &[&str] = &["{{", "}}", "<INSERT", "TODO", "FIXME", "lorem ipsum"];

fn check_security(
    output: &str,
    spec: &wos_models::models::qa_specs::SecuritySpec,
) -> Result<(), String> {
    if spec.check_placeholders {
        let lower = output.to_lowercase();
        if PLACEHOLDER_MARKERS
            .iter()
            .any(|marker| lower.contains(&marker.to_lowercase()))
        {
            return Err("security: output contains unfilled templating".to_string());
        }
    }
    for pattern in &spec.forbidden_patterns {
        let re = Regex::new(pattern).map_err(|e| format!("security: invalid pattern: {e}"))?;
        if re.is_match(output) {
            // Never echo the literal match into the reason.
            return Err("security: output matches a forbidden pattern".to_string());
        }
    }
    Ok(())
}

async fn check_code_execution(
    output: &str,
    spec: &wos_models::models::qa_specs::CodeExecutionSpec,
    policy: &QaPolicy,
) -> Result<(), String> {
    if spec.language != "python" {
        return Ok(());
    }

    if spec.syntax_only {
        let status = Command::new("python3")
            .arg("-c")
            .arg("import ast,sys; ast.parse(sys.stdin.read())")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| format!("code_execution: could not start interpreter: {e}"))?;
        return run_with_stdin(status, output).await.map_err(|e| {
            format!("code_execution: syntax check failed: {e}")
        });
    }

    if spec.execute_in_sandbox {
        if !policy.allow_command_checks {
            return Err(
                "code_execution: execute_in_sandbox is disabled by policy".to_string(),
            );
        }
        let timeout = Duration::from_secs(spec.timeout_s.min(policy.sandbox_timeout_s).max(1));
        let child = Command::new("python3")
            .arg("-I")
            .arg("-c")
            .arg("import sys; exec(sys.stdin.read())")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| format!("code_execution: could not start interpreter: {e}"))?;
        return tokio::time::timeout(timeout, run_with_stdin(child, output))
            .await
            .map_err(|_| "code_execution: sandbox execution timed out".to_string())?
            .map_err(|e| format!("code_execution: sandboxed run failed: {e}"));
    }

    Ok(())
}

async fn run_with_stdin(mut child: tokio::process::Child, input: &str) -> Result<(), String> {
    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(input.as_bytes())
            .await
            .map_err(|e| e.to_string())?;
    }
    let status = child.wait().await.map_err(|e| e.to_string())?;
    if status.success() {
        Ok(())
    } else {
        Err(format!("exited with {status}"))
    }
}

async fn check_command(
    output: &str,
    spec: &wos_models::models::qa_specs::CommandSpec,
    policy: &QaPolicy,
) -> Result<(), String> {
    if !policy.allow_command_checks {
        return Err("command: command checks are disabled by policy".to_string());
    }
    let child = Command::new(&spec.command)
        .args(&spec.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| format!("command: could not start validator: {e}"))?;
    run_with_stdin(child, output)
        .await
        .map_err(|e| format!("command: external validator failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wos_models::models::qa_specs::{CompletenessSpec, FormatSpec, SecuritySpec};

    fn policy() -> QaPolicy {
        QaPolicy {
            allow_command_checks: false,
            sandbox_timeout_s: 10,
            strict_mode: false,
        }
    }

    #[tokio::test]
    async fn no_spec_always_passes() {
        let validator = QaValidator::new(policy());
        let verdict = validator.validate("anything", None).await;
        assert!(verdict.passed);
    }

    #[tokio::test]
    async fn json_format_with_required_keys() {
        let validator = QaValidator::new(policy());
        let spec = QaSpecDefinition {
            format: Some(FormatSpec {
                format_type: "json".to_string(),
                required_keys: Some(vec!["name".to_string(), "age".to_string()]),
                pattern: None,
            }),
            ..Default::default()
        };

        let bad = validator
            .validate("Here is: {name: alice}", Some(&spec))
            .await;
        assert!(!bad.passed);
        assert!(bad.retry_recommended);

        let good = validator
            .validate(r#"{"name":"alice","age":30}"#, Some(&spec))
            .await;
        assert!(good.passed);
    }

    #[tokio::test]
    async fn completeness_forbidden_substring_fails() {
        let validator = QaValidator::new(policy());
        let spec = QaSpecDefinition {
            completeness: Some(CompletenessSpec {
                forbidden_substrings: vec!["TODO".to_string()],
                ..Default::default()
            }),
            ..Default::default()
        };
        let verdict = validator.validate("done, TODO later", Some(&spec)).await;
        assert!(!verdict.passed);
    }

    #[tokio::test]
    async fn security_failure_is_never_retry_recommended() {
        let validator = QaValidator::new(policy());
        let spec = QaSpecDefinition {
            security: Some(SecuritySpec {
                check_placeholders: false,
                forbidden_patterns: vec!["sk-[A-Za-z0-9]{20,}".to_string()],
            }),
            ..Default::default()
        };
        let verdict = validator
            .validate(
                "your key is sk-abcdefghijklmnopqrstuvwxyz",
                Some(&spec),
            )
            .await;
        assert!(!verdict.passed);
        assert!(!verdict.retry_recommended);
        assert!(!verdict.failed_reasons.iter().any(|r| r.contains("sk-abc")));
    }

    #[tokio::test]
    async fn strict_mode_disables_retry_recommendation() {
        let validator = QaValidator::new(QaPolicy {
            strict_mode: true,
            ..policy()
        });
        let spec = QaSpecDefinition {
            completeness: Some(CompletenessSpec {
                required_substrings: vec!["hello".to_string()],
                ..Default::default()
            }),
            ..Default::default()
        };
        let verdict = validator.validate("goodbye", Some(&spec)).await;
        assert!(!verdict.passed);
        assert!(!verdict.retry_recommended);
    }

    #[tokio::test]
    async fn command_section_disabled_by_default_policy() {
        let validator = QaValidator::new(policy());
        let spec = QaSpecDefinition {
            command: Some(wos_models::models::qa_specs::CommandSpec {
                command: "true".to_string(),
                args: vec![],
            }),
            ..Default::default()
        };
        let verdict = validator.validate("anything", Some(&spec)).await;
        assert!(!verdict.passed);
        assert!(verdict
            .failed_reasons
            .iter()
            .any(|r| r.contains("disabled by policy")));
    }
}
