/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # QA Specs Module
//!
//! A `QASpec` is the declarative validation recipe: a
//! named, versionable structure with five optional sections. Each section
//! absent from a spec is skipped entirely by the validator.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;

/// Recognized `format.type` values.
pub const FORMAT_JSON: &str = "json";
pub const FORMAT_TEXT: &str = "text";
pub const FORMAT_REGEX: &str = "regex";

#[derive(Queryable, Selectable, Identifiable, AsChangeset, Debug, Clone, Serialize, Deserialize, ToSchema)]
#[diesel(table_name = crate::schema::qa_specs, primary_key(name))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct QaSpecRow {
    pub name: String,
    pub definition_json: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone, Serialize, Deserialize, ToSchema)]
#[diesel(table_name = crate::schema::qa_specs)]
pub struct NewQaSpecRow {
    pub name: String,
    pub definition_json: JsonValue,
}

/// The parsed, in-memory form of a spec's `definition_json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct QaSpecDefinition {
    pub format: Option<FormatSpec>,
    pub completeness: Option<CompletenessSpec>,
    pub security: Option<SecuritySpec>,
    pub code_execution: Option<CodeExecutionSpec>,
    pub command: Option<CommandSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FormatSpec {
    /// One of `json | text | regex`.
    #[serde(rename = "type")]
    pub format_type: String,
    pub required_keys: Option<Vec<String>>,
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CompletenessSpec {
    #[serde(default)]
    pub required_substrings: Vec<String>,
    #[serde(default)]
    pub forbidden_substrings: Vec<String>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SecuritySpec {
    #[serde(default)]
    pub check_placeholders: bool,
    #[serde(default)]
    pub forbidden_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CodeExecutionSpec {
    /// One of `python | none`.
    pub language: String,
    pub syntax_only: bool,
    pub execute_in_sandbox: bool,
    #[serde(default = "default_sandbox_timeout_s")]
    pub timeout_s: u64,
}

fn default_sandbox_timeout_s() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CommandSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl QaSpecDefinition {
    /// Validates internal consistency of the recognized sections. Does not
    /// know about the runtime policy gating `command`/`code_execution` —
    /// that lives in the validator, which has access to configuration.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(format) = &self.format {
            match format.format_type.as_str() {
                FORMAT_JSON | FORMAT_TEXT => {}
                FORMAT_REGEX => {
                    if format.pattern.is_none() {
                        return Err("format.pattern is required when type=regex".to_string());
                    }
                }
                other => return Err(format!("unrecognized format.type: {other}")),
            }
        }
        if let Some(completeness) = &self.completeness {
            if let (Some(min), Some(max)) = (completeness.min_length, completeness.max_length) {
                if min > max {
                    return Err("completeness.min_length cannot exceed max_length".to_string());
                }
            }
        }
        Ok(())
    }
}
