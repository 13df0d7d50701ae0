/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Admin classifier / pre-processor
//!
//! Invoked synchronously during ingress, before a work order is enqueued.
//! This implementation uses a deterministic heuristic rather than a model
//! call — cheap, local, and fully reproducible for the seed scenarios.

use regex::Regex;

use wos_models::models::work_orders::{
    DIFFICULTY_COMPLEX, DIFFICULTY_NORMAL, DIFFICULTY_TRIVIAL, DIFFICULTY_UNCLEAR, TIER_ADMIN,
    TIER_CEO, TIER_DIRECTOR, TIER_INTERN,
};

use crate::equipment::EquipmentRegistry;

/// Target length for `compressed_context`, expressed in characters as a
/// rough proxy for the ~1000-token budget.
const COMPRESSED_CONTEXT_CHAR_BUDGET: usize = 4000;

const FILLER_ONLY_MESSAGES: &[&str] = &["hi", "hello", "help", "hey", "test", "?", "yo"];
const COMPLEX_MARKERS: &[&str] = &[
    "architecture",
    "migrate",
    "distributed system",
    "redesign",
    "refactor the entire",
    "multi-service",
];
const TRIVIAL_MARKERS: &[&str] = &["echo ", "just print", "one-line", "simple echo"];

/// Everything Admin produces for a raw user message. `clarifying_question`
/// is set only when `difficulty == unclear`; ingress returns it to the
/// caller instead of enqueueing anything.
#[derive(Debug, Clone)]
pub struct Classification {
    pub intent: String,
    pub difficulty: String,
    pub owner: String,
    pub compressed_context: String,
    pub relevant_files: Vec<String>,
    pub qa_requirements: String,
    pub equipment_hint: Option<String>,
    pub clarifying_question: Option<String>,
}

pub struct AdminClassifier {
    equipment: EquipmentRegistry,
    file_pattern: Regex,
}

impl Default for AdminClassifier {
    fn default() -> Self {
        Self::new(EquipmentRegistry::new())
    }
}

impl AdminClassifier {
    pub fn new(equipment: EquipmentRegistry) -> Self {
        Self {
            equipment,
            // A loose "looks like a path with an extension" matcher; good
            // enough for a heuristic classifier, not a real tokenizer.
            file_pattern: Regex::new(r"[A-Za-z0-9_./-]+\.[A-Za-z0-9]{1,6}").unwrap(),
        }
    }

    /// Classifies one raw user message, given the prior conversation turns
    /// in this session (oldest first) and an optional channel hint.
    pub fn classify(
        &self,
        raw_message: &str,
        conversation_history: &[String],
        _channel_hint: Option<&str>,
    ) -> Classification {
        let trimmed = raw_message.trim();
        let difficulty = classify_difficulty(trimmed);
        let owner = owner_for_difficulty(difficulty);

        if difficulty == DIFFICULTY_UNCLEAR {
            return Classification {
                intent: "clarify".to_string(),
                difficulty: difficulty.to_string(),
                owner: owner.to_string(),
                compressed_context: trimmed.to_string(),
                relevant_files: Vec::new(),
                qa_requirements: String::new(),
                equipment_hint: None,
                clarifying_question: Some(
                    "Could you say more about what you'd like done? Your message was too \
                     short for me to route to a worker."
                        .to_string(),
                ),
            };
        }

        let relevant_files = self.extract_file_references(trimmed);
        let qa_requirements = extract_acceptance_criteria(trimmed);
        let compressed_context = compress(trimmed, conversation_history, &relevant_files);
        let equipment_hint = self.equipment.detect(&compressed_context);

        Classification {
            intent: extract_intent(trimmed),
            difficulty: difficulty.to_string(),
            owner: owner.to_string(),
            compressed_context,
            relevant_files,
            qa_requirements,
            equipment_hint,
            clarifying_question: None,
        }
    }

    fn extract_file_references(&self, message: &str) -> Vec<String> {
        let mut files: Vec<String> = self
            .file_pattern
            .find_iter(message)
            .map(|m| m.as_str().to_string())
            .collect();
        files.dedup();
        files
    }
}

fn classify_difficulty(trimmed: &str) -> &'static str {
    let lower = trimmed.to_lowercase();
    let word_count = trimmed.split_whitespace().count();

    if trimmed.is_empty() || (word_count <= 2 && FILLER_ONLY_MESSAGES.contains(&lower.as_str())) {
        return DIFFICULTY_UNCLEAR;
    }

    if COMPLEX_MARKERS.iter().any(|m| lower.contains(m)) || word_count > 120 {
        return DIFFICULTY_COMPLEX;
    }

    if TRIVIAL_MARKERS.iter().any(|m| lower.contains(m)) || word_count <= 6 {
        return DIFFICULTY_TRIVIAL;
    }

    DIFFICULTY_NORMAL
}

fn owner_for_difficulty(difficulty: &str) -> &'static str {
    match difficulty {
        DIFFICULTY_TRIVIAL => TIER_INTERN,
        DIFFICULTY_NORMAL => TIER_DIRECTOR,
        DIFFICULTY_COMPLEX => TIER_CEO,
        _ => TIER_ADMIN,
    }
}

fn extract_intent(message: &str) -> String {
    let first_words: Vec<&str> = message.split_whitespace().take(6).collect();
    let intent = first_words.join("_").to_lowercase();
    let intent: String = intent
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if intent.is_empty() {
        "general_request".to_string()
    } else {
        intent
    }
}

fn extract_acceptance_criteria(message: &str) -> String {
    let criteria: Vec<&str> = message
        .split(|c| c == '.' || c == '\n')
        .map(str::trim)
        .filter(|sentence| {
            let lower = sentence.to_lowercase();
            !sentence.is_empty()
                && (lower.contains("must")
                    || lower.contains("should")
                    || lower.contains("acceptance criteria")
                    || lower.contains("requirement"))
        })
        .collect();

    if criteria.is_empty() {
        format!("Output must satisfy the user's request: {message}")
    } else {
        criteria.join(". ")
    }
}

fn compress(message: &str, conversation_history: &[String], relevant_files: &[String]) -> String {
    let mut compressed = format!(
        "User's stated goal: {message}. Conversation turns so far: {}.",
        conversation_history.len() + 1
    );
    if !relevant_files.is_empty() {
        compressed.push_str(&format!(" Referenced files: {}.", relevant_files.join(", ")));
    }
    if compressed.len() > COMPRESSED_CONTEXT_CHAR_BUDGET {
        compressed.truncate(COMPRESSED_CONTEXT_CHAR_BUDGET);
    }
    compressed
}
