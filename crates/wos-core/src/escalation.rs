/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Escalation Controller
//!
//! Consulted by the Dispatcher on any terminal failure of an attempt.
//! Admin is not part of the ladder; it owns only classification.

use wos_models::models::work_orders::WorkOrder;

/// What the Dispatcher should do next after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationAction {
    RetrySameTier,
    EscalateNextTier { next_tier: String },
    NotifyBoard,
    Block,
}

pub struct EscalationController {
    ladder: Vec<String>,
}

impl EscalationController {
    pub fn new(ladder: Vec<String>) -> Self {
        Self { ladder }
    }

    /// Decides the next action for `wo` after an attempt classified as
    /// `failure_is_permanent` (schema violation, auth) or, if not permanent,
    /// transient-or-not via `failure_is_transient`.
    ///
    /// Permanent failures always block, regardless of retry budget or tier.
    /// Otherwise: retry at the same tier while budget remains and the
    /// failure was transient; once budget is exhausted, escalate to the
    /// next tier, or — if already at the top of the ladder — notify the
    /// board and block.
    pub fn next_action(&self, wo: &WorkOrder, failure_is_transient: bool, failure_is_permanent: bool) -> EscalationAction {
        if failure_is_permanent {
            return EscalationAction::Block;
        }

        if wo.retry_count < wo.max_retries && failure_is_transient {
            return EscalationAction::RetrySameTier;
        }

        match self.next_tier(&wo.owner) {
            Some(next_tier) => EscalationAction::EscalateNextTier { next_tier },
            None => EscalationAction::NotifyBoard,
        }
    }

    /// The tier one step above `current` in the ladder, or `None` if
    /// `current` is already at (or past) the top.
    fn next_tier(&self, current: &str) -> Option<String> {
        let position = self.ladder.iter().position(|t| t == current)?;
        self.ladder.get(position + 1).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wos_models::models::work_orders::{
        NewWorkOrder, DIFFICULTY_COMPLEX, TIER_CEO, TIER_DIRECTOR, TIER_INTERN,
    };

    fn ladder() -> Vec<String> {
        vec![
            TIER_INTERN.to_string(),
            TIER_DIRECTOR.to_string(),
            TIER_CEO.to_string(),
        ]
    }

    fn work_order(owner: &str, retry_count: i32, max_retries: i32) -> WorkOrder {
        let new = NewWorkOrder::new(
            None,
            None,
            "build_feature".to_string(),
            DIFFICULTY_COMPLEX.to_string(),
            owner.to_string(),
            "ctx".to_string(),
            vec![],
            "reqs".to_string(),
            None,
            None,
            Some(max_retries),
        )
        .unwrap();

        WorkOrder {
            id: uuid::Uuid::new_v4(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            completed_at: None,
            session_id: new.session_id,
            idempotency_key: new.idempotency_key,
            intent: new.intent,
            difficulty: new.difficulty,
            owner: new.owner,
            status: new.status,
            compressed_context: new.compressed_context,
            relevant_files: new.relevant_files,
            qa_requirements: new.qa_requirements,
            qa_spec_ref: new.qa_spec_ref,
            equipment_hint: new.equipment_hint,
            retry_count,
            max_retries: new.max_retries,
            escalation_chain: new.escalation_chain,
            last_error: None,
            result_output: None,
            cost_usd: 0.0,
            prompt_tokens: 0,
            completion_tokens: 0,
        }
    }

    #[test]
    fn retries_same_tier_under_budget_on_transient_failure() {
        let controller = EscalationController::new(ladder());
        let wo = work_order(TIER_INTERN, 0, 3);
        assert_eq!(
            controller.next_action(&wo, true, false),
            EscalationAction::RetrySameTier
        );
    }

    #[test]
    fn escalates_to_next_tier_when_budget_exhausted() {
        let controller = EscalationController::new(ladder());
        let wo = work_order(TIER_INTERN, 3, 3);
        assert_eq!(
            controller.next_action(&wo, true, false),
            EscalationAction::EscalateNextTier {
                next_tier: TIER_DIRECTOR.to_string()
            }
        );
    }

    #[test]
    fn notifies_board_when_ceo_budget_exhausted() {
        let controller = EscalationController::new(ladder());
        let wo = work_order(TIER_CEO, 3, 3);
        assert_eq!(
            controller.next_action(&wo, true, false),
            EscalationAction::NotifyBoard
        );
    }

    #[test]
    fn permanent_failure_always_blocks() {
        let controller = EscalationController::new(ladder());
        let wo = work_order(TIER_INTERN, 0, 3);
        assert_eq!(controller.next_action(&wo, false, true), EscalationAction::Block);
    }
}
