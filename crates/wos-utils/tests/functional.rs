use std::env;
use wos_utils::config::Settings;

#[test]
fn env_override_takes_precedence_over_defaults() {
    env::set_var("WOS__RATE_LIMIT__REQUESTS", "7");
    env::set_var("WOS__DISPATCHER__WORKERS", "3");

    let settings = Settings::new(None).expect("failed to load settings");

    assert_eq!(settings.rate_limit.requests, 7);
    assert_eq!(settings.dispatcher.workers, 3);

    env::remove_var("WOS__RATE_LIMIT__REQUESTS");
    env::remove_var("WOS__DISPATCHER__WORKERS");
}

#[test]
fn tier_model_table_has_an_entry_for_every_ladder_tier() {
    let settings = Settings::new(None).expect("failed to load settings");

    for tier in &settings.escalation.ladder {
        assert!(
            settings.tier_model_table.contains_key(tier),
            "tier_model_table is missing an entry for ladder tier {tier}"
        );
    }
}
