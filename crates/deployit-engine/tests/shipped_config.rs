//! The deployment file shipped at the repository root.

use deployit_config::parse_deployment;
use deployit_core::ResourceKind;
use deployit_engine::resolve;
use std::collections::BTreeSet;

const DEPLOYIT_KDL: &str = include_str!("../../../deployit.kdl");

#[test]
fn test_catfacts_plan_order() {
    let config = parse_deployment(DEPLOYIT_KDL).unwrap();
    assert_eq!(config.settings.project, "catfacts");
    assert_eq!(config.settings.helm_timeout, "20m");

    let plan = resolve(config.declarations("prod").unwrap()).unwrap();
    assert_eq!(
        plan.names(),
        vec![
            "api-image",
            "catfacts",
            "frontend-image",
            "frontend",
            "postgres",
            "api",
            "blast",
        ]
    );
}

#[test]
fn test_blast_waits_for_database_chart_and_image() {
    let config = parse_deployment(DEPLOYIT_KDL).unwrap();
    let plan = resolve(config.declarations("prod").unwrap()).unwrap();

    let blast = plan.get("blast").unwrap();
    assert_eq!(blast.kind(), ResourceKind::ScheduledJob);

    let deps: BTreeSet<&str> = plan.dependencies_of("blast").collect();
    assert_eq!(
        deps,
        BTreeSet::from(["api", "api-image", "catfacts", "postgres"])
    );
    assert!(plan.dependents_of("postgres").contains("blast"));
}

#[test]
fn test_secrets_referenced_by_api() {
    let config = parse_deployment(DEPLOYIT_KDL).unwrap();
    let plan = resolve(config.declarations("prod").unwrap()).unwrap();

    let secrets = plan.get("api").unwrap().secret_names();
    let expected: BTreeSet<String> = [
        "postgresPassword",
        "twilio_account_sid",
        "twilio_auth_token",
        "twilio_phone_number",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    assert_eq!(secrets, expected);
    assert!(plan.get("frontend").unwrap().secret_names().is_empty());
}
