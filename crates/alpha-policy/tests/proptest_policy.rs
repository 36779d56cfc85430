//! Property-based tests for the diff relation and guardrail passes.

use alpha_core::{Effect, PolicyDocument, PolicyStatement, ViolationCode};
use alpha_policy::{diff, diff_documents, enforce, GuardrailConfig, PresetName};
use proptest::prelude::*;

const ACTIONS: &[&str] = &[
    "*",
    "*:*",
    "iam:*",
    "iam:PassRole",
    "iam:ListRoles",
    "sts:AssumeRole",
    "sts:GetCallerIdentity",
    "s3:*",
    "s3:GetObject",
    "s3:PutObject",
    "kms:Decrypt",
    "SecretsManager:GetSecretValue",
    "organizations:ListAccounts",
    "ec2:RunInstances",
    "ec2:DescribeInstances",
];

const RESOURCES: &[&str] = &["*", "arn:aws:s3:::logs/*", "arn:aws:kms:us-east-1:1:key/k"];

const CONDITION_KEYS: &[&str] = &["aws:RequestedRegion", "aws:requestedregion", "aws:SourceVpc"];

// Strategy for a single statement
fn arb_statement() -> impl Strategy<Value = PolicyStatement> {
    (
        prop_oneof![3 => Just(Effect::Allow), 1 => Just(Effect::Deny)],
        prop::sample::subsequence(ACTIONS, 1..5),
        prop::sample::subsequence(RESOURCES, 0..3),
        prop::option::of(prop::sample::select(CONDITION_KEYS)),
    )
        .prop_map(|(effect, actions, resources, condition)| {
            let statement = PolicyStatement::new(effect, actions.iter().copied())
                .expect("strategy yields at least one action")
                .with_resources(resources.iter().copied());
            match condition {
                Some(key) => statement.with_condition("StringEquals", key, ["us-east-1"]),
                None => statement,
            }
        })
}

// Strategy for a document of up to six statements
fn arb_document() -> impl Strategy<Value = PolicyDocument> {
    prop::collection::vec(arb_statement(), 0..6).prop_map(PolicyDocument::new)
}

fn arb_preset() -> impl Strategy<Value = PresetName> {
    prop_oneof![
        Just(PresetName::None),
        Just(PresetName::Sandbox),
        Just(PresetName::Prod),
    ]
}

proptest! {
    #[test]
    fn diff_is_reflexive(p in arb_document()) {
        let d = diff_documents(&p, &p);
        prop_assert!(d.added_actions.is_empty());
        prop_assert!(d.removed_actions.is_empty());
        prop_assert_eq!(d.change_summary, "+0 actions, -0 actions");
    }

    #[test]
    fn diff_is_symmetric(p in arb_document(), q in arb_document()) {
        let forward = diff_documents(&p, &q);
        let backward = diff_documents(&q, &p);
        prop_assert_eq!(&forward.added_actions, &backward.removed_actions);
        prop_assert_eq!(&forward.removed_actions, &backward.added_actions);
        prop_assert_eq!(&forward.added_resources, &backward.removed_resources);
    }

    #[test]
    fn diff_ignores_statement_order(p in arb_document()) {
        let mut reversed: Vec<PolicyStatement> = p.statements().to_vec();
        reversed.reverse();
        let q = p.with_statements(reversed);
        prop_assert!(diff_documents(&p, &q).is_empty());
    }

    #[test]
    fn missing_baseline_equals_empty_baseline(p in arb_document()) {
        prop_assert_eq!(diff(None, &p), diff_documents(&PolicyDocument::empty(), &p));
    }

    #[test]
    fn prod_enforcement_is_a_fixpoint(p in arb_document()) {
        let config = GuardrailConfig::new(PresetName::Prod);
        let first = enforce(&p, &config);
        let second = enforce(&first.sanitized, &config);

        prop_assert_eq!(second.stripping_violations().count(), 0);
        prop_assert_eq!(&second.sanitized, &first.sanitized);
        prop_assert_eq!(
            second.count(ViolationCode::MissingCondition),
            first.count(ViolationCode::MissingCondition)
        );
    }

    #[test]
    fn none_preset_is_identity(p in arb_document()) {
        let report = enforce(&p, &GuardrailConfig::new(PresetName::None));
        prop_assert_eq!(&report.sanitized, &p);
        prop_assert!(report.violations.is_empty());
    }

    #[test]
    fn enforcement_never_adds_permissions(p in arb_document(), preset in arb_preset()) {
        let report = enforce(&p, &GuardrailConfig::new(preset));
        let d = diff_documents(&p, &report.sanitized);
        prop_assert!(d.added_actions.is_empty());
        prop_assert!(d.added_resources.is_empty());
    }

    #[test]
    fn deny_statements_survive(p in arb_document(), preset in arb_preset()) {
        let report = enforce(&p, &GuardrailConfig::new(preset));
        let denies_in = p.statements().iter().filter(|s| !s.is_allow()).count();
        let denies_out = report.sanitized.statements().iter().filter(|s| !s.is_allow()).count();
        prop_assert_eq!(denies_in, denies_out);
    }
}
