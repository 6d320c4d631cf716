//! Conditional edges: tier floors, quality floors under both partial
//! completion policies, and custom attribute predicates.

use chrono::Utc;
use pretty_assertions::assert_eq;
use waymark_core::UserMilestone;
use waymark_engine::conditions::ConditionFailure;
use waymark_engine::prelude::*;
use waymark_test_utils::TestEngine;

fn gated(t: &TestEngine<MemoryStore>, conditions: EdgeConditions) -> [MilestoneCode; 2] {
    let codes: [MilestoneCode; 2] = t.register(2).try_into().unwrap();
    t.engine
        .add_dependency(
            &codes[1],
            &codes[0],
            DependencySpec::required().with_conditions(conditions),
        )
        .unwrap();
    codes
}

#[test]
fn tier_floor_blocks_until_profile_qualifies() {
    let t = TestEngine::new();
    let [m0, m1] = gated(
        &t,
        EdgeConditions::none().with_min_tier(SubscriptionTier::Professional),
    );
    let user = UserId::new();

    assert!(t.finish(user, &m0).is_empty(), "no profile, fail closed");
    assert!(t.row(user, &m1).is_none());

    let outcome = t.engine.validate_dependencies(user, &m1, true).unwrap();
    assert_eq!(
        outcome.unmet[0].reason,
        UnmetReason::ConditionFailed {
            failures: vec![ConditionFailure::TierBelow {
                required: SubscriptionTier::Professional,
                actual: None,
            }],
        }
    );
    assert!(t.engine.validate_dependencies(user, &m1, false).unwrap().met);

    t.engine
        .set_profile(&UserProfile::new(user).with_tier(SubscriptionTier::Starter))
        .unwrap();
    let err = t.engine.start_milestone(user, &m1).unwrap_err();
    assert!(matches!(err, EngineError::DependenciesNotMet { .. }), "{err}");

    t.engine
        .set_profile(&UserProfile::new(user).with_tier(SubscriptionTier::Enterprise))
        .unwrap();
    assert!(t.engine.validate_dependencies(user, &m1, true).unwrap().met);
    t.engine.start_milestone(user, &m1).unwrap();
}

#[test]
fn quality_floor_reads_completed_score() {
    let t = TestEngine::new();
    let m0 = waymark_test_utils::code("M0");
    let [_, m1] = gated(&t, EdgeConditions::none().with_min_quality(m0.clone(), 80.0));
    let (low, high) = (UserId::new(), UserId::new());

    for (user, score) in [(low, 70.0), (high, 85.0)] {
        t.engine.start_milestone(user, &m0).unwrap();
        t.engine
            .complete_milestone(user, &m0, None, Some(score))
            .unwrap();
    }

    let outcome = t.engine.validate_dependencies(low, &m1, true).unwrap();
    assert_eq!(
        outcome.unmet[0].reason,
        UnmetReason::ConditionFailed {
            failures: vec![ConditionFailure::QualityBelow {
                milestone: m0.clone(),
                required: 80.0,
                actual: Some(70.0),
            }],
        }
    );
    assert!(t.row(low, &m1).is_none());
    assert_eq!(t.row(high, &m1).unwrap().status, MilestoneStatus::Available);
}

/// Edge `M1 -> M0` that only needs a quality score of 90 on M0, plus a
/// score recorded on an M0 instance that never completed
fn unfinished_score_setup(t: &TestEngine<MemoryStore>, user: UserId) -> MilestoneCode {
    let [m0, m1]: [MilestoneCode; 2] = t.register(2).try_into().unwrap();
    t.engine
        .add_dependency(
            &m1,
            &m0,
            DependencySpec::required()
                .with_min_completion(0)
                .with_conditions(EdgeConditions::none().with_min_quality(m0.clone(), 90.0)),
        )
        .unwrap();

    t.engine
        .store()
        .write(|tx| {
            let target = tx.milestone_by_code(&m0)?.unwrap();
            let mut row =
                UserMilestone::new(user, target.id, MilestoneStatus::InProgress, Utc::now());
            row.quality_score = Some(95.0);
            tx.insert_progress(&row)
        })
        .unwrap();
    m1
}

#[test]
fn strict_policy_ignores_scores_on_unfinished_instances() {
    let t = TestEngine::new();
    let user = UserId::new();
    let m1 = unfinished_score_setup(&t, user);

    let outcome = t.engine.validate_dependencies(user, &m1, true).unwrap();
    assert!(!outcome.met);
    assert_eq!(
        outcome.unmet[0].reason,
        UnmetReason::ConditionFailed {
            failures: vec![ConditionFailure::QualityBelow {
                milestone: waymark_test_utils::code("M0"),
                required: 90.0,
                actual: None,
            }],
        }
    );
}

#[test]
fn lenient_policy_accepts_scores_on_unfinished_instances() {
    let t = TestEngine::with_config(
        EngineConfig::new().with_partial_completion_policy(PartialCompletionPolicy::Lenient),
    );
    let user = UserId::new();
    let m1 = unfinished_score_setup(&t, user);

    assert!(t.engine.validate_dependencies(user, &m1, true).unwrap().met);
}

#[test]
fn custom_predicates_are_conjunctive() {
    let t = TestEngine::new();
    let conditions = EdgeConditions::none()
        .with_predicate(CustomPredicate::AttributeAtLeast {
            key: "credits".into(),
            min: 10.0,
        })
        .with_predicate(CustomPredicate::AttributeIn {
            key: "region".into(),
            values: vec![serde_json::json!("eu"), serde_json::json!("us")],
        });
    let [m0, m1] = gated(&t, conditions);
    let user = UserId::new();
    t.finish(user, &m0);

    let profile = UserProfile::new(user)
        .with_attribute("credits", serde_json::json!(12))
        .with_attribute("region", serde_json::json!("apac"));
    t.engine.set_profile(&profile).unwrap();
    let outcome = t.engine.validate_dependencies(user, &m1, true).unwrap();
    match &outcome.unmet[0].reason {
        UnmetReason::ConditionFailed { failures } => {
            assert_eq!(failures.len(), 1);
            assert!(matches!(
                &failures[0],
                ConditionFailure::PredicateFailed { predicate } if predicate.key() == "region"
            ));
        }
        other => panic!("unexpected reason: {other:?}"),
    }

    let profile = profile.with_attribute("region", serde_json::json!("eu"));
    t.engine.set_profile(&profile).unwrap();
    assert!(t.engine.validate_dependencies(user, &m1, true).unwrap().met);
}

#[test]
fn incomplete_prerequisite_is_reported_before_conditions() {
    let t = TestEngine::new();
    let [_, m1] = gated(
        &t,
        EdgeConditions::none().with_min_tier(SubscriptionTier::Enterprise),
    );
    let user = UserId::new();

    let outcome = t.engine.validate_dependencies(user, &m1, true).unwrap();
    assert_eq!(
        outcome.unmet[0].reason,
        UnmetReason::Incomplete {
            required: 100,
            actual: 0,
        }
    );
}
