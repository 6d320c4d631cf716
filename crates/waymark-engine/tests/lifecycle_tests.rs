//! Lifecycle tests: start / update / complete / fail / unlock against the
//! in-memory store.

use pretty_assertions::assert_eq;
use waymark_engine::prelude::*;
use waymark_engine::UnmetDependency;
use waymark_test_utils::{code, TestEngine};

#[test]
fn chain_blocks_until_prerequisite_completes() {
    let t = TestEngine::new();
    let [m0, m1, m2]: [MilestoneCode; 3] = t.linear_chain(3).try_into().unwrap();
    let user = UserId::new();

    let err = t.engine.start_milestone(user, &m2).unwrap_err();
    match err {
        EngineError::DependenciesNotMet { milestone, unmet } => {
            assert_eq!(milestone, m2);
            assert_eq!(
                unmet,
                vec![UnmetDependency {
                    milestone: m1.clone(),
                    reason: UnmetReason::Incomplete {
                        required: 100,
                        actual: 0,
                    },
                }]
            );
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(t.row(user, &m2).is_none());

    let started = t.engine.start_milestone(user, &m0).unwrap();
    assert_eq!(started.progress.status, MilestoneStatus::InProgress);

    let done = t
        .engine
        .complete_milestone(user, &m0, Some(serde_json::json!({"idea": "ok"})), Some(91.0))
        .unwrap();
    assert_eq!(done.newly_unlocked, vec![m1.clone()]);
    assert_eq!(done.progress.completion_percentage, 100);
    assert_eq!(done.progress.quality_score, Some(91.0));

    assert_eq!(t.row(user, &m1).unwrap().status, MilestoneStatus::Available);
    assert!(t.row(user, &m2).is_none(), "cascade is one hop");

    let outcome = t.engine.validate_dependencies(user, &m2, true).unwrap();
    assert!(!outcome.met);
    assert_eq!(outcome.unmet_codes(), vec![m1]);
}

#[test]
fn second_start_is_rejected() {
    let t = TestEngine::new();
    let m0 = t.register(1).remove(0);
    let user = UserId::new();

    t.engine.start_milestone(user, &m0).unwrap();
    let err = t.engine.start_milestone(user, &m0).unwrap_err();
    assert!(matches!(err, EngineError::AlreadyStarted(ref c) if *c == m0), "{err}");
}

#[test]
fn completed_milestone_cannot_restart() {
    let t = TestEngine::new();
    let m0 = t.register(1).remove(0);
    let user = UserId::new();
    t.finish(user, &m0);

    let err = t.engine.start_milestone(user, &m0).unwrap_err();
    assert!(
        matches!(
            err,
            EngineError::InvalidTransition {
                from: MilestoneStatus::Completed,
                to: MilestoneStatus::InProgress,
                ..
            }
        ),
        "{err}"
    );
}

#[test]
fn unknown_milestone_is_not_found() {
    let t = TestEngine::new();
    t.register(1);
    let err = t
        .engine
        .start_milestone(UserId::new(), &code("M9"))
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)), "{err}");
}

#[test]
fn update_requires_in_progress() {
    let t = TestEngine::new();
    let [m0, m1]: [MilestoneCode; 2] = t.linear_chain(2).try_into().unwrap();
    let user = UserId::new();
    t.finish(user, &m0);

    // M1 is AVAILABLE, not started.
    let err = t
        .engine
        .update_progress(user, &m1, ProgressUpdate::step(1).with_total(4))
        .unwrap_err();
    assert!(
        matches!(
            err,
            EngineError::InvalidTransition {
                from: MilestoneStatus::Available,
                ..
            }
        ),
        "{err}"
    );

    let err = t
        .engine
        .update_progress(user, &m0, ProgressUpdate::step(1))
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }), "{err}");
}

#[test]
fn update_tracks_steps_and_checkpoint() {
    let t = TestEngine::new();
    let m0 = t.register(1).remove(0);
    let user = UserId::new();
    t.engine.start_milestone(user, &m0).unwrap();

    let outcome = t
        .engine
        .update_progress(
            user,
            &m0,
            ProgressUpdate::step(3)
                .with_total(10)
                .with_checkpoint(serde_json::json!({"draft": 3})),
        )
        .unwrap();
    assert_eq!(outcome.progress.completion_percentage, 30);
    assert_eq!(outcome.progress.current_step, 3);
    assert_eq!(outcome.progress.total_steps, 10);
    assert_eq!(
        outcome.progress.checkpoint_data,
        Some(serde_json::json!({"draft": 3}))
    );

    // Later updates keep the known total and the old checkpoint.
    let outcome = t
        .engine
        .update_progress(user, &m0, ProgressUpdate::step(5))
        .unwrap();
    assert_eq!(outcome.progress.completion_percentage, 50);
    assert_eq!(
        outcome.progress.checkpoint_data,
        Some(serde_json::json!({"draft": 3}))
    );

    // Final step still reads below 100 until completion.
    let outcome = t
        .engine
        .update_progress(user, &m0, ProgressUpdate::step(10))
        .unwrap();
    assert_eq!(outcome.progress.completion_percentage, 99);
    assert_eq!(outcome.progress.status, MilestoneStatus::InProgress);
}

#[test]
fn update_rejects_regression_and_overflow() {
    let t = TestEngine::new();
    let m0 = t.register(1).remove(0);
    let user = UserId::new();
    t.engine.start_milestone(user, &m0).unwrap();
    t.engine
        .update_progress(user, &m0, ProgressUpdate::step(4).with_total(8))
        .unwrap();

    let err = t
        .engine
        .update_progress(user, &m0, ProgressUpdate::step(2))
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidProgress(_)), "{err}");

    let err = t
        .engine
        .update_progress(user, &m0, ProgressUpdate::step(9))
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidProgress(_)), "{err}");

    let err = t
        .engine
        .update_progress(user, &m0, ProgressUpdate::step(1).with_total(0))
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidProgress(_)), "{err}");

    // Rejected updates leave the row untouched.
    let row = t.row(user, &m0).unwrap();
    assert_eq!((row.current_step, row.completion_percentage), (4, 50));

    let outcome = t
        .engine
        .update_progress(user, &m0, ProgressUpdate::step(2).reset())
        .unwrap();
    assert_eq!(outcome.progress.current_step, 2);
    assert_eq!(outcome.progress.completion_percentage, 25);
}

#[test]
fn complete_validates_score_and_state() {
    let t = TestEngine::new();
    let [m0, m1]: [MilestoneCode; 2] = t.linear_chain(2).try_into().unwrap();
    let user = UserId::new();

    let err = t
        .engine
        .complete_milestone(user, &m0, None, Some(50.0))
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)), "{err}");

    t.engine.start_milestone(user, &m0).unwrap();
    let err = t
        .engine
        .complete_milestone(user, &m0, None, Some(120.0))
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidProgress(_)), "{err}");
    assert_eq!(t.row(user, &m0).unwrap().status, MilestoneStatus::InProgress);
    assert!(t.row(user, &m1).is_none());

    let done = t
        .engine
        .complete_milestone(user, &m0, None, Some(100.0))
        .unwrap();
    assert!(done.progress.completed_at.is_some());
    assert!(done.message.contains("M1"), "{}", done.message);
}

#[test]
fn failure_then_retry() {
    let t = TestEngine::new();
    let m0 = t.register(1).remove(0);
    let user = UserId::new();
    t.engine.start_milestone(user, &m0).unwrap();

    let failed = t
        .engine
        .fail_milestone(user, &m0, "generator timed out")
        .unwrap();
    assert_eq!(failed.progress.status, MilestoneStatus::Failed);
    assert_eq!(failed.progress.processing_attempts, 1);
    assert_eq!(
        failed.progress.last_error.as_deref(),
        Some("generator timed out")
    );

    let retried = t.engine.start_milestone(user, &m0).unwrap();
    assert_eq!(retried.progress.status, MilestoneStatus::InProgress);
    assert_eq!(retried.progress.processing_attempts, 1);
    assert_eq!(retried.progress.last_error, None);
}

#[test]
fn retry_limit_blocks_further_attempts() {
    let t = TestEngine::with_config(EngineConfig::new().with_max_processing_attempts(Some(2)));
    let m0 = t.register(1).remove(0);
    let user = UserId::new();

    for _ in 0..2 {
        t.engine.start_milestone(user, &m0).unwrap();
        t.engine.fail_milestone(user, &m0, "boom").unwrap();
    }
    let err = t.engine.start_milestone(user, &m0).unwrap_err();
    assert!(
        matches!(
            err,
            EngineError::RetryLimitExceeded {
                attempts: 2,
                limit: 2,
                ..
            }
        ),
        "{err}"
    );
    assert_eq!(t.row(user, &m0).unwrap().status, MilestoneStatus::Failed);
}

#[test]
fn zero_retry_limit_means_unlimited() {
    let t = TestEngine::with_config(EngineConfig::new().with_max_processing_attempts(Some(0)));
    let m0 = t.register(1).remove(0);
    let user = UserId::new();

    for _ in 0..6 {
        t.engine.start_milestone(user, &m0).unwrap();
        t.engine.fail_milestone(user, &m0, "again").unwrap();
    }
    t.engine.start_milestone(user, &m0).unwrap();
    assert_eq!(t.row(user, &m0).unwrap().processing_attempts, 6);
}

#[test]
fn time_spent_accumulates_between_accesses() {
    let t = TestEngine::new();
    let m0 = t.register(1).remove(0);
    let user = UserId::new();

    t.engine.start_milestone(user, &m0).unwrap();
    t.advance_secs(30);
    t.engine
        .update_progress(user, &m0, ProgressUpdate::step(1).with_total(2))
        .unwrap();
    t.advance_secs(45);
    let done = t.engine.complete_milestone(user, &m0, None, None).unwrap();

    assert_eq!(done.progress.time_spent_seconds, 75);
    let started = done.progress.started_at.unwrap();
    assert_eq!(done.progress.completed_at.unwrap() - started, chrono::Duration::seconds(75));
}

#[test]
fn retry_does_not_count_idle_time() {
    let t = TestEngine::new();
    let m0 = t.register(1).remove(0);
    let user = UserId::new();

    t.engine.start_milestone(user, &m0).unwrap();
    t.advance_secs(20);
    t.engine.fail_milestone(user, &m0, "lost connection").unwrap();
    t.advance_secs(3_600);
    t.engine.start_milestone(user, &m0).unwrap();
    t.advance_secs(10);
    let done = t.engine.complete_milestone(user, &m0, None, None).unwrap();

    assert_eq!(done.progress.time_spent_seconds, 30);
}

#[test]
fn initialize_user_seeds_rows_once() {
    let t = TestEngine::new();
    let [m0, m1, m2]: [MilestoneCode; 3] = t.linear_chain(3).try_into().unwrap();
    let paid = t.register_paid("M3");
    let user = UserId::new();

    let created = t.engine.initialize_user(user).unwrap();
    assert_eq!(created.len(), 4);
    assert_eq!(t.row(user, &m0).unwrap().status, MilestoneStatus::Available);
    for locked in [&m1, &m2, &paid] {
        assert_eq!(t.row(user, locked).unwrap().status, MilestoneStatus::Locked);
    }

    assert!(t.engine.initialize_user(user).unwrap().is_empty());

    let err = t.engine.start_milestone(user, &m1).unwrap_err();
    assert!(matches!(err, EngineError::DependenciesNotMet { .. }), "{err}");

    let unlocked = t.finish(user, &m0);
    assert_eq!(unlocked, vec![m1.clone()]);
    let row = t.row(user, &m1).unwrap();
    assert_eq!(row.status, MilestoneStatus::Available);
    assert!(row.unlocked_at.is_some());
}

#[test]
fn user_tree_reports_status_and_eligibility() {
    let t = TestEngine::new();
    let [m0, m1, m2]: [MilestoneCode; 3] = t.linear_chain(3).try_into().unwrap();
    let user = UserId::new();
    t.finish(user, &m0);

    let tree = t.engine.get_user_tree(user).unwrap();
    let codes: Vec<&MilestoneCode> = tree.milestones.iter().map(|n| &n.code).collect();
    assert_eq!(codes, vec![&m0, &m1, &m2]);
    assert_eq!(tree.completed(), 1);
    assert_eq!(tree.overall_percentage(), 33);

    let first = tree.node(&m0).unwrap();
    assert_eq!(first.status, MilestoneStatus::Completed);
    assert_eq!(first.completion_percentage, 100);
    assert!(first.prerequisites.is_empty());

    let second = tree.node(&m1).unwrap();
    assert_eq!(second.status, MilestoneStatus::Available);
    assert!(second.eligible);

    let third = tree.node(&m2).unwrap();
    assert_eq!(third.status, MilestoneStatus::Locked);
    assert!(!third.eligible);
    assert_eq!(third.prerequisites, vec![m1.clone()]);

    // Tree is rebuilt after the next write.
    t.engine.start_milestone(user, &m1).unwrap();
    let tree = t.engine.get_user_tree(user).unwrap();
    assert_eq!(tree.node(&m1).unwrap().status, MilestoneStatus::InProgress);
}

#[test]
fn users_are_independent() {
    let t = TestEngine::new();
    let [m0, m1]: [MilestoneCode; 2] = t.linear_chain(2).try_into().unwrap();
    let (alice, bob) = (UserId::new(), UserId::new());

    t.finish(alice, &m0);
    assert!(t.engine.validate_dependencies(alice, &m1, true).unwrap().met);
    assert!(!t.engine.validate_dependencies(bob, &m1, true).unwrap().met);
    assert!(t.row(bob, &m0).is_none());
}
