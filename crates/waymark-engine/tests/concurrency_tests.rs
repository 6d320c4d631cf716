//! Racing writers against one engine and against two engines sharing a
//! database file.

use std::sync::Barrier;
use std::thread;
use waymark_engine::prelude::*;
use waymark_test_utils::TestEngine;

const RACERS: usize = 8;

fn race_start<S: MilestoneStore>(
    engines: &[&ProgressEngine<S>],
    user: UserId,
    code: &MilestoneCode,
) {
    let barrier = Barrier::new(engines.len());
    let results: Vec<Result<StartOutcome, EngineError>> = thread::scope(|scope| {
        let handles: Vec<_> = engines
            .iter()
            .map(|engine| {
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    engine.start_milestone(user, code)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    });

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "{results:?}");
    for result in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(
            matches!(result, EngineError::AlreadyStarted(c) if c == code),
            "{result}"
        );
    }

    let row = engines[0].get_progress(user, code).unwrap().unwrap();
    assert_eq!(row.status, MilestoneStatus::InProgress);
}

#[test]
fn concurrent_starts_have_one_winner() {
    let t = TestEngine::new();
    let m0 = t.register(1).remove(0);
    let engines: Vec<_> = (0..RACERS).map(|_| &t.engine).collect();

    for _ in 0..5 {
        race_start(&engines, UserId::new(), &m0);
    }
}

#[test]
fn concurrent_starts_on_shared_sqlite_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("race.db");
    let open = || {
        TestEngine::with_store(SqliteStore::open(&path).unwrap(), EngineConfig::default())
    };
    let first = open();
    let m0 = first.register(1).remove(0);
    let second = open();

    let engines = [&first.engine, &second.engine, &first.engine, &second.engine];
    for _ in 0..3 {
        race_start(&engines, UserId::new(), &m0);
    }
}

#[test]
fn concurrent_cycle_attempts_keep_graph_acyclic() {
    let t = TestEngine::new();
    let codes = t.register(2);
    let (a, b) = (&codes[0], &codes[1]);
    let barrier = Barrier::new(2);

    let results: Vec<Result<_, EngineError>> = thread::scope(|scope| {
        let forward = scope.spawn(|| {
            barrier.wait();
            t.engine.add_dependency(a, b, DependencySpec::required())
        });
        let backward = scope.spawn(|| {
            barrier.wait();
            t.engine.add_dependency(b, a, DependencySpec::required())
        });
        vec![forward.join().unwrap(), backward.join().unwrap()]
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(EngineError::Graph(GraphError::Cycle { .. }))
    )));
}

#[test]
fn concurrent_completion_unlocks_dependent_once() {
    let t = TestEngine::new();
    let codes = t.register(3);
    t.engine
        .add_dependency(&codes[2], &codes[0], DependencySpec::required())
        .unwrap();
    t.engine
        .add_dependency(&codes[2], &codes[1], DependencySpec::required())
        .unwrap();
    let user = UserId::new();
    t.engine.start_milestone(user, &codes[0]).unwrap();
    t.engine.start_milestone(user, &codes[1]).unwrap();

    let barrier = Barrier::new(2);
    let unlocked: Vec<MilestoneCode> = thread::scope(|scope| {
        let handles: Vec<_> = codes[..2]
            .iter()
            .map(|code| {
                let (barrier, engine) = (&barrier, &t.engine);
                scope.spawn(move || {
                    barrier.wait();
                    engine
                        .complete_milestone(user, code, None, None)
                        .unwrap()
                        .newly_unlocked
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect()
    });

    assert_eq!(unlocked, vec![codes[2].clone()]);
}
