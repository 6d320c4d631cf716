//! Testing utilities for the Waymark workspace
//!
//! Shared fixtures: engines on a manual clock, catalog builders and
//! shortcuts for driving a user through milestones.

#![allow(missing_docs)]

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use waymark_core::{
    DependencySpec, MilestoneCode, NewMilestone, Timestamp, UserId, UserMilestone,
};
use waymark_engine::{EngineConfig, ManualClock, ProgressEngine};
use waymark_store::{MemoryStore, MilestoneStore};

/// Fixed start instant so time accounting is reproducible
pub fn epoch() -> Timestamp {
    Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0)
        .single()
        .unwrap()
}

pub fn code(raw: &str) -> MilestoneCode {
    MilestoneCode::parse(raw).unwrap()
}

pub struct TestEngine<S> {
    pub engine: ProgressEngine<S>,
    pub clock: Arc<ManualClock>,
}

impl<S: MilestoneStore> TestEngine<S> {
    pub fn with_store(store: S, config: EngineConfig) -> Self {
        let clock = Arc::new(ManualClock::new(epoch()));
        let engine = ProgressEngine::new(store, config).with_clock(clock.clone());
        Self { engine, clock }
    }

    pub fn advance_secs(&self, seconds: i64) {
        self.clock.advance(chrono::Duration::seconds(seconds));
    }

    /// Register `M0..M{count-1}` with no edges
    pub fn register(&self, count: usize) -> Vec<MilestoneCode> {
        (0..count)
            .map(|i| {
                let code = code(&format!("M{i}"));
                self.engine
                    .register_milestone(NewMilestone::new(code.clone(), format!("Milestone {i}")))
                    .unwrap();
                code
            })
            .collect()
    }

    /// `M0 <- M1 <- ... <- M{count-1}`, every edge required at 100%
    pub fn linear_chain(&self, count: usize) -> Vec<MilestoneCode> {
        let codes = self.register(count);
        for pair in codes.windows(2) {
            self.engine
                .add_dependency(&pair[1], &pair[0], DependencySpec::required())
                .unwrap();
        }
        codes
    }

    /// Register a paid milestone that never unlocks on its own
    pub fn register_paid(&self, raw: &str) -> MilestoneCode {
        let code = code(raw);
        self.engine
            .register_milestone(NewMilestone::new(code.clone(), format!("Paid {raw}")).paid())
            .unwrap();
        code
    }

    /// Start and complete `milestone` for `user`
    pub fn finish(&self, user: UserId, milestone: &MilestoneCode) -> Vec<MilestoneCode> {
        self.engine.start_milestone(user, milestone).unwrap();
        self.engine
            .complete_milestone(user, milestone, Some(serde_json::json!({})), None)
            .unwrap()
            .newly_unlocked
    }

    pub fn row(&self, user: UserId, milestone: &MilestoneCode) -> Option<UserMilestone> {
        self.engine.get_progress(user, milestone).unwrap()
    }
}

impl TestEngine<MemoryStore> {
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new(), EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_store(MemoryStore::new(), config)
    }
}

impl Default for TestEngine<MemoryStore> {
    fn default() -> Self {
        Self::new()
    }
}
