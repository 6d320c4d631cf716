//! Engine facade
//!
//! Every mutating call is one store transaction. The store bumps its commit
//! counters inside that transaction, and cached reads are checked against
//! the counters seen by the reading transaction, so writes from another
//! engine sharing the store retire this engine's entries too. After commit
//! the local cache drops the affected entries to free memory early.

use crate::cascade::{Cascader, Trigger};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::progress::{Lifecycle, ProgressUpdate};
use crate::tree::{self, UserTree};
use crate::validator::{DependencyValidator, ValidationOutcome};
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::sync::Arc;
use waymark_cache::{
    CacheKey, CacheLayer, EligibilityCache, LayerStats, MokaCache, NoopCache, Stamp,
};
use waymark_core::{
    DependencySpec, Milestone, MilestoneCode, MilestoneDependency, MilestoneStatus,
    NewMilestone, Timestamp, UserId, UserMilestone, UserProfile,
};
use waymark_store::{MilestoneStore, StoreTx};

/// Result of [`ProgressEngine::start_milestone`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartOutcome {
    /// Human-readable summary
    pub message: String,
    /// Progress row after the write
    pub progress: UserMilestone,
}

/// Result of [`ProgressEngine::update_progress`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateOutcome {
    /// Human-readable summary
    pub message: String,
    /// Progress row after the write
    pub progress: UserMilestone,
    /// Dependents unlocked by crossing a partial-completion threshold
    pub newly_unlocked: Vec<MilestoneCode>,
}

/// Result of [`ProgressEngine::complete_milestone`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompleteOutcome {
    /// Human-readable summary
    pub message: String,
    /// Progress row after the write
    pub progress: UserMilestone,
    /// Dependents unlocked by the cascade
    pub newly_unlocked: Vec<MilestoneCode>,
}

/// Result of [`ProgressEngine::fail_milestone`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailOutcome {
    /// Human-readable summary
    pub message: String,
    /// Progress row after the write
    pub progress: UserMilestone,
}

/// Result of [`ProgressEngine::unlock_milestone`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnlockOutcome {
    /// Human-readable summary
    pub message: String,
    /// Progress row after the write
    pub progress: UserMilestone,
}

/// Dependency-aware progress engine over a [`MilestoneStore`]
pub struct ProgressEngine<S> {
    store: S,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    lifecycle: Lifecycle,
    cache: CacheLayer,
    graph_lock: Mutex<()>,
}

impl<S> std::fmt::Debug for ProgressEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressEngine")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl<S: MilestoneStore> ProgressEngine<S> {
    /// Engine with the wall clock and the cache backend chosen by `config`
    pub fn new(store: S, config: EngineConfig) -> Self {
        let backend: Arc<dyn EligibilityCache> = if config.cache.enabled {
            Arc::new(MokaCache::new(config.cache.max_capacity, config.cache.ttl()))
        } else {
            Arc::new(NoopCache)
        };
        let validator = DependencyValidator::new(config.partial_completion_policy);
        Self {
            cache: CacheLayer::new(backend, config.cache.retry.policy()),
            lifecycle: Lifecycle::new(validator, config.retry_limit()),
            clock: Arc::new(SystemClock),
            graph_lock: Mutex::new(()),
            store,
            config,
        }
    }

    /// Replace the time source
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the cache backend
    #[must_use]
    pub fn with_cache_backend(mut self, backend: Arc<dyn EligibilityCache>) -> Self {
        self.cache = CacheLayer::new(backend, self.config.cache.retry.policy());
        self
    }

    /// Underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Cache hit / miss counters
    pub fn cache_stats(&self) -> LayerStats {
        self.cache.stats()
    }

    // --- catalog and graph ---

    /// Add a milestone to the catalog
    pub fn register_milestone(&self, milestone: NewMilestone) -> Result<Milestone> {
        let _graph = self.graph_lock.lock();
        let now = self.clock.now();
        let stored = self.store.write(|tx| {
            if tx.milestone_by_code(&milestone.code)?.is_some() {
                return Err(EngineError::InvalidInput(format!(
                    "milestone {} already registered",
                    milestone.code
                )));
            }
            Ok(tx.insert_milestone(&milestone, now)?)
        })?;
        self.cache.invalidate_all();
        tracing::info!(milestone = %stored.code, id = %stored.id, "milestone registered");
        Ok(stored)
    }

    /// Add edge `milestone -> depends_on`.
    ///
    /// Rejected with [`waymark_core::GraphError`] when it would reference
    /// itself, duplicate an edge or close a cycle; nothing is written then.
    pub fn add_dependency(
        &self,
        milestone: &MilestoneCode,
        depends_on: &MilestoneCode,
        spec: DependencySpec,
    ) -> Result<MilestoneDependency> {
        let _graph = self.graph_lock.lock();
        let now = self.clock.now();
        let result = self
            .store
            .write(|tx| waymark_store::add_edge(tx, milestone, depends_on, spec, now))
            .map_err(EngineError::from);
        match result {
            Ok(edge) => {
                self.cache.invalidate_all();
                tracing::info!(
                    %milestone,
                    %depends_on,
                    required = edge.is_required,
                    min_completion = edge.minimum_completion_percentage,
                    "dependency added"
                );
                Ok(edge)
            }
            Err(err) => {
                tracing::warn!(%milestone, %depends_on, error = %err, "dependency rejected");
                Err(err)
            }
        }
    }

    /// Remove edge `milestone -> depends_on`; returns whether it existed
    pub fn remove_dependency(
        &self,
        milestone: &MilestoneCode,
        depends_on: &MilestoneCode,
    ) -> Result<bool> {
        let _graph = self.graph_lock.lock();
        let removed = self
            .store
            .write(|tx| waymark_store::remove_edge(tx, milestone, depends_on))?;
        if removed {
            self.cache.invalidate_all();
            tracing::info!(%milestone, %depends_on, "dependency removed");
        }
        Ok(removed)
    }

    /// All transitive prerequisites, roots first
    pub fn get_dependency_chain(
        &self,
        milestone: &MilestoneCode,
        include_optional: bool,
    ) -> Result<Vec<MilestoneCode>> {
        let target = self.milestone(milestone)?;
        let key = CacheKey::DependencyChain {
            milestone: target.id,
            include_optional,
        };
        self.cached(key, |tx| {
            let graph = waymark_store::load_graph(tx)?;
            graph
                .dependency_chain(target.id, include_optional)
                .into_iter()
                .map(|id| {
                    tx.milestone(id)?
                        .map(|m| m.code)
                        .ok_or_else(|| EngineError::NotFound(format!("milestone {id}")))
                })
                .collect()
        })
    }

    // --- eligibility ---

    /// Check whether `user` may work on `milestone`
    pub fn validate_dependencies(
        &self,
        user: UserId,
        milestone: &MilestoneCode,
        check_conditions: bool,
    ) -> Result<ValidationOutcome> {
        let target = self.milestone(milestone)?;
        let key = CacheKey::Eligibility {
            user,
            milestone: target.id,
            conditions: check_conditions,
        };
        self.cached(key, |tx| {
            Ok(self
                .lifecycle
                .validator()
                .validate(tx, user, &target, check_conditions)?)
        })
    }

    // --- lifecycle ---

    /// Seed rows for every milestone the user has none for
    pub fn initialize_user(&self, user: UserId) -> Result<Vec<UserMilestone>> {
        let created =
            self.transition(user, |tx, now| self.lifecycle.initialize_user(tx, user, now))?;
        tracing::info!(%user, created = created.len(), "user initialized");
        Ok(created)
    }

    /// AVAILABLE (or FAILED, for a retry) -> IN_PROGRESS
    pub fn start_milestone(&self, user: UserId, milestone: &MilestoneCode) -> Result<StartOutcome> {
        let result = self.transition(user, |tx, now| {
            let target = resolve(&*tx, milestone)?;
            self.lifecycle.start(tx, user, &target, now)
        });

        let progress = match result {
            Err(EngineError::ConcurrencyConflict(reason)) => {
                // Lost the race: report what the winner did.
                let winner = self.get_progress(user, milestone)?;
                if winner.is_some_and(|row| row.status == MilestoneStatus::InProgress) {
                    return Err(EngineError::AlreadyStarted(milestone.clone()));
                }
                return Err(EngineError::ConcurrencyConflict(reason));
            }
            Err(err) => {
                tracing::warn!(%user, %milestone, error = %err, "start rejected");
                return Err(err);
            }
            Ok(progress) => progress,
        };

        tracing::info!(
            %user,
            %milestone,
            attempt = progress.processing_attempts + 1,
            "milestone started"
        );
        Ok(StartOutcome {
            message: format!("Milestone {milestone} started"),
            progress,
        })
    }

    /// Record a step of an in-progress milestone
    pub fn update_progress(
        &self,
        user: UserId,
        milestone: &MilestoneCode,
        update: ProgressUpdate,
    ) -> Result<UpdateOutcome> {
        let (progress, newly_unlocked) = self.transition(user, |tx, now| {
            let target = resolve(&*tx, milestone)?;
            let (row, previous) = self.lifecycle.update(tx, user, &target, &update, now)?;
            let unlocked = if row.completion_percentage > previous {
                Cascader::new(self.lifecycle.validator()).run(
                    tx,
                    user,
                    &target,
                    Trigger::Progressed {
                        from: previous,
                        to: row.completion_percentage,
                    },
                    now,
                )?
            } else {
                Vec::new()
            };
            Ok((row, unlocked))
        })?;

        tracing::debug!(
            %user,
            %milestone,
            step = progress.current_step,
            completion = progress.completion_percentage,
            "progress updated"
        );
        Ok(UpdateOutcome {
            message: format!(
                "Milestone {milestone} at {}%",
                progress.completion_percentage
            ),
            progress,
            newly_unlocked,
        })
    }

    /// IN_PROGRESS -> COMPLETED, then unlock eligible dependents in the same
    /// transaction
    pub fn complete_milestone(
        &self,
        user: UserId,
        milestone: &MilestoneCode,
        output: Option<serde_json::Value>,
        quality_score: Option<f64>,
    ) -> Result<CompleteOutcome> {
        let (progress, newly_unlocked) = self.transition(user, |tx, now| {
            let target = resolve(&*tx, milestone)?;
            let row = self
                .lifecycle
                .complete(tx, user, &target, output, quality_score, now)?;
            let unlocked = Cascader::new(self.lifecycle.validator()).run(
                tx,
                user,
                &target,
                Trigger::Completed,
                now,
            )?;
            Ok((row, unlocked))
        })?;

        tracing::info!(%user, %milestone, unlocked = newly_unlocked.len(), "milestone completed");
        let message = if newly_unlocked.is_empty() {
            format!("Milestone {milestone} completed")
        } else {
            let codes: Vec<&str> = newly_unlocked.iter().map(MilestoneCode::as_str).collect();
            format!("Milestone {milestone} completed; unlocked {}", codes.join(", "))
        };
        Ok(CompleteOutcome {
            message,
            progress,
            newly_unlocked,
        })
    }

    /// Record a failed attempt
    pub fn fail_milestone(
        &self,
        user: UserId,
        milestone: &MilestoneCode,
        error_message: &str,
    ) -> Result<FailOutcome> {
        let progress = self.transition(user, |tx, now| {
            let target = resolve(&*tx, milestone)?;
            self.lifecycle.fail(tx, user, &target, error_message, now)
        })?;

        tracing::warn!(
            %user,
            %milestone,
            attempts = progress.processing_attempts,
            error = error_message,
            "milestone failed"
        );
        Ok(FailOutcome {
            message: format!(
                "Milestone {milestone} failed after {} attempt(s)",
                progress.processing_attempts
            ),
            progress,
        })
    }

    /// Explicit unlock, e.g. after payment; ignores `auto_unlock`
    pub fn unlock_milestone(
        &self,
        user: UserId,
        milestone: &MilestoneCode,
    ) -> Result<UnlockOutcome> {
        let progress = self.transition(user, |tx, now| {
            let target = resolve(&*tx, milestone)?;
            self.lifecycle.unlock(tx, user, &target, now)
        })?;

        tracing::info!(%user, %milestone, "milestone unlocked");
        Ok(UnlockOutcome {
            message: format!("Milestone {milestone} unlocked"),
            progress,
        })
    }

    // --- reads ---

    /// The user's row for `milestone`, if any
    pub fn get_progress(
        &self,
        user: UserId,
        milestone: &MilestoneCode,
    ) -> Result<Option<UserMilestone>> {
        self.store.read(|tx| {
            let target = resolve(tx, milestone)?;
            Ok(tx.progress(user, target.id)?)
        })
    }

    /// Every milestone with the user's status and eligibility
    pub fn get_user_tree(&self, user: UserId) -> Result<UserTree> {
        self.cached(CacheKey::UserTree(user), |tx| {
            tree::build(tx, self.lifecycle.validator(), user)
        })
    }

    /// Replace the attribute snapshot read by edge conditions
    pub fn set_profile(&self, profile: &UserProfile) -> Result<()> {
        self.transition(profile.user_id, |tx, _| Ok(tx.upsert_profile(profile)?))
    }

    /// Catalog in `order_index` order
    pub fn milestones(&self) -> Result<Vec<Milestone>> {
        Ok(self.store.read(|tx| tx.milestones())?)
    }

    fn milestone(&self, code: &MilestoneCode) -> Result<Milestone> {
        self.store.read(|tx| resolve(tx, code))
    }

    /// Serve `key` from the cache if it was computed under the counters this
    /// read transaction sees, otherwise compute it from the same snapshot
    fn cached<T, F>(&self, key: CacheKey, compute: F) -> Result<T>
    where
        T: Any + Clone + Send + Sync,
        F: FnOnce(&dyn StoreTx) -> Result<T>,
    {
        self.store.read(|tx| {
            let version = tx.data_version(key.user())?;
            let stamp = Stamp {
                global: version.graph,
                user: version.user,
            };
            self.cache.get_or_try_compute(key, stamp, || compute(tx))
        })
    }

    /// One write transaction for `user`; the user's local cache entries are
    /// dropped after it commits
    fn transition<T, F>(&self, user: UserId, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn StoreTx, Timestamp) -> Result<T>,
    {
        let now = self.clock.now();
        let value = self.store.write(|tx| f(tx, now))?;
        self.cache.invalidate_user(user);
        Ok(value)
    }
}

fn resolve(tx: &dyn StoreTx, code: &MilestoneCode) -> Result<Milestone> {
    tx.milestone_by_code(code)?
        .ok_or_else(|| EngineError::NotFound(format!("milestone {code}")))
}
