//! Progress state machine operations
//!
//! Each function runs inside a caller-supplied write transaction and checks
//! its transition against [`waymark_core::state_machine`] before writing.
//! Rows are updated with compare-and-set on their version, so a concurrent
//! writer surfaces as [`EngineError::ConcurrencyConflict`] instead of a lost
//! update.

use crate::error::{EngineError, Result};
use crate::validator::DependencyValidator;
use serde::{Deserialize, Serialize};
use waymark_core::state_machine::validate_transition;
use waymark_core::{Milestone, MilestoneStatus, Timestamp, UserId, UserMilestone};
use waymark_store::StoreTx;

/// Step report for an in-progress milestone
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Steps completed so far
    pub step: u32,
    /// Replaces the known total when set
    #[serde(default)]
    pub total_steps: Option<u32>,
    /// Replaces the stored checkpoint when set
    #[serde(default)]
    pub checkpoint_data: Option<serde_json::Value>,
    /// Allow the step count to move backwards
    #[serde(default)]
    pub reset: bool,
}

impl ProgressUpdate {
    /// Report reaching `step`
    #[must_use]
    pub fn step(step: u32) -> Self {
        Self {
            step,
            ..Self::default()
        }
    }

    /// With total step count
    #[must_use]
    pub fn with_total(mut self, total_steps: u32) -> Self {
        self.total_steps = Some(total_steps);
        self
    }

    /// With checkpoint payload
    #[must_use]
    pub fn with_checkpoint(mut self, checkpoint: serde_json::Value) -> Self {
        self.checkpoint_data = Some(checkpoint);
        self
    }

    /// Allow moving backwards
    #[must_use]
    pub fn reset(mut self) -> Self {
        self.reset = true;
        self
    }
}

/// Lifecycle rules shared by every write path
#[derive(Debug, Clone, Copy)]
pub struct Lifecycle {
    validator: DependencyValidator,
    retry_limit: Option<u32>,
}

impl Lifecycle {
    /// Rules using `validator`; `retry_limit` of `None` or 0 is unlimited
    #[must_use]
    pub fn new(validator: DependencyValidator, retry_limit: Option<u32>) -> Self {
        Self {
            validator,
            retry_limit,
        }
    }

    /// Validator used for eligibility decisions
    #[must_use]
    pub fn validator(&self) -> &DependencyValidator {
        &self.validator
    }

    /// Begin (or retry) an attempt
    pub fn start(
        &self,
        tx: &mut dyn StoreTx,
        user: UserId,
        milestone: &Milestone,
        now: Timestamp,
    ) -> Result<UserMilestone> {
        let existing = tx.progress(user, milestone.id)?;
        match existing.as_ref().map(|row| row.status) {
            Some(MilestoneStatus::InProgress) => {
                return Err(EngineError::AlreadyStarted(milestone.code.clone()));
            }
            Some(MilestoneStatus::Completed) => {
                return Err(EngineError::InvalidTransition {
                    milestone: milestone.code.clone(),
                    from: MilestoneStatus::Completed,
                    to: MilestoneStatus::InProgress,
                });
            }
            _ => {}
        }

        let outcome = self.validator.validate(&*tx, user, milestone, true)?;
        if !outcome.met {
            return Err(EngineError::DependenciesNotMet {
                milestone: milestone.code.clone(),
                unmet: outcome.unmet,
            });
        }

        let Some(mut row) = existing else {
            if !milestone.auto_unlock {
                return Err(EngineError::MilestoneLocked(milestone.code.clone()));
            }
            let mut row = UserMilestone::new(user, milestone.id, MilestoneStatus::Available, now);
            enter_in_progress(&mut row, milestone, now)?;
            tx.insert_progress(&row)?;
            return Ok(row);
        };

        let expected = row.version;
        match row.status {
            MilestoneStatus::Locked => {
                if !milestone.auto_unlock {
                    return Err(EngineError::MilestoneLocked(milestone.code.clone()));
                }
                transition(&mut row, milestone, MilestoneStatus::Available)?;
                row.unlocked_at = Some(now);
            }
            MilestoneStatus::Failed => {
                if let Some(limit) = self.retry_limit {
                    if row.processing_attempts >= limit {
                        return Err(EngineError::RetryLimitExceeded {
                            milestone: milestone.code.clone(),
                            attempts: row.processing_attempts,
                            limit,
                        });
                    }
                }
                row.last_error = None;
            }
            _ => {}
        }
        enter_in_progress(&mut row, milestone, now)?;
        row.version += 1;
        tx.compare_and_set_progress(expected, &row)?;
        Ok(row)
    }

    /// Record a step; returns the new row and the completion it had before
    pub fn update(
        &self,
        tx: &mut dyn StoreTx,
        user: UserId,
        milestone: &Milestone,
        update: &ProgressUpdate,
        now: Timestamp,
    ) -> Result<(UserMilestone, u8)> {
        let mut row = existing_row(&*tx, user, milestone)?;
        let expected = row.version;
        let previous = row.completion_percentage;
        if row.status != MilestoneStatus::InProgress {
            return Err(EngineError::InvalidTransition {
                milestone: milestone.code.clone(),
                from: row.status,
                to: MilestoneStatus::InProgress,
            });
        }

        if update.total_steps == Some(0) {
            return Err(EngineError::InvalidProgress(
                "total_steps must be positive".into(),
            ));
        }
        let total = update.total_steps.unwrap_or(row.total_steps);
        if !update.reset && update.step < row.current_step {
            return Err(EngineError::InvalidProgress(format!(
                "step {} is behind current step {}",
                update.step, row.current_step
            )));
        }
        if total > 0 && update.step > total {
            return Err(EngineError::InvalidProgress(format!(
                "step {} exceeds total of {total}",
                update.step
            )));
        }

        row.current_step = update.step;
        row.total_steps = total;
        if total > 0 {
            let percent = u64::from(update.step) * 100 / u64::from(total);
            row.completion_percentage = u8::try_from(percent.min(99)).unwrap_or(99);
        }
        if let Some(checkpoint) = &update.checkpoint_data {
            row.checkpoint_data = Some(checkpoint.clone());
        }
        touch(&mut row, now);
        row.version += 1;

        tx.compare_and_set_progress(expected, &row)?;
        Ok((row, previous))
    }

    /// Finish the attempt with its deliverable
    pub fn complete(
        &self,
        tx: &mut dyn StoreTx,
        user: UserId,
        milestone: &Milestone,
        output: Option<serde_json::Value>,
        quality_score: Option<f64>,
        now: Timestamp,
    ) -> Result<UserMilestone> {
        if let Some(score) = quality_score {
            if !(0.0..=100.0).contains(&score) {
                return Err(EngineError::InvalidProgress(format!(
                    "quality score {score} is outside 0..=100"
                )));
            }
        }

        let mut row = existing_row(&*tx, user, milestone)?;
        let expected = row.version;
        transition(&mut row, milestone, MilestoneStatus::Completed)?;

        row.completion_percentage = 100;
        if row.total_steps > 0 {
            row.current_step = row.total_steps;
        }
        row.output_data = output;
        row.quality_score = quality_score;
        row.completed_at = Some(now);
        touch(&mut row, now);
        row.version += 1;

        tx.compare_and_set_progress(expected, &row)?;
        Ok(row)
    }

    /// Record a failed attempt
    pub fn fail(
        &self,
        tx: &mut dyn StoreTx,
        user: UserId,
        milestone: &Milestone,
        message: &str,
        now: Timestamp,
    ) -> Result<UserMilestone> {
        let mut row = existing_row(&*tx, user, milestone)?;
        let expected = row.version;
        transition(&mut row, milestone, MilestoneStatus::Failed)?;

        row.processing_attempts += 1;
        row.last_error = Some(message.to_owned());
        touch(&mut row, now);
        row.version += 1;

        tx.compare_and_set_progress(expected, &row)?;
        Ok(row)
    }

    /// Explicit unlock (payment, admin action). Ignores `auto_unlock`.
    ///
    /// Unlocking an already available milestone is a no-op.
    pub fn unlock(
        &self,
        tx: &mut dyn StoreTx,
        user: UserId,
        milestone: &Milestone,
        now: Timestamp,
    ) -> Result<UserMilestone> {
        let existing = tx.progress(user, milestone.id)?;
        if let Some(row) = &existing {
            match row.status {
                MilestoneStatus::Available => return Ok(row.clone()),
                MilestoneStatus::Locked => {}
                other => {
                    return Err(EngineError::InvalidTransition {
                        milestone: milestone.code.clone(),
                        from: other,
                        to: MilestoneStatus::Available,
                    });
                }
            }
        }

        let outcome = self.validator.validate(&*tx, user, milestone, true)?;
        if !outcome.met {
            return Err(EngineError::DependenciesNotMet {
                milestone: milestone.code.clone(),
                unmet: outcome.unmet,
            });
        }

        make_available(tx, user, milestone, existing, now)
    }

    /// Create rows for every milestone the user has none for.
    ///
    /// Eligible auto-unlock milestones start AVAILABLE, the rest LOCKED.
    /// Existing rows are left alone, so calling this twice is harmless.
    pub fn initialize_user(
        &self,
        tx: &mut dyn StoreTx,
        user: UserId,
        now: Timestamp,
    ) -> Result<Vec<UserMilestone>> {
        let mut created = Vec::new();
        for milestone in tx.milestones()? {
            if tx.progress(user, milestone.id)?.is_some() {
                continue;
            }
            let eligible = milestone.auto_unlock
                && self.validator.validate(&*tx, user, &milestone, true)?.met;
            let status = if eligible {
                MilestoneStatus::Available
            } else {
                MilestoneStatus::Locked
            };
            let row = UserMilestone::new(user, milestone.id, status, now);
            tx.insert_progress(&row)?;
            created.push(row);
        }
        Ok(created)
    }
}

/// LOCKED/absent -> AVAILABLE, creating the row if needed
pub(crate) fn make_available(
    tx: &mut dyn StoreTx,
    user: UserId,
    milestone: &Milestone,
    existing: Option<UserMilestone>,
    now: Timestamp,
) -> Result<UserMilestone> {
    match existing {
        None => {
            let row = UserMilestone::new(user, milestone.id, MilestoneStatus::Available, now);
            tx.insert_progress(&row)?;
            Ok(row)
        }
        Some(mut row) => {
            let expected = row.version;
            transition(&mut row, milestone, MilestoneStatus::Available)?;
            row.unlocked_at = Some(now);
            row.updated_at = now;
            row.version += 1;
            tx.compare_and_set_progress(expected, &row)?;
            Ok(row)
        }
    }
}

fn existing_row(tx: &dyn StoreTx, user: UserId, milestone: &Milestone) -> Result<UserMilestone> {
    tx.progress(user, milestone.id)?.ok_or_else(|| {
        EngineError::NotFound(format!("progress on {} for user {user}", milestone.code))
    })
}

fn transition(row: &mut UserMilestone, milestone: &Milestone, to: MilestoneStatus) -> Result<()> {
    validate_transition(row.status, to).map_err(|err| EngineError::InvalidTransition {
        milestone: milestone.code.clone(),
        from: err.from,
        to: err.to,
    })?;
    row.status = to;
    Ok(())
}

fn enter_in_progress(row: &mut UserMilestone, milestone: &Milestone, now: Timestamp) -> Result<()> {
    transition(row, milestone, MilestoneStatus::InProgress)?;
    row.started_at = Some(now);
    row.last_accessed_at = Some(now);
    row.updated_at = now;
    Ok(())
}

/// Accumulate time since the previous access and stamp this one
fn touch(row: &mut UserMilestone, now: Timestamp) {
    if let Some(previous) = row.last_accessed_at {
        let elapsed = (now - previous).num_seconds().max(0);
        row.time_spent_seconds += u64::try_from(elapsed).unwrap_or(0);
    }
    row.last_accessed_at = Some(now);
    row.updated_at = now;
}
