//! Randomized simulator
//!
//! Drives a [`ProgressEngine`] over an in-memory store with a seeded RNG and
//! checks engine invariants after every operation. Graph edges are proposed
//! first (including ones that must be rejected), then random lifecycle
//! operations run for several users.

use crate::clock::ManualClock;
use crate::config::EngineConfig;
use crate::engine::ProgressEngine;
use crate::error::EngineError;
use crate::progress::ProgressUpdate;
use crate::validator::DependencyValidator;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Arc;
use waymark_core::{
    DependencySpec, MilestoneCode, MilestoneId, MilestoneStatus, NewMilestone, UserId,
};
use waymark_graph::{would_create_cycle, DependencyGraph, EdgeWeight};
use waymark_store::{load_graph, MemoryStore, MilestoneStore};

/// Simulator configuration
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Catalog size
    pub milestones: usize,
    /// Candidate edges proposed before the lifecycle phase
    pub edge_attempts: usize,
    /// Simulated users
    pub users: usize,
    /// Lifecycle operations to execute
    pub total_operations: u64,
    /// Share of milestones that need an explicit unlock
    pub paid_ratio: f64,
    /// Stop at the first violation instead of running to the end
    pub stop_on_first_violation: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            milestones: 12,
            edge_attempts: 40,
            users: 4,
            total_operations: 2_000,
            paid_ratio: 0.15,
            stop_on_first_violation: true,
        }
    }
}

/// Lifecycle operation generated by the simulator
#[derive(Debug, Clone)]
pub enum SimulatedOperation {
    /// Propose edge `milestone -> dependency` with a completion threshold
    AddDependency(MilestoneCode, MilestoneCode, u8),
    /// Seed rows for a user
    InitializeUser(UserId),
    /// Start or retry
    Start(UserId, MilestoneCode),
    /// Advance by this many steps out of 10
    Update(UserId, MilestoneCode, u32),
    /// Complete with a quality score
    Complete(UserId, MilestoneCode, f64),
    /// Record a failure
    Fail(UserId, MilestoneCode),
    /// Explicit unlock
    Unlock(UserId, MilestoneCode),
    /// Eligibility check through the cache
    Validate(UserId, MilestoneCode),
}

impl SimulatedOperation {
    fn kind(&self) -> &'static str {
        match self {
            Self::AddDependency(..) => "add_dependency",
            Self::InitializeUser(_) => "initialize_user",
            Self::Start(..) => "start",
            Self::Update(..) => "update",
            Self::Complete(..) => "complete",
            Self::Fail(..) => "fail",
            Self::Unlock(..) => "unlock",
            Self::Validate(..) => "validate",
        }
    }
}

/// Invariants checked after each operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvariantCheck {
    /// Stored edges contain no cycle
    GraphIsAcyclic,
    /// The engine accepted exactly the edges the model graph accepts
    EdgeAcceptanceMatchesModel,
    /// Every COMPLETED row is at 100%
    CompletedRowsAreFull,
    /// Rows past LOCKED have their requirements met
    UnlockedRowsHaveMetRequirements,
    /// Cached validation equals a direct store read
    CachedEligibilityIsFresh,
}

/// A violation detected during simulation
#[derive(Debug, Clone)]
pub struct Violation {
    /// Index of the operation after which the check failed
    pub operation_index: u64,
    /// Which invariant failed
    pub check: InvariantCheck,
    /// Human-readable description
    pub details: String,
}

/// Counters collected during simulation
#[derive(Debug, Clone, Default)]
pub struct OperationStats {
    /// Operations attempted
    pub total_operations: u64,
    /// Operations the engine accepted
    pub successful_operations: u64,
    /// Operations the engine rejected with a domain error
    pub rejected_operations: u64,
    /// Attempts per operation kind
    pub operations_by_kind: BTreeMap<&'static str, u64>,
}

impl OperationStats {
    fn record(&mut self, operation: &SimulatedOperation, ok: bool) {
        self.total_operations += 1;
        *self.operations_by_kind.entry(operation.kind()).or_insert(0) += 1;
        if ok {
            self.successful_operations += 1;
        } else {
            self.rejected_operations += 1;
        }
    }
}

/// Final report from the simulator
#[derive(Debug, Clone)]
pub struct SimulatorReport {
    /// Configuration used
    pub config: SimulatorConfig,
    /// Operation counters
    pub stats: OperationStats,
    /// Violations found
    pub violations: Vec<Violation>,
    /// Edges in the final graph
    pub edges: usize,
    /// COMPLETED rows across all simulated users
    pub completed_rows: usize,
}

impl SimulatorReport {
    /// No invariant was violated
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Human-readable summary
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();
        report.push_str("=== Waymark Simulator Report ===\n\n");
        report.push_str(&format!("Seed: {}\n", self.config.seed));
        report.push_str(&format!("Operations: {}\n", self.stats.total_operations));
        report.push_str(&format!("Successful: {}\n", self.stats.successful_operations));
        report.push_str(&format!("Rejected: {}\n", self.stats.rejected_operations));
        report.push_str(&format!("Edges: {}\n", self.edges));
        report.push_str(&format!("Completed rows: {}\n", self.completed_rows));
        for (kind, count) in &self.stats.operations_by_kind {
            report.push_str(&format!("  {kind}: {count}\n"));
        }
        report.push_str(&format!("Violations: {}\n", self.violations.len()));
        for (i, v) in self.violations.iter().enumerate() {
            report.push_str(&format!(
                "{}. #{} {:?}: {}\n",
                i + 1,
                v.operation_index,
                v.check,
                v.details
            ));
        }
        report.push_str(&format!(
            "\n=== Result: {} ===\n",
            if self.passed() { "PASS" } else { "FAIL" }
        ));
        report
    }
}

/// Run the simulator
pub fn run_simulator(config: SimulatorConfig) -> Result<SimulatorReport, EngineError> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let clock = Arc::new(ManualClock::default());
    let engine_config = EngineConfig::default();
    let engine = ProgressEngine::new(MemoryStore::new(), engine_config.clone())
        .with_clock(clock.clone());
    let fresh = DependencyValidator::new(engine_config.partial_completion_policy);

    let mut codes = Vec::with_capacity(config.milestones);
    for i in 0..config.milestones {
        let code = MilestoneCode::parse(&format!("M{i}"))?;
        let mut milestone = NewMilestone::new(code.clone(), format!("Milestone {i}"));
        if i > 0 && rng.gen_bool(config.paid_ratio) {
            milestone = milestone.paid();
        }
        engine.register_milestone(milestone)?;
        codes.push(code);
    }
    let users: Vec<UserId> = (0..config.users).map(|_| UserId::new()).collect();

    let mut stats = OperationStats::default();
    let mut violations = Vec::new();
    let mut model = DependencyGraph::new();
    let ids: BTreeMap<MilestoneCode, MilestoneId> = engine
        .milestones()?
        .into_iter()
        .map(|m| (m.code, m.id))
        .collect();
    for id in ids.values() {
        model.add_node(*id);
    }

    let mut index = 0_u64;
    if codes.len() > 1 {
        for _ in 0..config.edge_attempts {
            let a = rng.gen_range(0..codes.len());
            let b = rng.gen_range(0..codes.len());
            let min_completion = if rng.gen_bool(0.2) { 50 } else { 100 };
            let operation = SimulatedOperation::AddDependency(
                codes[a].clone(),
                codes[b].clone(),
                min_completion,
            );
            let (mid, did) = (ids[&codes[a]], ids[&codes[b]]);
            let expect_ok =
                a != b && !model.contains_edge(mid, did) && !would_create_cycle(&model, mid, did);

            let ok = match execute(&engine, &operation) {
                Ok(()) => {
                    model.insert_unchecked(mid, did, EdgeWeight::required());
                    true
                }
                Err(EngineError::Graph(_)) => false,
                Err(err) => return Err(err),
            };
            if ok != expect_ok {
                violations.push(Violation {
                    operation_index: index,
                    check: InvariantCheck::EdgeAcceptanceMatchesModel,
                    details: format!("{operation:?} accepted={ok} expected={expect_ok}"),
                });
            }
            stats.record(&operation, ok);
            check_invariants(&engine, &fresh, &users, &codes, index, &mut rng, &mut violations)?;
            index += 1;
            if config.stop_on_first_violation && !violations.is_empty() {
                return finish(config, stats, violations, &engine, &users);
            }
        }
    }

    for _ in 0..config.total_operations {
        if codes.is_empty() || users.is_empty() {
            break;
        }
        clock.advance(chrono::Duration::seconds(rng.gen_range(1..120)));
        let user = users[rng.gen_range(0..users.len())];
        let code = codes[rng.gen_range(0..codes.len())].clone();
        let operation = match rng.gen_range(0..100) {
            0..=4 => SimulatedOperation::InitializeUser(user),
            5..=34 => SimulatedOperation::Start(user, code),
            35..=59 => SimulatedOperation::Update(user, code, rng.gen_range(1..=10)),
            60..=79 => SimulatedOperation::Complete(user, code, rng.gen_range(40.0..100.0)),
            80..=87 => SimulatedOperation::Fail(user, code),
            88..=93 => SimulatedOperation::Unlock(user, code),
            _ => SimulatedOperation::Validate(user, code),
        };

        let result = execute(&engine, &operation);
        let ok = match result {
            Ok(()) => true,
            Err(EngineError::Store(err)) => return Err(EngineError::Store(err)),
            Err(_) => false,
        };
        stats.record(&operation, ok);
        check_invariants(&engine, &fresh, &users, &codes, index, &mut rng, &mut violations)?;
        index += 1;
        if config.stop_on_first_violation && !violations.is_empty() {
            break;
        }
    }

    finish(config, stats, violations, &engine, &users)
}

fn execute(
    engine: &ProgressEngine<MemoryStore>,
    operation: &SimulatedOperation,
) -> Result<(), EngineError> {
    match operation {
        SimulatedOperation::AddDependency(m, d, min_completion) => {
            let spec = DependencySpec::required().with_min_completion(*min_completion);
            engine.add_dependency(m, d, spec)?;
        }
        SimulatedOperation::InitializeUser(user) => {
            engine.initialize_user(*user)?;
        }
        SimulatedOperation::Start(user, code) => {
            engine.start_milestone(*user, code)?;
        }
        SimulatedOperation::Update(user, code, step) => {
            let current = engine
                .get_progress(*user, code)?
                .map_or(0, |row| row.current_step);
            let update =
                ProgressUpdate::step(current.saturating_add(*step).min(10)).with_total(10);
            engine.update_progress(*user, code, update)?;
        }
        SimulatedOperation::Complete(user, code, score) => {
            let output = serde_json::json!({ "ok": true });
            engine.complete_milestone(*user, code, Some(output), Some(*score))?;
        }
        SimulatedOperation::Fail(user, code) => {
            engine.fail_milestone(*user, code, "simulated failure")?;
        }
        SimulatedOperation::Unlock(user, code) => {
            engine.unlock_milestone(*user, code)?;
        }
        SimulatedOperation::Validate(user, code) => {
            engine.validate_dependencies(*user, code, true)?;
        }
    }
    Ok(())
}

fn check_invariants(
    engine: &ProgressEngine<MemoryStore>,
    fresh: &DependencyValidator,
    users: &[UserId],
    codes: &[MilestoneCode],
    index: u64,
    rng: &mut StdRng,
    violations: &mut Vec<Violation>,
) -> Result<(), EngineError> {
    let mut violate = |check, details: String| {
        violations.push(Violation {
            operation_index: index,
            check,
            details,
        });
    };

    let acyclic = engine
        .store()
        .read(|tx| Ok::<_, EngineError>(load_graph(tx)?.is_acyclic()))?;
    if !acyclic {
        violate(InvariantCheck::GraphIsAcyclic, "cycle in stored edges".into());
    }

    for &user in users {
        let problems = engine.store().read(|tx| {
            let mut problems = Vec::new();
            for row in tx.user_progress(user)? {
                let Some(milestone) = tx.milestone(row.milestone_id)? else {
                    continue;
                };
                if row.status == MilestoneStatus::Completed && row.completion_percentage != 100 {
                    problems.push((
                        InvariantCheck::CompletedRowsAreFull,
                        format!("{} completed at {}%", milestone.code, row.completion_percentage),
                    ));
                }
                if row.status != MilestoneStatus::Locked
                    && !fresh.validate(tx, user, &milestone, true)?.met
                {
                    problems.push((
                        InvariantCheck::UnlockedRowsHaveMetRequirements,
                        format!("{} is {} with unmet requirements", milestone.code, row.status),
                    ));
                }
            }
            Ok::<_, EngineError>(problems)
        })?;
        for (check, details) in problems {
            violate(check, details);
        }
    }

    if let (false, false) = (users.is_empty(), codes.is_empty()) {
        let user = users[rng.gen_range(0..users.len())];
        let code = &codes[rng.gen_range(0..codes.len())];
        let cached = engine.validate_dependencies(user, code, true)?;
        let direct = engine.store().read(|tx| {
            let milestone = waymark_store::resolve_code(tx, code)?;
            Ok::<_, EngineError>(fresh.validate(tx, user, &milestone, true)?)
        })?;
        if cached != direct {
            violate(
                InvariantCheck::CachedEligibilityIsFresh,
                format!("{code} for {user}: cached {cached:?} store {direct:?}"),
            );
        }
    }

    Ok(())
}

fn finish(
    config: SimulatorConfig,
    stats: OperationStats,
    violations: Vec<Violation>,
    engine: &ProgressEngine<MemoryStore>,
    users: &[UserId],
) -> Result<SimulatorReport, EngineError> {
    let (edges, completed_rows) = engine.store().read(|tx| {
        let edges = load_graph(tx)?.edge_count();
        let mut completed = 0;
        for &user in users {
            completed += tx
                .user_progress(user)?
                .iter()
                .filter(|row| row.status == MilestoneStatus::Completed)
                .count();
        }
        Ok::<_, EngineError>((edges, completed))
    })?;
    Ok(SimulatorReport {
        config,
        stats,
        violations,
        edges,
        completed_rows,
    })
}
