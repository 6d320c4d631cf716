//! Waymark Store - durable graph and progress storage
//!
//! Every engine operation runs inside exactly one transaction opened through
//! [`MilestoneStore`]. A transaction commits only when the closure returns
//! `Ok`; any `Err` rolls it back, so rejected edges and failed transitions
//! never leave partial writes behind.
//!
//! Backends:
//! - [`MemoryStore`]: persistent-map snapshots, serialized writers
//! - [`SqliteStore`]: rusqlite, `BEGIN IMMEDIATE` writers, uniqueness and
//!   compare-and-set enforced by the database

mod error;
pub mod graph_store;
pub mod memory;
pub mod sqlite;

pub use error::StoreError;
pub use graph_store::{add_edge, load_graph, remove_edge, resolve_code};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use waymark_core::{
    Milestone, MilestoneCode, MilestoneDependency, MilestoneId, NewMilestone, Timestamp, UserId,
    UserMilestone, UserProfile,
};

/// Commit counters for the data a cached value can depend on.
///
/// `graph` moves on every catalog or edge write, `user` on every write to
/// that user's progress rows or profile. Both live in the store, so every
/// process sharing it observes the same values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataVersion {
    /// Catalog and edge counter
    pub graph: u64,
    /// Per-user counter, 0 when no user was asked for
    pub user: u64,
}

/// Transactional entry point shared by all backends
pub trait MilestoneStore: Send + Sync {
    /// Run `f` in a serialized write transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back otherwise.
    fn write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTx) -> Result<T, E>,
        E: From<StoreError>;

    /// Run `f` against a consistent snapshot. Nothing can be written.
    fn read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&dyn StoreTx) -> Result<T, E>,
        E: From<StoreError>;
}

/// Operations available inside a transaction.
///
/// Reads see the transaction's own earlier writes.
pub trait StoreTx {
    // --- catalog ---

    /// Insert a catalog entry; fails with [`StoreError::Conflict`] on a duplicate code
    fn insert_milestone(
        &mut self,
        milestone: &NewMilestone,
        now: Timestamp,
    ) -> Result<Milestone, StoreError>;

    /// Catalog entry by id
    fn milestone(&self, id: MilestoneId) -> Result<Option<Milestone>, StoreError>;

    /// Catalog entry by public code
    fn milestone_by_code(&self, code: &MilestoneCode) -> Result<Option<Milestone>, StoreError>;

    /// All milestones ordered by `order_index`, then id
    fn milestones(&self) -> Result<Vec<Milestone>, StoreError>;

    // --- dependency edges ---

    /// Prerequisite edges of `milestone` (`milestone_id == milestone`)
    fn edges_into(&self, milestone: MilestoneId) -> Result<Vec<MilestoneDependency>, StoreError>;

    /// Dependent edges of `dependency` (`dependency_id == dependency`)
    fn edges_out_of(
        &self,
        dependency: MilestoneId,
    ) -> Result<Vec<MilestoneDependency>, StoreError>;

    /// Every edge, ordered by (milestone, dependency)
    fn all_edges(&self) -> Result<Vec<MilestoneDependency>, StoreError>;

    /// Raw insert; graph checks live in [`graph_store::add_edge`]
    fn insert_edge(&mut self, edge: &MilestoneDependency) -> Result<(), StoreError>;

    /// Returns whether an edge was removed
    fn delete_edge(
        &mut self,
        milestone: MilestoneId,
        dependency: MilestoneId,
    ) -> Result<bool, StoreError>;

    // --- progress ---

    /// Progress row of one (user, milestone) pair
    fn progress(
        &self,
        user: UserId,
        milestone: MilestoneId,
    ) -> Result<Option<UserMilestone>, StoreError>;

    /// All rows of `user`, ordered by milestone id
    fn user_progress(&self, user: UserId) -> Result<Vec<UserMilestone>, StoreError>;

    /// Insert a new instance; [`StoreError::Conflict`] if (user, milestone) exists
    fn insert_progress(&mut self, row: &UserMilestone) -> Result<(), StoreError>;

    /// Overwrite the instance only if its stored version equals `expected_version`.
    ///
    /// [`StoreError::Conflict`] when the version moved or the row vanished.
    fn compare_and_set_progress(
        &mut self,
        expected_version: u64,
        row: &UserMilestone,
    ) -> Result<(), StoreError>;

    // --- profiles ---

    /// Attribute snapshot of `user`
    fn profile(&self, user: UserId) -> Result<Option<UserProfile>, StoreError>;

    /// Insert or replace the snapshot
    fn upsert_profile(&mut self, profile: &UserProfile) -> Result<(), StoreError>;

    // --- versions ---

    /// Counters as seen by this transaction. Every mutating method above
    /// bumps the counter it touches.
    fn data_version(&self, user: Option<UserId>) -> Result<DataVersion, StoreError>;
}
