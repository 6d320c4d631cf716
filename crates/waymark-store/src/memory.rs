//! In-memory backend
//!
//! State lives in persistent maps, so beginning a transaction is an O(1)
//! snapshot clone. Writers are serialized by a mutex and publish their
//! snapshot only on commit; readers never block writers.

use crate::{DataVersion, MilestoneStore, StoreError, StoreTx};
use im::OrdMap;
use parking_lot::{Mutex, RwLock};
use waymark_core::{
    Milestone, MilestoneCode, MilestoneDependency, MilestoneId, NewMilestone, Timestamp, UserId,
    UserMilestone, UserProfile,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    milestones: OrdMap<MilestoneId, Milestone>,
    codes: OrdMap<MilestoneCode, MilestoneId>,
    next_milestone_id: i64,
    edges: OrdMap<(MilestoneId, MilestoneId), MilestoneDependency>,
    progress: OrdMap<(UserId, MilestoneId), UserMilestone>,
    profiles: OrdMap<UserId, UserProfile>,
    graph_version: u64,
    user_versions: OrdMap<UserId, u64>,
}

impl MemoryState {
    fn touch_user(&mut self, user: UserId) {
        let next = self.user_versions.get(&user).copied().unwrap_or(0) + 1;
        self.user_versions.insert(user, next);
    }
}

/// Process-local store used by tests and the simulator
#[derive(Debug, Default)]
pub struct MemoryStore {
    committed: RwLock<MemoryState>,
    writer: Mutex<()>,
}

impl MemoryStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> MemoryState {
        self.committed.read().clone()
    }
}

impl MilestoneStore for MemoryStore {
    fn write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        let _writer = self.writer.lock();
        let mut tx = MemoryTx {
            state: self.snapshot(),
        };
        let value = f(&mut tx)?;
        *self.committed.write() = tx.state;
        Ok(value)
    }

    fn read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&dyn StoreTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        let tx = MemoryTx {
            state: self.snapshot(),
        };
        f(&tx)
    }
}

struct MemoryTx {
    state: MemoryState,
}

impl StoreTx for MemoryTx {
    fn insert_milestone(
        &mut self,
        milestone: &NewMilestone,
        now: Timestamp,
    ) -> Result<Milestone, StoreError> {
        if self.state.codes.contains_key(&milestone.code) {
            return Err(StoreError::Conflict(format!(
                "milestone {} already exists",
                milestone.code
            )));
        }
        self.state.next_milestone_id += 1;
        let id = MilestoneId(self.state.next_milestone_id);
        let stored = milestone.clone().into_milestone(id, now);
        self.state.codes.insert(stored.code.clone(), id);
        self.state.milestones.insert(id, stored.clone());
        self.state.graph_version += 1;
        Ok(stored)
    }

    fn milestone(&self, id: MilestoneId) -> Result<Option<Milestone>, StoreError> {
        Ok(self.state.milestones.get(&id).cloned())
    }

    fn milestone_by_code(&self, code: &MilestoneCode) -> Result<Option<Milestone>, StoreError> {
        Ok(self
            .state
            .codes
            .get(code)
            .and_then(|id| self.state.milestones.get(id))
            .cloned())
    }

    fn milestones(&self) -> Result<Vec<Milestone>, StoreError> {
        let mut all: Vec<Milestone> = self.state.milestones.values().cloned().collect();
        all.sort_by_key(|m| (m.order_index, m.id));
        Ok(all)
    }

    fn edges_into(&self, milestone: MilestoneId) -> Result<Vec<MilestoneDependency>, StoreError> {
        Ok(self
            .state
            .edges
            .range((milestone, MilestoneId::MIN)..=(milestone, MilestoneId::MAX))
            .map(|(_, edge)| edge.clone())
            .collect())
    }

    fn edges_out_of(
        &self,
        dependency: MilestoneId,
    ) -> Result<Vec<MilestoneDependency>, StoreError> {
        Ok(self
            .state
            .edges
            .values()
            .filter(|edge| edge.dependency_id == dependency)
            .cloned()
            .collect())
    }

    fn all_edges(&self) -> Result<Vec<MilestoneDependency>, StoreError> {
        Ok(self.state.edges.values().cloned().collect())
    }

    fn insert_edge(&mut self, edge: &MilestoneDependency) -> Result<(), StoreError> {
        for id in [edge.milestone_id, edge.dependency_id] {
            if !self.state.milestones.contains_key(&id) {
                return Err(StoreError::UnknownMilestone(id.to_string()));
            }
        }
        let key = (edge.milestone_id, edge.dependency_id);
        if self.state.edges.contains_key(&key) {
            return Err(StoreError::Conflict(format!(
                "edge {} -> {} already exists",
                edge.milestone_id, edge.dependency_id
            )));
        }
        self.state.edges.insert(key, edge.clone());
        self.state.graph_version += 1;
        Ok(())
    }

    fn delete_edge(
        &mut self,
        milestone: MilestoneId,
        dependency: MilestoneId,
    ) -> Result<bool, StoreError> {
        let removed = self.state.edges.remove(&(milestone, dependency)).is_some();
        if removed {
            self.state.graph_version += 1;
        }
        Ok(removed)
    }

    fn progress(
        &self,
        user: UserId,
        milestone: MilestoneId,
    ) -> Result<Option<UserMilestone>, StoreError> {
        Ok(self.state.progress.get(&(user, milestone)).cloned())
    }

    fn user_progress(&self, user: UserId) -> Result<Vec<UserMilestone>, StoreError> {
        Ok(self
            .state
            .progress
            .range((user, MilestoneId::MIN)..=(user, MilestoneId::MAX))
            .map(|(_, row)| row.clone())
            .collect())
    }

    fn insert_progress(&mut self, row: &UserMilestone) -> Result<(), StoreError> {
        if !self.state.milestones.contains_key(&row.milestone_id) {
            return Err(StoreError::UnknownMilestone(row.milestone_id.to_string()));
        }
        let key = (row.user_id, row.milestone_id);
        if self.state.progress.contains_key(&key) {
            return Err(StoreError::Conflict(format!(
                "progress for user {} on {} already exists",
                row.user_id, row.milestone_id
            )));
        }
        self.state.progress.insert(key, row.clone());
        self.state.touch_user(row.user_id);
        Ok(())
    }

    fn compare_and_set_progress(
        &mut self,
        expected_version: u64,
        row: &UserMilestone,
    ) -> Result<(), StoreError> {
        let key = (row.user_id, row.milestone_id);
        match self.state.progress.get(&key) {
            Some(current) if current.version == expected_version => {
                self.state.progress.insert(key, row.clone());
                self.state.touch_user(row.user_id);
                Ok(())
            }
            Some(current) => Err(StoreError::Conflict(format!(
                "progress version moved from {expected_version} to {}",
                current.version
            ))),
            None => Err(StoreError::Conflict(format!(
                "progress for user {} on {} vanished",
                row.user_id, row.milestone_id
            ))),
        }
    }

    fn profile(&self, user: UserId) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.state.profiles.get(&user).cloned())
    }

    fn upsert_profile(&mut self, profile: &UserProfile) -> Result<(), StoreError> {
        self.state.profiles.insert(profile.user_id, profile.clone());
        self.state.touch_user(profile.user_id);
        Ok(())
    }

    fn data_version(&self, user: Option<UserId>) -> Result<DataVersion, StoreError> {
        Ok(DataVersion {
            graph: self.state.graph_version,
            user: user
                .and_then(|user| self.state.user_versions.get(&user).copied())
                .unwrap_or(0),
        })
    }
}
