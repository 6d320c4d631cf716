//! SQLite backend
//!
//! Writers take `BEGIN IMMEDIATE`, which serializes them across processes
//! sharing the file; within a process the connection mutex does the same.
//! The `UNIQUE (user_id, milestone_id)` constraint and the versioned
//! `UPDATE ... WHERE version = ?` are what make a double start impossible,
//! independent of how callers interleave.

mod schema;

use crate::error::is_constraint_violation;
use crate::{DataVersion, MilestoneStore, StoreError, StoreTx};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Params, Row, TransactionBehavior};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use waymark_core::{
    EdgeConditions, Milestone, MilestoneCode, MilestoneDependency, MilestoneId, NewMilestone,
    SubscriptionTier, Timestamp, UserId, UserMilestone, UserProfile,
};

const MILESTONE_COLUMNS: &str = "id, code, name, description, order_index, milestone_type, \
     requires_payment, auto_unlock, estimated_duration_minutes, content_template, created_at";

const EDGE_COLUMNS: &str = "milestone_id, dependency_id, is_required, \
     minimum_completion_percentage, conditions_json, created_at";

const PROGRESS_COLUMNS: &str = "user_id, milestone_id, status, completion_percentage, \
     current_step, total_steps, checkpoint_data, output_data, quality_score, unlocked_at, \
     started_at, completed_at, last_accessed_at, time_spent_seconds, processing_attempts, \
     last_error, version, created_at, updated_at";

/// `data_versions` scope of the catalog and edges; user scopes are uuids
const GRAPH_SCOPE: &str = "graph";

/// Durable store backed by a single SQLite file
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and install the schema
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn, Some(path))
    }

    /// Private database that disappears with the store
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<&Path>) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        if path.is_some() {
            let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        }
        conn.execute_batch(schema::SQL)?;
        conn.execute(
            "INSERT INTO meta(key, value) VALUES ('schema_version', ?1) \
             ON CONFLICT(key) DO NOTHING",
            params![schema::SCHEMA_VERSION.to_string()],
        )?;
        let stored: String = conn.query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )?;
        if stored != schema::SCHEMA_VERSION.to_string() {
            return Err(StoreError::Corrupt(format!(
                "schema version {stored}, expected {}",
                schema::SCHEMA_VERSION
            )));
        }

        tracing::info!(path = ?path, "sqlite store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl MilestoneStore for SqliteStore {
    fn write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| E::from(StoreError::from(e)))?;
        let value = {
            let mut stx = SqliteTx { conn: &tx };
            f(&mut stx)?
        };
        tx.commit().map_err(|e| E::from(StoreError::from(e)))?;
        Ok(value)
    }

    fn read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&dyn StoreTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Deferred)
            .map_err(|e| E::from(StoreError::from(e)))?;
        let stx = SqliteTx { conn: &tx };
        f(&stx)
    }
}

struct SqliteTx<'c> {
    conn: &'c Connection,
}

impl SqliteTx<'_> {
    fn query_vec<T, P, F>(&self, sql: &str, params: P, map: F) -> Result<Vec<T>, StoreError>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params, map)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn query_opt<T, P, F>(&self, sql: &str, params: P, map: F) -> Result<Option<T>, StoreError>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = self.conn.prepare_cached(sql)?;
        Ok(stmt.query_row(params, map).optional()?)
    }

    fn bump(&self, scope: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO data_versions(scope, version) VALUES (?1, 1) \
             ON CONFLICT(scope) DO UPDATE SET version = version + 1",
            params![scope],
        )?;
        Ok(())
    }

    fn version_of(&self, scope: &str) -> Result<u64, StoreError> {
        let version: Option<i64> = self.query_opt(
            "SELECT version FROM data_versions WHERE scope = ?1",
            params![scope],
            |row| row.get(0),
        )?;
        Ok(version.map_or(0, |v| u64::try_from(v).unwrap_or(0)))
    }
}

impl StoreTx for SqliteTx<'_> {
    fn insert_milestone(
        &mut self,
        milestone: &NewMilestone,
        now: Timestamp,
    ) -> Result<Milestone, StoreError> {
        let inserted = self.conn.execute(
            "INSERT INTO milestones(code, name, description, order_index, milestone_type, \
             requires_payment, auto_unlock, estimated_duration_minutes, content_template, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                milestone.code.as_str(),
                milestone.name,
                milestone.description,
                milestone.order_index,
                milestone.milestone_type.as_str(),
                milestone.requires_payment,
                milestone.auto_unlock,
                milestone.estimated_duration_minutes,
                milestone.content_template,
                now,
            ],
        );
        if let Err(err) = inserted {
            if is_constraint_violation(&err) {
                return Err(StoreError::Conflict(format!(
                    "milestone {} already exists",
                    milestone.code
                )));
            }
            return Err(err.into());
        }
        let id = MilestoneId(self.conn.last_insert_rowid());
        self.bump(GRAPH_SCOPE)?;
        Ok(milestone.clone().into_milestone(id, now))
    }

    fn milestone(&self, id: MilestoneId) -> Result<Option<Milestone>, StoreError> {
        self.query_opt(
            &format!("SELECT {MILESTONE_COLUMNS} FROM milestones WHERE id = ?1"),
            params![id.0],
            milestone_from_row,
        )
    }

    fn milestone_by_code(&self, code: &MilestoneCode) -> Result<Option<Milestone>, StoreError> {
        self.query_opt(
            &format!("SELECT {MILESTONE_COLUMNS} FROM milestones WHERE code = ?1"),
            params![code.as_str()],
            milestone_from_row,
        )
    }

    fn milestones(&self) -> Result<Vec<Milestone>, StoreError> {
        self.query_vec(
            &format!("SELECT {MILESTONE_COLUMNS} FROM milestones ORDER BY order_index, id"),
            [],
            milestone_from_row,
        )
    }

    fn edges_into(&self, milestone: MilestoneId) -> Result<Vec<MilestoneDependency>, StoreError> {
        self.query_vec(
            &format!(
                "SELECT {EDGE_COLUMNS} FROM milestone_dependencies \
                 WHERE milestone_id = ?1 ORDER BY dependency_id"
            ),
            params![milestone.0],
            edge_from_row,
        )
    }

    fn edges_out_of(
        &self,
        dependency: MilestoneId,
    ) -> Result<Vec<MilestoneDependency>, StoreError> {
        self.query_vec(
            &format!(
                "SELECT {EDGE_COLUMNS} FROM milestone_dependencies \
                 WHERE dependency_id = ?1 ORDER BY milestone_id"
            ),
            params![dependency.0],
            edge_from_row,
        )
    }

    fn all_edges(&self) -> Result<Vec<MilestoneDependency>, StoreError> {
        self.query_vec(
            &format!(
                "SELECT {EDGE_COLUMNS} FROM milestone_dependencies \
                 ORDER BY milestone_id, dependency_id"
            ),
            [],
            edge_from_row,
        )
    }

    fn insert_edge(&mut self, edge: &MilestoneDependency) -> Result<(), StoreError> {
        let conditions = edge
            .conditions
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let inserted = self.conn.execute(
            "INSERT INTO milestone_dependencies(milestone_id, dependency_id, is_required, \
             minimum_completion_percentage, conditions_json, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                edge.milestone_id.0,
                edge.dependency_id.0,
                edge.is_required,
                edge.minimum_completion_percentage,
                conditions,
                edge.created_at,
            ],
        );
        match inserted {
            Ok(_) => self.bump(GRAPH_SCOPE),
            Err(err) if is_constraint_violation(&err) => Err(StoreError::Conflict(format!(
                "edge {} -> {} rejected by constraint: {err}",
                edge.milestone_id, edge.dependency_id
            ))),
            Err(err) => Err(err.into()),
        }
    }

    fn delete_edge(
        &mut self,
        milestone: MilestoneId,
        dependency: MilestoneId,
    ) -> Result<bool, StoreError> {
        let removed = self.conn.execute(
            "DELETE FROM milestone_dependencies WHERE milestone_id = ?1 AND dependency_id = ?2",
            params![milestone.0, dependency.0],
        )?;
        if removed > 0 {
            self.bump(GRAPH_SCOPE)?;
        }
        Ok(removed > 0)
    }

    fn progress(
        &self,
        user: UserId,
        milestone: MilestoneId,
    ) -> Result<Option<UserMilestone>, StoreError> {
        self.query_opt(
            &format!(
                "SELECT {PROGRESS_COLUMNS} FROM user_milestones \
                 WHERE user_id = ?1 AND milestone_id = ?2"
            ),
            params![user.to_string(), milestone.0],
            progress_from_row,
        )
    }

    fn user_progress(&self, user: UserId) -> Result<Vec<UserMilestone>, StoreError> {
        self.query_vec(
            &format!(
                "SELECT {PROGRESS_COLUMNS} FROM user_milestones \
                 WHERE user_id = ?1 ORDER BY milestone_id"
            ),
            params![user.to_string()],
            progress_from_row,
        )
    }

    fn insert_progress(&mut self, row: &UserMilestone) -> Result<(), StoreError> {
        let inserted = self.conn.execute(
            &format!(
                "INSERT INTO user_milestones({PROGRESS_COLUMNS}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)"
            ),
            params![
                row.user_id.to_string(),
                row.milestone_id.0,
                row.status.as_str(),
                row.completion_percentage,
                row.current_step,
                row.total_steps,
                row.checkpoint_data,
                row.output_data,
                row.quality_score,
                row.unlocked_at,
                row.started_at,
                row.completed_at,
                row.last_accessed_at,
                to_i64(row.time_spent_seconds),
                row.processing_attempts,
                row.last_error,
                to_i64(row.version),
                row.created_at,
                row.updated_at,
            ],
        );
        match inserted {
            Ok(_) => self.bump(&row.user_id.to_string()),
            Err(err) if is_constraint_violation(&err) => Err(StoreError::Conflict(format!(
                "progress for user {} on {} already exists",
                row.user_id, row.milestone_id
            ))),
            Err(err) => Err(err.into()),
        }
    }

    fn compare_and_set_progress(
        &mut self,
        expected_version: u64,
        row: &UserMilestone,
    ) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE user_milestones SET status = ?3, completion_percentage = ?4, \
             current_step = ?5, total_steps = ?6, checkpoint_data = ?7, output_data = ?8, \
             quality_score = ?9, unlocked_at = ?10, started_at = ?11, completed_at = ?12, \
             last_accessed_at = ?13, time_spent_seconds = ?14, processing_attempts = ?15, \
             last_error = ?16, version = ?17, updated_at = ?18 \
             WHERE user_id = ?1 AND milestone_id = ?2 AND version = ?19",
            params![
                row.user_id.to_string(),
                row.milestone_id.0,
                row.status.as_str(),
                row.completion_percentage,
                row.current_step,
                row.total_steps,
                row.checkpoint_data,
                row.output_data,
                row.quality_score,
                row.unlocked_at,
                row.started_at,
                row.completed_at,
                row.last_accessed_at,
                to_i64(row.time_spent_seconds),
                row.processing_attempts,
                row.last_error,
                to_i64(row.version),
                row.updated_at,
                to_i64(expected_version),
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::Conflict(format!(
                "progress for user {} on {} is no longer at version {expected_version}",
                row.user_id, row.milestone_id
            )));
        }
        self.bump(&row.user_id.to_string())
    }

    fn profile(&self, user: UserId) -> Result<Option<UserProfile>, StoreError> {
        self.query_opt(
            "SELECT user_id, subscription_tier, attributes_json FROM user_profiles WHERE user_id = ?1",
            params![user.to_string()],
            |row| {
                let attributes: String = row.get(2)?;
                let attributes: BTreeMap<String, serde_json::Value> =
                    serde_json::from_str(&attributes)
                        .map_err(|e| conversion_error(2, Type::Text, e))?;
                Ok(UserProfile {
                    user_id: parse_column(row, 0)?,
                    subscription_tier: parse_optional_column::<SubscriptionTier>(row, 1)?,
                    attributes,
                })
            },
        )
    }

    fn upsert_profile(&mut self, profile: &UserProfile) -> Result<(), StoreError> {
        let attributes = serde_json::to_string(&profile.attributes)?;
        self.conn.execute(
            "INSERT INTO user_profiles(user_id, subscription_tier, attributes_json) \
             VALUES (?1, ?2, ?3) \
             ON CONFLICT(user_id) DO UPDATE SET \
               subscription_tier = excluded.subscription_tier, \
               attributes_json = excluded.attributes_json",
            params![
                profile.user_id.to_string(),
                profile.subscription_tier.map(SubscriptionTier::as_str),
                attributes,
            ],
        )?;
        self.bump(&profile.user_id.to_string())
    }

    fn data_version(&self, user: Option<UserId>) -> Result<DataVersion, StoreError> {
        Ok(DataVersion {
            graph: self.version_of(GRAPH_SCOPE)?,
            user: match user {
                Some(user) => self.version_of(&user.to_string())?,
                None => 0,
            },
        })
    }
}

fn milestone_from_row(row: &Row<'_>) -> rusqlite::Result<Milestone> {
    Ok(Milestone {
        id: MilestoneId(row.get(0)?),
        code: parse_column(row, 1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        order_index: row.get(4)?,
        milestone_type: parse_column(row, 5)?,
        requires_payment: row.get(6)?,
        auto_unlock: row.get(7)?,
        estimated_duration_minutes: row.get(8)?,
        content_template: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn edge_from_row(row: &Row<'_>) -> rusqlite::Result<MilestoneDependency> {
    let conditions: Option<String> = row.get(4)?;
    let conditions = conditions
        .map(|raw| serde_json::from_str::<EdgeConditions>(&raw))
        .transpose()
        .map_err(|e| conversion_error(4, Type::Text, e))?;
    Ok(MilestoneDependency {
        milestone_id: MilestoneId(row.get(0)?),
        dependency_id: MilestoneId(row.get(1)?),
        is_required: row.get(2)?,
        minimum_completion_percentage: row.get(3)?,
        conditions,
        created_at: row.get(5)?,
    })
}

fn progress_from_row(row: &Row<'_>) -> rusqlite::Result<UserMilestone> {
    Ok(UserMilestone {
        user_id: parse_column(row, 0)?,
        milestone_id: MilestoneId(row.get(1)?),
        status: parse_column(row, 2)?,
        completion_percentage: row.get(3)?,
        current_step: row.get(4)?,
        total_steps: row.get(5)?,
        checkpoint_data: row.get(6)?,
        output_data: row.get(7)?,
        quality_score: row.get(8)?,
        unlocked_at: row.get(9)?,
        started_at: row.get(10)?,
        completed_at: row.get(11)?,
        last_accessed_at: row.get(12)?,
        time_spent_seconds: from_i64(row, 13)?,
        processing_attempts: row.get(14)?,
        last_error: row.get(15)?,
        version: from_i64(row, 16)?,
        created_at: row.get(17)?,
        updated_at: row.get(18)?,
    })
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: T::Err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn parse_optional_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|value| {
        value.parse().map_err(|e: T::Err| {
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
        })
    })
    .transpose()
}

fn conversion_error(
    idx: usize,
    ty: Type,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(err))
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_i64(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let raw: i64 = row.get(idx)?;
    u64::try_from(raw).map_err(|e| conversion_error(idx, Type::Integer, e))
}
