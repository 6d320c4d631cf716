pub(super) const SCHEMA_VERSION: i64 = 1;

pub(super) const SQL: &str = r#"

        CREATE TABLE IF NOT EXISTS meta (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS milestones (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          code TEXT NOT NULL UNIQUE,
          name TEXT NOT NULL,
          description TEXT NOT NULL DEFAULT '',
          order_index INTEGER NOT NULL,
          milestone_type TEXT NOT NULL CHECK (milestone_type IN ('free', 'gateway', 'paid')),
          requires_payment INTEGER NOT NULL,
          auto_unlock INTEGER NOT NULL,
          estimated_duration_minutes INTEGER NOT NULL,
          content_template TEXT,
          created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS milestone_dependencies (
          milestone_id INTEGER NOT NULL REFERENCES milestones(id),
          dependency_id INTEGER NOT NULL REFERENCES milestones(id),
          is_required INTEGER NOT NULL,
          minimum_completion_percentage INTEGER NOT NULL
            CHECK (minimum_completion_percentage BETWEEN 0 AND 100),
          conditions_json TEXT,
          created_at TEXT NOT NULL,
          PRIMARY KEY (milestone_id, dependency_id),
          CHECK (milestone_id <> dependency_id)
        );

        CREATE INDEX IF NOT EXISTS idx_milestone_dependencies_dependency
          ON milestone_dependencies(dependency_id);

        CREATE TABLE IF NOT EXISTS user_milestones (
          user_id TEXT NOT NULL,
          milestone_id INTEGER NOT NULL REFERENCES milestones(id),
          status TEXT NOT NULL
            CHECK (status IN ('locked', 'available', 'in_progress', 'completed', 'failed')),
          completion_percentage INTEGER NOT NULL
            CHECK (completion_percentage BETWEEN 0 AND 100),
          current_step INTEGER NOT NULL,
          total_steps INTEGER NOT NULL,
          checkpoint_data TEXT,
          output_data TEXT,
          quality_score REAL,
          unlocked_at TEXT,
          started_at TEXT,
          completed_at TEXT,
          last_accessed_at TEXT,
          time_spent_seconds INTEGER NOT NULL,
          processing_attempts INTEGER NOT NULL,
          last_error TEXT,
          version INTEGER NOT NULL,
          created_at TEXT NOT NULL,
          updated_at TEXT NOT NULL,
          UNIQUE (user_id, milestone_id)
        );

        CREATE TABLE IF NOT EXISTS user_profiles (
          user_id TEXT PRIMARY KEY,
          subscription_tier TEXT
            CHECK (subscription_tier IN ('free', 'starter', 'professional', 'enterprise')),
          attributes_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS data_versions (
          scope TEXT PRIMARY KEY,
          version INTEGER NOT NULL
        );
"#;
