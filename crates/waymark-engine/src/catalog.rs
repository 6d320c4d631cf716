//! Catalog files
//!
//! A catalog is a TOML document listing milestones and dependency edges:
//!
//! ```toml
//! [[milestone]]
//! code = "M0"
//! name = "Idea validation"
//!
//! [[milestone]]
//! code = "M1"
//! name = "Market research"
//! estimated_duration_minutes = 45
//!
//! [[dependency]]
//! milestone = "M1"
//! depends_on = "M0"
//! minimum_completion_percentage = 100
//! ```
//!
//! Seeding is idempotent: milestones and edges that already exist are skipped.

use crate::engine::ProgressEngine;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use waymark_core::{DependencySpec, GraphError, MilestoneCode, NewMilestone};
use waymark_store::MilestoneStore;

/// Edge entry of a catalog file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogDependency {
    /// Dependent milestone
    pub milestone: MilestoneCode,
    /// Prerequisite
    pub depends_on: MilestoneCode,
    /// Edge kind, threshold and conditions
    #[serde(flatten)]
    pub spec: DependencySpec,
}

/// Parsed catalog file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// `[[milestone]]` tables
    #[serde(default, rename = "milestone")]
    pub milestones: Vec<NewMilestone>,
    /// `[[dependency]]` tables
    #[serde(default, rename = "dependency")]
    pub dependencies: Vec<CatalogDependency>,
}

/// What a seeding run changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    /// Milestones inserted
    pub milestones_added: usize,
    /// Milestones already present
    pub milestones_skipped: usize,
    /// Edges inserted
    pub dependencies_added: usize,
    /// Edges already present
    pub dependencies_skipped: usize,
}

impl Catalog {
    /// Parse TOML text
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| EngineError::InvalidInput(format!("catalog: {e}")))
    }

    /// Read and parse a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EngineError::InvalidInput(format!("cannot read catalog {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Register everything in the catalog with `engine`.
    ///
    /// Stops at the first rejected edge other than a duplicate.
    pub fn apply<S: MilestoneStore>(&self, engine: &ProgressEngine<S>) -> Result<SeedReport> {
        let mut report = SeedReport::default();
        let known: HashSet<MilestoneCode> =
            engine.milestones()?.into_iter().map(|m| m.code).collect();

        for milestone in &self.milestones {
            if known.contains(&milestone.code) {
                report.milestones_skipped += 1;
                continue;
            }
            engine.register_milestone(milestone.clone())?;
            report.milestones_added += 1;
        }

        for edge in &self.dependencies {
            match engine.add_dependency(&edge.milestone, &edge.depends_on, edge.spec.clone()) {
                Ok(_) => report.dependencies_added += 1,
                Err(EngineError::Graph(GraphError::DuplicateEdge { .. })) => {
                    report.dependencies_skipped += 1;
                }
                Err(err) => return Err(err),
            }
        }

        tracing::info!(?report, "catalog applied");
        Ok(report)
    }
}
