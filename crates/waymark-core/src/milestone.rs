//! Milestone catalog entries and dependency edges

use crate::conditions::EdgeConditions;
use crate::ids::{MilestoneCode, MilestoneId};
use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Commercial classification of a milestone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneType {
    /// Available to everyone
    Free,
    /// Free milestone that leads into paid content
    Gateway,
    /// Requires payment before it can be unlocked
    Paid,
}

impl MilestoneType {
    /// Wire/database name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Gateway => "gateway",
            Self::Paid => "paid",
        }
    }
}

impl fmt::Display for MilestoneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MilestoneType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "gateway" => Ok(Self::Gateway),
            "paid" => Ok(Self::Paid),
            other => Err(format!("unknown milestone type: {other}")),
        }
    }
}

/// Catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    /// Storage id
    pub id: MilestoneId,
    /// Public code such as `M3`
    pub code: MilestoneCode,
    /// Display name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Position in catalog listings
    pub order_index: i32,
    /// Commercial classification
    pub milestone_type: MilestoneType,
    /// Payment is required before unlock
    pub requires_payment: bool,
    /// When false the milestone stays locked until an explicit external unlock
    pub auto_unlock: bool,
    /// Expected effort
    pub estimated_duration_minutes: u32,
    /// Opaque reference understood by the content generator
    pub content_template: Option<String>,
    /// When the record was created
    pub created_at: Timestamp,
}

/// Catalog entry before it has been assigned an id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMilestone {
    /// Public code such as `M3`
    pub code: MilestoneCode,
    /// Display name
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Position in catalog listings
    #[serde(default)]
    pub order_index: i32,
    /// Commercial classification
    #[serde(default = "default_type")]
    pub milestone_type: MilestoneType,
    /// Payment is required before unlock
    #[serde(default)]
    pub requires_payment: bool,
    /// Unlock automatically once prerequisites are met
    #[serde(default = "default_true")]
    pub auto_unlock: bool,
    /// Expected effort
    #[serde(default)]
    pub estimated_duration_minutes: u32,
    /// Opaque content generator reference
    #[serde(default)]
    pub content_template: Option<String>,
}

fn default_type() -> MilestoneType {
    MilestoneType::Free
}

fn default_true() -> bool {
    true
}

impl NewMilestone {
    /// Free, auto-unlocking milestone ordered by its code number
    #[must_use]
    pub fn new(code: MilestoneCode, name: impl Into<String>) -> Self {
        let order_index = i32::try_from(code.number()).unwrap_or(i32::MAX);
        Self {
            code,
            name: name.into(),
            description: String::new(),
            order_index,
            milestone_type: MilestoneType::Free,
            requires_payment: false,
            auto_unlock: true,
            estimated_duration_minutes: 0,
            content_template: None,
        }
    }

    /// Set ordering index
    #[must_use]
    pub fn with_order(mut self, order_index: i32) -> Self {
        self.order_index = order_index;
        self
    }

    /// Set description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Mark as a gateway milestone
    #[must_use]
    pub fn gateway(mut self) -> Self {
        self.milestone_type = MilestoneType::Gateway;
        self
    }

    /// Mark as paid: requires payment and never unlocks automatically
    #[must_use]
    pub fn paid(mut self) -> Self {
        self.milestone_type = MilestoneType::Paid;
        self.requires_payment = true;
        self.auto_unlock = false;
        self
    }

    /// Override auto-unlock
    #[must_use]
    pub fn with_auto_unlock(mut self, auto_unlock: bool) -> Self {
        self.auto_unlock = auto_unlock;
        self
    }

    /// Set estimated duration
    #[must_use]
    pub fn with_duration(mut self, minutes: u32) -> Self {
        self.estimated_duration_minutes = minutes;
        self
    }

    /// Set content template reference
    #[must_use]
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.content_template = Some(template.into());
        self
    }

    /// Materialize with a storage id
    #[must_use]
    pub fn into_milestone(self, id: MilestoneId, created_at: Timestamp) -> Milestone {
        Milestone {
            id,
            code: self.code,
            name: self.name,
            description: self.description,
            order_index: self.order_index,
            milestone_type: self.milestone_type,
            requires_payment: self.requires_payment,
            auto_unlock: self.auto_unlock,
            estimated_duration_minutes: self.estimated_duration_minutes,
            content_template: self.content_template,
            created_at,
        }
    }
}

/// Directed edge: `milestone_id` depends on `dependency_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneDependency {
    /// Dependent milestone
    pub milestone_id: MilestoneId,
    /// Prerequisite milestone
    pub dependency_id: MilestoneId,
    /// Whether the edge gates the dependent
    pub is_required: bool,
    /// 0 - 100; the prerequisite must reach at least this completion
    pub minimum_completion_percentage: u8,
    /// Extra conditions evaluated on top of completion
    pub conditions: Option<EdgeConditions>,
    /// When the record was created
    pub created_at: Timestamp,
}

impl MilestoneDependency {
    /// Conditions, if any non-empty set is attached
    #[must_use]
    pub fn active_conditions(&self) -> Option<&EdgeConditions> {
        self.conditions.as_ref().filter(|c| !c.is_empty())
    }
}

/// Parameters of a new dependency edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencySpec {
    /// Whether the edge gates the dependent
    #[serde(default = "default_true")]
    pub required: bool,
    /// Completion the prerequisite must reach, 0 - 100
    #[serde(default = "default_min_completion")]
    pub minimum_completion_percentage: u8,
    /// Extra conditions evaluated on top of completion
    #[serde(default)]
    pub conditions: Option<EdgeConditions>,
}

fn default_min_completion() -> u8 {
    100
}

impl Default for DependencySpec {
    fn default() -> Self {
        Self {
            required: true,
            minimum_completion_percentage: 100,
            conditions: None,
        }
    }
}

impl DependencySpec {
    /// Required edge at 100%
    #[inline]
    #[must_use]
    pub fn required() -> Self {
        Self::default()
    }

    /// Optional (informational) edge
    #[inline]
    #[must_use]
    pub fn optional() -> Self {
        Self {
            required: false,
            ..Self::default()
        }
    }

    /// Lower the completion threshold
    #[must_use]
    pub fn with_min_completion(mut self, percentage: u8) -> Self {
        self.minimum_completion_percentage = percentage;
        self
    }

    /// Attach conditions
    #[must_use]
    pub fn with_conditions(mut self, conditions: EdgeConditions) -> Self {
        self.conditions = Some(conditions);
        self
    }

    /// Build the edge between two resolved milestones
    #[must_use]
    pub fn into_edge(
        self,
        milestone_id: MilestoneId,
        dependency_id: MilestoneId,
        created_at: Timestamp,
    ) -> MilestoneDependency {
        MilestoneDependency {
            milestone_id,
            dependency_id,
            is_required: self.required,
            minimum_completion_percentage: self.minimum_completion_percentage,
            conditions: self.conditions.filter(|c| !c.is_empty()),
            created_at,
        }
    }
}
