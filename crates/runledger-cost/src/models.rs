//! Data models for runs and their cost line items.
//!
//! All models serialize with camelCase field names. Monetary amounts are
//! [`UsdCents`] and always render with 10 fractional digits; quantities render
//! with 6.

use chrono::{DateTime, Utc};
use runledger_core::{RunId, RunStatus, UsdCents};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize, Serializer};
use utoipa::ToSchema;
use uuid::Uuid;

/// Fractional digits kept for quantities.
pub const QUANTITY_SCALE: u32 = 6;

/// Round a quantity to storage precision, half away from zero.
pub fn normalize_quantity(quantity: Decimal) -> Decimal {
    let mut q = quantity.round_dp_with_strategy(QUANTITY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    q.rescale(QUANTITY_SCALE);
    q
}

fn serialize_quantity<S: Serializer>(quantity: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&normalize_quantity(*quantity).to_string())
}

/// An organization, addressed by the caller's external id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: Uuid,
    pub external_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user within an organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub external_id: String,
    pub organization_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One unit of service execution, optionally nested under a parent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    /// Run identifier
    #[schema(value_type = String)]
    pub id: RunId,

    /// Owning organization
    pub organization_id: Uuid,

    /// User the run was executed for, if any
    pub user_id: Option<Uuid>,

    /// Service that executed the run (e.g., "search-service")
    pub service_name: String,

    /// Task within the service (e.g., "enrich-lead")
    pub task_name: String,

    /// Lifecycle status
    #[schema(value_type = String)]
    pub status: RunStatus,

    /// Parent run; `None` for a root run
    #[schema(value_type = Option<String>)]
    pub parent_run_id: Option<RunId>,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when creating a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRun {
    pub organization_id: Uuid,
    pub user_id: Option<Uuid>,
    pub service_name: String,
    pub task_name: String,
    pub parent_run_id: Option<RunId>,
}

impl NewRun {
    /// Create a root run description.
    pub fn new(organization_id: Uuid, service_name: impl Into<String>, task_name: impl Into<String>) -> Self {
        Self {
            organization_id,
            user_id: None,
            service_name: service_name.into(),
            task_name: task_name.into(),
            parent_run_id: None,
        }
    }

    /// Attach the run to a user.
    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Nest the run under a parent.
    pub fn with_parent(mut self, parent_run_id: RunId) -> Self {
        self.parent_run_id = Some(parent_run_id);
        self
    }
}

/// A requested cost line: a priced name and how many units were consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CostItem {
    pub cost_name: String,
    #[schema(value_type = f64)]
    pub quantity: Decimal,
}

impl CostItem {
    pub fn new(cost_name: impl Into<String>, quantity: Decimal) -> Self {
        Self {
            cost_name: cost_name.into(),
            quantity,
        }
    }
}

/// A priced line ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRunCost {
    pub cost_name: String,
    pub quantity: Decimal,
    pub unit_cost: UsdCents,
    pub total_cost: UsdCents,
}

/// A stored cost line item. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(as = Cost)]
pub struct RunCost {
    pub id: Uuid,
    #[schema(value_type = String)]
    pub run_id: RunId,
    pub cost_name: String,
    #[serde(serialize_with = "serialize_quantity")]
    #[schema(value_type = String)]
    pub quantity: Decimal,
    #[serde(rename = "unitCostInUsdCents")]
    #[schema(value_type = String)]
    pub unit_cost: UsdCents,
    #[serde(rename = "totalCostInUsdCents")]
    #[schema(value_type = String)]
    pub total_cost: UsdCents,
    pub created_at: DateTime<Utc>,
}

/// A descendant of a reported run with its own cost.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(as = DescendantRun)]
pub struct DescendantCost {
    #[schema(value_type = String)]
    pub id: RunId,
    #[schema(value_type = String)]
    pub parent_run_id: RunId,
    /// Levels below the reported run (children are depth 1)
    pub depth: u32,
    pub service_name: String,
    pub task_name: String,
    #[schema(value_type = String)]
    pub status: RunStatus,
    #[serde(rename = "ownCostInUsdCents")]
    #[schema(value_type = String)]
    pub own_cost: UsdCents,
}

/// Cost report for a run and its whole subtree.
///
/// Invariant: `total_cost == own_cost + children_cost`, and `children_cost`
/// equals the sum of every descendant's `own_cost`.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(as = RunWithCosts)]
pub struct CostReport {
    #[serde(flatten)]
    pub run: Run,
    pub costs: Vec<RunCost>,
    #[serde(rename = "ownCostInUsdCents")]
    #[schema(value_type = String)]
    pub own_cost: UsdCents,
    #[serde(rename = "childrenCostInUsdCents")]
    #[schema(value_type = String)]
    pub children_cost: UsdCents,
    #[serde(rename = "totalCostInUsdCents")]
    #[schema(value_type = String)]
    pub total_cost: UsdCents,
    pub descendants: Vec<DescendantCost>,
}

/// Filters for listing runs within one organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFilter {
    pub organization_id: Uuid,
    pub service_name: Option<String>,
    pub task_name: Option<String>,
    pub user_id: Option<Uuid>,
    pub status: Option<RunStatus>,
    pub started_after: Option<DateTime<Utc>>,
    pub started_before: Option<DateTime<Utc>>,
}

impl RunFilter {
    /// Filter matching every run of an organization.
    pub fn for_organization(organization_id: Uuid) -> Self {
        Self {
            organization_id,
            service_name: None,
            task_name: None,
            user_id: None,
            status: None,
            started_after: None,
            started_before: None,
        }
    }

    pub fn with_service(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = Some(service_name.into());
        self
    }

    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Dimension a cost summary is grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum GroupBy {
    #[default]
    ServiceName,
    UserId,
    CostName,
}

/// One row of a cost summary.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(as = CostSummaryBreakdownItem)]
pub struct SummaryEntry {
    /// Group key; `None` for runs without a user when grouping by user
    pub key: Option<String>,
    #[serde(rename = "totalCostInUsdCents")]
    #[schema(value_type = String)]
    pub total_cost: UsdCents,
    /// Distinct runs in the group (service/user grouping)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_count: Option<u64>,
    /// Summed quantity (cost-name grouping)
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_opt_quantity")]
    #[schema(value_type = Option<String>)]
    pub total_quantity: Option<Decimal>,
}

fn serialize_opt_quantity<S: Serializer>(quantity: &Option<Decimal>, serializer: S) -> Result<S::Ok, S::Error> {
    match quantity {
        Some(q) => serialize_quantity(q, serializer),
        None => serializer.serialize_none(),
    }
}
