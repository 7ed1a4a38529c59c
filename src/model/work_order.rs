//! Work orders and their dependent comments and attachments.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!(concat!("unknown ", stringify!($name), " '{}'"), other)),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkOrderStatus {
    Open,
    InProgress,
    OnHold,
    Completed,
    Cancelled,
}

text_enum!(WorkOrderStatus {
    Open => "open",
    InProgress => "in_progress",
    OnHold => "on_hold",
    Completed => "completed",
    Cancelled => "cancelled",
});

impl WorkOrderStatus {
    /// Allowed status transitions. Cancelled is terminal; a completed order
    /// can only be reopened.
    pub fn can_transition_to(self, next: WorkOrderStatus) -> bool {
        use WorkOrderStatus::*;
        matches!(
            (self, next),
            (Open, InProgress | OnHold | Completed | Cancelled)
                | (InProgress, Open | OnHold | Completed | Cancelled)
                | (OnHold, Open | InProgress | Cancelled)
                | (Completed, Open)
        )
    }

    pub fn is_closed(self) -> bool {
        matches!(self, WorkOrderStatus::Completed | WorkOrderStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkOrderType {
    Corrective,
    Preventive,
    Inspection,
    Emergency,
}

text_enum!(WorkOrderType {
    Corrective => "corrective",
    Preventive => "preventive",
    Inspection => "inspection",
    Emergency => "emergency",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

text_enum!(Priority {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

/// What a work order is about: exactly one equipment item or one location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum WorkTarget {
    Equipment(Uuid),
    Location(Uuid),
}

impl WorkTarget {
    pub fn equipment_id(self) -> Option<Uuid> {
        match self {
            WorkTarget::Equipment(id) => Some(id),
            WorkTarget::Location(_) => None,
        }
    }

    pub fn location_id(self) -> Option<Uuid> {
        match self {
            WorkTarget::Location(id) => Some(id),
            WorkTarget::Equipment(_) => None,
        }
    }

    /// Rebuild from the two nullable storage columns; `None` unless exactly one is set.
    pub fn from_columns(equipment_id: Option<Uuid>, location_id: Option<Uuid>) -> Option<Self> {
        match (equipment_id, location_id) {
            (Some(e), None) => Some(WorkTarget::Equipment(e)),
            (None, Some(l)) => Some(WorkTarget::Location(l)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkOrder {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub work_type: WorkOrderType,
    pub status: WorkOrderStatus,
    pub priority: Priority,
    pub target: WorkTarget,
    pub assigned_to: Option<Uuid>,
    pub created_by: Uuid,
    pub schedule_id: Option<Uuid>,
    /// Set on preventive orders derived from a schedule completion.
    pub completion_id: Option<Uuid>,
    pub due_date: Option<NaiveDate>,
    pub completed_date: Option<DateTime<Utc>>,
    pub estimated_hours: Option<Decimal>,
    pub actual_hours: Option<Decimal>,
    pub labor_cost: Decimal,
    pub parts_cost: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkOrder {
    pub fn actual_cost(&self) -> Decimal {
        self.labor_cost + self.parts_cost
    }

    /// Move to `next`, stamping or clearing `completed_date`.
    ///
    /// Returns `false` (and leaves the order untouched) for a disallowed move.
    pub fn transition(&mut self, next: WorkOrderStatus, at: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        if next == WorkOrderStatus::Completed {
            self.completed_date = Some(at);
        } else if self.status == WorkOrderStatus::Completed {
            self.completed_date = None;
        }
        self.status = next;
        self.updated_at = at;
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkOrderComment {
    pub id: Uuid,
    pub work_order_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// File metadata only; the bytes live in external storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkOrderAttachment {
    pub id: Uuid,
    pub work_order_id: Uuid,
    pub file_name: String,
    pub storage_ref: String,
    pub uploaded_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use WorkOrderStatus::*;

    fn order(status: WorkOrderStatus) -> WorkOrder {
        let now = Utc::now();
        WorkOrder {
            id: Uuid::new_v4(),
            title: "Replace pump seal".into(),
            description: None,
            work_type: WorkOrderType::Corrective,
            status,
            priority: Priority::High,
            target: WorkTarget::Equipment(Uuid::new_v4()),
            assigned_to: None,
            created_by: Uuid::new_v4(),
            schedule_id: None,
            completion_id: None,
            due_date: None,
            completed_date: None,
            estimated_hours: None,
            actual_hours: None,
            labor_cost: Decimal::ZERO,
            parts_cost: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_transition_table() {
        assert!(Open.can_transition_to(InProgress));
        assert!(Open.can_transition_to(Completed));
        assert!(OnHold.can_transition_to(InProgress));
        assert!(!OnHold.can_transition_to(Completed));
        assert!(Completed.can_transition_to(Open));
        assert!(!Completed.can_transition_to(InProgress));
        for next in [Open, InProgress, OnHold, Completed] {
            assert!(!Cancelled.can_transition_to(next));
        }
        assert!(!Open.can_transition_to(Open));
    }

    #[test]
    fn test_completion_stamps_and_reopen_clears_date() {
        let mut wo = order(InProgress);
        let at = Utc::now();
        assert!(wo.transition(Completed, at));
        assert_eq!(wo.completed_date, Some(at));
        assert!(wo.transition(Open, at));
        assert_eq!(wo.completed_date, None);
    }

    #[test]
    fn test_rejected_transition_leaves_order_untouched() {
        let mut wo = order(Cancelled);
        let before = wo.clone();
        assert!(!wo.transition(InProgress, Utc::now()));
        assert_eq!(wo, before);
    }

    #[test]
    fn test_target_requires_exactly_one_column() {
        let id = Uuid::new_v4();
        assert_eq!(WorkTarget::from_columns(Some(id), None), Some(WorkTarget::Equipment(id)));
        assert_eq!(WorkTarget::from_columns(None, Some(id)), Some(WorkTarget::Location(id)));
        assert_eq!(WorkTarget::from_columns(Some(id), Some(id)), None);
        assert_eq!(WorkTarget::from_columns(None, None), None);
    }

    #[test]
    fn test_status_names_round_trip() {
        for s in [Open, InProgress, OnHold, Completed, Cancelled] {
            assert_eq!(s.as_str().parse::<WorkOrderStatus>().unwrap(), s);
        }
    }
}
