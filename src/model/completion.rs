//! Schedule completion records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::StockConflict;

/// Outcome of one checklist item.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChecklistResult {
    pub checked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// How far a completion attempt has been applied.
///
/// Stages are applied in order; a retry with the same idempotency key
/// resumes from the recorded stage instead of starting over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitStage {
    Recorded,
    ScheduleAdvanced,
    WorkOrderLinked,
    Settled,
}

impl CommitStage {
    pub fn as_str(self) -> &'static str {
        match self {
            CommitStage::Recorded => "recorded",
            CommitStage::ScheduleAdvanced => "schedule_advanced",
            CommitStage::WorkOrderLinked => "work_order_linked",
            CommitStage::Settled => "settled",
        }
    }
}

impl fmt::Display for CommitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommitStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recorded" => Ok(CommitStage::Recorded),
            "schedule_advanced" => Ok(CommitStage::ScheduleAdvanced),
            "work_order_linked" => Ok(CommitStage::WorkOrderLinked),
            "settled" => Ok(CommitStage::Settled),
            other => Err(format!("unknown commit stage '{other}'")),
        }
    }
}

/// Parts a completion asked for but could not consume.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PartsRejections {
    #[serde(default)]
    pub conflicts: Vec<StockConflict>,
    #[serde(default)]
    pub missing: Vec<Uuid>,
}

impl PartsRejections {
    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty() && self.missing.is_empty()
    }
}

/// Immutable record of one completion event.
///
/// After creation only `work_order_id` and the bookkeeping fields (`stage`,
/// `parts_rejections`) change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleCompletion {
    pub id: Uuid,
    pub schedule_id: Uuid,
    pub idempotency_key: Uuid,
    pub completed_by: Uuid,
    pub completed_by_name: String,
    pub completed_at: DateTime<Utc>,
    pub checklist_results: BTreeMap<String, ChecklistResult>,
    pub procedure_notes: Option<String>,
    pub duration_hours: Option<Decimal>,
    pub work_order_id: Option<Uuid>,
    pub stage: CommitStage,
    /// Written when the parts stage settles.
    #[serde(default)]
    pub parts_rejections: PartsRejections,
}

impl ScheduleCompletion {
    pub fn is_settled(&self) -> bool {
        self.stage == CommitStage::Settled
    }

    pub fn checked_items(&self) -> usize {
        self.checklist_results.values().filter(|r| r.checked).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names_round_trip() {
        for stage in [
            CommitStage::Recorded,
            CommitStage::ScheduleAdvanced,
            CommitStage::WorkOrderLinked,
            CommitStage::Settled,
        ] {
            assert_eq!(stage.as_str().parse::<CommitStage>().unwrap(), stage);
        }
        assert!("done".parse::<CommitStage>().is_err());
    }

    #[test]
    fn test_stages_are_ordered() {
        assert!(CommitStage::Recorded < CommitStage::ScheduleAdvanced);
        assert!(CommitStage::WorkOrderLinked < CommitStage::Settled);
    }

    #[test]
    fn test_checklist_results_serialize_without_empty_notes() {
        let json = serde_json::to_value(ChecklistResult {
            checked: true,
            notes: None,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({ "checked": true }));
    }

    #[test]
    fn test_parts_rejections_read_from_empty_document() {
        let empty: PartsRejections = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(empty.is_empty());

        let missing = Uuid::new_v4();
        let stored = PartsRejections {
            conflicts: vec![StockConflict {
                part_id: Uuid::new_v4(),
                part_name: "Fan belt".to_string(),
                requested: Decimal::new(300, 2),
                available: Decimal::new(100, 2),
            }],
            missing: vec![missing],
        };
        let back: PartsRejections =
            serde_json::from_value(serde_json::to_value(&stored).unwrap()).unwrap();
        assert_eq!(back, stored);
    }
}
