//! Maintenance schedules.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::work_order::Priority;
use crate::recurrence::{next_due_date, Frequency};

/// A recurring preventive task bound to one equipment item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceSchedule {
    pub id: Uuid,
    pub equipment_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub frequency: Frequency,
    pub next_due_date: NaiveDate,
    pub last_completed_date: Option<DateTime<Utc>>,
    /// Completion that produced the current due date.
    pub last_completion_id: Option<Uuid>,
    pub times_completed: u32,
    pub repeat_count: Option<u32>,
    pub auto_pause_when_done: bool,
    pub is_active: bool,
    pub priority: Priority,
    pub assigned_to: Option<Uuid>,
    pub procedure_template_id: Option<Uuid>,
    pub checklist_template_id: Option<Uuid>,
    pub estimated_hours: Option<Decimal>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What [`MaintenanceSchedule::record_completion`] changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleAdvance {
    pub next_due_date: NaiveDate,
    pub times_completed: u32,
    pub paused: bool,
}

impl MaintenanceSchedule {
    pub fn new(
        equipment_id: Uuid,
        title: impl Into<String>,
        frequency: Frequency,
        first_due: NaiveDate,
        created_by: Uuid,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            equipment_id,
            title: title.into(),
            description: None,
            frequency,
            next_due_date: first_due,
            last_completed_date: None,
            last_completion_id: None,
            times_completed: 0,
            repeat_count: None,
            auto_pause_when_done: false,
            is_active: true,
            priority: Priority::Medium,
            assigned_to: None,
            procedure_template_id: None,
            checklist_template_id: None,
            estimated_hours: None,
            created_by,
            created_at: now,
            updated_at: now,
        }
    }

    /// Stop after `count` completions; pause automatically when `auto_pause`.
    pub fn with_repeat_limit(mut self, count: u32, auto_pause: bool) -> Self {
        self.repeat_count = Some(count);
        self.auto_pause_when_done = auto_pause;
        self
    }

    pub fn with_assignee(mut self, assignee: Uuid) -> Self {
        self.assigned_to = Some(assignee);
        self
    }

    pub fn with_checklist(mut self, template_id: Uuid) -> Self {
        self.checklist_template_id = Some(template_id);
        self
    }

    pub fn with_procedure(mut self, template_id: Uuid) -> Self {
        self.procedure_template_id = Some(template_id);
        self
    }

    /// Apply completion `completion_id`, made at `completed_at`.
    ///
    /// The next due date is anchored on the completion date, not on the
    /// previous due date. A schedule whose repeat limit is reached pauses
    /// itself only when `auto_pause_when_done` is set.
    pub fn record_completion(
        &mut self,
        completion_id: Uuid,
        completed_at: DateTime<Utc>,
    ) -> ScheduleAdvance {
        self.last_completed_date = Some(completed_at);
        self.last_completion_id = Some(completion_id);
        self.next_due_date = next_due_date(self.frequency, completed_at.date_naive());
        self.times_completed = self.times_completed.saturating_add(1);
        self.updated_at = completed_at;

        let limit_reached = self
            .repeat_count
            .is_some_and(|limit| self.times_completed >= limit);
        let paused = limit_reached && self.auto_pause_when_done;
        if paused {
            self.is_active = false;
        }

        ScheduleAdvance {
            next_due_date: self.next_due_date,
            times_completed: self.times_completed,
            paused,
        }
    }

    /// Due is a read-time property: active and past its due date.
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.is_active && self.next_due_date < today
    }

    /// Negative when overdue.
    pub fn days_until_due(&self, today: NaiveDate) -> i64 {
        (self.next_due_date - today).num_days()
    }

    pub fn remaining_repeats(&self) -> Option<u32> {
        self.repeat_count
            .map(|limit| limit.saturating_sub(self.times_completed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn schedule(frequency: Frequency) -> MaintenanceSchedule {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap();
        MaintenanceSchedule::new(
            Uuid::new_v4(),
            "Lubricate conveyor bearings",
            frequency,
            NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            Uuid::new_v4(),
            now,
        )
    }

    #[test]
    fn test_completion_anchors_on_completion_date() {
        let mut s = schedule(Frequency::Monthly);
        let done = Utc.with_ymd_and_hms(2024, 1, 31, 16, 30, 0).unwrap();
        let advance = s.record_completion(Uuid::new_v4(), done);

        assert_eq!(advance.next_due_date, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(s.last_completed_date, Some(done));
        assert_eq!(s.times_completed, 1);
        assert!(s.is_active);
    }

    #[test]
    fn test_auto_pause_when_repeat_limit_reached() {
        let mut s = schedule(Frequency::Weekly).with_repeat_limit(3, true);
        s.times_completed = 2;
        let advance = s.record_completion(Uuid::new_v4(), Utc::now());
        assert_eq!(s.times_completed, 3);
        assert!(advance.paused);
        assert!(!s.is_active);
    }

    #[test]
    fn test_stays_active_below_limit() {
        let mut s = schedule(Frequency::Weekly).with_repeat_limit(3, true);
        s.times_completed = 0;
        s.record_completion(Uuid::new_v4(), Utc::now());
        assert_eq!(s.times_completed, 1);
        assert!(s.is_active);
        assert_eq!(s.remaining_repeats(), Some(2));
    }

    #[test]
    fn test_limit_without_auto_pause_keeps_schedule_active() {
        let mut s = schedule(Frequency::Weekly).with_repeat_limit(1, false);
        let advance = s.record_completion(Uuid::new_v4(), Utc::now());
        assert!(!advance.paused);
        assert!(s.is_active);
    }

    #[test]
    fn test_overdue_is_strictly_after_due_date() {
        let s = schedule(Frequency::Monthly);
        let due = s.next_due_date;
        assert!(!s.is_overdue(due));
        assert!(s.is_overdue(due.succ_opt().unwrap()));
        assert_eq!(s.days_until_due(due.succ_opt().unwrap()), -1);

        let mut paused = s.clone();
        paused.is_active = false;
        assert!(!paused.is_overdue(due.succ_opt().unwrap()));
    }
}
