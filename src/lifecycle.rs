//! Schedule completion.
//!
//! Finalizing a completion produces three correlated records: the
//! completion itself, the advanced schedule, and a preventive work order
//! linked back to the completion. Selected parts are then consumed against
//! that work order.
//!
//! Every attempt carries an idempotency key, and the completion record
//! tracks how far the attempt got ([`CommitStage`]):
//!
//! | stage               | already done                                |
//! |---------------------|---------------------------------------------|
//! | `Recorded`          | completion row exists                       |
//! | `ScheduleAdvanced`  | schedule moved to its next due date         |
//! | `WorkOrderLinked`   | preventive work order created and linked    |
//! | `Settled`           | parts consumed; nothing left to do          |
//!
//! On a transactional store all stages run in one unit of work, so the
//! intermediate stages are never visible. Otherwise each stage is its own
//! unit and a retry with the same key resumes from the recorded stage.
//! Each stage is written so that repeating it after a partial failure has
//! no further effect.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::LifecycleCommitError;
use crate::executor::StoreError;
use crate::identity::Actor;
use crate::model::{
    ChecklistResult, CommitStage, MaintenanceSchedule, PartsRejections, ScheduleAdvance,
    ScheduleCompletion, WorkOrder, WorkOrderStatus, WorkOrderType, WorkTarget,
};
use crate::notify::Notifier;
use crate::reconciler::{apply_in, PartRequest, PartsReport};
use crate::store::{Store, StoreTx};

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Attempts at the conditional schedule write before giving up.
const MAX_ADVANCE_ATTEMPTS: usize = 8;

/// Everything collected for one completion. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionRequest {
    pub idempotency_key: Uuid,
    pub schedule_id: Uuid,
    pub completed_by: Actor,
    pub checklist_results: BTreeMap<String, ChecklistResult>,
    pub procedure_notes: Option<String>,
    pub duration_hours: Option<Decimal>,
    pub parts: Vec<PartRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionReceipt {
    pub completion_id: Uuid,
    pub work_order_id: Option<Uuid>,
    /// The schedule as it stands after the commit; `None` if it has since been deleted.
    pub schedule: Option<MaintenanceSchedule>,
    /// Set when this call advanced the schedule.
    #[serde(skip)]
    pub advance: Option<ScheduleAdvance>,
    pub parts: PartsReport,
    /// The idempotency key was already known.
    pub replayed: bool,
}

/// Something that can commit a finalized completion.
pub trait CompletionCommitter {
    fn finalize(&self, request: &CompletionRequest) -> Result<CompletionReceipt, LifecycleCommitError>;
}

pub struct MaintenanceLifecycleCoordinator<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    notifier: Notifier,
}

/// Side outputs collected while stages run.
#[derive(Default)]
struct Progress {
    advance: Option<ScheduleAdvance>,
    work_order: Option<WorkOrder>,
    parts: Option<PartsReport>,
}

impl<S: Store> MaintenanceLifecycleCoordinator<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, notifier: Notifier) -> Self {
        Self {
            store,
            clock,
            notifier,
        }
    }

    fn commit_atomically(
        &self,
        request: &CompletionRequest,
        now: DateTime<Utc>,
    ) -> Result<CompletionReceipt, LifecycleCommitError> {
        self.store.run(|tx| {
            let (mut completion, replayed) = open_attempt(tx, request, now)?;
            let mut progress = Progress::default();
            while !completion.is_settled() {
                run_stage(tx, &mut completion, request, &mut progress)?;
            }
            receipt(tx, &completion, replayed, progress)
        })
    }

    fn commit_stepwise(
        &self,
        request: &CompletionRequest,
        now: DateTime<Utc>,
    ) -> Result<CompletionReceipt, LifecycleCommitError> {
        let (mut completion, replayed) = self.store.run(|tx| open_attempt(tx, request, now))?;
        if replayed && !completion.is_settled() {
            log::info!(
                "resuming completion {} from stage {}",
                completion.id,
                completion.stage
            );
        }
        let mut progress = Progress::default();
        while !completion.is_settled() {
            self.store
                .run(|tx| run_stage(tx, &mut completion, request, &mut progress))?;
        }
        self.store
            .run(|tx| receipt(tx, &completion, replayed, progress))
    }

    fn announce(&self, request: &CompletionRequest, receipt: &CompletionReceipt, work_order: Option<&WorkOrder>) {
        for part in &receipt.parts.low_stock {
            self.notifier.low_stock(part);
        }
        if receipt.replayed {
            return;
        }
        if let Some(work_order) = work_order {
            if let Some(assignee) = work_order.assigned_to {
                if assignee != request.completed_by.id {
                    self.notifier.work_order_event(
                        work_order,
                        assignee,
                        "Preventive maintenance completed",
                    );
                }
            }
        }
        if let Some(advance) = receipt.advance.filter(|a| a.paused) {
            log::info!(
                "schedule {} paused after {} completions",
                request.schedule_id,
                advance.times_completed
            );
        }
    }
}

impl<S: Store> CompletionCommitter for MaintenanceLifecycleCoordinator<S> {
    fn finalize(&self, request: &CompletionRequest) -> Result<CompletionReceipt, LifecycleCommitError> {
        #[cfg(feature = "tracing")]
        let _span =
            tracing_helpers::finalize_completion_span(request.schedule_id, request.idempotency_key)
                .entered();

        let now = self.clock.now();
        let result = if self.store.capabilities().multi_record_transactions {
            self.commit_atomically(request, now)
        } else {
            self.commit_stepwise(request, now)
        };

        let receipt = match result {
            Ok(receipt) => receipt,
            Err(e) => {
                log::warn!(
                    "completion of schedule {} (key {}) failed: {e}",
                    request.schedule_id,
                    request.idempotency_key
                );
                return Err(e);
            }
        };

        #[cfg(feature = "metrics")]
        METRICS.record_completion(receipt.replayed);

        let work_order = match receipt.work_order_id {
            Some(id) => self.store.run(|tx| tx.find_work_order(id)).unwrap_or_else(|e: StoreError| {
                log::warn!("could not load work order {id} for notification: {e}");
                None
            }),
            None => None,
        };
        self.announce(request, &receipt, work_order.as_ref());
        log::info!(
            "schedule {} completed by {} (completion {}, work order {:?}, replayed {})",
            request.schedule_id,
            request.completed_by.name,
            receipt.completion_id,
            receipt.work_order_id,
            receipt.replayed
        );
        Ok(receipt)
    }
}

/// Find the attempt for this key, or record a new one.
fn open_attempt(
    tx: &mut dyn StoreTx,
    request: &CompletionRequest,
    now: DateTime<Utc>,
) -> Result<(ScheduleCompletion, bool), LifecycleCommitError> {
    if let Some(existing) = tx.find_completion_by_key(request.idempotency_key)? {
        return known_attempt(existing, request).map(|c| (c, true));
    }

    let schedule = tx
        .find_schedule(request.schedule_id)?
        .ok_or(LifecycleCommitError::ScheduleNotFound(request.schedule_id))?;
    if !schedule.is_active {
        return Err(LifecycleCommitError::ScheduleInactive(schedule.id));
    }

    let completion = ScheduleCompletion {
        id: Uuid::new_v4(),
        schedule_id: schedule.id,
        idempotency_key: request.idempotency_key,
        completed_by: request.completed_by.id,
        completed_by_name: request.completed_by.name.clone(),
        completed_at: now,
        checklist_results: request.checklist_results.clone(),
        procedure_notes: request.procedure_notes.clone(),
        duration_hours: request.duration_hours,
        work_order_id: None,
        stage: CommitStage::Recorded,
        parts_rejections: PartsRejections::default(),
    };
    if tx.insert_completion(&completion)? {
        return Ok((completion, false));
    }

    // Another attempt with this key got in first.
    let existing = tx.find_completion_by_key(request.idempotency_key)?.ok_or_else(|| {
        StoreError::Other(format!(
            "completion for key {} vanished after conflict",
            request.idempotency_key
        ))
    })?;
    known_attempt(existing, request).map(|c| (c, true))
}

fn known_attempt(
    existing: ScheduleCompletion,
    request: &CompletionRequest,
) -> Result<ScheduleCompletion, LifecycleCommitError> {
    if existing.schedule_id != request.schedule_id {
        return Err(LifecycleCommitError::KeyReused {
            key: request.idempotency_key,
            recorded_for: existing.schedule_id,
            requested_for: request.schedule_id,
        });
    }
    Ok(existing)
}

/// Move `completion` forward by exactly one stage.
fn run_stage(
    tx: &mut dyn StoreTx,
    completion: &mut ScheduleCompletion,
    request: &CompletionRequest,
    progress: &mut Progress,
) -> Result<(), LifecycleCommitError> {
    match completion.stage {
        CommitStage::Recorded => {
            progress.advance = advance_schedule(tx, completion)?;
            completion.stage = CommitStage::ScheduleAdvanced;
        }
        CommitStage::ScheduleAdvanced => {
            let work_order = link_work_order(tx, completion)?;
            completion.work_order_id = Some(work_order.id);
            completion.stage = CommitStage::WorkOrderLinked;
            progress.work_order = Some(work_order);
        }
        CommitStage::WorkOrderLinked => {
            let report = match completion.work_order_id {
                Some(work_order_id) => apply_in(
                    tx,
                    work_order_id,
                    &request.parts,
                    completion.completed_by,
                    completion.completed_at,
                    true,
                )?,
                None => PartsReport::default(),
            };
            completion.parts_rejections = PartsRejections {
                conflicts: report.conflicts.clone(),
                missing: report.missing.clone(),
            };
            completion.stage = CommitStage::Settled;
            progress.parts = Some(report);
        }
        CommitStage::Settled => return Ok(()),
    }
    tx.update_completion(completion)?;
    Ok(())
}

/// Apply the completion to its schedule unless that already happened.
fn advance_schedule(
    tx: &mut dyn StoreTx,
    completion: &ScheduleCompletion,
) -> Result<Option<ScheduleAdvance>, LifecycleCommitError> {
    for _ in 0..MAX_ADVANCE_ATTEMPTS {
        let schedule = tx
            .lock_schedule(completion.schedule_id)?
            .ok_or(LifecycleCommitError::ScheduleNotFound(completion.schedule_id))?;
        if schedule.last_completion_id == Some(completion.id) {
            return Ok(None);
        }

        let expected = schedule.times_completed;
        let mut advanced = schedule;
        let advance = advanced.record_completion(completion.id, completion.completed_at);
        if tx.advance_schedule(&advanced, expected)? {
            log::debug!(
                "schedule {} next due {} ({} completions)",
                advanced.id,
                advance.next_due_date,
                advance.times_completed
            );
            return Ok(Some(advance));
        }
        log::debug!("schedule {} changed concurrently, retrying", completion.schedule_id);
    }
    Err(StoreError::Other(format!(
        "schedule {} kept changing during completion",
        completion.schedule_id
    ))
    .into())
}

/// Find or create the preventive work order for this completion.
fn link_work_order(
    tx: &mut dyn StoreTx,
    completion: &ScheduleCompletion,
) -> Result<WorkOrder, LifecycleCommitError> {
    if let Some(existing) = tx.find_work_order_by_completion(completion.id)? {
        return Ok(existing);
    }
    let schedule = tx
        .find_schedule(completion.schedule_id)?
        .ok_or(LifecycleCommitError::ScheduleNotFound(completion.schedule_id))?;
    let work_order = derived_work_order(&schedule, completion);
    tx.insert_work_order(&work_order)?;
    Ok(work_order)
}

/// The record of work that already happened: completed on creation.
fn derived_work_order(schedule: &MaintenanceSchedule, completion: &ScheduleCompletion) -> WorkOrder {
    let at = completion.completed_at;
    WorkOrder {
        // Derived from the completion so a duplicate insert collides.
        id: Uuid::new_v5(&completion.id, b"work-order"),
        title: format!("Preventive: {}", schedule.title),
        description: completion
            .procedure_notes
            .clone()
            .or_else(|| schedule.description.clone()),
        work_type: WorkOrderType::Preventive,
        status: WorkOrderStatus::Completed,
        priority: schedule.priority,
        target: WorkTarget::Equipment(schedule.equipment_id),
        assigned_to: Some(schedule.assigned_to.unwrap_or(completion.completed_by)),
        created_by: completion.completed_by,
        schedule_id: Some(schedule.id),
        completion_id: Some(completion.id),
        due_date: Some(at.date_naive()),
        completed_date: Some(at),
        estimated_hours: schedule.estimated_hours,
        actual_hours: completion.duration_hours,
        labor_cost: Decimal::ZERO,
        parts_cost: Decimal::ZERO,
        created_at: at,
        updated_at: at,
    }
}

fn receipt(
    tx: &mut dyn StoreTx,
    completion: &ScheduleCompletion,
    replayed: bool,
    progress: Progress,
) -> Result<CompletionReceipt, LifecycleCommitError> {
    let parts = match (progress.parts, completion.work_order_id) {
        (Some(report), _) => report,
        (None, Some(work_order_id)) => PartsReport {
            consumed: tx.usage_for_work_order(work_order_id)?,
            conflicts: completion.parts_rejections.conflicts.clone(),
            missing: completion.parts_rejections.missing.clone(),
            low_stock: Vec::new(),
        },
        (None, None) => PartsReport::default(),
    };
    Ok(CompletionReceipt {
        completion_id: completion.id,
        work_order_id: completion.work_order_id,
        schedule: tx.find_schedule(completion.schedule_id)?,
        advance: progress.advance,
        parts,
        replayed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::deletion::DeletionReconciler;
    use crate::model::InventoryPart;
    use crate::model::Quantity;
    use crate::recurrence::Frequency;
    use crate::store::{FailPoint, MemoryStore};
    use chrono::{NaiveDate, TimeZone};

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 10, 0, 0).unwrap()
    }

    fn fixture(store: MemoryStore) -> (Arc<MemoryStore>, MaintenanceLifecycleCoordinator<MemoryStore>, MaintenanceSchedule) {
        let store = Arc::new(store);
        let schedule = MaintenanceSchedule::new(
            Uuid::new_v4(),
            "Boiler inspection",
            Frequency::Monthly,
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            Uuid::new_v4(),
            at(2024, 1, 1),
        );
        store.run(|tx| tx.insert_schedule(&schedule)).unwrap();
        let coordinator = MaintenanceLifecycleCoordinator::new(
            Arc::clone(&store),
            Arc::new(FixedClock::new(at(2024, 1, 31))),
            Notifier::disabled(),
        );
        (store, coordinator, schedule)
    }

    fn request(schedule_id: Uuid) -> CompletionRequest {
        CompletionRequest {
            idempotency_key: Uuid::new_v4(),
            schedule_id,
            completed_by: Actor::new(Uuid::new_v4(), "Dana Ortiz"),
            checklist_results: BTreeMap::new(),
            procedure_notes: Some("Burner cleaned".to_string()),
            duration_hours: Some(Decimal::new(150, 2)),
            parts: Vec::new(),
        }
    }

    #[test]
    fn test_finalize_creates_three_correlated_records() {
        let (store, coordinator, schedule) = fixture(MemoryStore::transactional());
        let req = request(schedule.id);
        let receipt = coordinator.finalize(&req).unwrap();

        assert!(!receipt.replayed);
        let after = receipt.schedule.clone().unwrap();
        assert_eq!(after.times_completed, 1);
        assert_eq!(after.next_due_date, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(after.last_completed_date, Some(at(2024, 1, 31)));

        let wo = store
            .run(|tx| tx.find_work_order(receipt.work_order_id.unwrap()))
            .unwrap()
            .unwrap();
        assert_eq!(wo.work_type, WorkOrderType::Preventive);
        assert_eq!(wo.status, WorkOrderStatus::Completed);
        assert_eq!(wo.completed_date, Some(at(2024, 1, 31)));
        assert_eq!(wo.assigned_to, Some(req.completed_by.id));
        assert_eq!(wo.actual_hours, Some(Decimal::new(150, 2)));
        assert!(wo.title.contains("Boiler inspection"));

        let completion = store
            .run(|tx| tx.find_completion_by_key(req.idempotency_key))
            .unwrap()
            .unwrap();
        assert_eq!(completion.work_order_id, Some(wo.id));
        assert!(completion.is_settled());
    }

    #[test]
    fn test_replay_returns_same_records() {
        let (store, coordinator, schedule) = fixture(MemoryStore::transactional());
        let req = request(schedule.id);
        let first = coordinator.finalize(&req).unwrap();
        let second = coordinator.finalize(&req).unwrap();

        assert!(second.replayed);
        assert_eq!(first.completion_id, second.completion_id);
        assert_eq!(first.work_order_id, second.work_order_id);
        let completions = store.run(|tx| tx.completions_for_schedule(schedule.id)).unwrap();
        assert_eq!(completions.len(), 1);
        assert_eq!(second.schedule.unwrap().times_completed, 1);
    }

    #[test]
    fn test_transactional_failure_leaves_nothing_behind() {
        let (store, coordinator, schedule) = fixture(MemoryStore::transactional());
        store.fail_next(FailPoint::InsertWorkOrder);
        let req = request(schedule.id);

        assert!(coordinator.finalize(&req).is_err());
        assert!(store.run(|tx| tx.find_completion_by_key(req.idempotency_key)).unwrap().is_none());
        let unchanged = store.run(|tx| tx.find_schedule(schedule.id)).unwrap().unwrap();
        assert_eq!(unchanged.times_completed, 0);
    }

    #[test]
    fn test_stepwise_retry_resumes_without_duplicates() {
        let (store, coordinator, schedule) = fixture(MemoryStore::non_transactional());
        store.fail_next(FailPoint::InsertWorkOrder);
        let req = request(schedule.id);

        assert!(coordinator.finalize(&req).is_err());
        let partial = store
            .run(|tx| tx.find_completion_by_key(req.idempotency_key))
            .unwrap()
            .unwrap();
        assert_eq!(partial.stage, CommitStage::ScheduleAdvanced);

        let receipt = coordinator.finalize(&req).unwrap();
        assert!(receipt.replayed);
        let after = receipt.schedule.unwrap();
        assert_eq!(after.times_completed, 1);
        assert_eq!(store.run(|tx| tx.completions_for_schedule(schedule.id)).unwrap().len(), 1);
        let wo = store
            .run(|tx| tx.find_work_order_by_completion(receipt.completion_id))
            .unwrap()
            .unwrap();
        assert_eq!(Some(wo.id), receipt.work_order_id);
    }

    #[test]
    fn test_stepwise_retry_after_advance_was_written_but_not_recorded() {
        let (store, coordinator, schedule) = fixture(MemoryStore::non_transactional());
        // The schedule write lands, the stage bookkeeping does not.
        store.fail_next(FailPoint::UpdateCompletion);
        let req = request(schedule.id);
        assert!(coordinator.finalize(&req).is_err());

        let receipt = coordinator.finalize(&req).unwrap();
        assert_eq!(receipt.schedule.unwrap().times_completed, 1);
        assert!(receipt.advance.is_none());
    }

    #[test]
    fn test_parts_consumed_against_new_work_order() {
        let (store, coordinator, schedule) = fixture(MemoryStore::transactional());
        let part = InventoryPart::new("Nozzle", Decimal::new(10, 0), Decimal::new(500, 2), at(2024, 1, 1));
        store.run(|tx| tx.insert_part(&part)).unwrap();
        let mut req = request(schedule.id);
        req.parts = vec![PartRequest {
            part_id: part.id,
            quantity: Quantity::parse("4").unwrap(),
        }];

        let receipt = coordinator.finalize(&req).unwrap();
        assert_eq!(receipt.parts.consumed.len(), 1);
        assert_eq!(receipt.parts.consumed[0].total_cost.to_string(), "20.00");
        let stock = store.run(|tx| tx.find_part(part.id)).unwrap().unwrap().quantity_in_stock;
        assert_eq!(stock.to_string(), "6.00");
        let wo = store
            .run(|tx| tx.find_work_order(receipt.work_order_id.unwrap()))
            .unwrap()
            .unwrap();
        assert_eq!(wo.parts_cost.to_string(), "20.00");

        // Replaying must not consume again.
        coordinator.finalize(&req).unwrap();
        let stock = store.run(|tx| tx.find_part(part.id)).unwrap().unwrap().quantity_in_stock;
        assert_eq!(stock.to_string(), "6.00");
    }

    #[test]
    fn test_stock_conflict_does_not_undo_completion() {
        let (store, coordinator, schedule) = fixture(MemoryStore::transactional());
        let part = InventoryPart::new("Thermocouple", Decimal::new(1, 0), Decimal::ONE, at(2024, 1, 1));
        store.run(|tx| tx.insert_part(&part)).unwrap();
        let mut req = request(schedule.id);
        req.parts = vec![PartRequest {
            part_id: part.id,
            quantity: Quantity::parse("2").unwrap(),
        }];

        let receipt = coordinator.finalize(&req).unwrap();
        assert_eq!(receipt.parts.conflicts.len(), 1);
        assert!(receipt.work_order_id.is_some());
        assert_eq!(receipt.schedule.unwrap().times_completed, 1);
    }

    #[test]
    fn test_stepwise_retry_rolls_up_parts_cost_after_failed_refresh() {
        let (store, coordinator, schedule) = fixture(MemoryStore::non_transactional());
        let part = InventoryPart::new("Igniter", Decimal::new(10, 0), Decimal::new(500, 2), at(2024, 1, 1));
        store.run(|tx| tx.insert_part(&part)).unwrap();
        let mut req = request(schedule.id);
        req.parts = vec![PartRequest {
            part_id: part.id,
            quantity: Quantity::parse("4").unwrap(),
        }];

        // Stock and usage are written, the work order's cost update is not.
        store.fail_next(FailPoint::UpdateWorkOrder);
        assert!(coordinator.finalize(&req).is_err());
        let stock = store.run(|tx| tx.find_part(part.id)).unwrap().unwrap().quantity_in_stock;
        assert_eq!(stock.to_string(), "6.00");

        let receipt = coordinator.finalize(&req).unwrap();
        assert!(receipt.replayed);
        assert_eq!(receipt.parts.consumed.len(), 1);
        assert_eq!(receipt.parts.consumed[0].total_cost.to_string(), "20.00");
        let wo = store
            .run(|tx| tx.find_work_order(receipt.work_order_id.unwrap()))
            .unwrap()
            .unwrap();
        assert_eq!(wo.parts_cost.to_string(), "20.00");
        let stock = store.run(|tx| tx.find_part(part.id)).unwrap().unwrap().quantity_in_stock;
        assert_eq!(stock.to_string(), "6.00");
    }

    #[test]
    fn test_replay_reports_the_original_rejections() {
        let (store, coordinator, schedule) = fixture(MemoryStore::transactional());
        let part = InventoryPart::new("Flame sensor", Decimal::new(1, 0), Decimal::ONE, at(2024, 1, 1));
        store.run(|tx| tx.insert_part(&part)).unwrap();
        let unknown = Uuid::new_v4();
        let mut req = request(schedule.id);
        req.parts = vec![
            PartRequest {
                part_id: part.id,
                quantity: Quantity::parse("3").unwrap(),
            },
            PartRequest {
                part_id: unknown,
                quantity: Quantity::parse("1").unwrap(),
            },
        ];

        let first = coordinator.finalize(&req).unwrap();
        assert_eq!(first.parts.conflicts.len(), 1);

        let replay = coordinator.finalize(&req).unwrap();
        assert!(replay.replayed);
        assert_eq!(replay.parts.conflicts, first.parts.conflicts);
        assert_eq!(replay.parts.conflicts[0].part_name, "Flame sensor");
        assert_eq!(replay.parts.missing, vec![unknown]);
        assert!(replay.parts.consumed.is_empty());
    }

    #[test]
    fn test_deleting_work_order_detaches_completion() {
        let (store, coordinator, schedule) = fixture(MemoryStore::transactional());
        let req = request(schedule.id);
        let receipt = coordinator.finalize(&req).unwrap();

        let reconciler = DeletionReconciler::new(Arc::clone(&store), Notifier::disabled());
        reconciler.delete(receipt.work_order_id.unwrap()).unwrap();

        let completion = store
            .run(|tx| tx.find_completion_by_key(req.idempotency_key))
            .unwrap()
            .unwrap();
        assert_eq!(completion.work_order_id, None);
        assert!(completion.is_settled());
        let after = store.run(|tx| tx.find_schedule(schedule.id)).unwrap().unwrap();
        assert_eq!(after.times_completed, 1);

        let replay = coordinator.finalize(&req).unwrap();
        assert!(replay.replayed);
        assert_eq!(replay.work_order_id, None);
    }

    #[test]
    fn test_inactive_or_missing_schedule_is_rejected() {
        let (store, coordinator, mut schedule) = fixture(MemoryStore::transactional());
        schedule.is_active = false;
        store.run(|tx| tx.update_schedule(&schedule)).unwrap();
        assert!(matches!(
            coordinator.finalize(&request(schedule.id)),
            Err(LifecycleCommitError::ScheduleInactive(_))
        ));
        assert!(matches!(
            coordinator.finalize(&request(Uuid::new_v4())),
            Err(LifecycleCommitError::ScheduleNotFound(_))
        ));
    }

    #[test]
    fn test_replay_after_schedule_paused_still_succeeds() {
        let (store, coordinator, schedule) = fixture(MemoryStore::transactional());
        let limited = schedule.with_repeat_limit(1, true);
        store.run(|tx| tx.update_schedule(&limited)).unwrap();
        let req = request(limited.id);

        let first = coordinator.finalize(&req).unwrap();
        assert!(first.advance.unwrap().paused);
        let again = coordinator.finalize(&req).unwrap();
        assert!(again.replayed);
        assert!(!again.schedule.unwrap().is_active);
    }

    #[test]
    fn test_key_reuse_for_other_schedule_is_rejected() {
        let (store, coordinator, schedule) = fixture(MemoryStore::transactional());
        let other = MaintenanceSchedule::new(
            Uuid::new_v4(),
            "Chiller filter",
            Frequency::Weekly,
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            Uuid::new_v4(),
            at(2024, 1, 1),
        );
        store.run(|tx| tx.insert_schedule(&other)).unwrap();
        let req = request(schedule.id);
        coordinator.finalize(&req).unwrap();

        let mut reused = req.clone();
        reused.schedule_id = other.id;
        assert!(matches!(
            coordinator.finalize(&reused),
            Err(LifecycleCommitError::KeyReused { .. })
        ));
    }
}
