//! Stock and completion counts under contention on the in-memory store,
//! from OS threads and from `may` coroutines.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use fake::faker::lorem::en::Sentence;
use fake::faker::name::en::Name;
use fake::Fake;
use rand::Rng;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use uuid::Uuid;

use upkeep::model::{InventoryPart, MaintenanceSchedule, Quantity};
use upkeep::{
    next_due_date, Actor, CompletionCommitter, CompletionRequest, FixedClock, Frequency,
    InventoryLedger, LedgerError, MaintenanceLifecycleCoordinator, MemoryStore, NewWorkOrder,
    Notifier, Store, SystemClock, WorkOrderService,
};

fn actor() -> Actor {
    Actor::new(Uuid::new_v4(), Name().fake::<String>())
}

fn work_order(store: &Arc<MemoryStore>) -> Uuid {
    let service = WorkOrderService::new(Arc::clone(store), Arc::new(SystemClock), Notifier::disabled());
    let input = NewWorkOrder {
        title: Sentence(2..5).fake(),
        equipment_id: Some(Uuid::new_v4()),
        ..Default::default()
    };
    service.create_corrective(input, &actor()).unwrap().id
}

fn schedule(store: &MemoryStore) -> MaintenanceSchedule {
    let schedule = MaintenanceSchedule::new(
        Uuid::new_v4(),
        Sentence(2..5).fake::<String>(),
        Frequency::Weekly,
        NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
        Uuid::new_v4(),
        Utc::now(),
    );
    store.run(|tx| tx.insert_schedule(&schedule)).unwrap();
    schedule
}

fn request(schedule_id: Uuid, key: Uuid) -> CompletionRequest {
    CompletionRequest {
        idempotency_key: key,
        schedule_id,
        completed_by: actor(),
        checklist_results: BTreeMap::new(),
        procedure_notes: None,
        duration_hours: None,
        parts: Vec::new(),
    }
}

fn completed_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 6, 14, 30, 0).unwrap()
}

fn coordinator(store: &Arc<MemoryStore>) -> Arc<MaintenanceLifecycleCoordinator<MemoryStore>> {
    Arc::new(MaintenanceLifecycleCoordinator::new(
        Arc::clone(store),
        Arc::new(FixedClock::new(completed_at())),
        Notifier::disabled(),
    ))
}

#[test]
fn test_threads_never_drive_stock_negative() {
    for store in [MemoryStore::transactional(), MemoryStore::non_transactional()] {
        let store = Arc::new(store);
        let work_order_id = work_order(&store);
        let stock: i64 = rand::thread_rng().gen_range(3..12);
        let part = InventoryPart::new("V-belt A42", Decimal::new(stock, 0), Decimal::new(1999, 2), Utc::now());
        store.run(|tx| tx.insert_part(&part)).unwrap();
        let part_id = part.id;

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    InventoryLedger::new(store).consume(
                        part_id,
                        Quantity::parse("1").unwrap(),
                        work_order_id,
                        Uuid::new_v4(),
                        Utc::now(),
                    )
                })
            })
            .collect();

        let mut applied = 0;
        for handle in handles {
            match handle.join().unwrap() {
                Ok(_) => applied += 1,
                Err(LedgerError::Conflict(conflict)) => assert_eq!(conflict.part_id, part_id),
                Err(e) => panic!("unexpected ledger error: {e}"),
            }
        }
        assert_eq!(applied, stock);
        let left = store.run(|tx| tx.find_part(part_id)).unwrap().unwrap();
        assert_eq!(left.quantity_in_stock, Decimal::ZERO);
    }
}

#[test]
fn test_coroutines_with_distinct_keys_each_count() {
    let store = Arc::new(MemoryStore::transactional());
    let schedule = schedule(&store);
    let coordinator = coordinator(&store);
    let completions: u32 = rand::thread_rng().gen_range(4..10);

    let handles: Vec<_> = (0..completions)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            let req = request(schedule.id, Uuid::new_v4());
            may::go!(move || coordinator.finalize(&req))
        })
        .collect();
    for handle in handles {
        let receipt = handle.join().unwrap().unwrap();
        assert!(!receipt.replayed);
        assert!(receipt.work_order_id.is_some());
    }

    let after = store.run(|tx| tx.find_schedule(schedule.id)).unwrap().unwrap();
    assert_eq!(after.times_completed, completions);
    assert_eq!(
        after.next_due_date,
        next_due_date(Frequency::Weekly, completed_at().date_naive())
    );
}

#[test]
fn test_threads_sharing_one_key_commit_once() {
    let store = Arc::new(MemoryStore::transactional());
    let schedule = schedule(&store);
    let coordinator = coordinator(&store);
    let req = request(schedule.id, Uuid::new_v4());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            let req = req.clone();
            thread::spawn(move || coordinator.finalize(&req))
        })
        .collect();
    let receipts: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();

    assert_eq!(receipts.iter().filter(|r| !r.replayed).count(), 1);
    assert!(receipts
        .iter()
        .all(|r| r.work_order_id == receipts[0].work_order_id));
    let after = store.run(|tx| tx.find_schedule(schedule.id)).unwrap().unwrap();
    assert_eq!(after.times_completed, 1);
}
