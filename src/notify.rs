//! Outbound notifications.
//!
//! Business operations enqueue a [`Notification`] on an [`OutboundQueue`] and
//! move on. A dedicated worker thread drains the queue into a
//! [`NotificationDispatcher`]. Failures at either end are logged and counted,
//! never returned to the operation that produced the message.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use uuid::Uuid;

use crate::config::{InventoryConfig, NotificationConfig, UpkeepConfig};
use crate::error::NotificationError;
use crate::model::{InventoryPart, WorkOrder};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: Uuid,
    pub title: String,
    pub body: String,
    pub url: String,
    /// Collapses repeated messages about the same subject on the device.
    pub tag: String,
}

/// Delivers one message. Implementations may block.
pub trait NotificationDispatcher: Send + Sync + 'static {
    fn dispatch(&self, notification: &Notification) -> Result<(), NotificationError>;
}

/// Dispatcher that writes messages to the log. Used when no push backend is wired.
#[derive(Debug, Default)]
pub struct LogDispatcher;

impl NotificationDispatcher for LogDispatcher {
    fn dispatch(&self, notification: &Notification) -> Result<(), NotificationError> {
        log::info!(
            "notify {} [{}]: {}",
            notification.recipient,
            notification.tag,
            notification.title
        );
        Ok(())
    }
}

/// Dispatcher that keeps everything it was given.
#[derive(Debug, Default, Clone)]
pub struct RecordingDispatcher {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl NotificationDispatcher for RecordingDispatcher {
    fn dispatch(&self, notification: &Notification) -> Result<(), NotificationError> {
        self.sent
            .lock()
            .map_err(|_| NotificationError::Delivery("recorder poisoned".to_string()))?
            .push(notification.clone());
        Ok(())
    }
}

enum Job {
    Deliver(Notification),
    Flush(Sender<()>),
}

/// Bounded queue with a single delivery worker.
///
/// Cloning shares the same worker. The worker stops once every handle has
/// been dropped.
#[derive(Clone)]
pub struct OutboundQueue {
    tx: Option<Sender<Job>>,
    _worker: Arc<WorkerGuard>,
}

struct WorkerGuard(Mutex<Option<JoinHandle<()>>>);

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        // The sender side is already gone; the loop exits on disconnect.
        if let Ok(mut handle) = self.0.lock() {
            if let Some(handle) = handle.take() {
                let _ = handle.join();
            }
        }
    }
}

impl OutboundQueue {
    pub fn start(capacity: usize, dispatcher: impl NotificationDispatcher) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        let spawned = std::thread::Builder::new()
            .name("upkeep-notify".to_string())
            .spawn(move || run_delivery_loop(rx, dispatcher));
        let handle = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("failed to start notification worker: {e}");
                None
            }
        };
        let tx = handle.as_ref().map(|_| tx);
        Self {
            tx,
            _worker: Arc::new(WorkerGuard(Mutex::new(handle))),
        }
    }

    /// A queue that drops everything. Used when notifications are disabled.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            _worker: Arc::new(WorkerGuard(Mutex::new(None))),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue a message without waiting.
    ///
    /// Errors are logged and counted here; callers ignore the result unless
    /// they want to observe it.
    pub fn enqueue(&self, notification: Notification) -> Result<(), NotificationError> {
        let Some(tx) = &self.tx else {
            return Ok(());
        };
        let result = tx.try_send(Job::Deliver(notification)).map_err(|e| match e {
            TrySendError::Full(_) => NotificationError::QueueFull,
            TrySendError::Disconnected(_) => NotificationError::Disconnected,
        });
        if let Err(e) = &result {
            record_failure(e);
        }
        result
    }

    /// Block until everything queued before this call has been handed to the dispatcher.
    pub fn flush(&self) {
        let Some(tx) = &self.tx else {
            return;
        };
        let (done_tx, done_rx) = bounded(1);
        if tx.send(Job::Flush(done_tx)).is_ok() {
            let _ = done_rx.recv();
        }
    }
}

impl Drop for OutboundQueue {
    fn drop(&mut self) {
        // Release the sender before the last guard joins the worker.
        self.tx.take();
    }
}

/// Builds the messages business operations emit and queues them.
#[derive(Clone)]
pub struct Notifier {
    queue: OutboundQueue,
    links: NotificationConfig,
    low_stock_recipient: Option<Uuid>,
}

impl Notifier {
    pub fn new(
        queue: OutboundQueue,
        notifications: &NotificationConfig,
        inventory: &InventoryConfig,
    ) -> Self {
        let low_stock_recipient = inventory
            .low_stock_alerts
            .then_some(inventory.low_stock_recipient)
            .flatten();
        Self {
            queue,
            links: notifications.clone(),
            low_stock_recipient,
        }
    }

    /// Start a queue per `config.notifications` feeding `dispatcher`.
    pub fn from_config(config: &UpkeepConfig, dispatcher: impl NotificationDispatcher) -> Self {
        let queue = if config.notifications.enabled {
            OutboundQueue::start(config.notifications.queue_capacity, dispatcher)
        } else {
            OutboundQueue::disabled()
        };
        Self::new(queue, &config.notifications, &config.inventory)
    }

    pub fn disabled() -> Self {
        Self::new(
            OutboundQueue::disabled(),
            &NotificationConfig::default(),
            &InventoryConfig::default(),
        )
    }

    pub fn work_order_event(&self, work_order: &WorkOrder, recipient: Uuid, headline: &str) {
        let _ = self.queue.enqueue(Notification {
            recipient,
            title: headline.to_string(),
            body: work_order.title.clone(),
            url: self.links.work_order_url(work_order.id),
            tag: format!("work-order-{}", work_order.id),
        });
    }

    /// Alert the configured recipient if `part` is at or below its minimum.
    pub fn low_stock(&self, part: &InventoryPart) {
        let Some(recipient) = self.low_stock_recipient else {
            return;
        };
        if !part.is_low_stock() {
            return;
        }
        let _ = self.queue.enqueue(Notification {
            recipient,
            title: format!("Low stock: {}", part.name),
            body: format!(
                "{} {} left (minimum {})",
                part.quantity_in_stock, part.unit_of_measure, part.min_quantity
            ),
            url: self.links.part_url(part.id),
            tag: format!("low-stock-{}", part.id),
        });
    }

    pub fn flush(&self) {
        self.queue.flush();
    }
}

fn run_delivery_loop(rx: Receiver<Job>, dispatcher: impl NotificationDispatcher) {
    while let Ok(job) = rx.recv() {
        match job {
            Job::Deliver(notification) => {
                if let Err(e) = dispatcher.dispatch(&notification) {
                    record_failure(&e);
                }
            }
            Job::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    log::debug!("notification worker stopped");
}

fn record_failure(err: &NotificationError) {
    log::warn!("notification dropped: {err}");
    #[cfg(feature = "metrics")]
    crate::metrics::METRICS.record_notification_failure();
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingDispatcher;

    impl NotificationDispatcher for FailingDispatcher {
        fn dispatch(&self, _: &Notification) -> Result<(), NotificationError> {
            Err(NotificationError::Delivery("push gateway unreachable".to_string()))
        }
    }

    fn message(tag: &str) -> Notification {
        Notification {
            recipient: Uuid::new_v4(),
            title: "Work order assigned".to_string(),
            body: "Replace pump seal".to_string(),
            url: "/work-orders/1".to_string(),
            tag: tag.to_string(),
        }
    }

    #[test]
    fn test_messages_reach_dispatcher_in_order() {
        let recorder = RecordingDispatcher::new();
        let queue = OutboundQueue::start(8, recorder.clone());
        queue.enqueue(message("a")).unwrap();
        queue.enqueue(message("b")).unwrap();
        queue.flush();

        let tags: Vec<String> = recorder.sent().into_iter().map(|n| n.tag).collect();
        assert_eq!(tags, ["a", "b"]);
    }

    #[test]
    fn test_delivery_failure_is_swallowed() {
        let queue = OutboundQueue::start(4, FailingDispatcher);
        assert!(queue.enqueue(message("x")).is_ok());
        queue.flush();
    }

    #[test]
    fn test_low_stock_alert_only_when_enabled_and_low() {
        use chrono::Utc;
        use rust_decimal::Decimal;

        let recorder = RecordingDispatcher::new();
        let recipient = Uuid::new_v4();
        let notifier = Notifier::new(
            OutboundQueue::start(8, recorder.clone()),
            &NotificationConfig::default(),
            &InventoryConfig {
                low_stock_alerts: true,
                low_stock_recipient: Some(recipient),
            },
        );
        let healthy = InventoryPart::new("Fuse 10A", Decimal::new(20, 0), Decimal::ONE, Utc::now())
            .with_min_quantity(Decimal::new(5, 0));
        let low = InventoryPart::new("Fuse 16A", Decimal::new(5, 0), Decimal::ONE, Utc::now())
            .with_min_quantity(Decimal::new(5, 0));
        notifier.low_stock(&healthy);
        notifier.low_stock(&low);
        notifier.flush();

        let sent = recorder.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, recipient);
        assert!(sent[0].title.contains("Fuse 16A"));
        assert_eq!(sent[0].url, format!("/inventory/{}", low.id));
    }

    #[test]
    fn test_disabled_queue_accepts_and_drops() {
        let queue = OutboundQueue::disabled();
        assert!(!queue.is_enabled());
        assert!(queue.enqueue(message("x")).is_ok());
        queue.flush();
    }
}
