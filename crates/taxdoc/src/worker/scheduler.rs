use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error};
use tokio::sync::{watch, Semaphore};

use crate::error::TaxdocError;
use crate::pipeline::PassOutcome;

type OutcomeReceiver = watch::Receiver<Option<PassOutcome>>;

struct ActiveTask {
    generation: u64,
    outcome: OutcomeReceiver,
}

type ActiveMap = Arc<Mutex<HashMap<String, ActiveTask>>>;

fn lock(active: &ActiveMap) -> MutexGuard<'_, HashMap<String, ActiveTask>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Runs processing passes in the background, at most one per document and
/// at most `worker_count` at a time.
#[derive(Clone)]
pub struct TaskScheduler {
    active: ActiveMap,
    permits: Arc<Semaphore>,
    generations: Arc<AtomicU64>,
}

impl TaskScheduler {
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn new(worker_count: usize) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        Self {
            active: Arc::new(Mutex::new(HashMap::new())),
            permits: Arc::new(Semaphore::new(worker_count)),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Claims the single processing slot for `document_id`.
    ///
    /// The claim is released when the returned reservation is dropped
    /// unspawned, or when the spawned pass finishes.
    pub fn reserve(&self, document_id: &str) -> Result<Reservation, TaxdocError> {
        let mut active = lock(&self.active);
        if active.contains_key(document_id) {
            return Err(TaxdocError::Conflict(document_id.to_string()));
        }

        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = watch::channel(None);
        active.insert(
            document_id.to_string(),
            ActiveTask {
                generation,
                outcome: receiver.clone(),
            },
        );

        Ok(Reservation {
            slot: SlotGuard {
                active: Arc::clone(&self.active),
                document_id: document_id.to_string(),
                generation,
            },
            permits: Arc::clone(&self.permits),
            sender,
            receiver,
        })
    }

    pub fn is_active(&self, document_id: &str) -> bool {
        lock(&self.active).contains_key(document_id)
    }

    pub fn active_count(&self) -> usize {
        lock(&self.active).len()
    }

    /// Waits for the pass currently running for `document_id`, if any.
    pub async fn wait(&self, document_id: &str) -> Option<PassOutcome> {
        let receiver = lock(&self.active)
            .get(document_id)
            .map(|task| task.outcome.clone())?;
        Some(await_outcome(receiver).await)
    }

    /// Waits for every pass running at the time of the call.
    pub async fn wait_all(&self) {
        let receivers: Vec<OutcomeReceiver> = lock(&self.active)
            .values()
            .map(|task| task.outcome.clone())
            .collect();
        for receiver in receivers {
            await_outcome(receiver).await;
        }
    }
}

/// Removes a document's entry from the active map, once.
struct SlotGuard {
    active: ActiveMap,
    document_id: String,
    generation: u64,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut active = lock(&self.active);
        if active
            .get(&self.document_id)
            .is_some_and(|task| task.generation == self.generation)
        {
            active.remove(&self.document_id);
        }
    }
}

/// An exclusive claim on a document's processing slot.
pub struct Reservation {
    slot: SlotGuard,
    permits: Arc<Semaphore>,
    sender: watch::Sender<Option<PassOutcome>>,
    receiver: OutcomeReceiver,
}

impl Reservation {
    pub fn document_id(&self) -> &str {
        &self.slot.document_id
    }

    /// Starts the pass. It waits for a free worker before running.
    pub fn spawn<F>(self, pass: F) -> TaskHandle
    where
        F: Future<Output = PassOutcome> + Send + 'static,
    {
        let Reservation {
            slot,
            permits,
            sender,
            receiver,
        } = self;
        let document_id = slot.document_id.clone();

        tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            debug!("Worker picked up document {}", slot.document_id);

            let outcome = pass.await;

            // The slot must be free by the time any waiter wakes.
            drop(slot);
            sender.send_replace(Some(outcome));
        });

        TaskHandle {
            document_id,
            outcome: receiver,
        }
    }
}

/// Resolves to the outcome of one spawned pass.
pub struct TaskHandle {
    document_id: String,
    outcome: OutcomeReceiver,
}

impl TaskHandle {
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub async fn wait(self) -> PassOutcome {
        await_outcome(self.outcome).await
    }
}

async fn await_outcome(mut receiver: OutcomeReceiver) -> PassOutcome {
    match receiver.wait_for(Option::is_some).await {
        Ok(outcome) => outcome.clone().unwrap_or_else(aborted),
        Err(_) => {
            error!("Processing task ended without an outcome");
            aborted()
        }
    }
}

fn aborted() -> PassOutcome {
    PassOutcome::Unrecorded {
        error: "processing task aborted".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn completed() -> PassOutcome {
        PassOutcome::Completed {
            field_count: 1,
            degraded: false,
        }
    }

    #[tokio::test]
    async fn test_second_reservation_conflicts() {
        let scheduler = TaskScheduler::new(2);
        let first = scheduler.reserve("doc-1").unwrap();

        assert!(matches!(
            scheduler.reserve("doc-1"),
            Err(TaxdocError::Conflict(id)) if id == "doc-1"
        ));
        assert!(scheduler.reserve("doc-2").is_ok());

        drop(first);
        assert!(!scheduler.is_active("doc-1"));
        assert!(scheduler.reserve("doc-1").is_ok());
    }

    #[tokio::test]
    async fn test_spawn_and_wait() {
        let scheduler = TaskScheduler::new(1);
        let handle = scheduler
            .reserve("doc-1")
            .unwrap()
            .spawn(async { completed() });

        assert_eq!(handle.document_id(), "doc-1");
        assert_eq!(handle.wait().await, completed());
        assert!(!scheduler.is_active("doc-1"));
        assert!(scheduler.reserve("doc-1").is_ok());
    }

    #[tokio::test]
    async fn test_wait_by_id() {
        let scheduler = TaskScheduler::new(1);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let _handle = scheduler.reserve("doc-1").unwrap().spawn(async move {
            let _ = rx.await;
            completed()
        });

        assert!(scheduler.is_active("doc-1"));
        assert_eq!(scheduler.active_count(), 1);
        tx.send(()).unwrap();

        assert_eq!(scheduler.wait("doc-1").await, Some(completed()));
        assert_eq!(scheduler.wait("doc-1").await, None);
    }

    #[tokio::test]
    async fn test_worker_count_bounds_concurrency() {
        let scheduler = TaskScheduler::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<TaskHandle> = (0..6)
            .map(|i| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                scheduler
                    .reserve(&format!("doc-{}", i))
                    .unwrap()
                    .spawn(async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        completed()
                    })
            })
            .collect();

        for handle in handles {
            assert!(handle.wait().await.is_completed());
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(scheduler.active_count(), 0);
    }

    #[tokio::test]
    async fn test_panicking_pass_releases_slot() {
        let scheduler = TaskScheduler::new(1);
        let handle = scheduler
            .reserve("doc-1")
            .unwrap()
            .spawn(async {
                if true {
                    panic!("pass blew up");
                }
                completed()
            });

        assert!(matches!(handle.wait().await, PassOutcome::Unrecorded { .. }));
        assert!(!scheduler.is_active("doc-1"));
    }

    #[tokio::test]
    async fn test_wait_all() {
        let scheduler = TaskScheduler::new(4);
        for i in 0..3 {
            scheduler
                .reserve(&format!("doc-{}", i))
                .unwrap()
                .spawn(async {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    completed()
                });
        }

        scheduler.wait_all().await;
        assert_eq!(scheduler.active_count(), 0);
    }
}
