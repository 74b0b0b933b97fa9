//! # Dispatcher Context
//!
//! One dispatcher instance's shared state: the pending queue, the worker session
//! registry, the results list, the running flag and the reporter. Components
//! receive it as `Arc<DispatcherContext>`; independent instances share nothing.
//!
//! Lock order is queue → registry and results → registry; the registry is never
//! held while acquiring another lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use super::pending_queue::PendingQueue;
use super::registry::WorkerRegistry;
use crate::config::DispatcherConfig;
use crate::models::{Task, TaskDescriptor, TaskResult};
use crate::reporting::StatusReporter;

/// What happened to a session's task when the session failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reassignment {
    /// Back at the front of the pending queue
    Requeued(Task),
    /// Delivery attempts exhausted; an error-marker result was recorded
    Abandoned(TaskResult),
    /// The session held no task
    NothingAssigned,
}

#[derive(Debug)]
pub struct DispatcherContext {
    id: Uuid,
    config: DispatcherConfig,
    pending: PendingQueue,
    registry: WorkerRegistry,
    results: Mutex<Vec<TaskResult>>,
    /// Failed deliveries per task sequence
    failures: Mutex<HashMap<u64, u32>>,
    running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    reporter: StatusReporter,
}

impl DispatcherContext {
    pub fn new(config: DispatcherConfig, reporter: StatusReporter) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            config,
            pending: PendingQueue::new(),
            registry: WorkerRegistry::new(),
            results: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            running: AtomicBool::new(true),
            shutdown_tx,
            reporter,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn pending(&self) -> &PendingQueue {
        &self.pending
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn reporter(&self) -> &StatusReporter {
        &self.reporter
    }

    /// Admit a new task at the tail of the pending queue
    pub fn enqueue(&self, descriptor: TaskDescriptor) -> Task {
        self.pending.enqueue(descriptor)
    }

    /// Register a worker connection and return its session token. A task held by
    /// a session this one replaces goes back to the front of the pending queue.
    pub fn register_session(&self, worker_id: &str) -> Uuid {
        let mut token = Uuid::nil();
        let displaced = self.pending.push_front_from(|| {
            let (registered, displaced) = self.registry.register(worker_id);
            token = registered;
            displaced
        });

        if let Some(task) = displaced {
            warn!(
                worker_id = %worker_id,
                task = %task,
                "Requeued task held by a replaced worker session"
            );
        }
        token
    }

    /// Pop the next pending task and record it as the session's assignment. The
    /// task stays queued if the session is no longer registered.
    pub fn claim_next_task(&self, worker_id: &str, token: Uuid) -> Option<Task> {
        self.pending
            .pop_front_and(|task| self.registry.assign(worker_id, token, task))
    }

    /// Record a successful result for the session's assignment
    pub fn complete_task(
        &self,
        worker_id: &str,
        token: Uuid,
        result_reference: &str,
    ) -> Option<TaskResult> {
        let mut results = self.results.lock();
        let Some(task) = self.registry.take_assignment(worker_id, token) else {
            warn!(worker_id = %worker_id, "Result received without an assigned task");
            return None;
        };

        let result = TaskResult::completed(&task, worker_id, result_reference);
        results.push(result.clone());
        drop(results);

        self.failures.lock().remove(&task.sequence());
        Some(result)
    }

    /// Return the session's assignment to the front of the pending queue, or
    /// record it as failed once it has used up its delivery attempts.
    pub fn reassign_task(&self, worker_id: &str, token: Uuid) -> Reassignment {
        let max_attempts = self.config.max_delivery_attempts;
        let mut abandoned: Option<Task> = None;

        let requeued = self.pending.push_front_from(|| {
            let task = self.registry.take_assignment(worker_id, token)?;
            if max_attempts > 0 {
                let mut failures = self.failures.lock();
                let count = failures.entry(task.sequence()).or_insert(0);
                *count += 1;
                if *count >= max_attempts {
                    failures.remove(&task.sequence());
                    abandoned = Some(task);
                    return None;
                }
            }
            Some(task)
        });

        if let Some(task) = requeued {
            return Reassignment::Requeued(task);
        }

        match abandoned {
            Some(task) => {
                let result = TaskResult::failed(&task, worker_id);
                self.results.lock().push(result.clone());
                warn!(
                    worker_id = %worker_id,
                    task = %task,
                    max_attempts,
                    "Task abandoned after exhausting delivery attempts"
                );
                Reassignment::Abandoned(result)
            }
            None => Reassignment::NothingAssigned,
        }
    }

    pub fn results(&self) -> Vec<TaskResult> {
        self.results.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Flip the running flag and wake every loop waiting on shutdown. Returns
    /// `false` if shutdown had already begun.
    pub fn begin_shutdown(&self) -> bool {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        info!(dispatcher_id = %self.id, "Dispatcher shutdown requested");
        self.shutdown_tx.send_replace(true);
        true
    }

    /// Receiver that observes `true` once shutdown has begun
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Operation;

    fn context(max_delivery_attempts: u32) -> DispatcherContext {
        DispatcherContext::new(
            DispatcherConfig {
                max_delivery_attempts,
                ..DispatcherConfig::default()
            },
            StatusReporter::noop(),
        )
    }

    fn descriptor(file: &str) -> TaskDescriptor {
        TaskDescriptor::new(file, Operation::CannyEdgeDetector, format!("https://x/{file}"), None)
            .unwrap()
    }

    /// Number of places an outstanding task currently lives
    fn owners(ctx: &DispatcherContext, task: &Task) -> usize {
        let in_queue = ctx.pending().snapshot().iter().filter(|t| *t == task).count();
        let in_sessions = ctx
            .registry()
            .active_sessions()
            .iter()
            .filter(|s| s.assigned_task.as_ref() == Some(task))
            .count();
        in_queue + in_sessions
    }

    #[test]
    fn test_claim_and_complete_keeps_single_owner() {
        let ctx = context(0);
        let token = ctx.register_session("w:1");
        let task = ctx.enqueue(descriptor("a.jpg"));
        assert_eq!(owners(&ctx, &task), 1);

        let claimed = ctx.claim_next_task("w:1", token).unwrap();
        assert_eq!(claimed, task);
        assert_eq!(owners(&ctx, &task), 1);
        assert!(ctx.pending().is_empty());

        let result = ctx.complete_task("w:1", token, "https://x/out.jpg").unwrap();
        assert_eq!(result.result_reference(), Some("https://x/out.jpg"));
        assert_eq!(owners(&ctx, &task), 0);
        assert_eq!(ctx.results(), vec![result]);
    }

    #[test]
    fn test_complete_without_assignment_records_nothing() {
        let ctx = context(0);
        let token = ctx.register_session("w:1");
        assert!(ctx.complete_task("w:1", token, "https://x/out.jpg").is_none());
        assert!(ctx.results().is_empty());
    }

    #[test]
    fn test_reassign_puts_task_in_front() {
        let ctx = context(0);
        let token = ctx.register_session("w:1");
        let a = ctx.enqueue(descriptor("a.jpg"));
        let b = ctx.enqueue(descriptor("b.jpg"));

        ctx.claim_next_task("w:1", token).unwrap();
        assert_eq!(ctx.reassign_task("w:1", token), Reassignment::Requeued(a.clone()));
        assert_eq!(owners(&ctx, &a), 1);
        assert_eq!(ctx.pending().snapshot(), vec![a, b]);

        assert_eq!(ctx.reassign_task("w:1", token), Reassignment::NothingAssigned);
    }

    #[test]
    fn test_unlimited_attempts_always_requeue() {
        let ctx = context(0);
        let token = ctx.register_session("w:1");
        ctx.enqueue(descriptor("a.jpg"));
        for _ in 0..10 {
            ctx.claim_next_task("w:1", token).unwrap();
            assert!(matches!(ctx.reassign_task("w:1", token), Reassignment::Requeued(_)));
        }
        assert!(ctx.results().is_empty());
    }

    #[test]
    fn test_task_abandoned_after_max_attempts() {
        let ctx = context(2);
        let token = ctx.register_session("w:1");
        let task = ctx.enqueue(descriptor("a.jpg"));

        ctx.claim_next_task("w:1", token).unwrap();
        assert_eq!(ctx.reassign_task("w:1", token), Reassignment::Requeued(task.clone()));

        ctx.claim_next_task("w:1", token).unwrap();
        let Reassignment::Abandoned(result) = ctx.reassign_task("w:1", token) else {
            panic!("expected the task to be abandoned");
        };
        assert!(!result.is_completed());
        assert_eq!(owners(&ctx, &task), 0);
        assert!(ctx.pending().is_empty());
        assert_eq!(ctx.results(), vec![result]);
    }

    #[test]
    fn test_replaced_session_keeps_every_task_owned() {
        let ctx = context(0);
        let old = ctx.register_session("10.0.0.9:4000");
        let first = ctx.enqueue(descriptor("a.jpg"));
        ctx.claim_next_task("10.0.0.9:4000", old).unwrap();

        // Same peer address registers again while the old session still holds a task
        let new = ctx.register_session("10.0.0.9:4000");
        assert_eq!(ctx.pending().snapshot(), vec![first.clone()]);
        assert_eq!(owners(&ctx, &first), 1);

        // The old session's teardown neither finds a task nor removes the new record
        assert_eq!(ctx.reassign_task("10.0.0.9:4000", old), Reassignment::NothingAssigned);
        assert!(ctx.registry().unregister("10.0.0.9:4000", old).is_none());
        assert!(ctx.claim_next_task("10.0.0.9:4000", old).is_none());
        assert_eq!(ctx.pending().len(), 1);

        // The new session's failure puts its task back in the queue
        let second = ctx.enqueue(descriptor("b.jpg"));
        assert_eq!(ctx.claim_next_task("10.0.0.9:4000", new), Some(first.clone()));
        assert_eq!(
            ctx.reassign_task("10.0.0.9:4000", new),
            Reassignment::Requeued(first.clone())
        );
        assert_eq!(ctx.pending().snapshot(), vec![first, second]);
    }

    #[tokio::test]
    async fn test_begin_shutdown_is_idempotent_and_signals() {
        let ctx = context(0);
        let mut signal = ctx.shutdown_signal();
        assert!(ctx.is_running());
        assert!(!*signal.borrow());

        assert!(ctx.begin_shutdown());
        assert!(!ctx.begin_shutdown());
        assert!(!ctx.is_running());

        signal.wait_for(|stopped| *stopped).await.unwrap();
        // Late subscribers observe the flag too
        assert!(*ctx.shutdown_signal().borrow());
    }
}
