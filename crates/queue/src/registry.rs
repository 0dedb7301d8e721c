//! Bounded-concurrency task registry.
//!
//! Tasks enter in WAIT and are drained by runner tasks, each holding
//! one slot of the [`ActivityGauge`]. A runner keeps claiming the
//! oldest WAIT task until none remain, so a freed slot is reused
//! without a scheduling round-trip. Status changes feed an event
//! channel and a periodic snapshot loop.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stowage_protocol::TransferError;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::events::RegistryEvent;
use crate::task::{TaskSnapshot, TaskStatus, TransferJob};

/// Default concurrent-task ceiling.
pub const DEFAULT_MAX_ACTIVITY: usize = 3;

const SNAPSHOT_TICK: Duration = Duration::from_millis(200);
/// Ticks between two snapshot broadcasts, unless one is forced.
const SNAPSHOT_DEBOUNCE: u32 = 10;

/// Counts running tasks against an adjustable ceiling.
pub struct ActivityGauge {
    state: Mutex<GaugeState>,
}

struct GaugeState {
    current: usize,
    max: usize,
}

impl ActivityGauge {
    pub fn new(max: usize) -> Self {
        Self {
            state: Mutex::new(GaugeState { current: 0, max }),
        }
    }

    /// Claims one slot, or returns `None` when the gauge is full.
    /// Dropping the permit releases the slot.
    pub fn try_acquire(self: &Arc<Self>) -> Option<ActivityPermit> {
        let mut state = self.state.lock().unwrap();
        if state.current >= state.max {
            return None;
        }
        state.current += 1;
        Some(ActivityPermit {
            gauge: Arc::clone(self),
        })
    }

    /// Raises or lowers the ceiling; running tasks are never evicted.
    /// Returns the number of slots the change freed.
    pub fn set_max(&self, max: usize) -> usize {
        let mut state = self.state.lock().unwrap();
        let freed = max.saturating_sub(state.max);
        state.max = max;
        freed
    }

    pub fn max(&self) -> usize {
        self.state.lock().unwrap().max
    }

    pub fn current(&self) -> usize {
        self.state.lock().unwrap().current
    }

    fn release(&self) {
        let mut state = self.state.lock().unwrap();
        // A release without a matching acquire means a permit was
        // duplicated somewhere; the accounting is unrecoverable.
        state.current = state.current.checked_sub(1).expect("broken task state");
    }
}

/// One claimed slot of an [`ActivityGauge`].
pub struct ActivityPermit {
    gauge: Arc<ActivityGauge>,
}

impl Drop for ActivityPermit {
    fn drop(&mut self) {
        self.gauge.release();
    }
}

/// Which tasks a bulk operation addresses.
#[derive(Debug, Clone)]
pub enum TaskSelector {
    All,
    Ids(Vec<u64>),
}

impl TaskSelector {
    fn matches(&self, id: u64) -> bool {
        match self {
            Self::All => true,
            Self::Ids(ids) => ids.contains(&id),
        }
    }
}

/// Which of the addressed tasks a delete actually removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteFilter {
    All,
    OnlyComplete,
    OnlyNotComplete,
}

struct TaskEntry {
    id: u64,
    job: Arc<dyn TransferJob>,
    status: Mutex<TaskStatus>,
    /// Set on every mutation, cleared when a snapshot reports it.
    dirty: AtomicBool,
    error: Mutex<Option<String>>,
}

struct Tasks {
    entries: BTreeMap<u64, Arc<TaskEntry>>,
    next_id: u64,
}

/// Registry of transfer tasks with a bounded number running at once.
pub struct TaskRegistry {
    tasks: Mutex<Tasks>,
    activity: Arc<ActivityGauge>,
    events_tx: mpsc::UnboundedSender<RegistryEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<RegistryEvent>>>,
    refresh: AtomicBool,
    force: AtomicBool,
    snapshot_stop: Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
}

impl TaskRegistry {
    pub fn new(max_activity: usize) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            tasks: Mutex::new(Tasks {
                entries: BTreeMap::new(),
                next_id: 1,
            }),
            activity: Arc::new(ActivityGauge::new(max_activity)),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            refresh: AtomicBool::new(false),
            force: AtomicBool::new(false),
            snapshot_stop: Mutex::new(None),
        })
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<RegistryEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    /// Adds a job in WAIT and kicks the scheduler. Returns the task id.
    pub fn register(self: &Arc<Self>, job: Arc<dyn TransferJob>) -> u64 {
        let id = {
            let mut tasks = self.tasks.lock().unwrap();
            let id = tasks.next_id;
            tasks.next_id += 1;
            tasks.entries.insert(
                id,
                Arc::new(TaskEntry {
                    id,
                    job,
                    status: Mutex::new(TaskStatus::Wait),
                    dirty: AtomicBool::new(true),
                    error: Mutex::new(None),
                }),
            );
            id
        };
        debug!(id, "task registered");
        let _ = self.events_tx.send(RegistryEvent::New { id });
        self.mark_refresh(false);
        self.schedule();
        id
    }

    /// Requests cancellation of the addressed tasks. A waiting task
    /// moves to PAUSE at once; a running one is stopped cooperatively
    /// and settles to PAUSE when its runner observes the cancellation.
    pub fn pause(&self, selector: TaskSelector) {
        for entry in self.selected(&selector) {
            let mut status = entry.status.lock().unwrap();
            match *status {
                TaskStatus::Wait => {
                    *status = TaskStatus::Pause;
                    entry.dirty.store(true, Ordering::SeqCst);
                }
                TaskStatus::Run => entry.job.stop(),
                _ => {}
            }
        }
        self.mark_refresh(true);
    }

    /// Re-queues addressed PAUSE and ERROR tasks.
    pub fn resume(self: &Arc<Self>, selector: TaskSelector) {
        for entry in self.selected(&selector) {
            let mut status = entry.status.lock().unwrap();
            if matches!(*status, TaskStatus::Pause | TaskStatus::Error) {
                *status = TaskStatus::Wait;
                entry.dirty.store(true, Ordering::SeqCst);
                *entry.error.lock().unwrap() = None;
                drop(status);
                self.schedule();
            }
        }
        self.mark_refresh(true);
    }

    /// Removes the addressed tasks that pass `filter`, stopping any
    /// that are still running.
    pub fn delete(&self, selector: TaskSelector, filter: DeleteFilter) {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.entries.retain(|id, entry| {
            if !selector.matches(*id) {
                return true;
            }
            let status = *entry.status.lock().unwrap();
            let remove = match filter {
                DeleteFilter::All => true,
                DeleteFilter::OnlyComplete => status == TaskStatus::Complete,
                DeleteFilter::OnlyNotComplete => status != TaskStatus::Complete,
            };
            if remove && status == TaskStatus::Run {
                entry.job.stop();
            }
            !remove
        });
        drop(tasks);
        self.mark_refresh(true);
    }

    /// Adjusts the concurrent-task ceiling, backfilling freed slots
    /// from the WAIT queue.
    pub fn set_max_activity(self: &Arc<Self>, max: usize) {
        let freed = self.activity.set_max(max);
        info!(max, freed, "activity ceiling changed");
        for _ in 0..freed {
            self.schedule();
        }
    }

    pub fn max_activity(&self) -> usize {
        self.activity.max()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().unwrap().entries.is_empty()
    }

    /// Current state of every task, in registration order. Reporting a
    /// task clears its dirty flag.
    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        let tasks = self.tasks.lock().unwrap();
        tasks
            .entries
            .values()
            .map(|entry| TaskSnapshot {
                id: entry.id,
                status: *entry.status.lock().unwrap(),
                dirty: entry.dirty.swap(false, Ordering::SeqCst),
                error: entry.error.lock().unwrap().clone(),
                summary: entry.job.summary(),
            })
            .collect()
    }

    /// Flags the snapshot loop to broadcast; `force` bypasses its
    /// debounce.
    pub fn force_refresh(&self) {
        self.mark_refresh(true);
    }

    /// Starts the periodic snapshot broadcast in a background task.
    /// Call [`stop_snapshots`](Self::stop_snapshots) to cancel.
    pub fn start_snapshots(self: &Arc<Self>) {
        let (tx, mut rx) = tokio::sync::oneshot::channel();
        {
            let mut stop = self.snapshot_stop.lock().unwrap();
            drop(stop.take());
            *stop = Some(tx);
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SNAPSHOT_TICK);
            let mut countdown = 0u32;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let force = this.force.swap(false, Ordering::SeqCst);
                        let pending = this.refresh.load(Ordering::SeqCst) || this.any_running();
                        if !force && !pending {
                            continue;
                        }
                        if !force && countdown > 0 {
                            countdown -= 1;
                            continue;
                        }
                        this.refresh.store(false, Ordering::SeqCst);
                        countdown = SNAPSHOT_DEBOUNCE;
                        let _ = this.events_tx.send(RegistryEvent::Refresh(this.snapshot()));
                    }
                    _ = &mut rx => break,
                }
            }
        });
    }

    /// Stops the periodic snapshot task.
    pub fn stop_snapshots(&self) {
        // Dropping the sender signals the task to exit.
        drop(self.snapshot_stop.lock().unwrap().take());
    }

    fn selected(&self, selector: &TaskSelector) -> Vec<Arc<TaskEntry>> {
        let tasks = self.tasks.lock().unwrap();
        tasks
            .entries
            .values()
            .filter(|entry| selector.matches(entry.id))
            .cloned()
            .collect()
    }

    fn mark_refresh(&self, force: bool) {
        self.refresh.store(true, Ordering::SeqCst);
        if force {
            self.force.store(true, Ordering::SeqCst);
        }
    }

    fn any_running(&self) -> bool {
        let tasks = self.tasks.lock().unwrap();
        tasks
            .entries
            .values()
            .any(|entry| *entry.status.lock().unwrap() == TaskStatus::Run)
    }

    fn schedule(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.drain().await;
        });
    }

    /// One runner: holds a slot and keeps claiming the oldest WAIT task
    /// until the queue is empty.
    async fn drain(&self) {
        let Some(permit) = self.activity.try_acquire() else {
            return;
        };
        while let Some(entry) = self.claim_next_wait() {
            debug!(id = entry.id, "task starting");
            let result = entry.job.start().await;
            self.settle(&entry, result);
        }
        drop(permit);
    }

    fn claim_next_wait(&self) -> Option<Arc<TaskEntry>> {
        let tasks = self.tasks.lock().unwrap();
        for entry in tasks.entries.values() {
            let mut status = entry.status.lock().unwrap();
            if *status == TaskStatus::Wait {
                *status = TaskStatus::Run;
                entry.dirty.store(true, Ordering::SeqCst);
                return Some(Arc::clone(entry));
            }
        }
        None
    }

    fn settle(&self, entry: &Arc<TaskEntry>, result: Result<(), TransferError>) {
        let (status, event) = match result {
            Ok(()) => {
                info!(id = entry.id, "task completed");
                (TaskStatus::Complete, RegistryEvent::Done { id: entry.id })
            }
            Err(err) if err.is_cancelled() => {
                debug!(id = entry.id, "task cancelled");
                (TaskStatus::Pause, RegistryEvent::Cancel { id: entry.id })
            }
            Err(err) => {
                let message = err.to_string();
                error!(id = entry.id, error = %message, "task failed");
                *entry.error.lock().unwrap() = Some(message.clone());
                (
                    TaskStatus::Error,
                    RegistryEvent::Error {
                        id: entry.id,
                        message,
                    },
                )
            }
        };
        *entry.status.lock().unwrap() = status;
        entry.dirty.store(true, Ordering::SeqCst);
        // A task deleted while running settles silently.
        let present = self
            .tasks
            .lock()
            .unwrap()
            .entries
            .contains_key(&entry.id);
        if present {
            let _ = self.events_tx.send(event);
        }
        self.mark_refresh(false);
    }
}
