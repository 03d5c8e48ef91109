//! Continuous sync via filesystem notifications.
//!
//! [`WatchService`] owns a debounced watcher over the repository root and a
//! consumer task that drains a bounded change queue into sync passes. The
//! queue coalesces per path (a path already queued is not queued twice) and
//! drops its oldest entry under backpressure, which is safe because a sync
//! pass reconciles the whole tree regardless of which change woke it.
//!
//! ## Threading Model
//!
//! 1. **Debouncer thread** (from `notify-debouncer-full`): batches rapid
//!    file events (2s window), filters dot-entries and non-document files,
//!    pushes surviving paths into the change queue and rings the notifier.
//! 2. **Sync task** (tokio): waits on the notifier, drains the queue, runs
//!    one sync pass, reports via the event channel.
//!
//! A paused flag lets embedders silence the debouncer while they write
//! files themselves (the knowledge CRUD service does this to avoid syncing
//! its own writes twice).

use crate::{error::MnemeError, sync::{SyncReport, SyncService}};
use notify_debouncer_full::{
    new_debouncer,
    notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher},
    DebounceEventResult, Debouncer, FileIdMap,
};
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::Notify, task::JoinHandle};

/// Default debounce window, matching bursts from editors and git checkouts.
const DEBOUNCE_WINDOW: Duration = Duration::from_secs(2);

/// Default change-queue capacity before drop-oldest kicks in.
const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Bounded, per-path-coalescing queue of changed paths.
#[derive(Debug)]
pub(crate) struct ChangeQueue {
    paths: VecDeque<PathBuf>,
    capacity: usize,
}

impl ChangeQueue {
    fn new(capacity: usize) -> Self {
        ChangeQueue {
            paths: VecDeque::new(),
            capacity,
        }
    }

    /// Push a path, coalescing duplicates and dropping the oldest entry when
    /// full.
    fn push(&mut self, path: PathBuf) {
        if self.paths.contains(&path) {
            return;
        }
        if self.paths.len() >= self.capacity {
            if let Some(dropped) = self.paths.pop_front() {
                tracing::warn!("[ChangeQueue] backpressure, dropping oldest: {:?}", dropped);
            }
        }
        self.paths.push_back(path);
    }

    fn drain(&mut self) -> Vec<PathBuf> {
        self.paths.drain(..).collect()
    }

    fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Events emitted to the embedding application after each triggered pass.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Synced(SyncReport),
    Failed(String),
}

pub struct WatchService {
    debouncer: Debouncer<RecommendedWatcher, FileIdMap>,
    root: PathBuf,
    sync_handle: JoinHandle<()>,
    pub paused: Arc<AtomicBool>,
    queue: Arc<Mutex<ChangeQueue>>,
    work_notifier: Arc<Notify>,
}

impl WatchService {
    /// Start watching the sync service's repository root. Runs an initial
    /// full pass immediately.
    pub fn start(
        sync: Arc<SyncService>,
        event_tx: tokio::sync::mpsc::UnboundedSender<WatchEvent>,
    ) -> Result<Self, MnemeError> {
        let root = sync.config().home.clone();
        let queue = Arc::new(Mutex::new(ChangeQueue::new(DEFAULT_QUEUE_CAPACITY)));
        let work_notifier = Arc::new(Notify::new());
        let paused = Arc::new(AtomicBool::new(false));

        let debouncer_queue = queue.clone();
        let debouncer_notifier = work_notifier.clone();
        let debouncer_paused = paused.clone();
        let debouncer_root = root.clone();
        let mut debouncer = new_debouncer(
            DEBOUNCE_WINDOW,
            None,
            move |result: DebounceEventResult| {
                if debouncer_paused.load(Ordering::Relaxed) {
                    tracing::debug!("[Debouncer] Paused, ignoring events");
                    return;
                }
                match result {
                    Ok(events) => {
                        let mut enqueued = 0usize;
                        for event in events.iter() {
                            if !matches!(
                                event.event.kind,
                                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                            ) {
                                continue;
                            }
                            for path in event.paths.iter().filter(|p| watchable(p, &debouncer_root)) {
                                debouncer_queue.lock().push(path.clone());
                                enqueued += 1;
                            }
                        }
                        if enqueued > 0 {
                            tracing::debug!("[Debouncer] {} paths enqueued", enqueued);
                            debouncer_notifier.notify_one();
                        }
                    }
                    Err(errors) => {
                        tracing::error!("Notify debouncer returned errors: {:?}", errors);
                    }
                }
            },
        )?;
        debouncer.watcher().watch(&root, RecursiveMode::Recursive)?;

        let sync_queue = queue.clone();
        let sync_notifier = work_notifier.clone();
        let sync_handle = tokio::spawn(async move {
            tracing::info!("[WatchService] Starting sync task");
            loop {
                // Drain the queue before sleeping; the pass itself is a full
                // reconcile, the queue only tells us one is due.
                let due = {
                    let mut q = sync_queue.lock();
                    if q.is_empty() {
                        false
                    } else {
                        let drained = q.drain();
                        tracing::info!("[WatchService] {} changed paths, running pass", drained.len());
                        true
                    }
                };
                if due {
                    match sync.sync().await {
                        Ok(report) => {
                            let _ = event_tx.send(WatchEvent::Synced(report));
                        }
                        Err(e) => {
                            tracing::warn!("[WatchService] sync pass failed: {}", e);
                            let _ = event_tx.send(WatchEvent::Failed(e.to_string()));
                        }
                    }
                } else {
                    sync_notifier.notified().await;
                }
            }
        });

        // The initial reconcile.
        queue.lock().push(root.clone());
        work_notifier.notify_one();

        Ok(WatchService {
            debouncer,
            root,
            sync_handle,
            paused,
            queue,
            work_notifier,
        })
    }

    /// Nudge the consumer, e.g. after an external write with the debouncer
    /// paused.
    pub fn trigger(&self) {
        self.queue.lock().push(self.root.clone());
        self.work_notifier.notify_one();
    }

    pub fn stop(mut self) {
        let unwatch_res = self.debouncer.watcher().unwatch(&self.root);
        tracing::debug!("Unwatch_res(path: {:?}) = {:?}", self.root, unwatch_res);
        self.sync_handle.abort();
    }
}

/// A path the watcher cares about: inside the root, not a dot-entry at any
/// level, and not the internal data directory.
fn watchable(path: &PathBuf, root: &PathBuf) -> bool {
    let Ok(rel) = path.strip_prefix(root) else {
        return false;
    };
    !rel.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(true)
    })
}
