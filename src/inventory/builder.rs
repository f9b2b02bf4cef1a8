//! Concurrent inventory builder.
//!
//! A fixed pool of worker threads drains one work queue. Each node task lists
//! its immediate children, enqueues child nodes, filters leaves through the
//! ignore predicate and enqueues one lookup task per surviving leaf. Lookup
//! results are merged into a [`SharedSnapshot`].
//!
//! Completion is tracked by a [`CountingBarrier`]: it is incremented before
//! every enqueue and decremented when that task finishes, so the build only
//! returns once all transitively spawned work is done. Workers are then told
//! to shut down and the snapshot moves out to the caller.
//!
//! Failures never abort the build. A failed listing skips that subtree and a
//! failed lookup drops that leaf; both are recorded and mark the report partial.

#![allow(missing_docs)]

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel as channel;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::core::errors::NbrError;
use crate::inventory::ignore::IgnorePredicate;
use crate::inventory::progress::{Progress, ProgressObserver, ProgressTracker};
use crate::inventory::provider::{Child, NamespaceProvider};
use crate::inventory::snapshot::{AttributeSnapshot, SharedSnapshot};

pub const DEFAULT_CONCURRENCY: usize = 16;
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// Builder knobs derived from the `[inventory]` config section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    /// Admission gate capacity: the number of tasks that may execute at once.
    pub concurrency: usize,
    /// Tasks not admitted before this much time has elapsed are refused.
    pub deadline: Option<Duration>,
    /// Nodes deeper than this are not listed (guards against symlink cycles).
    pub max_depth: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            deadline: None,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

// ──────────────────── counting barrier ────────────────────

/// Tracks outstanding dynamically spawned work until it drains to zero.
#[derive(Debug, Default)]
pub struct CountingBarrier {
    outstanding: Mutex<usize>,
    drained: Condvar,
}

impl CountingBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one unit of work. Must happen before the work is made visible.
    pub fn add(&self) {
        *self.outstanding.lock() += 1;
    }

    /// Mark one unit of work finished.
    pub fn done(&self) {
        let mut outstanding = self.outstanding.lock();
        *outstanding = outstanding.saturating_sub(1);
        if *outstanding == 0 {
            self.drained.notify_all();
        }
    }

    pub fn outstanding(&self) -> usize {
        *self.outstanding.lock()
    }

    /// Block until the outstanding count reaches zero.
    pub fn wait(&self) {
        let mut outstanding = self.outstanding.lock();
        while *outstanding > 0 {
            self.drained.wait(&mut outstanding);
        }
    }
}

/// Calls [`CountingBarrier::done`] on drop, including during unwinding.
struct TaskGuard<'a>(&'a CountingBarrier);

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        self.0.done();
    }
}

// ──────────────────── admission gate ────────────────────

/// Refusal point for queued tasks once the deadline passes or a stop is requested.
///
/// Capacity is enforced by the worker pool size; the gate decides whether a
/// dequeued task may run at all.
#[derive(Debug)]
pub struct AdmissionGate {
    deadline: Option<Instant>,
    stop: Option<Arc<AtomicBool>>,
    refused: AtomicU64,
}

impl AdmissionGate {
    pub fn new(deadline: Option<Instant>, stop: Option<Arc<AtomicBool>>) -> Self {
        Self {
            deadline,
            stop,
            refused: AtomicU64::new(0),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
            || self.deadline.is_some_and(|at| Instant::now() >= at)
    }

    /// Returns `false` (and counts the refusal) when the gate is closed.
    pub fn admit(&self) -> bool {
        if self.is_closed() {
            self.refused.fetch_add(1, Ordering::Relaxed);
            false
        } else {
            true
        }
    }

    pub fn refused(&self) -> u64 {
        self.refused.load(Ordering::Relaxed)
    }
}

// ──────────────────── report ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// Listing a node failed; its subtree is missing from the snapshot.
    Listing,
    /// Attribute lookup for one leaf failed.
    Lookup,
    /// Node exceeded the configured depth limit.
    Depth,
}

/// One absorbed failure, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildFailure {
    pub stage: FailureStage,
    pub key: String,
    pub code: &'static str,
    pub message: String,
}

/// Result of one build call.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub snapshot: AttributeSnapshot,
    pub progress: Progress,
    pub skipped_nodes: u64,
    pub failed_lookups: u64,
    pub ignored: u64,
    pub refused: u64,
    /// Leaves whose key had already been inserted (last write wins).
    pub duplicates: u64,
    pub failures: Vec<BuildFailure>,
    pub elapsed: Duration,
}

impl BuildReport {
    /// True when some part of the namespace is not reflected in the snapshot.
    pub fn is_partial(&self) -> bool {
        self.skipped_nodes > 0 || self.failed_lookups > 0 || self.refused > 0
    }

    pub fn summary(&self) -> BuildSummary {
        BuildSummary {
            entries: self.snapshot.len() as u64,
            total_bytes: self.snapshot.total_bytes(),
            processed: self.progress.processed,
            total: self.progress.total,
            skipped_nodes: self.skipped_nodes,
            failed_lookups: self.failed_lookups,
            ignored: self.ignored,
            refused: self.refused,
            duplicates: self.duplicates,
            partial: self.is_partial(),
            elapsed_ms: u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Counters of a [`BuildReport`] without the snapshot, for logs and JSON output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BuildSummary {
    pub entries: u64,
    pub total_bytes: u64,
    pub processed: u64,
    pub total: u64,
    pub skipped_nodes: u64,
    pub failed_lookups: u64,
    pub ignored: u64,
    pub refused: u64,
    pub duplicates: u64,
    pub partial: bool,
    pub elapsed_ms: u64,
}

// ──────────────────── builder ────────────────────

enum WorkItem {
    Node { key: String, depth: usize },
    Leaf(String),
    Shutdown,
}

/// Aggregates shared by every worker during one build.
struct BuildState {
    snapshot: SharedSnapshot,
    progress: ProgressTracker,
    barrier: CountingBarrier,
    gate: AdmissionGate,
    skipped_nodes: AtomicU64,
    failed_lookups: AtomicU64,
    ignored: AtomicU64,
    duplicates: AtomicU64,
    failures: Mutex<Vec<BuildFailure>>,
}

impl BuildState {
    fn record_failure(&self, stage: FailureStage, key: &str, err: &NbrError) {
        self.failures.lock().push(BuildFailure {
            stage,
            key: key.to_string(),
            code: err.code(),
            message: err.to_string(),
        });
    }
}

/// Parallel crawler producing one [`AttributeSnapshot`] per call to [`build`](Self::build).
pub struct InventoryBuilder<'a> {
    provider: &'a dyn NamespaceProvider,
    ignore: &'a dyn IgnorePredicate,
    config: BuildConfig,
    observer: Option<ProgressObserver>,
    stop: Option<Arc<AtomicBool>>,
}

impl<'a> InventoryBuilder<'a> {
    pub fn new(
        provider: &'a dyn NamespaceProvider,
        ignore: &'a dyn IgnorePredicate,
        config: BuildConfig,
    ) -> Self {
        Self {
            provider,
            ignore,
            config,
            observer: None,
            stop: None,
        }
    }

    /// Observe every progress change. Called with the progress lock held.
    #[must_use]
    pub fn with_progress<F>(mut self, observer: F) -> Self
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Once `flag` is set, no further tasks are admitted.
    #[must_use]
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop = Some(flag);
        self
    }

    /// Crawl the provider from its root. Never fails; check
    /// [`BuildReport::is_partial`].
    pub fn build(&self) -> BuildReport {
        let started = Instant::now();
        let workers = self.config.concurrency.max(1);

        let state = BuildState {
            snapshot: SharedSnapshot::new(),
            progress: ProgressTracker::new(self.observer.clone()),
            barrier: CountingBarrier::new(),
            gate: AdmissionGate::new(
                self.config.deadline.map(|limit| started + limit),
                self.stop.clone(),
            ),
            skipped_nodes: AtomicU64::new(0),
            failed_lookups: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            failures: Mutex::new(Vec::new()),
        };

        let (work_tx, work_rx) = channel::unbounded::<WorkItem>();

        thread::scope(|scope| {
            for _ in 0..workers {
                let work_rx = work_rx.clone();
                let work_tx = work_tx.clone();
                let state = &state;
                scope.spawn(move || self.worker_loop(state, &work_rx, &work_tx));
            }

            enqueue(
                &state.barrier,
                &work_tx,
                WorkItem::Node {
                    key: String::new(),
                    depth: 0,
                },
            );
            state.barrier.wait();

            for _ in 0..workers {
                let _ = work_tx.send(WorkItem::Shutdown);
            }
        });

        let BuildState {
            snapshot,
            progress,
            gate,
            skipped_nodes,
            failed_lookups,
            ignored,
            duplicates,
            failures,
            ..
        } = state;

        BuildReport {
            snapshot: snapshot.finish(),
            progress: progress.snapshot(),
            skipped_nodes: skipped_nodes.into_inner(),
            failed_lookups: failed_lookups.into_inner(),
            ignored: ignored.into_inner(),
            refused: gate.refused(),
            duplicates: duplicates.into_inner(),
            failures: failures.into_inner(),
            elapsed: started.elapsed(),
        }
    }

    fn worker_loop(
        &self,
        state: &BuildState,
        work_rx: &channel::Receiver<WorkItem>,
        work_tx: &channel::Sender<WorkItem>,
    ) {
        while let Ok(item) = work_rx.recv() {
            if matches!(item, WorkItem::Shutdown) {
                return;
            }
            let _guard = TaskGuard(&state.barrier);
            if !state.gate.admit() {
                continue;
            }

            let (key, stage) = match &item {
                WorkItem::Node { key, .. } => (key.clone(), FailureStage::Listing),
                WorkItem::Leaf(key) => (key.clone(), FailureStage::Lookup),
                WorkItem::Shutdown => continue,
            };
            let outcome = catch_unwind(AssertUnwindSafe(|| match item {
                WorkItem::Node { key, depth } => self.run_node(state, work_tx, &key, depth),
                WorkItem::Leaf(key) => self.run_leaf(state, key),
                WorkItem::Shutdown => {}
            }));
            if outcome.is_err() {
                let counter = match stage {
                    FailureStage::Lookup => &state.failed_lookups,
                    FailureStage::Listing | FailureStage::Depth => &state.skipped_nodes,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                state.record_failure(
                    stage,
                    &key,
                    &NbrError::Runtime {
                        details: "provider panicked".to_string(),
                    },
                );
            }
        }
    }

    fn run_node(
        &self,
        state: &BuildState,
        work_tx: &channel::Sender<WorkItem>,
        key: &str,
        depth: usize,
    ) {
        if depth > self.config.max_depth {
            state.skipped_nodes.fetch_add(1, Ordering::Relaxed);
            state.record_failure(
                FailureStage::Depth,
                key,
                &NbrError::provider(key, format!("depth limit {} exceeded", self.config.max_depth)),
            );
            return;
        }

        let children = match self.provider.list_children(key) {
            Ok(children) => children,
            Err(err) => {
                state.skipped_nodes.fetch_add(1, Ordering::Relaxed);
                state.record_failure(FailureStage::Listing, key, &err);
                return;
            }
        };

        let mut leaves = Vec::new();
        for child in children {
            match child {
                Child::Node(child_key) => enqueue(
                    &state.barrier,
                    work_tx,
                    WorkItem::Node {
                        key: child_key,
                        depth: depth + 1,
                    },
                ),
                Child::Leaf(leaf_key) => {
                    if self.ignore.is_ignored(&leaf_key) {
                        state.ignored.fetch_add(1, Ordering::Relaxed);
                    } else {
                        leaves.push(leaf_key);
                    }
                }
            }
        }

        // Grow the total before any lookup can complete so processed <= total.
        state.progress.add_total(leaves.len() as u64);
        for leaf_key in leaves {
            enqueue(&state.barrier, work_tx, WorkItem::Leaf(leaf_key));
        }
    }

    fn run_leaf(&self, state: &BuildState, key: String) {
        match self.provider.attributes(&key) {
            Ok(record) => {
                if state.snapshot.insert(key, record) {
                    state.duplicates.fetch_add(1, Ordering::Relaxed);
                }
                state.progress.record_processed();
            }
            Err(err) => {
                state.failed_lookups.fetch_add(1, Ordering::Relaxed);
                state.record_failure(FailureStage::Lookup, &key, &err);
            }
        }
    }
}

fn enqueue(barrier: &CountingBarrier, work_tx: &channel::Sender<WorkItem>, item: WorkItem) {
    barrier.add();
    if work_tx.send(item).is_err() {
        barrier.done();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use super::*;
    use crate::core::errors::Result;
    use crate::inventory::ignore::IgnoreRules;
    use crate::inventory::provider::join_key;
    use crate::inventory::snapshot::AttributeRecord;

    #[derive(Default)]
    struct MapProvider {
        nodes: HashMap<String, Vec<Child>>,
        sizes: HashMap<String, u64>,
        broken_nodes: HashSet<String>,
        broken_leaves: HashSet<String>,
        panicking_leaves: HashSet<String>,
    }

    impl MapProvider {
        fn with_files(paths: &[(&str, u64)]) -> Self {
            let mut provider = Self::default();
            provider.nodes.insert(String::new(), Vec::new());
            for (path, size) in paths {
                let parts: Vec<&str> = path.split('/').collect();
                let mut parent = String::new();
                for dir in &parts[..parts.len() - 1] {
                    let node = join_key(&parent, dir);
                    if !provider.nodes.contains_key(&node) {
                        provider.nodes.insert(node.clone(), Vec::new());
                        provider
                            .nodes
                            .get_mut(&parent)
                            .unwrap()
                            .push(Child::Node(node.clone()));
                    }
                    parent = node;
                }
                provider
                    .nodes
                    .get_mut(&parent)
                    .unwrap()
                    .push(Child::Leaf(path.to_string()));
                provider.sizes.insert(path.to_string(), *size);
            }
            provider
        }
    }

    impl NamespaceProvider for MapProvider {
        fn describe(&self) -> String {
            "map".to_string()
        }

        fn list_children(&self, node: &str) -> Result<Vec<Child>> {
            if self.broken_nodes.contains(node) {
                return Err(NbrError::provider(node, "permission denied"));
            }
            self.nodes
                .get(node)
                .cloned()
                .ok_or_else(|| NbrError::provider(node, "missing"))
        }

        fn attributes(&self, leaf: &str) -> Result<AttributeRecord> {
            if self.panicking_leaves.contains(leaf) {
                panic!("boom");
            }
            if self.broken_leaves.contains(leaf) {
                return Err(NbrError::provider(leaf, "stat failed"));
            }
            self.sizes
                .get(leaf)
                .map(|size| AttributeRecord::sized(*size))
                .ok_or_else(|| NbrError::provider(leaf, "missing"))
        }
    }

    fn sample() -> MapProvider {
        MapProvider::with_files(&[
            ("a.txt", 1),
            ("docs/b.txt", 2),
            ("docs/2021/c.txt", 3),
            ("docs/2021/c.thump.png", 4),
            ("media/d.bin", 5),
        ])
    }

    fn config(concurrency: usize) -> BuildConfig {
        BuildConfig {
            concurrency,
            ..BuildConfig::default()
        }
    }

    #[test]
    fn builds_every_non_ignored_leaf() {
        let provider = sample();
        let ignore = IgnoreRules::defaults();
        let report = InventoryBuilder::new(&provider, &ignore, config(2)).build();

        let keys: Vec<&str> = report.snapshot.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["a.txt", "docs/2021/c.txt", "docs/b.txt", "media/d.bin"]
        );
        assert_eq!(report.ignored, 1);
        assert_eq!(report.progress, Progress { processed: 4, total: 4 });
        assert!(!report.is_partial());
        assert!(report.failures.is_empty());
    }

    #[test]
    fn single_worker_does_not_deadlock() {
        let provider = sample();
        let report = InventoryBuilder::new(&provider, &IgnoreRules::none(), config(1)).build();
        assert_eq!(report.snapshot.len(), 5);
        assert!(report.progress.is_complete());
    }

    #[test]
    fn listing_failure_skips_subtree_only() {
        let mut provider = sample();
        provider.broken_nodes.insert("docs".to_string());
        let report = InventoryBuilder::new(&provider, &IgnoreRules::none(), config(4)).build();

        assert_eq!(report.snapshot.len(), 2);
        assert_eq!(report.skipped_nodes, 1);
        assert!(report.is_partial());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, FailureStage::Listing);
        assert_eq!(report.failures[0].key, "docs");
        assert_eq!(report.failures[0].code, "NBR-2002");
    }

    #[test]
    fn lookup_failure_drops_one_leaf() {
        let mut provider = sample();
        provider.broken_leaves.insert("docs/b.txt".to_string());
        let report = InventoryBuilder::new(&provider, &IgnoreRules::none(), config(3)).build();

        assert_eq!(report.snapshot.len(), 4);
        assert!(!report.snapshot.contains_key("docs/b.txt"));
        assert_eq!(report.failed_lookups, 1);
        assert_eq!(report.progress, Progress { processed: 4, total: 5 });
        assert!(report.is_partial());
    }

    #[test]
    fn panicking_provider_is_absorbed() {
        let mut provider = sample();
        provider.panicking_leaves.insert("media/d.bin".to_string());
        let report = InventoryBuilder::new(&provider, &IgnoreRules::none(), config(2)).build();

        assert_eq!(report.snapshot.len(), 4);
        assert_eq!(report.failed_lookups, 1);
        assert_eq!(report.failures[0].code, "NBR-3900");
    }

    #[test]
    fn stop_flag_refuses_everything() {
        let provider = sample();
        let stop = Arc::new(AtomicBool::new(true));
        let report = InventoryBuilder::new(&provider, &IgnoreRules::none(), config(2))
            .with_stop_flag(stop)
            .build();

        assert!(report.snapshot.is_empty());
        assert_eq!(report.refused, 1);
        assert!(report.is_partial());
    }

    #[test]
    fn elapsed_deadline_refuses_tasks() {
        let provider = sample();
        let cfg = BuildConfig {
            deadline: Some(Duration::ZERO),
            ..config(2)
        };
        let report = InventoryBuilder::new(&provider, &IgnoreRules::none(), cfg).build();
        assert!(report.snapshot.is_empty());
        assert!(report.refused >= 1);
    }

    #[test]
    fn depth_limit_skips_deep_nodes() {
        let provider = sample();
        let cfg = BuildConfig {
            max_depth: 1,
            ..config(2)
        };
        let report = InventoryBuilder::new(&provider, &IgnoreRules::none(), cfg).build();
        assert!(!report.snapshot.contains_key("docs/2021/c.txt"));
        assert!(report.snapshot.contains_key("docs/b.txt"));
        assert_eq!(report.skipped_nodes, 1);
        assert_eq!(report.failures[0].stage, FailureStage::Depth);
    }

    #[test]
    fn duplicate_leaves_are_counted() {
        let mut provider = MapProvider::with_files(&[("x.bin", 8)]);
        provider
            .nodes
            .get_mut("")
            .unwrap()
            .push(Child::Leaf("x.bin".to_string()));
        let report = InventoryBuilder::new(&provider, &IgnoreRules::none(), config(2)).build();
        assert_eq!(report.snapshot.len(), 1);
        assert_eq!(report.duplicates, 1);
    }

    #[test]
    fn observer_sees_monotonic_progress() {
        let provider = sample();
        let seen = Arc::new(Mutex::new(Vec::<Progress>::new()));
        let sink = Arc::clone(&seen);
        let report = InventoryBuilder::new(&provider, &IgnoreRules::none(), config(4))
            .with_progress(move |p| sink.lock().push(p))
            .build();

        let seen = seen.lock();
        assert!(seen.windows(2).all(|w| w[0].processed <= w[1].processed));
        assert!(seen.iter().all(|p| p.processed <= p.total));
        assert_eq!(seen.last().copied(), Some(report.progress));
    }

    #[test]
    fn summary_mirrors_report() {
        let provider = sample();
        let report = InventoryBuilder::new(&provider, &IgnoreRules::none(), config(2)).build();
        let summary = report.summary();
        assert_eq!(summary.entries, 5);
        assert_eq!(summary.total_bytes, 15);
        assert!(!summary.partial);
        let json = serde_json::to_value(summary).unwrap();
        assert_eq!(json["processed"], 5);
    }

    #[test]
    fn counting_barrier_waits_for_zero() {
        let barrier = CountingBarrier::new();
        barrier.add();
        barrier.add();
        assert_eq!(barrier.outstanding(), 2);
        thread::scope(|scope| {
            scope.spawn(|| {
                thread::sleep(Duration::from_millis(10));
                barrier.done();
                barrier.done();
            });
            barrier.wait();
        });
        assert_eq!(barrier.outstanding(), 0);
    }

    #[test]
    fn gate_counts_refusals() {
        let stop = Arc::new(AtomicBool::new(false));
        let gate = AdmissionGate::new(None, Some(Arc::clone(&stop)));
        assert!(gate.admit());
        stop.store(true, Ordering::Relaxed);
        assert!(!gate.admit());
        assert!(!gate.admit());
        assert_eq!(gate.refused(), 2);
    }
}
