//! Concurrent ingestion engine
//!
//! Runs one [`RecordLoader::load_record`] call per input record on a pool of
//! `cpu` tokio tasks and hands the results back as a lazy sequence. The pool
//! never decides to stop on its own: the caller reads results, and when it
//! sees a fatal one it calls [`Ingestion::abort`]. After that no record is
//! submitted; tasks already running finish and their results are drained.
//!
//! ```text
//! records ──take_while(!aborted)──► spawn ──buffer_unordered(cpu)──► TaskResult stream
//! ```

use crate::error::{IngestError, Result};
use crate::loaders::{NotFoundPolicy, Outcome, RecordLoader};
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Result of one record, tagged with its position in the input
#[derive(Debug)]
pub struct TaskResult {
    pub index: usize,
    pub result: Result<Outcome>,
}

/// Per-job counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineStats {
    pub submitted: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub not_found: usize,
    pub failed: usize,
    pub duration_secs: f64,
}

impl EngineStats {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Created => self.created += 1,
            Outcome::Updated => self.updated += 1,
            Outcome::Skipped => self.skipped += 1,
        }
    }

    pub fn completed(&self) -> usize {
        self.created + self.updated + self.skipped + self.not_found + self.failed
    }

    fn add(&mut self, other: &EngineStats) {
        self.submitted += other.submitted;
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.not_found += other.not_found;
        self.failed += other.failed;
        self.duration_secs += other.duration_secs;
    }
}

/// What a job gets back from a finished run
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineReport {
    pub stats: EngineStats,
    /// Unresolved names in input order, without repeats
    pub not_found: Vec<String>,
    /// Per-record conflicts tolerated under [`NotFoundPolicy::Collect`]
    pub conflicts: Vec<String>,
}

impl EngineReport {
    /// Fold in the report of a later pass of the same job
    pub fn merge(&mut self, later: EngineReport) {
        self.stats.add(&later.stats);
        for key in later.not_found {
            if !self.not_found.contains(&key) {
                self.not_found.push(key);
            }
        }
        self.conflicts.extend(later.conflicts);
    }
}

#[derive(Debug, Clone)]
pub struct IngestionEngine {
    cpu: usize,
    show_progress: bool,
}

impl IngestionEngine {
    /// `cpu` is clamped to at least one worker
    pub fn new(cpu: usize) -> Self {
        Self {
            cpu: cpu.max(1),
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn cpu(&self) -> usize {
        self.cpu
    }

    /// Start loading `records`; nothing runs until results are read
    pub fn run<L, I>(&self, loader: Arc<L>, records: I, message: &str) -> Ingestion
    where
        L: RecordLoader,
        I: IntoIterator<Item = L::Record>,
        I::IntoIter: ExactSizeIterator + Send + 'static,
    {
        let records = records.into_iter();
        let total = records.len();
        let aborted = Arc::new(AtomicBool::new(false));
        let gate = aborted.clone();

        let results = stream::iter(records.enumerate())
            .take_while(move |_| future::ready(!gate.load(Ordering::SeqCst)))
            .map(move |(index, record)| {
                let loader = loader.clone();
                let handle = tokio::spawn(async move { loader.load_record(record).await });
                async move {
                    let result = match handle.await {
                        Ok(result) => result,
                        Err(join_error) => Err(IngestError::from(join_error)),
                    };
                    TaskResult { index, result }
                }
            })
            .buffer_unordered(self.cpu)
            .boxed();

        debug!(total, cpu = self.cpu, "Ingestion started");

        Ingestion {
            results,
            aborted,
            progress: self.progress_bar(total as u64, message),
            started: Instant::now(),
        }
    }

    fn progress_bar(&self, total: u64, message: &str) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total);
        let style = ProgressStyle::with_template(
            "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})",
        )
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb.set_message(message.to_string());
        pb
    }
}

/// A running job's result sequence
pub struct Ingestion {
    results: BoxStream<'static, TaskResult>,
    aborted: Arc<AtomicBool>,
    progress: ProgressBar,
    started: Instant,
}

impl Ingestion {
    /// Next finished record, in completion order
    pub async fn next(&mut self) -> Option<TaskResult> {
        let task = self.results.next().await;
        if task.is_some() {
            self.progress.inc(1);
        }
        task
    }

    /// Stop submitting records; in-flight tasks still complete
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Read every result, applying `policy`.
    ///
    /// Unresolved feature names are collected under [`NotFoundPolicy::Collect`],
    /// as are `Conflict`s. Any other error, including a missing publication
    /// or term, or a not-found feature under
    /// [`NotFoundPolicy::Fail`], aborts the run; the first such error is
    /// returned once the in-flight tasks have drained.
    pub async fn drive(mut self, policy: NotFoundPolicy) -> Result<EngineReport> {
        let mut stats = EngineStats::default();
        let mut not_found: Vec<(usize, String)> = Vec::new();
        let mut conflicts: Vec<(usize, String)> = Vec::new();
        let mut fatal: Option<IngestError> = None;

        while let Some(task) = self.next().await {
            stats.submitted += 1;
            match task.result {
                Ok(outcome) => stats.record(outcome),
                Err(err) if policy == NotFoundPolicy::Collect && err.is_missing_feature() => {
                    stats.not_found += 1;
                    if let Some(key) = err.not_found_key() {
                        debug!(record = task.index, key, "Reference not found, continuing");
                        not_found.push((task.index, key.to_string()));
                    }
                },
                Err(IngestError::Conflict(message)) if policy == NotFoundPolicy::Collect => {
                    stats.failed += 1;
                    warn!(record = task.index, "{}", message);
                    conflicts.push((task.index, message));
                },
                Err(err) => {
                    if err.is_not_found() {
                        stats.not_found += 1;
                    } else {
                        stats.failed += 1;
                    }
                    if fatal.is_none() {
                        warn!(record = task.index, error = %err, "Fatal record error, draining in-flight tasks");
                        self.abort();
                        fatal = Some(err);
                    }
                },
            }
        }

        stats.duration_secs = self.started.elapsed().as_secs_f64();
        self.progress.finish_and_clear();

        info!(
            submitted = stats.submitted,
            created = stats.created,
            updated = stats.updated,
            skipped = stats.skipped,
            not_found = stats.not_found,
            failed = stats.failed,
            duration_secs = stats.duration_secs,
            "Ingestion finished"
        );

        if let Some(err) = fatal {
            return Err(err);
        }

        conflicts.sort_by_key(|(index, _)| *index);

        Ok(EngineReport {
            stats,
            not_found: in_input_order(not_found),
            conflicts: conflicts.into_iter().map(|(_, message)| message).collect(),
        })
    }
}

fn in_input_order(mut keyed: Vec<(usize, String)>) -> Vec<String> {
    keyed.sort_by_key(|(index, _)| *index);
    let mut seen = std::collections::HashSet::new();
    keyed
        .into_iter()
        .filter_map(|(_, key)| seen.insert(key.clone()).then_some(key))
        .collect()
}

impl std::fmt::Debug for Ingestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestion")
            .field("aborted", &self.is_aborted())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Test loader: fails on chosen records and tracks concurrency
    #[derive(Default)]
    struct Recorder {
        running: AtomicUsize,
        peak: AtomicUsize,
        loaded: AtomicUsize,
        missing: Vec<usize>,
        /// records whose publication is not loaded
        unpublished: Vec<usize>,
        broken: Vec<usize>,
        panics: Vec<usize>,
    }

    #[async_trait]
    impl RecordLoader for Recorder {
        type Record = usize;

        async fn load_record(&self, record: usize) -> Result<Outcome> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.loaded.fetch_add(1, Ordering::SeqCst);

            if self.panics.contains(&record) {
                panic!("record {} exploded", record);
            }
            if self.missing.contains(&record) {
                return Err(IngestError::not_found("feature", format!("gene{}", record)));
            }
            if self.unpublished.contains(&record) {
                return Err(IngestError::not_found("publication", format!("10.1000/{}", record)));
            }
            if self.broken.contains(&record) {
                return Err(IngestError::AmbiguousReference {
                    kind: "feature",
                    key: format!("gene{}", record),
                    candidates: 2,
                });
            }
            Ok(Outcome::Created)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_never_exceeds_cpu() {
        let recorder = Arc::new(Recorder::default());
        let engine = IngestionEngine::new(3);

        let report = engine
            .run(recorder.clone(), 0..30usize, "recorder")
            .drive(NotFoundPolicy::Fail)
            .await
            .unwrap();

        assert_eq!(report.stats.created, 30);
        assert!(recorder.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_collect_policy_lists_missing_in_input_order() {
        let recorder = Arc::new(Recorder {
            missing: vec![7, 2, 5],
            ..Default::default()
        });

        let report = IngestionEngine::new(4)
            .run(recorder, 0..10usize, "recorder")
            .drive(NotFoundPolicy::Collect)
            .await
            .unwrap();

        assert_eq!(report.not_found, vec!["gene2", "gene5", "gene7"]);
        assert_eq!(report.stats.created, 7);
        assert_eq!(report.stats.not_found, 3);
    }

    #[tokio::test]
    async fn test_fail_policy_stops_submitting_after_first_error() {
        let recorder = Arc::new(Recorder {
            missing: vec![2],
            ..Default::default()
        });

        let err = IngestionEngine::new(1)
            .run(recorder.clone(), 0..10usize, "recorder")
            .drive(NotFoundPolicy::Fail)
            .await
            .unwrap_err();

        assert_eq!(err.not_found_key(), Some("gene2"));
        // records 0, 1 and the failing 2; nothing after the abort
        assert_eq!(recorder.loaded.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_ambiguous_is_fatal_even_when_collecting() {
        let recorder = Arc::new(Recorder {
            broken: vec![0],
            ..Default::default()
        });

        let err = IngestionEngine::new(1)
            .run(recorder, 0..4usize, "recorder")
            .drive(NotFoundPolicy::Collect)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::AmbiguousReference { .. }));
    }

    #[tokio::test]
    async fn test_missing_publication_is_fatal_even_when_collecting() {
        let recorder = Arc::new(Recorder {
            missing: vec![0],
            unpublished: vec![1],
            ..Default::default()
        });

        let err = IngestionEngine::new(1)
            .run(recorder, 0..4usize, "recorder")
            .drive(NotFoundPolicy::Collect)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "publication not found: 10.1000/1");
    }

    #[tokio::test]
    async fn test_panicking_task_surfaces_as_worker_error() {
        let recorder = Arc::new(Recorder {
            panics: vec![1],
            ..Default::default()
        });

        let err = IngestionEngine::new(2)
            .run(recorder, 0..3usize, "recorder")
            .drive(NotFoundPolicy::Collect)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Worker(_)));
    }

    #[test]
    fn test_merge_keeps_first_pass_order() {
        let mut first = EngineReport {
            stats: EngineStats {
                submitted: 2,
                created: 1,
                not_found: 1,
                ..Default::default()
            },
            not_found: vec!["b".into()],
            conflicts: Vec::new(),
        };
        first.merge(EngineReport {
            stats: EngineStats {
                submitted: 2,
                not_found: 2,
                ..Default::default()
            },
            not_found: vec!["a".into(), "b".into()],
            conflicts: Vec::new(),
        });
        assert_eq!(first.not_found, vec!["b", "a"]);
        assert_eq!(first.stats.submitted, 4);
        assert_eq!(first.stats.completed(), 4);
    }

    #[tokio::test]
    async fn test_empty_input_succeeds() {
        let report = IngestionEngine::new(0)
            .run(Arc::new(Recorder::default()), Vec::<usize>::new(), "recorder")
            .drive(NotFoundPolicy::Fail)
            .await
            .unwrap();
        assert_eq!(report.stats, EngineStats {
            duration_secs: report.stats.duration_secs,
            ..Default::default()
        });
    }
}
