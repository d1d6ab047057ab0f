//! Retry Queue - delayed re-evaluation of transiently failed jobs

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::Job;

/// Backoff settings for the retry queue
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retry, in milliseconds (never zero)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on any retry delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    5_000
}

fn default_max_delay_ms() -> u64 {
    300_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Exponential backoff keyed on the job's retry count: base, 2*base, 4*base, ...
    pub fn backoff_duration(&self, retries: u32) -> Duration {
        let base = self.base_delay_ms.max(1);
        let exponent = retries.saturating_sub(1).min(32);
        let delay = base.saturating_mul(2u64.saturating_pow(exponent));
        Duration::from_millis(delay.min(self.max_delay_ms.max(base)))
    }
}

/// A job snapshot waiting for its retry time
#[derive(Debug, Clone)]
pub struct RetryQueueEntry {
    pub job: Job,
    pub retry_at: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug)]
struct ScheduledEntry {
    entry: RetryQueueEntry,
    sequence: u64, // FIFO among entries due at the same instant
}

impl PartialEq for ScheduledEntry {
    fn eq(&self, other: &Self) -> bool {
        self.entry.retry_at == other.entry.retry_at && self.sequence == other.sequence
    }
}

impl Eq for ScheduledEntry {}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; earliest retry_at must surface first
        match other.entry.retry_at.cmp(&self.entry.retry_at) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            ord => ord,
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    heap: BinaryHeap<ScheduledEntry>,
    sequence_counter: u64,
    enqueued_count: u64,
    drained_count: u64,
    replaced_count: u64,
}

/// Delay queue for jobs that failed transiently.
///
/// All operations take a single lock, so a drain and concurrent enqueues never
/// interleave: an entry is either drained by one call or left for a later one.
pub struct RetryQueue {
    config: RetryConfig,
    state: Mutex<QueueState>,
}

impl RetryQueue {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Schedule `job` (already carrying its incremented retry count)
    pub async fn enqueue(&self, job: Job) -> DateTime<Utc> {
        self.enqueue_at(job, Utc::now()).await
    }

    pub async fn enqueue_at(&self, job: Job, now: DateTime<Utc>) -> DateTime<Utc> {
        let delay = self.config.backoff_duration(job.retries);
        let retry_at = now
            + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::milliseconds(1));

        let mut state = self.state.lock().await;

        // One entry per job: a newer failure supersedes the pending retry
        let before = state.heap.len();
        let job_id = job.id.clone();
        let items = std::mem::take(&mut state.heap).into_vec();
        state.heap = items
            .into_iter()
            .filter(|item| item.entry.job.id != job_id)
            .collect();
        if state.heap.len() < before {
            state.replaced_count += 1;
        }

        debug!(
            job_id = %job_id,
            retries = job.retries,
            delay_ms = delay.as_millis() as u64,
            "Job scheduled for retry"
        );

        let sequence = state.sequence_counter;
        state.sequence_counter += 1;
        state.heap.push(ScheduledEntry {
            entry: RetryQueueEntry {
                job,
                retry_at,
                enqueued_at: now,
            },
            sequence,
        });
        state.enqueued_count += 1;

        retry_at
    }

    /// Remove and return every entry whose retry time has elapsed
    pub async fn drain_due(&self) -> Vec<RetryQueueEntry> {
        self.drain_due_at(Utc::now()).await
    }

    pub async fn drain_due_at(&self, now: DateTime<Utc>) -> Vec<RetryQueueEntry> {
        let mut state = self.state.lock().await;
        let mut due = Vec::new();

        while let Some(top) = state.heap.peek() {
            if top.entry.retry_at > now {
                break;
            }
            if let Some(item) = state.heap.pop() {
                due.push(item.entry);
            }
        }

        state.drained_count += due.len() as u64;
        if !due.is_empty() {
            debug!("Drained {} due retries ({} still waiting)", due.len(), state.heap.len());
        }
        due
    }

    /// Is a retry pending for this job
    pub async fn contains(&self, job_id: &str) -> bool {
        self.state
            .lock()
            .await
            .heap
            .iter()
            .any(|item| item.entry.job.id == job_id)
    }

    /// Ids of every job with a pending retry
    pub async fn pending_ids(&self) -> HashSet<String> {
        self.state
            .lock()
            .await
            .heap
            .iter()
            .map(|item| item.entry.job.id.clone())
            .collect()
    }

    /// Drop a job's pending retry, returns whether one existed
    pub async fn remove(&self, job_id: &str) -> bool {
        let mut state = self.state.lock().await;
        let before = state.heap.len();
        let items = std::mem::take(&mut state.heap).into_vec();
        state.heap = items
            .into_iter()
            .filter(|item| item.entry.job.id != job_id)
            .collect();
        state.heap.len() < before
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.heap.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.heap.is_empty()
    }

    /// Time of the earliest pending retry
    pub async fn next_retry_at(&self) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .await
            .heap
            .peek()
            .map(|item| item.entry.retry_at)
    }

    pub async fn stats(&self) -> RetryQueueStats {
        let state = self.state.lock().await;
        RetryQueueStats {
            current_size: state.heap.len(),
            enqueued_total: state.enqueued_count,
            drained_total: state.drained_count,
            replaced_total: state.replaced_count,
        }
    }
}

impl Default for RetryQueue {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Queue statistics
#[derive(Debug, Clone)]
pub struct RetryQueueStats {
    pub current_size: usize,
    pub enqueued_total: u64,
    pub drained_total: u64,
    pub replaced_total: u64,
}

impl std::fmt::Display for RetryQueueStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RetryQueue[size={}, enq={}, drained={}, replaced={}]",
            self.current_size, self.enqueued_total, self.drained_total, self.replaced_total
        )
    }
}
