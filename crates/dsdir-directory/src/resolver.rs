//! Bulk resolution of dataset references
//!
//! A resolution session looks up every reference concurrently through the
//! backend's single-key `get`, re-polls unresolved references on a fixed
//! interval and stops when every reference resolved or the timeout expired.
//! Every round issues a fresh lookup for each unresolved reference, even
//! when an earlier one has not answered, and the first record found wins.
//! Lookups report back over a channel owned by the session; when the
//! session ends the channel and the outstanding lookups are dropped, so a
//! result arriving late is discarded.
//!
//! Resolved records are deduplicated by `description`. Two references that
//! resolve to records sharing a description produce a single entry, the
//! one of the earlier reference. Downstream callers depend on this.

use crate::backend::DirectoryBackend;
use dsdir_common::{DatasetMeta, DatasetRef, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default time budget for one resolution
pub const DEFAULT_RESOLUTION_TIMEOUT: Duration = Duration::from_secs(20);

/// Default delay between polling rounds
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Shortest delay between polling rounds
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Outcome of a bulk resolution
#[derive(Debug)]
pub enum Resolution<T> {
    /// Every reference resolved
    Complete(Vec<(DatasetMeta, T)>),
    /// The timeout expired first
    TimedOut {
        resolved: Vec<(DatasetMeta, T)>,
        /// Names of the references still unresolved
        missing: Vec<String>,
    },
}

impl<T> Resolution<T> {
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }

    /// Entries resolved so far, complete or not
    #[must_use]
    pub fn entries(&self) -> &[(DatasetMeta, T)] {
        match self {
            Self::Complete(entries) | Self::TimedOut { resolved: entries, .. } => entries,
        }
    }

    #[must_use]
    pub fn into_complete(self) -> Option<Vec<(DatasetMeta, T)>> {
        match self {
            Self::Complete(entries) => Some(entries),
            Self::TimedOut { .. } => None,
        }
    }
}

/// Resolves groups of dataset references against one backend
///
/// Holds no per-call state, so one resolver can serve concurrent calls.
pub struct BulkResolver<B: ?Sized> {
    backend: Arc<B>,
    timeout: Duration,
    poll_interval: Duration,
}

impl<B: ?Sized> Clone for BulkResolver<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            timeout: self.timeout,
            poll_interval: self.poll_interval,
        }
    }
}

/// Per-reference progress inside one session
#[derive(Default)]
struct Slot {
    meta: Option<DatasetMeta>,
    /// Lookups issued so far
    attempts: u32,
}

/// Reference index, attempt number and lookup result
type Lookup = (usize, u32, Result<Option<DatasetMeta>>);

impl<B: DirectoryBackend + ?Sized + 'static> BulkResolver<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            timeout: DEFAULT_RESOLUTION_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the delay between rounds, never below [`MIN_POLL_INTERVAL`]
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
        self
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve every reference, or report what was found when the timeout
    /// expires
    pub async fn resolve<T>(&self, refs: Vec<DatasetRef<T>>) -> Resolution<T>
    where
        T: Send + 'static,
    {
        if refs.is_empty() {
            return Resolution::Complete(Vec::new());
        }

        let started = Instant::now();
        let mut slots: Vec<Slot> = refs.iter().map(|_| Slot::default()).collect();
        let mut pending = refs.len();

        let (tx, mut rx) = mpsc::unbounded_channel::<Lookup>();
        let mut lookups = JoinSet::new();

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval_at(started + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.dispatch(&refs, &mut slots, &tx, &mut lookups);

        let timed_out = loop {
            if pending == 0 {
                break false;
            }
            tokio::select! {
                biased;
                Some((idx, attempt, result)) = rx.recv() => {
                    let slot = &mut slots[idx];
                    let name = &refs[idx].name;
                    match result {
                        Ok(Some(meta)) if slot.meta.is_none() => {
                            debug!("Resolved {} as {} on attempt {}", name, meta.id(), attempt);
                            slot.meta = Some(meta);
                            pending -= 1;
                        }
                        Ok(Some(_)) => {}
                        Ok(None) => debug!("{} not found yet (attempt {})", name, attempt),
                        Err(e) => warn!("Lookup {} of {} failed, will retry: {}", attempt, name, e),
                    }
                }
                () = &mut deadline => break true,
                _ = ticker.tick() => {
                    while lookups.try_join_next().is_some() {}
                    self.dispatch(&refs, &mut slots, &tx, &mut lookups);
                }
            }
        };

        // Outstanding lookups die with the session
        lookups.abort_all();
        drop(rx);

        let elapsed = started.elapsed();
        let mut missing = Vec::new();
        let mut by_description: BTreeMap<String, (DatasetMeta, T)> = BTreeMap::new();
        for (dataset_ref, slot) in refs.into_iter().zip(slots) {
            match slot.meta {
                Some(meta) => {
                    by_description
                        .entry(meta.description().to_string())
                        .or_insert((meta, dataset_ref.tag));
                }
                None => missing.push(dataset_ref.name),
            }
        }
        let resolved: Vec<(DatasetMeta, T)> = by_description.into_values().collect();

        if timed_out {
            warn!(
                "Dataset resolution timed out after {:?}, {} unresolved: {:?}",
                elapsed,
                missing.len(),
                missing
            );
            Resolution::TimedOut { resolved, missing }
        } else {
            info!(
                "Resolved {} dataset entries in {:?}",
                resolved.len(),
                elapsed
            );
            Resolution::Complete(resolved)
        }
    }

    /// Resolve every reference and hand the entries to `handler`
    ///
    /// The handler runs at most once, and only when every reference
    /// resolved before the timeout. Returns whether it ran.
    pub async fn find_peer_list<T, F>(&self, refs: Vec<DatasetRef<T>>, handler: F) -> bool
    where
        T: Send + 'static,
        F: FnOnce(Vec<(DatasetMeta, T)>),
    {
        match self.resolve(refs).await {
            Resolution::Complete(entries) => {
                handler(entries);
                true
            }
            Resolution::TimedOut { .. } => false,
        }
    }

    /// Start a lookup for every unresolved reference
    ///
    /// Earlier lookups still running are left alone. Whichever answers
    /// first with a record resolves the reference.
    fn dispatch<T>(
        &self,
        refs: &[DatasetRef<T>],
        slots: &mut [Slot],
        tx: &mpsc::UnboundedSender<Lookup>,
        lookups: &mut JoinSet<()>,
    ) {
        for (idx, (dataset_ref, slot)) in refs.iter().zip(slots.iter_mut()).enumerate() {
            if slot.meta.is_some() {
                continue;
            }
            slot.attempts += 1;
            let attempt = slot.attempts;
            let backend = Arc::clone(&self.backend);
            let id = dataset_ref.id();
            let tx = tx.clone();
            lookups.spawn(async move {
                let result = backend.get(&id).await;
                // Receiver gone means the session is over
                let _ = tx.send((idx, attempt, result));
            });
        }
    }
}
