//! Frontier coordination for distributing crawl work to workers.

use crate::controls::DomainScope;
use std::collections::{HashSet, VecDeque};
use std::pin::pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use url::Url;

/// A URL waiting to be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    /// URL to fetch, fragment stripped.
    pub url: Url,
    /// Page the link was found on; `None` for seeds.
    pub discovered_from: Option<String>,
}

/// What `Frontier::enqueue` did with a URL. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Accepted and waiting for dispatch.
    Queued,
    /// Already queued or visited.
    Duplicate,
    /// Host outside the allowed domains.
    OutOfScope,
    /// Not an absolute http(s) URL.
    Invalid,
    /// The frontier no longer accepts work.
    Closed,
}

#[derive(Default)]
struct FrontierState {
    queue: VecDeque<FrontierEntry>,
    seen: HashSet<String>,
    in_flight: usize,
    dispatched: usize,
    closed: bool,
}

/// Deduplicating, domain-scoped queue of URLs for one crawl run.
///
/// Every URL that is accepted is remembered forever, so a URL is dispatched
/// at most once. The run is exhausted once the queue is empty and no
/// dispatched entry is still in flight.
pub struct Frontier {
    scope: DomainScope,
    page_budget: Option<usize>,
    state: Mutex<FrontierState>,
    changed: Notify,
}

impl Frontier {
    /// Constructs a new, empty frontier.
    pub fn new(scope: DomainScope, page_budget: Option<usize>) -> Self {
        Self {
            scope,
            page_budget,
            state: Mutex::new(FrontierState::default()),
            changed: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FrontierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a crawl seed.
    pub fn seed(&self, url: &str) -> EnqueueOutcome {
        self.enqueue(url, None)
    }

    /// Offers a discovered URL. Duplicate and out-of-scope links are dropped silently.
    pub fn enqueue(&self, url: &str, parent: Option<&str>) -> EnqueueOutcome {
        let Ok(mut parsed) = Url::parse(url) else {
            return EnqueueOutcome::Invalid;
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return EnqueueOutcome::Invalid;
        }
        if !self.scope.allows(&parsed) {
            return EnqueueOutcome::OutOfScope;
        }
        parsed.set_fragment(None);

        let mut state = self.lock();
        if state.closed {
            return EnqueueOutcome::Closed;
        }
        if !state.seen.insert(parsed.as_str().to_string()) {
            return EnqueueOutcome::Duplicate;
        }
        state.queue.push_back(FrontierEntry {
            url: parsed,
            discovered_from: parent.map(str::to_string),
        });
        drop(state);
        self.changed.notify_waiters();
        EnqueueOutcome::Queued
    }

    fn budget_spent(&self, state: &FrontierState) -> bool {
        self.page_budget
            .map(|budget| state.dispatched >= budget)
            .unwrap_or(false)
    }

    fn pop_locked(&self, state: &mut FrontierState) -> Option<FrontierEntry> {
        if state.closed || self.budget_spent(state) {
            return None;
        }
        let entry = state.queue.pop_front()?;
        state.in_flight += 1;
        state.dispatched += 1;
        Some(entry)
    }

    /// Pops up to `limit` undispatched entries without waiting.
    ///
    /// Each returned entry counts as in flight until passed to [`Frontier::complete`].
    pub fn next_batch(&self, limit: usize) -> Vec<FrontierEntry> {
        let mut state = self.lock();
        let mut batch = Vec::with_capacity(limit.min(state.queue.len()));
        while batch.len() < limit {
            match self.pop_locked(&mut state) {
                Some(entry) => batch.push(entry),
                None => break,
            }
        }
        batch
    }

    /// Waits for the next entry; `None` once the frontier is exhausted.
    pub async fn next_entry(&self) -> Option<FrontierEntry> {
        loop {
            let mut notified = pin!(self.changed.notified());
            notified.as_mut().enable();
            {
                let mut state = self.lock();
                if let Some(entry) = self.pop_locked(&mut state) {
                    return Some(entry);
                }
                if self.is_terminal(&state) {
                    return None;
                }
            }
            notified.await;
        }
    }

    fn is_terminal(&self, state: &FrontierState) -> bool {
        let nothing_left = state.queue.is_empty() || state.closed || self.budget_spent(state);
        nothing_left && state.in_flight == 0
    }

    /// Claims the URL a dispatched entry actually landed on after redirects.
    ///
    /// Returns `false` when that URL was already queued or visited, in which
    /// case the page should not be processed again.
    pub fn claim_landing(&self, entry: &FrontierEntry, landed: &Url) -> bool {
        let mut landed = landed.clone();
        landed.set_fragment(None);
        if landed == entry.url {
            return true;
        }
        self.lock().seen.insert(landed.as_str().to_string())
    }

    /// Marks a dispatched entry as finished.
    pub fn complete(&self, _entry: &FrontierEntry) {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        drop(state);
        self.changed.notify_waiters();
    }

    /// Stops accepting and dispatching work; queued entries are abandoned.
    pub fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_waiters();
    }

    /// Number of entries waiting for dispatch.
    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    /// Number of dispatched entries not yet completed.
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    /// True once the queue is drained and nothing is in flight.
    pub fn is_exhausted(&self) -> bool {
        let state = self.lock();
        self.is_terminal(&state)
    }
}
