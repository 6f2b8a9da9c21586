use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use backoff::{backoff::Backoff, ExponentialBackoff};
use parking_lot::Mutex;
use std::{collections::VecDeque, hash::Hash, sync::Arc};
use tokio::{sync::Notify, time::Duration};

const INITIAL_BACKOFF: Duration = Duration::from_millis(5);
const MAX_BACKOFF: Duration = Duration::from_secs(1000);

/// A de-duplicating queue of keys awaiting reconciliation.
///
/// A key is held at most once while it waits. A key that is added while it is
/// being processed is queued again once processing is marked done, so a key is
/// never processed concurrently with itself. Failed keys may be re-added after
/// a per-key exponential backoff.
#[derive(Debug)]
pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

#[derive(Debug)]
struct Inner<K> {
    state: Mutex<State<K>>,
    notify: Notify,
}

#[derive(Debug)]
struct State<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    failures: HashMap<K, Failures>,
    shutting_down: bool,
}

#[derive(Debug)]
struct Failures {
    requeues: usize,
    backoff: ExponentialBackoff,
}

// === impl WorkQueue ===

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K> Default for WorkQueue<K>
where
    K: Clone + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    failures: HashMap::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Queues `key` unless it is already waiting. Ignored once the queue is
    /// shutting down.
    pub fn add(&self, key: K) {
        let mut state = self.inner.state.lock();
        if state.shutting_down || !state.dirty.insert(key.clone()) {
            return;
        }
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Waits for the next key. Returns `None` once the queue has been shut
    /// down and every waiting key has been handed out.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before inspecting the state so that an add or shutdown
            // racing with this check still wakes us.
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Marks processing of `key` as finished, queueing it again if it was
    /// added in the meantime.
    pub fn done(&self, key: &K) {
        let mut state = self.inner.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// The number of times `key` has been re-added with
    /// [`add_rate_limited`](Self::add_rate_limited) since it was last
    /// forgotten.
    pub fn num_requeues(&self, key: &K) -> usize {
        self.inner
            .state
            .lock()
            .failures
            .get(key)
            .map(|f| f.requeues)
            .unwrap_or(0)
    }

    /// Clears the failure history of `key`.
    pub fn forget(&self, key: &K) {
        self.inner.state.lock().failures.remove(key);
    }

    pub fn shut_down(&self) {
        self.inner.state.lock().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }

    /// The number of keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    /// Adds `key` once its backoff elapses. Each call doubles the key's
    /// backoff until it is forgotten. Returns the delay.
    pub fn add_rate_limited(&self, key: K) -> Duration {
        let delay = {
            let mut state = self.inner.state.lock();
            let failures = state
                .failures
                .entry(key.clone())
                .or_insert_with(|| Failures {
                    requeues: 0,
                    backoff: rate_limit(),
                });
            failures.requeues += 1;
            failures.backoff.next_backoff().unwrap_or(MAX_BACKOFF)
        };

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
        delay
    }
}

fn rate_limit() -> ExponentialBackoff {
    ExponentialBackoff {
        current_interval: INITIAL_BACKOFF,
        initial_interval: INITIAL_BACKOFF,
        randomization_factor: 0.0,
        multiplier: 2.0,
        max_interval: MAX_BACKOFF,
        max_elapsed_time: None,
        ..ExponentialBackoff::default()
    }
}
