//! Update Scheduler
//!
//! The scheduler batches effect re-runs into flush cycles. Mutations
//! enqueue jobs; a flush drains them in ascending id order, so a parent
//! component's update (smaller uid) always runs before its descendants'
//! and a descendant unmounted mid-flush can be skipped via its cleared
//! `active` flag.
//!
//! # Phases
//!
//! One flush cycle runs three phases:
//!
//! 1. **Pre**: callbacks that must observe state before any render job
//!    (pre-watchers). Flushed to quiescence, since running one may queue
//!    more.
//! 2. **Main queue**: sorted by id, deduplicated by job identity from the
//!    current flush cursor (cursor + 1 for jobs that allow recursing into
//!    themselves). Insertion during a flush uses binary search relative
//!    to the cursor and never rewinds behind it.
//! 3. **Post**: after-mutation callbacks (mounted/updated hooks),
//!    deduplicated and sorted; a batch arriving while the post phase is
//!    already running is appended to the in-flight batch rather than
//!    nested.
//!
//! The cycle repeats until all three queues are empty.
//!
//! # Tick boundary
//!
//! There is no ambient event loop; mutations mark a flush pending and the
//! host drives it: [`next_tick`] drains pending work and then runs its
//! callback, [`flush_jobs`] is the raw drain. Everything queued between
//! two drains coalesces into one flush.
//!
//! # Runaway updates
//!
//! A job observed re-entering more than [`RECURSION_LIMIT`] times within
//! one flush cycle is reported as a likely self-triggering update loop.
//! The diagnostic does not stop the job: this is a debug-time guard, not
//! a safety net.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use tracing::warn;

/// Re-entry count past which a job is reported as a runaway update loop.
pub const RECURSION_LIMIT: u32 = 100;

/// A deduplicated, priority-ordered unit of deferred work.
///
/// Jobs compare by identity: two handles to the same job are equal, two
/// jobs wrapping the same closure are not.
#[derive(Clone)]
pub struct Job {
    inner: Rc<JobInner>,
}

struct JobInner {
    /// Flush priority; id-less jobs sort last. Component update jobs use
    /// the instance uid so parents flush before children.
    id: Option<u32>,
    /// Cleared on unmount; the flush loop skips inactive jobs.
    active: Cell<bool>,
    /// Whether the job may re-queue itself while it is the one running.
    allow_recurse: Cell<bool>,
    cb: Box<dyn Fn()>,
}

impl Job {
    pub fn new<F: Fn() + 'static>(f: F) -> Self {
        Self::build(None, f)
    }

    pub fn with_id<F: Fn() + 'static>(id: u32, f: F) -> Self {
        Self::build(Some(id), f)
    }

    fn build<F: Fn() + 'static>(id: Option<u32>, f: F) -> Self {
        Self {
            inner: Rc::new(JobInner {
                id,
                active: Cell::new(true),
                allow_recurse: Cell::new(false),
                cb: Box::new(f),
            }),
        }
    }

    pub fn id(&self) -> Option<u32> {
        self.inner.id
    }

    /// Sort key: id-less jobs flush last.
    fn order(&self) -> u32 {
        self.inner.id.unwrap_or(u32::MAX)
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    pub fn set_active(&self, active: bool) {
        self.inner.active.set(active);
    }

    pub fn allows_recurse(&self) -> bool {
        self.inner.allow_recurse.get()
    }

    pub fn set_allow_recurse(&self, allowed: bool) {
        self.inner.allow_recurse.set(allowed);
    }

    pub fn invoke(&self) {
        (self.inner.cb)();
    }

    fn key(&self) -> usize {
        Rc::as_ptr(&self.inner) as *const () as usize
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Job {}

#[derive(Default)]
struct SchedulerState {
    queue: Vec<Job>,
    flush_index: usize,
    is_flushing: bool,
    is_flush_pending: bool,

    pending_pre_cbs: Vec<Job>,
    active_pre_cbs: Option<Vec<Job>>,
    pre_index: usize,
    current_pre_parent: Option<Job>,

    pending_post_cbs: Vec<Job>,
    active_post_cbs: Option<Vec<Job>>,
    post_index: usize,

    after_flush: Vec<Box<dyn FnOnce()>>,
}

thread_local! {
    static SCHEDULER: RefCell<SchedulerState> = RefCell::new(SchedulerState::default());
}

fn with_state<T>(f: impl FnOnce(&mut SchedulerState) -> T) -> T {
    SCHEDULER.with(|state| f(&mut state.borrow_mut()))
}

/// Binary-search the insertion point that keeps the queue sorted by
/// ascending id, never behind the flush cursor.
fn find_insertion_index(state: &SchedulerState, id: u32) -> usize {
    let mut start = state.flush_index + 1;
    let mut end = state.queue.len();
    while start < end {
        let middle = (start + end) >> 1;
        if state.queue[middle].order() < id {
            start = middle + 1;
        } else {
            end = middle;
        }
    }
    start
}

/// Enqueue a job for the next flush.
///
/// A job already present at or after the flush cursor is not re-added -
/// unless it allows recursion, in which case the dedupe search starts one
/// past the cursor so the running job may re-queue itself.
pub fn queue_job(job: &Job) {
    let added = with_state(|state| {
        let start = if state.is_flushing && job.allows_recurse() {
            state.flush_index + 1
        } else {
            state.flush_index
        };
        let start = start.min(state.queue.len());
        let duplicate = state.queue[start..].iter().any(|queued| queued == job);
        let is_pre_parent = state.current_pre_parent.as_ref() == Some(job);
        if duplicate || is_pre_parent {
            return false;
        }

        match job.id() {
            None => state.queue.push(job.clone()),
            Some(id) => {
                let at = find_insertion_index(state, id).min(state.queue.len());
                state.queue.insert(at, job.clone());
            }
        }
        true
    });
    if added {
        queue_flush();
    }
}

fn queue_flush() {
    with_state(|state| {
        if !state.is_flushing && !state.is_flush_pending {
            state.is_flush_pending = true;
        }
    });
}

/// Remove a job that has not yet been reached by the flush cursor. Used
/// when a parent's update subsumes a child's pending update.
pub fn invalidate_job(job: &Job) {
    with_state(|state| {
        if let Some(i) = state.queue.iter().position(|queued| queued == job) {
            if i > state.flush_index {
                state.queue.remove(i);
            }
        }
    });
}

fn queue_cb(job: &Job, pre: bool) {
    let added = with_state(|state| {
        let (active, index) = if pre {
            (&state.active_pre_cbs, state.pre_index)
        } else {
            (&state.active_post_cbs, state.post_index)
        };
        if let Some(active) = active {
            let start = if job.allows_recurse() { index + 1 } else { index };
            let start = start.min(active.len());
            if active[start..].iter().any(|queued| queued == job) {
                return false;
            }
        }
        if pre {
            state.pending_pre_cbs.push(job.clone());
        } else {
            state.pending_post_cbs.push(job.clone());
        }
        true
    });
    if added {
        queue_flush();
    }
}

/// Enqueue a pre-phase callback (runs before the main queue).
pub fn queue_pre_flush_cb(job: &Job) {
    queue_cb(job, true);
}

/// Enqueue a post-phase callback (runs after the main queue drains).
pub fn queue_post_flush_cb(job: &Job) {
    queue_cb(job, false);
}

fn dedupe(jobs: Vec<Job>) -> Vec<Job> {
    let mut seen = std::collections::HashSet::new();
    jobs.into_iter()
        .filter(|job| seen.insert(job.key()))
        .collect()
}

type CountMap = HashMap<usize, u32>;

/// Report (but do not stop) a job re-entering implausibly often within
/// one flush cycle.
fn check_recursive_updates(seen: &mut CountMap, job: &Job) {
    if !cfg!(debug_assertions) {
        return;
    }
    let count = seen.entry(job.key()).or_insert(0);
    *count += 1;
    if *count == RECURSION_LIMIT {
        warn!(
            job_id = ?job.id(),
            "maximum recursive updates exceeded: a reactive effect is \
             mutating its own dependencies and recursively triggering itself"
        );
    }
}

/// Flush pre-phase callbacks to quiescence. `parent` is the main-queue
/// job (if any) on whose behalf the pre flush runs; it is barred from
/// re-queueing itself for the duration.
fn flush_pre_flush_cbs_with_parent(seen: &mut CountMap, parent: Option<&Job>) {
    loop {
        let batch = with_state(|state| {
            if state.pending_pre_cbs.is_empty() {
                return None;
            }
            let deduped = dedupe(std::mem::take(&mut state.pending_pre_cbs));
            state.current_pre_parent = parent.cloned();
            state.active_pre_cbs = Some(deduped.clone());
            state.pre_index = 0;
            Some(deduped)
        });
        let Some(batch) = batch else {
            return;
        };

        for (i, job) in batch.iter().enumerate() {
            with_state(|state| state.pre_index = i);
            check_recursive_updates(seen, job);
            job.invoke();
        }

        with_state(|state| {
            state.active_pre_cbs = None;
            state.pre_index = 0;
            state.current_pre_parent = None;
        });
        // Loop: running the batch may have queued more pre callbacks.
    }
}

/// Flush pre-phase callbacks to quiescence.
pub fn flush_pre_flush_cbs() {
    let mut seen = CountMap::new();
    flush_pre_flush_cbs_with_parent(&mut seen, None);
}

/// Flush pre-phase callbacks on behalf of a main-queue job; the job is
/// barred from re-queueing itself while its pre callbacks run.
pub fn flush_pre_flush_cbs_for(parent: &Job) {
    let mut seen = CountMap::new();
    flush_pre_flush_cbs_with_parent(&mut seen, Some(parent));
}

fn flush_post_flush_cbs_inner(seen: &mut CountMap) {
    let started = with_state(|state| {
        if state.pending_post_cbs.is_empty() {
            return false;
        }
        let mut deduped = dedupe(std::mem::take(&mut state.pending_post_cbs));

        // A post flush already in progress absorbs the new batch instead
        // of starting a nested one.
        if let Some(active) = &mut state.active_post_cbs {
            active.append(&mut deduped);
            return false;
        }

        deduped.sort_by_key(Job::order);
        state.active_post_cbs = Some(deduped);
        state.post_index = 0;
        true
    });
    if !started {
        return;
    }

    loop {
        let job = with_state(|state| {
            let active = state.active_post_cbs.as_ref().expect("post flush active");
            active.get(state.post_index).cloned()
        });
        let Some(job) = job else {
            break;
        };
        check_recursive_updates(seen, &job);
        job.invoke();
        with_state(|state| state.post_index += 1);
    }

    with_state(|state| {
        state.active_post_cbs = None;
        state.post_index = 0;
    });
}

/// Flush post-phase callbacks.
pub fn flush_post_flush_cbs() {
    let mut seen = CountMap::new();
    flush_post_flush_cbs_inner(&mut seen);
}

fn flush_jobs_inner(seen: &mut CountMap) {
    with_state(|state| {
        state.is_flush_pending = false;
        state.is_flushing = true;
    });

    flush_pre_flush_cbs_with_parent(seen, None);

    // Sort before flushing: parents update before children (parents are
    // created first, so their jobs carry smaller ids), and a child
    // unmounted during a parent's update is skipped via its active flag.
    with_state(|state| state.queue.sort_by_key(Job::order));

    loop {
        let job = with_state(|state| state.queue.get(state.flush_index).cloned());
        let Some(job) = job else {
            break;
        };
        if job.is_active() {
            check_recursive_updates(seen, &job);
            job.invoke();
        }
        with_state(|state| state.flush_index += 1);
    }

    with_state(|state| {
        state.flush_index = 0;
        state.queue.clear();
    });

    flush_post_flush_cbs_inner(seen);

    let drained = with_state(|state| {
        state.is_flushing = false;
        state.queue.is_empty()
            && state.pending_pre_cbs.is_empty()
            && state.pending_post_cbs.is_empty()
    });
    if !drained {
        // Post callbacks queued more work: keep flushing until dry.
        flush_jobs_inner(seen);
    }
}

/// Drain all pending work: pre callbacks, the main queue, and post
/// callbacks, repeating until every queue is empty.
pub fn flush_jobs() {
    let already_flushing = with_state(|state| state.is_flushing);
    if already_flushing {
        return;
    }
    let mut seen = CountMap::new();
    flush_jobs_inner(&mut seen);

    // Deferred tick callbacks run once the drain settles.
    loop {
        let callbacks = with_state(|state| std::mem::take(&mut state.after_flush));
        if callbacks.is_empty() {
            break;
        }
        for cb in callbacks {
            cb();
        }
        let pending = with_state(|state| state.is_flush_pending);
        if pending {
            flush_jobs_inner(&mut seen);
        }
    }
}

/// Whether a flush has been scheduled but not yet driven.
pub fn has_pending_flush() -> bool {
    with_state(|state| state.is_flush_pending)
}

/// Drain pending work, then run `f`.
///
/// Everything mutated since the last drain is applied before `f`
/// observes the world. Called from inside a running job, `f` is deferred
/// to the end of the current flush instead.
pub fn next_tick<F: FnOnce() + 'static>(f: F) {
    let mut slot = Some(f);
    let deferred = with_state(|state| {
        if state.is_flushing {
            state
                .after_flush
                .push(Box::new(slot.take().expect("callback taken once")));
            true
        } else {
            false
        }
    });
    if !deferred {
        flush_jobs();
        if let Some(f) = slot {
            f();
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    fn recording_job(id: Option<u32>, log: &Rc<StdRefCell<Vec<u32>>>, tag: u32) -> Job {
        let log = Rc::clone(log);
        let f = move || log.borrow_mut().push(tag);
        match id {
            Some(id) => Job::with_id(id, f),
            None => Job::new(f),
        }
    }

    #[test]
    fn jobs_flush_in_ascending_id_order() {
        let log = Rc::new(StdRefCell::new(Vec::new()));

        // The child (id 2) is queued before the parent (id 1).
        let child = recording_job(Some(2), &log, 2);
        let parent = recording_job(Some(1), &log, 1);
        queue_job(&child);
        queue_job(&parent);

        flush_jobs();
        assert_eq!(*log.borrow(), vec![1, 2]);
    }

    #[test]
    fn duplicate_queueing_runs_once() {
        let log = Rc::new(StdRefCell::new(Vec::new()));
        let job = recording_job(Some(1), &log, 1);

        queue_job(&job);
        queue_job(&job);
        queue_job(&job);

        flush_jobs();
        assert_eq!(log.borrow().len(), 1);

        // After the flush the job can be queued again.
        queue_job(&job);
        flush_jobs();
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn idless_jobs_flush_last() {
        let log = Rc::new(StdRefCell::new(Vec::new()));
        let tail = recording_job(None, &log, 99);
        let head = recording_job(Some(5), &log, 5);

        queue_job(&tail);
        queue_job(&head);

        flush_jobs();
        assert_eq!(*log.borrow(), vec![5, 99]);
    }

    #[test]
    fn inactive_jobs_are_skipped() {
        let log = Rc::new(StdRefCell::new(Vec::new()));
        let job = recording_job(Some(1), &log, 1);

        queue_job(&job);
        job.set_active(false);
        flush_jobs();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn invalidate_removes_pending_job() {
        let log = Rc::new(StdRefCell::new(Vec::new()));
        let keep = recording_job(Some(1), &log, 1);
        let drop_me = recording_job(Some(2), &log, 2);

        queue_job(&keep);
        queue_job(&drop_me);
        invalidate_job(&drop_me);

        flush_jobs();
        assert_eq!(*log.borrow(), vec![1]);
    }

    #[test]
    fn job_queued_mid_flush_joins_the_same_flush() {
        let log = Rc::new(StdRefCell::new(Vec::new()));
        let late = recording_job(Some(10), &log, 10);

        let log_inner = Rc::clone(&log);
        let late_inner = late.clone();
        let early = Job::with_id(1, move || {
            log_inner.borrow_mut().push(1);
            queue_job(&late_inner);
        });

        queue_job(&early);
        flush_jobs();
        assert_eq!(*log.borrow(), vec![1, 10]);
    }

    #[test]
    fn pre_callbacks_run_before_queue_and_drain_fully() {
        let log = Rc::new(StdRefCell::new(Vec::new()));

        let main = recording_job(Some(1), &log, 100);
        queue_job(&main);

        // A pre callback that queues another pre callback: both must run
        // before the main queue.
        let log_inner = Rc::clone(&log);
        let chained = {
            let log = Rc::clone(&log);
            Job::new(move || log.borrow_mut().push(2))
        };
        let chained_inner = chained.clone();
        let first = Job::new(move || {
            log_inner.borrow_mut().push(1);
            queue_pre_flush_cb(&chained_inner);
        });
        queue_pre_flush_cb(&first);

        flush_jobs();
        assert_eq!(*log.borrow(), vec![1, 2, 100]);
    }

    #[test]
    fn pre_flush_on_behalf_of_a_job_bars_it_from_requeueing() {
        let log = Rc::new(StdRefCell::new(Vec::new()));
        let parent = recording_job(Some(1), &log, 1);

        // A pre callback triggered by the parent's own update tries to
        // queue the parent again; the bar must swallow it.
        let parent_inner = parent.clone();
        let pre = Job::new(move || queue_job(&parent_inner));
        queue_pre_flush_cb(&pre);

        flush_pre_flush_cbs_for(&parent);
        flush_jobs();
        assert!(log.borrow().is_empty());

        // Outside the barred window the same queueing goes through.
        queue_job(&parent);
        flush_jobs();
        assert_eq!(*log.borrow(), vec![1]);
    }

    #[test]
    fn post_callbacks_run_after_queue_in_id_order() {
        let log = Rc::new(StdRefCell::new(Vec::new()));

        let post_b = recording_job(Some(20), &log, 20);
        let post_a = recording_job(Some(10), &log, 10);
        let main = recording_job(Some(1), &log, 1);

        queue_post_flush_cb(&post_b);
        queue_post_flush_cb(&post_a);
        queue_job(&main);

        flush_jobs();
        assert_eq!(*log.borrow(), vec![1, 10, 20]);
    }

    #[test]
    fn nested_post_flush_appends_to_in_flight_batch() {
        let log = Rc::new(StdRefCell::new(Vec::new()));

        let tail = recording_job(None, &log, 2);
        let log_inner = Rc::clone(&log);
        let tail_inner = tail.clone();
        let head = Job::new(move || {
            log_inner.borrow_mut().push(1);
            queue_post_flush_cb(&tail_inner);
            // Starting a nested post flush must append, not recurse.
            flush_post_flush_cbs();
        });

        queue_post_flush_cb(&head);
        flush_jobs();
        assert_eq!(*log.borrow(), vec![1, 2]);
    }

    #[test]
    fn next_tick_observes_drained_state() {
        let log = Rc::new(StdRefCell::new(Vec::new()));
        let job = recording_job(Some(1), &log, 1);
        queue_job(&job);
        assert!(has_pending_flush());

        let log_inner = Rc::clone(&log);
        next_tick(move || log_inner.borrow_mut().push(2));
        assert_eq!(*log.borrow(), vec![1, 2]);
        assert!(!has_pending_flush());
    }

    #[test]
    fn next_tick_inside_a_job_defers_to_flush_end() {
        let log = Rc::new(StdRefCell::new(Vec::new()));

        let log_inner = Rc::clone(&log);
        let other = recording_job(Some(2), &log, 2);
        let other_inner = other.clone();
        let job = Job::with_id(1, move || {
            log_inner.borrow_mut().push(1);
            let log = Rc::clone(&log_inner);
            queue_job(&other_inner);
            next_tick(move || log.borrow_mut().push(3));
        });

        queue_job(&job);
        flush_jobs();
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
    }
}
