//! Queue Core - the page coordinator behind every disk-backed queue.
//!
//! The [`QueueCore`] provides:
//! - Blocking and non-blocking offer/get/drain over a chain of pages
//! - Page rotation with in-memory, background, or foreground disposal
//! - Guarded on-demand loading of spilled pages
//! - Disk usage backpressure
//! - The bounded-wait close/flush protocol

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::common::{Error, PageId, QueueConfig, Result};
use crate::queue::writer::{FlushScheduler, FlushTask, TaskId};
use crate::queue::QueueStats;
use crate::storage::page::Page;
use crate::storage::{PageStore, Serializer};

/// Page state, guarded by the core's single lock.
struct QueueState<E> {
    /// Page accepting new elements.
    write_page: Page<E>,

    /// Page being drained, or `None` when the reader shares `write_page`.
    read_page: Option<Page<E>>,

    /// Pages loaded from disk, not yet promoted to `read_page`.
    read_queue: BTreeMap<PageId, Page<E>>,

    /// Pages waiting for a background writer. `None` disables async spilling.
    disk_queue: Option<BTreeMap<PageId, Page<E>>>,

    /// Pages being written with the lock released.
    in_flight: BTreeSet<PageId>,

    /// Elements held by `in_flight` pages.
    in_flight_elements: usize,

    /// In-flight pages that close gave up on. Their files are deleted when
    /// the write lands.
    abandoned: BTreeSet<PageId>,

    /// Bumped by `clear()`; loads started under an older epoch are dropped.
    epoch: u64,
}

impl<E> QueueState<E> {
    /// Id of the page the reader is on.
    fn reader_id(&self) -> PageId {
        self.read_page
            .as_ref()
            .map_or(self.write_page.id(), |page| page.id())
    }

    /// The page the reader is on.
    fn reader_mut(&mut self) -> &mut Page<E> {
        match self.read_page.as_mut() {
            Some(page) => page,
            None => &mut self.write_page,
        }
    }

    /// Whether a page with this id is held in memory.
    fn holds(&self, id: PageId) -> bool {
        self.read_queue.contains_key(&id)
            || self.in_flight.contains(&id)
            || self
                .disk_queue
                .as_ref()
                .is_some_and(|queue| queue.contains_key(&id))
    }
}

/// What the reader did when its page ran dry.
enum Advance {
    /// The reader moved (or a load finished); retry the read.
    Moved,
    /// The next page is being written; wait for `page_written`.
    AwaitWrite,
    /// No unread element exists.
    Drained,
}

/// A background writer registration.
struct Flusher {
    scheduler: FlushScheduler,
    task: TaskId,
    /// Whether the scheduler belongs to this queue alone.
    dedicated: bool,
}

/// Coordinates the pages of one queue.
///
/// # Architecture
/// ```text
///   producers                                              consumers
///       │                                                      ▲
///       ▼                                                      │
/// ┌────────────┐  rotate  ┌────────────┐  flush   ┌──────┐    │
/// │ write_page │─────────▶│ disk_queue │─────────▶│ disk │    │
/// └────────────┘          └────────────┘          └──────┘    │
///       │                       │                     │ load  │
///       │ catch-up              │ promote             ▼       │
///       │                       │              ┌────────────┐ │
///       │                       └─────────────▶│ read_queue │ │
///       │                                      └────────────┘ │
///       │                                             │promote│
///       ▼                                             ▼       │
///                        ┌───────────┐                        │
///                        │ read_page │────────────────────────┘
///                        └───────────┘
/// ```
///
/// # Thread Safety
/// - `state`: one `Mutex` over every page; operations hold it for O(1) work
///   and release it around file I/O
/// - `not_full` / `not_empty` / `page_written`: `Condvar`s on `state`
/// - `page_load`: one-permit lock so only one thread reads pages at a time
/// - counters and the sticky error: atomics / `OnceLock`, readable without
///   the lock
///
/// # Invariants
/// - `read_page.id <= write_page.id`; pages are consumed in id order
/// - `queue_size` equals the elements held by all pages, in memory or on disk
pub struct QueueCore<E> {
    config: QueueConfig,
    store: PageStore,
    serializer: Arc<dyn Serializer<E>>,

    state: Mutex<QueueState<E>>,
    not_full: Condvar,
    not_empty: Condvar,
    page_written: Condvar,
    page_load: Mutex<()>,

    queue_size: AtomicU64,
    disk_queue_estimate: AtomicUsize,
    first_error: OnceLock<Arc<Error>>,
    closed: AtomicBool,
    close_outcome: OnceLock<Result<()>>,
    flusher: Mutex<Option<Flusher>>,
    stats: QueueStats,
}

impl<E: Send + 'static> QueueCore<E> {
    /// Open the queue stored in `config.directory`, starting its writers.
    ///
    /// The lowest page file found becomes the read page and one past the
    /// highest becomes the write page.
    ///
    /// # Errors
    /// - `Error::InvalidConfig` if `config` does not validate
    /// - I/O and corruption errors from reading the directory
    pub fn open(config: QueueConfig, serializer: Arc<dyn Serializer<E>>) -> Result<Arc<Self>> {
        config.validate()?;
        let (store, stored) = PageStore::open(&config.directory, config.compression)?;

        let queue_size = match stored.size_marker {
            Some(size) if !stored.ids.is_empty() => size,
            Some(_) => 0,
            None => {
                let mut size = 0u64;
                for &id in &stored.ids {
                    size += u64::from(store.read_header(id)?.count);
                }
                size
            }
        };

        let write_id = stored.last().map_or(PageId::FIRST, PageId::next);
        let read_page = match stored.first() {
            Some(first) => Some(
                store
                    .read_page(first, config.page_size, &*serializer, config.memory_doubling)?
                    .unwrap_or_else(|| Page::new(first, config.page_size, config.memory_doubling)),
            ),
            None => None,
        };

        log::debug!(
            "opened queue at {} with {} elements in {} page files",
            store.path().display(),
            queue_size,
            stored.ids.len()
        );

        let state = QueueState {
            write_page: Page::new(write_id, config.page_size, config.memory_doubling),
            read_page,
            read_queue: BTreeMap::new(),
            disk_queue: config.has_background_writer().then(BTreeMap::new),
            in_flight: BTreeSet::new(),
            in_flight_elements: 0,
            abandoned: BTreeSet::new(),
            epoch: 0,
        };

        let core = Arc::new(Self {
            config,
            store,
            serializer,
            state: Mutex::new(state),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            page_written: Condvar::new(),
            page_load: Mutex::new(()),
            queue_size: AtomicU64::new(queue_size),
            disk_queue_estimate: AtomicUsize::new(0),
            first_error: OnceLock::new(),
            closed: AtomicBool::new(false),
            close_outcome: OnceLock::new(),
            flusher: Mutex::new(None),
            stats: QueueStats::new(),
        });

        if core.config.has_background_writer() {
            core.start_flusher()?;
        }
        Ok(core)
    }

    fn start_flusher(self: &Arc<Self>) -> Result<()> {
        let threads = self.config.writer_threads.max(1);
        let interval = self.config.flush_interval;
        let (scheduler, dedicated) = if self.config.shared_scheduler {
            (FlushScheduler::shared(threads, interval)?, false)
        } else {
            (FlushScheduler::new("spillq-writer", threads, interval)?, true)
        };

        let task: Arc<dyn FlushTask> = Arc::new(CoreFlushTask {
            core: Arc::downgrade(self),
        });
        let task = scheduler.register(task);
        *self.flusher.lock() = Some(Flusher {
            scheduler,
            task,
            dedicated,
        });
        Ok(())
    }
}

impl<E> QueueCore<E> {
    // ========================================================================
    // Public API: Insert
    // ========================================================================

    /// Append an element, waiting for disk space until `deadline`.
    ///
    /// `None` waits indefinitely. Returns the element back if the deadline
    /// passed while the disk was over its byte ceiling.
    ///
    /// # Errors
    /// - `Error::Closed` / `Error::Interrupted` when the queue closes
    /// - `Error::Background` after a background write failed
    /// - `Error::Io` if a foreground write fails; the element is enqueued and
    ///   the page that failed to spill stays in memory
    pub fn offer(&self, element: E, deadline: Option<Instant>) -> Result<Option<E>> {
        self.ensure_usable()?;

        let encoded = if self.config.memory_doubling {
            let mut bytes = Vec::new();
            self.serializer.serialize(&element, &mut bytes)?;
            Some(bytes)
        } else {
            None
        };

        let mut state = self.state.lock();
        loop {
            self.check_background_error()?;

            if !state.write_page.is_full() {
                state.write_page.add(element, encoded);
                self.queue_size.fetch_add(1, Ordering::AcqRel);
                drop(state);
                self.not_empty.notify_one();
                return Ok(None);
            }

            if self.disk_full() {
                if !self.wait(&self.not_full, &mut state, deadline)? {
                    return Ok(Some(element));
                }
                continue;
            }

            // Rotate: the new element opens the next page.
            let mut fresh = Page::new(
                state.write_page.id().next(),
                self.config.page_size,
                self.config.memory_doubling,
            );
            fresh.add(element, encoded);
            let full = std::mem::replace(&mut state.write_page, fresh);
            self.queue_size.fetch_add(1, Ordering::AcqRel);

            let disposed = self.dispose(&mut state, full);
            drop(state);
            self.not_empty.notify_one();
            return disposed.map(|_| None);
        }
    }

    /// Find a home for a page that just stopped being the write page.
    fn dispose(&self, state: &mut MutexGuard<'_, QueueState<E>>, full: Page<E>) -> Result<()> {
        if state.read_page.is_none() {
            // The reader is still on this page.
            state.read_page = Some(full);
            self.stats.fast_writes.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        if let Some(queue) = state.disk_queue.as_mut() {
            if queue.len() < self.config.max_pages {
                queue.insert(full.id(), full);
                self.disk_queue_estimate.fetch_add(1, Ordering::Relaxed);
                self.stats.fast_writes.fetch_add(1, Ordering::Relaxed);
                self.wake_flusher();
                return Ok(());
            }
        }

        self.stats.slow_writes.fetch_add(1, Ordering::Relaxed);
        match self.write_unlocked(state, full) {
            Ok(()) => Ok(()),
            Err((page, e)) => {
                log::warn!("foreground write of {} failed: {}", page.id(), e);
                state.read_queue.insert(page.id(), page);
                Err(e)
            }
        }
    }

    // ========================================================================
    // Public API: Remove
    // ========================================================================

    /// Remove the head element, waiting until `deadline` for one to arrive.
    pub fn poll(&self, deadline: Option<Instant>) -> Result<Option<E>> {
        self.fetch(deadline, Page::poll)
    }

    /// Copy of the head element, without removing it. Never blocks.
    pub fn peek(&self) -> Result<Option<E>>
    where
        E: Clone,
    {
        self.fetch(Some(Instant::now()), |page| page.peek().cloned())
    }

    /// Shared get loop: `take` reads from the reader's page.
    fn fetch<R>(
        &self,
        deadline: Option<Instant>,
        mut take: impl FnMut(&mut Page<E>) -> Option<R>,
    ) -> Result<Option<R>> {
        self.ensure_usable()?;

        let mut state = self.state.lock();
        loop {
            self.check_background_error()?;

            let reader = state.reader_mut();
            let before = reader.len();
            if let Some(found) = take(reader) {
                let removed = before - state.reader_mut().len();
                self.release_size(removed);
                return Ok(Some(found));
            }

            match self.advance_reader(&mut state)? {
                Advance::Moved => continue,
                Advance::AwaitWrite => {
                    if !self.wait(&self.page_written, &mut state, deadline)? {
                        return Ok(None);
                    }
                }
                Advance::Drained => {
                    if !self.wait(&self.not_empty, &mut state, deadline)? {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Move up to `max` elements into `sink`, returning how many moved.
    ///
    /// Never waits for new elements; a page still being written is waited
    /// for since its elements are already enqueued.
    pub fn drain_to<S: Extend<E>>(&self, sink: &mut S, max: usize) -> Result<usize> {
        self.ensure_usable()?;

        let mut state = self.state.lock();
        let mut moved = 0;
        while moved < max {
            self.check_background_error()?;

            let now_moved = state.reader_mut().drain_to(sink, moved, max);
            self.release_size(now_moved - moved);
            moved = now_moved;
            if moved >= max {
                break;
            }

            match self.advance_reader(&mut state)? {
                Advance::Moved => {}
                Advance::AwaitWrite => {
                    self.wait(&self.page_written, &mut state, None)?;
                }
                Advance::Drained => break,
            }
        }
        Ok(moved)
    }

    /// Step the reader past an exhausted page.
    fn advance_reader(&self, state: &mut MutexGuard<'_, QueueState<E>>) -> Result<Advance> {
        let next = state.reader_id().next();

        if let Some(page) = state.read_queue.remove(&next) {
            self.retire_read_page(state, Some(page))?;
            return Ok(Advance::Moved);
        }

        if let Some(page) = state.disk_queue.as_mut().and_then(|queue| queue.remove(&next)) {
            self.disk_queue_estimate.fetch_sub(1, Ordering::Relaxed);
            self.retire_read_page(state, Some(page))?;
            return Ok(Advance::Moved);
        }

        let write_id = state.write_page.id();
        if next == write_id {
            // Caught up: read straight from the write page.
            self.retire_read_page(state, None)?;
            self.not_full.notify_all();
            return Ok(Advance::Moved);
        }

        if next < write_id {
            if state.in_flight.contains(&next) {
                return Ok(Advance::AwaitWrite);
            }
            self.load_pages(state, next)?;
            return Ok(Advance::Moved);
        }

        Ok(Advance::Drained)
    }

    /// Replace the read page, deleting the consumed page's file.
    fn retire_read_page(
        &self,
        state: &mut MutexGuard<'_, QueueState<E>>,
        next: Option<Page<E>>,
    ) -> Result<()> {
        let consumed = std::mem::replace(&mut state.read_page, next);
        if let Some(page) = consumed {
            debug_assert!(page.is_empty(), "retired {} still holds elements", page.id());
            if page.file_bytes().is_some() {
                self.store.delete_page(page.id())?;
                self.stats.pages_deleted.fetch_add(1, Ordering::Relaxed);
                self.not_full.notify_all();
            }
        }
        Ok(())
    }

    /// Read spilled pages starting at `first` into the read queue.
    ///
    /// Only one thread loads at a time. A thread that finds the loader busy
    /// waits for it with the state lock released and returns, so its caller
    /// re-checks the read queue.
    fn load_pages(&self, state: &mut MutexGuard<'_, QueueState<E>>, first: PageId) -> Result<()> {
        let Some(_permit) = self.page_load.try_lock() else {
            MutexGuard::unlocked(state, || drop(self.page_load.lock()));
            return Ok(());
        };

        let batch = self.config.min_pages.max(1);
        let epoch = state.epoch;
        let write_id = state.write_page.id();
        let mut ids = Vec::with_capacity(batch);
        let mut id = first;
        while ids.len() < batch && id < write_id && !state.holds(id) {
            ids.push(id);
            id = id.next();
        }

        let loaded = MutexGuard::unlocked(state, || -> Result<Vec<Page<E>>> {
            let mut pages = Vec::with_capacity(ids.len());
            for &id in &ids {
                match self.store.read_page(
                    id,
                    self.config.page_size,
                    &*self.serializer,
                    self.config.memory_doubling,
                )? {
                    Some(page) => pages.push(page),
                    None => {
                        log::warn!("{} is missing from {}, skipping it", id, self.store.path().display());
                        pages.push(Page::new(id, self.config.page_size, self.config.memory_doubling));
                    }
                }
            }
            Ok(pages)
        })?;

        self.stats
            .pages_read
            .fetch_add(loaded.len() as u64, Ordering::Relaxed);
        if state.epoch != epoch {
            log::debug!("dropping {} pages loaded before a clear", loaded.len());
            return Ok(());
        }
        let reader_id = state.reader_id();
        for page in loaded {
            if page.id() > reader_id && !state.read_queue.contains_key(&page.id()) {
                state.read_queue.insert(page.id(), page);
            }
        }
        Ok(())
    }

    // ========================================================================
    // Background flushing
    // ========================================================================

    /// Write disk-queue pages until it is down to `min_pages`.
    ///
    /// The newest pages go first: the oldest are the next to be read and
    /// are cheapest to keep in memory.
    pub(crate) fn flush_pending(&self) {
        if self.closed.load(Ordering::Acquire) || self.first_error.get().is_some() {
            return;
        }

        let mut state = self.state.lock();
        while !self.closed.load(Ordering::Acquire) {
            let Some(queue) = state.disk_queue.as_mut() else {
                return;
            };
            if queue.len() <= self.config.min_pages {
                return;
            }
            let Some((_, page)) = queue.pop_last() else {
                return;
            };
            self.disk_queue_estimate.fetch_sub(1, Ordering::Relaxed);

            if let Err((page, e)) = self.write_unlocked(&mut state, page) {
                log::error!("background write of {} failed: {}", page.id(), e);
                if let Some(queue) = state.disk_queue.as_mut() {
                    queue.insert(page.id(), page);
                    self.disk_queue_estimate.fetch_add(1, Ordering::Relaxed);
                }
                self.record_background_error(e);
                return;
            }
        }
    }

    /// Write a page with the state lock released.
    ///
    /// The page is tracked as in flight meanwhile, so readers wait for it
    /// instead of looking for a file that does not exist yet. On failure
    /// the page is handed back.
    fn write_unlocked(
        &self,
        state: &mut MutexGuard<'_, QueueState<E>>,
        page: Page<E>,
    ) -> std::result::Result<(), (Page<E>, Error)> {
        let id = page.id();
        let elements = page.len();
        state.in_flight.insert(id);
        state.in_flight_elements += elements;

        let written = MutexGuard::unlocked(state, || self.store.write_page(&page, &*self.serializer));

        state.in_flight.remove(&id);
        state.in_flight_elements -= elements;
        self.page_written.notify_all();

        if state.abandoned.remove(&id) {
            // Close already subtracted these elements from the size marker.
            if written.is_ok() {
                if let Err(e) = self.store.delete_page(id) {
                    log::error!("removing abandoned {} failed: {}", id, e);
                }
            }
            return Ok(());
        }

        match written {
            Ok(_) => {
                self.stats.pages_written.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => Err((page, e)),
        }
    }

    /// Make `error` sticky and wake every waiter. Called with the state lock held.
    fn record_background_error(&self, error: Error) {
        let _ = self.first_error.set(Arc::new(error));
        self.not_full.notify_all();
        self.not_empty.notify_all();
        self.page_written.notify_all();
    }

    fn wake_flusher(&self) {
        if let Some(flusher) = self.flusher.lock().as_ref() {
            flusher.scheduler.wake();
        }
    }

    // ========================================================================
    // Public API: Clear and close
    // ========================================================================

    /// Drop every element and delete every page file.
    pub fn clear(&self) -> Result<()> {
        self.ensure_usable()?;

        let mut state = self.state.lock();
        while !state.in_flight.is_empty() {
            self.page_written.wait(&mut state);
        }

        state.epoch += 1;
        state.write_page = Page::new(PageId::FIRST, self.config.page_size, self.config.memory_doubling);
        if let Some(page) = state.read_page.as_mut() {
            page.clear();
        }
        state.read_page = None;
        state.read_queue.clear();
        if let Some(queue) = state.disk_queue.as_mut() {
            queue.clear();
        }
        self.disk_queue_estimate.store(0, Ordering::Relaxed);
        self.queue_size.store(0, Ordering::Release);

        self.store.clear()?;
        self.not_full.notify_all();
        Ok(())
    }

    /// Flush everything to disk and stop the background writers.
    ///
    /// Idempotent: concurrent and later callers get the first caller's
    /// outcome. Pages that cannot be written within `termination_wait` are
    /// dropped, and the persisted size is reduced by their elements.
    ///
    /// # Errors
    /// Returns the sticky background error if one occurred, otherwise the
    /// first error hit while flushing.
    pub fn close(&self) -> Result<()> {
        self.close_outcome.get_or_init(|| self.shutdown()).clone()
    }

    fn shutdown(&self) -> Result<()> {
        let deadline = Instant::now() + self.config.termination_wait;
        self.mark_closed();
        self.stop_flusher(deadline);

        let mut state = self.state.lock();
        while !state.in_flight.is_empty() {
            if self.page_written.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }

        let mut pending: Vec<Page<E>> = Vec::new();
        pending.extend(state.read_page.take());
        pending.extend(std::mem::take(&mut state.read_queue).into_values());
        if let Some(queue) = state.disk_queue.as_mut() {
            pending.extend(std::mem::take(queue).into_values());
        }
        let write_id = state.write_page.id();
        pending.push(std::mem::replace(
            &mut state.write_page,
            Page::new(write_id, 1, false),
        ));
        self.disk_queue_estimate.store(0, Ordering::Relaxed);

        let dirty = state.in_flight.len() + pending.iter().filter(|page| page.needs_flush()).count();
        log::debug!("closing {} with {} dirty pages", self.store.path().display(), dirty);

        let mut lost_pages = state.in_flight.len();
        let mut lost_elements = state.in_flight_elements as u64;
        let still_writing = state.in_flight.clone();
        state.abandoned.extend(still_writing);
        let mut failure: Option<Error> = None;

        for page in pending {
            if !page.needs_flush() {
                if page.is_empty() && page.file_bytes().is_some() {
                    if let Err(e) = self.store.delete_page(page.id()) {
                        failure.get_or_insert(e);
                    }
                }
                continue;
            }
            if Instant::now() >= deadline {
                lost_pages += 1;
                lost_elements += page.len() as u64;
                // A stale file would bring back consumed elements.
                if page.file_bytes().is_some() {
                    if let Err(e) = self.store.delete_page(page.id()) {
                        failure.get_or_insert(e);
                    }
                }
                continue;
            }
            match self.store.write_page(&page, &*self.serializer) {
                Ok(_) => {
                    self.stats.pages_written.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    log::error!("writing {} on close failed: {}", page.id(), e);
                    lost_pages += 1;
                    lost_elements += page.len() as u64;
                    failure.get_or_insert(e);
                }
            }
        }
        drop(state);

        if lost_pages > 0 && !self.config.silent {
            log::warn!(
                "closing {} lost {} pages ({} elements) not flushed within {:?}",
                self.store.path().display(),
                lost_pages,
                lost_elements,
                self.config.termination_wait
            );
        }

        let size = self.len().saturating_sub(lost_elements);
        let marker = self.store.write_size_marker(size);

        if let Some(e) = self.first_error.get() {
            return Err(Error::Background(Arc::clone(e)));
        }
        if let Some(e) = failure {
            return Err(e);
        }
        marker
    }

    /// Stop background writers without flushing. Used when a queue handle
    /// is dropped unclosed.
    pub(crate) fn abandon(&self) {
        if self.close_outcome.get().is_some() {
            return;
        }
        self.mark_closed();
        self.stop_flusher(Instant::now() + self.config.termination_wait);
        log::debug!("abandoned queue at {} without closing", self.store.path().display());
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
        let _state = self.state.lock();
        self.not_full.notify_all();
        self.not_empty.notify_all();
        self.page_written.notify_all();
    }

    fn stop_flusher(&self, deadline: Instant) {
        let Some(flusher) = self.flusher.lock().take() else {
            return;
        };
        flusher.scheduler.deregister(flusher.task);
        if flusher.dedicated && !flusher.scheduler.shutdown(deadline) && !self.config.silent {
            log::warn!(
                "background writers of {} still running after termination wait",
                self.store.path().display()
            );
        }
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Elements currently enqueued.
    #[inline]
    pub fn len(&self) -> u64 {
        self.queue_size.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Bytes held by page files.
    pub fn disk_byte_usage(&self) -> u64 {
        self.store.disk_byte_usage()
    }

    /// Pages waiting for a background writer (advisory).
    pub fn disk_queue_len(&self) -> usize {
        self.disk_queue_estimate.load(Ordering::Relaxed)
    }

    pub fn store(&self) -> &PageStore {
        &self.store
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    // ========================================================================
    // Internal: guards and waits
    // ========================================================================

    /// Subtract consumed elements from the size, saturating at zero.
    fn release_size(&self, removed: usize) {
        if removed == 0 {
            return;
        }
        let _ = self
            .queue_size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |size| {
                Some(size.saturating_sub(removed as u64))
            });
    }

    fn disk_full(&self) -> bool {
        self.config.disk_max_bytes > 0 && self.store.disk_byte_usage() > self.config.disk_max_bytes
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        self.check_background_error()
    }

    fn check_background_error(&self) -> Result<()> {
        match self.first_error.get() {
            Some(e) => Err(Error::Background(Arc::clone(e))),
            None => Ok(()),
        }
    }

    /// Wait on `condvar` until notified or `deadline`.
    ///
    /// Returns `Ok(false)` if the deadline had already passed. Callers
    /// re-check their predicate after every wake-up, spurious or not.
    fn wait(
        &self,
        condvar: &Condvar,
        state: &mut MutexGuard<'_, QueueState<E>>,
        deadline: Option<Instant>,
    ) -> Result<bool> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Interrupted);
        }
        match deadline {
            None => condvar.wait(state),
            Some(deadline) => {
                if Instant::now() >= deadline {
                    return Ok(false);
                }
                condvar.wait_until(state, deadline);
            }
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Interrupted);
        }
        Ok(true)
    }
}

/// Flush task registered with a scheduler on behalf of one queue.
///
/// Holds the core weakly so a forgotten registration cannot keep a
/// dropped queue alive.
struct CoreFlushTask<E> {
    core: Weak<QueueCore<E>>,
}

impl<E: Send + 'static> FlushTask for CoreFlushTask<E> {
    fn flush_pass(&self) {
        if let Some(core) = self.core.upgrade() {
            core.flush_pending();
        }
    }
}
