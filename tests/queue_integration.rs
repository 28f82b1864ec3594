//! Integration tests for the disk-backed queue.
//!
//! These tests exercise background writers, blocking waits across threads,
//! and the FIFO property over random workloads.

use proptest::prelude::*;
use spillq::{DiskBackedQueue, Error, FlushScheduler, I64Serializer, Offer, QueueConfig, Serializer};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

fn create_queue(config: impl FnOnce(QueueConfig) -> QueueConfig) -> (Arc<DiskBackedQueue<i64>>, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let config = config(QueueConfig::new(dir.path().join("queue")));
    (Arc::new(DiskBackedQueue::open(config, I64Serializer).unwrap()), dir)
}

/// Many producers and consumers: nothing lost, nothing duplicated, and
/// each producer's elements reach any one consumer in order.
#[test]
fn test_concurrent_producers_and_consumers() {
    const PRODUCERS: i64 = 4;
    const PER_PRODUCER: i64 = 500;
    const TOTAL: usize = (PRODUCERS * PER_PRODUCER) as usize;

    let (queue, _dir) = create_queue(|c| c.page_size(8).pages(1, 3).writer_threads(2));
    let received = Arc::new(AtomicUsize::new(0));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for seq in 0..PER_PRODUCER {
                    queue.put(p * 1_000_000 + seq).unwrap();
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..2)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let received = Arc::clone(&received);
            thread::spawn(move || {
                let mut seen = Vec::new();
                while received.load(Ordering::SeqCst) < TOTAL {
                    if let Some(v) = queue.poll_timeout(Duration::from_millis(10)).unwrap() {
                        received.fetch_add(1, Ordering::SeqCst);
                        seen.push(v);
                    }
                }
                seen
            })
        })
        .collect();

    for handle in producers {
        handle.join().unwrap();
    }
    let mut all = Vec::with_capacity(TOTAL);
    for handle in consumers {
        let seen = handle.join().unwrap();
        let mut last: HashMap<i64, i64> = HashMap::new();
        for &v in &seen {
            let (producer, seq) = (v / 1_000_000, v % 1_000_000);
            if let Some(&prev) = last.get(&producer) {
                assert!(seq > prev, "producer {} out of order: {} after {}", producer, seq, prev);
            }
            last.insert(producer, seq);
        }
        all.extend(seen);
    }

    all.sort_unstable();
    let mut expected: Vec<i64> = (0..PRODUCERS)
        .flat_map(|p| (0..PER_PRODUCER).map(move |seq| p * 1_000_000 + seq))
        .collect();
    expected.sort_unstable();
    assert_eq!(all, expected);
    assert!(queue.is_empty());
    queue.close().unwrap();
}

/// A producer blocked on the disk ceiling resumes once consumers free space.
#[test]
fn test_blocked_offer_resumes_after_drain() {
    let (queue, _dir) = create_queue(|c| c.page_size(2).writer_threads(0).disk_max_bytes(1));
    for i in 0..6 {
        queue.put(i).unwrap();
    }

    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.offer_timeout(6, Duration::from_secs(10)).unwrap())
    };

    thread::sleep(Duration::from_millis(50));
    for i in 0..5 {
        assert_eq!(queue.poll().unwrap(), Some(i));
    }

    assert_eq!(producer.join().unwrap(), Offer::Accepted);
    assert_eq!(queue.poll().unwrap(), Some(5));
    assert_eq!(queue.poll().unwrap(), Some(6));
}

/// A consumer blocked in `take` is woken by close.
#[test]
fn test_close_interrupts_blocked_take() {
    let (queue, _dir) = create_queue(|c| c.page_size(4));
    let started = Arc::new(Barrier::new(2));

    let consumer = {
        let queue = Arc::clone(&queue);
        let started = Arc::clone(&started);
        thread::spawn(move || {
            started.wait();
            queue.take()
        })
    };

    started.wait();
    thread::sleep(Duration::from_millis(50));
    queue.close().unwrap();

    assert!(matches!(consumer.join().unwrap(), Err(Error::Interrupted)));
}

/// A consumer blocked in `take` receives an element offered later.
#[test]
fn test_take_waits_for_producer() {
    let (queue, _dir) = create_queue(|c| c.page_size(4));

    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.take().unwrap())
    };

    thread::sleep(Duration::from_millis(20));
    queue.put(42).unwrap();
    assert_eq!(consumer.join().unwrap(), 42);
}

/// Racing closers all observe the same outcome.
#[test]
fn test_concurrent_close_is_idempotent() {
    let (queue, dir) = create_queue(|c| c.page_size(3));
    for i in 0..20 {
        queue.put(i).unwrap();
    }

    let closers: Vec<_> = (0..4)
        .map(|_| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.close())
        })
        .collect();
    for handle in closers {
        assert!(handle.join().unwrap().is_ok());
    }
    drop(queue);

    let config = QueueConfig::new(dir.path().join("queue")).page_size(3);
    let queue = DiskBackedQueue::<i64>::open(config, I64Serializer).unwrap();
    assert_eq!(queue.len(), 20);
}

/// Queues sharing the process-wide scheduler spill and recover independently.
#[test]
fn test_shared_scheduler_serves_many_queues() {
    let queues: Vec<_> = (0..3)
        .map(|_| create_queue(|c| c.page_size(2).pages(1, 4).writer_threads(0).shared_scheduler(true)))
        .collect();

    for (n, (queue, _)) in queues.iter().enumerate() {
        for i in 0..40 {
            queue.put(n as i64 * 100 + i).unwrap();
        }
    }
    for (n, (queue, _)) in queues.iter().enumerate() {
        for i in 0..40 {
            assert_eq!(queue.take().unwrap(), n as i64 * 100 + i);
        }
        queue.close().unwrap();
    }

    // Closing a queue leaves the shared scheduler running for others.
    let scheduler = FlushScheduler::shared(1, Duration::from_millis(10)).unwrap();
    let (queue, _dir) = create_queue(|c| c.page_size(2).shared_scheduler(true));
    for i in 0..10 {
        queue.put(i).unwrap();
    }
    assert!(scheduler.task_count() >= 1);
    queue.close().unwrap();
}

/// Background writers bring the disk queue down while producers keep going.
#[test]
fn test_background_writer_spills_pages() {
    let (queue, _dir) = create_queue(|c| {
        c.page_size(4)
            .pages(1, 16)
            .writer_threads(1)
            .flush_interval(Duration::from_millis(1))
    });
    for i in 0..200 {
        queue.put(i).unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while queue.stats().pages_written == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(queue.stats().pages_written > 0);
    assert!(queue.disk_byte_usage() > 0);

    let mut drained = Vec::new();
    queue.drain_to(&mut drained, usize::MAX).unwrap();
    assert_eq!(drained, (0..200).collect::<Vec<_>>());
    queue.close().unwrap();
}

#[derive(Debug, Clone)]
enum Op {
    Push(i64),
    Poll,
    Drain(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => any::<i64>().prop_map(Op::Push),
        2 => Just(Op::Poll),
        1 => (1usize..10).prop_map(Op::Drain),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// The queue behaves like a `VecDeque` whatever the page geometry.
    #[test]
    fn prop_fifo_matches_model(
        page_size in 1usize..6,
        max_pages in 0usize..4,
        writers in 0usize..2,
        ops in prop::collection::vec(op_strategy(), 1..200),
    ) {
        let (queue, _dir) = create_queue(|c| {
            c.page_size(page_size)
                .pages(max_pages.min(1), max_pages)
                .writer_threads(writers)
        });
        let mut model = VecDeque::new();

        for op in ops {
            match op {
                Op::Push(v) => {
                    queue.put(v).unwrap();
                    model.push_back(v);
                }
                Op::Poll => {
                    // A page still being written is waited for within the timeout.
                    let polled = if model.is_empty() {
                        queue.poll().unwrap()
                    } else {
                        queue.poll_timeout(Duration::from_secs(5)).unwrap()
                    };
                    prop_assert_eq!(polled, model.pop_front());
                }
                Op::Drain(max) => {
                    let mut sink = Vec::new();
                    let moved = queue.drain_to(&mut sink, max).unwrap();
                    let expected: Vec<i64> = (0..max).map_while(|_| model.pop_front()).collect();
                    prop_assert_eq!(moved, expected.len());
                    prop_assert_eq!(sink, expected);
                }
            }
            prop_assert_eq!(queue.len(), model.len() as u64);
        }

        let mut rest = Vec::new();
        queue.drain_to(&mut rest, usize::MAX).unwrap();
        prop_assert_eq!(rest, Vec::from(model));
        queue.close().unwrap();
    }
}

/// `I64Serializer` that stalls on one chosen value.
struct StallingSerializer {
    value: i64,
    on_write: bool,
    on_read: bool,
    stall: Duration,
}

impl StallingSerializer {
    fn writes(value: i64, stall: Duration) -> Self {
        Self { value, on_write: true, on_read: false, stall }
    }

    fn reads(value: i64, stall: Duration) -> Self {
        Self { value, on_write: false, on_read: true, stall }
    }
}

impl Serializer<i64> for StallingSerializer {
    fn serialize(&self, element: &i64, out: &mut Vec<u8>) -> spillq::Result<()> {
        if self.on_write && *element == self.value {
            thread::sleep(self.stall);
        }
        I64Serializer.serialize(element, out)
    }

    fn deserialize(&self, bytes: &[u8]) -> spillq::Result<i64> {
        let element = I64Serializer.deserialize(bytes)?;
        if self.on_read && element == self.value {
            thread::sleep(self.stall);
        }
        Ok(element)
    }
}

fn create_stalling_queue(
    serializer: StallingSerializer,
    config: impl FnOnce(QueueConfig) -> QueueConfig,
) -> (Arc<DiskBackedQueue<i64>>, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let config = config(QueueConfig::new(dir.path().join("queue")));
    (Arc::new(DiskBackedQueue::open(config, serializer).unwrap()), dir)
}

/// A page being loaded while the queue is cleared must not come back.
#[test]
fn test_clear_discards_page_loaded_concurrently() {
    let (queue, _dir) = create_stalling_queue(
        StallingSerializer::reads(1, Duration::from_millis(300)),
        |c| c.page_size(1).writer_threads(0),
    );
    for i in 0..5 {
        queue.put(i).unwrap();
    }
    assert_eq!(queue.poll().unwrap(), Some(0));

    // The consumer reads page 1 from disk and stalls deserializing it.
    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.poll().unwrap())
    };
    thread::sleep(Duration::from_millis(100));
    queue.clear().unwrap();

    assert_eq!(consumer.join().unwrap(), None);
    assert_eq!(queue.len(), 0);

    for i in 100..103 {
        queue.put(i).unwrap();
    }
    let mut drained = Vec::new();
    queue.drain_to(&mut drained, usize::MAX).unwrap();
    assert_eq!(drained, vec![100, 101, 102]);
    assert_eq!(queue.len(), 0);
}

/// A timed poll does not wait past its deadline for a page being written.
#[test]
fn test_poll_timeout_bounded_by_page_write() {
    let (queue, _dir) = create_stalling_queue(
        StallingSerializer::writes(1, Duration::from_millis(400)),
        |c| c.page_size(1).writer_threads(0),
    );
    queue.put(0).unwrap();
    queue.put(1).unwrap();
    assert_eq!(queue.poll().unwrap(), Some(0));

    // Rotating to page 2 writes page 1 in the foreground.
    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.put(2).unwrap())
    };
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    assert_eq!(queue.poll_timeout(Duration::from_millis(20)).unwrap(), None);
    assert_eq!(queue.peek().unwrap(), None);
    assert!(started.elapsed() < Duration::from_millis(300));

    producer.join().unwrap();
    assert_eq!(queue.poll_timeout(Duration::from_secs(5)).unwrap(), Some(1));
    assert_eq!(queue.poll().unwrap(), Some(2));
}

/// A write still running when close gives up leaves no file behind, so the
/// persisted size matches what reopening finds.
#[test]
fn test_write_abandoned_by_close_is_removed() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("queue");
    {
        let config = QueueConfig::new(&path)
            .page_size(1)
            .writer_threads(0)
            .termination_wait(Duration::from_millis(50))
            .silent(true);
        let queue = Arc::new(
            DiskBackedQueue::open(config, StallingSerializer::writes(1, Duration::from_millis(400)))
                .unwrap(),
        );
        queue.put(0).unwrap();
        queue.put(1).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.put(2))
        };
        thread::sleep(Duration::from_millis(100));
        queue.close().unwrap();
        producer.join().unwrap().unwrap();
    }

    let queue = DiskBackedQueue::<i64>::open(QueueConfig::new(&path).page_size(1), I64Serializer).unwrap();
    assert_eq!(queue.len(), 0);
    let mut drained = Vec::new();
    queue.drain_to(&mut drained, usize::MAX).unwrap();
    assert!(drained.is_empty());
    assert_eq!(queue.len(), 0);
}

/// A failed background write is reported by every later call.
#[test]
fn test_background_failure_is_sticky() {
    let (queue, dir) = create_queue(|c| {
        c.page_size(1)
            .pages(1, 4)
            .writer_threads(1)
            .flush_interval(Duration::from_millis(1))
            .silent(true)
    });
    std::fs::remove_dir_all(dir.path().join("queue")).unwrap();
    for i in 0..4 {
        queue.put(i).unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match queue.peek() {
            Err(Error::Background(_)) => break,
            Ok(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(1)),
            other => panic!("expected a background failure, got {:?}", other),
        }
    }

    assert!(matches!(queue.put(9), Err(Error::Background(_))));
    assert!(matches!(queue.poll(), Err(Error::Background(_))));
    match queue.close() {
        Err(Error::Background(cause)) => assert!(cause.is_io()),
        other => panic!("expected a background failure, got {:?}", other),
    }
}

/// A failed foreground write reports `Io` but keeps every element.
#[test]
fn test_foreground_failure_keeps_elements() {
    let (queue, dir) = create_queue(|c| c.page_size(1).writer_threads(0).silent(true));
    queue.put(0).unwrap();
    queue.put(1).unwrap();
    std::fs::remove_dir_all(dir.path().join("queue")).unwrap();

    assert!(matches!(queue.put(2), Err(Error::Io(_))));
    assert_eq!(queue.len(), 3);
    for i in 0..3 {
        assert_eq!(queue.poll().unwrap(), Some(i));
    }
    assert!(queue.is_empty());
}
