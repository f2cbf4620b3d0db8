//! Bounded worker pool for source reads.
//!
//! Source reads may block (network streams, transcoders), so they never run
//! on the tick thread. Each submission gets its own reply channel and cancel
//! flag. A cancelled read that is already running is allowed to finish; its
//! result is simply discarded.

use crate::source::SourceHandle;
use bytes::Bytes;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Result of one source read.
#[derive(Debug, Clone)]
pub enum ReadOutcome {
    /// Whatever the source returned, possibly empty or short
    Data(Bytes),
    /// The read errored or panicked
    Failed(String),
    /// Cancelled before a worker picked it up
    Cancelled,
}

struct ReadJob {
    source: SourceHandle,
    cancel: Arc<AtomicBool>,
    reply: Sender<ReadOutcome>,
}

/// An in-flight read.
pub struct PendingRead {
    rx: Receiver<ReadOutcome>,
    cancel: Arc<AtomicBool>,
}

impl PendingRead {
    /// The outcome if the read already finished. Never blocks.
    pub fn poll(&self) -> Option<ReadOutcome> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Disconnected) => {
                Some(ReadOutcome::Failed("read worker went away".to_string()))
            }
            Err(TryRecvError::Empty) => None,
        }
    }

    /// Wait for the outcome until `deadline`. `None` means still running.
    pub fn wait_until(&self, deadline: Instant) -> Option<ReadOutcome> {
        if let Some(outcome) = self.poll() {
            return Some(outcome);
        }
        match self.rx.recv_deadline(deadline) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                Some(ReadOutcome::Failed("read worker went away".to_string()))
            }
        }
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

/// Fixed set of named reader threads fed from one job channel.
pub struct ReadPool {
    jobs: Mutex<Option<Sender<ReadJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    submitted: AtomicU64,
    shut_down: AtomicBool,
}

impl ReadPool {
    /// Spawn `workers` reader threads (at least one).
    pub fn new(workers: usize) -> io::Result<Self> {
        let (tx, rx) = channel::unbounded::<ReadJob>();
        let count = workers.max(1);
        let mut handles = Vec::with_capacity(count);

        for i in 0..count {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("mixer-reader-{}", i))
                .spawn(move || worker_loop(rx))?;
            handles.push(handle);
        }
        debug!("Started {} mixer reader threads", count);

        Ok(Self {
            jobs: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
            submitted: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Queue a read of `source`. Returns `None` once the pool is shut down.
    pub fn submit(&self, source: SourceHandle) -> Option<PendingRead> {
        if self.shut_down.load(Ordering::Acquire) {
            return None;
        }
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = jobs.as_ref()?;

        let (reply, rx) = channel::bounded(1);
        let cancel = Arc::new(AtomicBool::new(false));
        let job = ReadJob {
            source,
            cancel: cancel.clone(),
            reply,
        };
        tx.send(job).ok()?;
        self.submitted.fetch_add(1, Ordering::Relaxed);
        Some(PendingRead { rx, cancel })
    }

    /// Total reads ever submitted.
    pub fn submissions(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stop accepting work and join idle workers for up to `grace`.
    ///
    /// Workers still stuck in a read after `grace` are detached; they exit
    /// on their own once the read returns. Returns true if all were joined.
    pub fn shutdown(&self, grace: Duration) -> bool {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return true;
        }
        // Closing the channel ends every worker loop
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let handles =
            std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        let deadline = Instant::now() + grace;
        let mut remaining = handles;
        while !remaining.is_empty() && Instant::now() < deadline {
            let (done, busy): (Vec<_>, Vec<_>) =
                remaining.into_iter().partition(|h| h.is_finished());
            for handle in done {
                let _ = handle.join();
            }
            remaining = busy;
            if !remaining.is_empty() {
                thread::sleep(Duration::from_millis(1));
            }
        }

        if remaining.is_empty() {
            debug!("Mixer reader threads joined");
            true
        } else {
            warn!(
                "{} mixer reader threads still busy after {:?}, detaching",
                remaining.len(),
                grace
            );
            false
        }
    }
}

fn worker_loop(rx: Receiver<ReadJob>) {
    for job in rx.iter() {
        if job.cancel.load(Ordering::Acquire) {
            let _ = job.reply.send(ReadOutcome::Cancelled);
            continue;
        }
        let source = job.source;
        let outcome = match catch_unwind(AssertUnwindSafe(|| source.read())) {
            Ok(Ok(data)) => ReadOutcome::Data(data),
            Ok(Err(e)) => ReadOutcome::Failed(e.to_string()),
            Err(_) => ReadOutcome::Failed("read panicked".to_string()),
        };
        // Receiver may already be gone if the read was pruned
        let _ = job.reply.send(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{AudioSource, SourceError};

    struct Fixed(Bytes);

    impl AudioSource for Fixed {
        fn read(&self) -> Result<Bytes, SourceError> {
            Ok(self.0.clone())
        }

        fn cleanup(&self) {}
    }

    struct Broken;

    impl AudioSource for Broken {
        fn read(&self) -> Result<Bytes, SourceError> {
            Err(SourceError::Producer("decoder exploded".to_string()))
        }

        fn cleanup(&self) {}
    }

    struct Panicky;

    impl AudioSource for Panicky {
        fn read(&self) -> Result<Bytes, SourceError> {
            panic!("read panicked on purpose")
        }

        fn cleanup(&self) {}
    }

    struct Slow(Duration);

    impl AudioSource for Slow {
        fn read(&self) -> Result<Bytes, SourceError> {
            thread::sleep(self.0);
            Ok(Bytes::from_static(b"late"))
        }

        fn cleanup(&self) {}
    }

    fn deadline(ms: u64) -> Instant {
        Instant::now() + Duration::from_millis(ms)
    }

    #[test]
    fn test_read_returns_data() {
        let pool = ReadPool::new(2).unwrap();
        let read = pool
            .submit(SourceHandle::new(Fixed(Bytes::from_static(b"abcd"))))
            .unwrap();
        match read.wait_until(deadline(1000)) {
            Some(ReadOutcome::Data(data)) => assert_eq!(&data[..], b"abcd"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(pool.submissions(), 1);
    }

    #[test]
    fn test_poll_never_blocks() {
        let pool = ReadPool::new(1).unwrap();
        let read = pool
            .submit(SourceHandle::new(Slow(Duration::from_millis(100))))
            .unwrap();
        let started = Instant::now();
        assert!(read.poll().is_none());
        assert!(started.elapsed() < Duration::from_millis(50));

        thread::sleep(Duration::from_millis(200));
        assert!(matches!(read.poll(), Some(ReadOutcome::Data(_))));
    }

    #[test]
    fn test_errors_and_panics_become_failures() {
        let pool = ReadPool::new(1).unwrap();
        let broken = pool.submit(SourceHandle::new(Broken)).unwrap();
        let panicky = pool.submit(SourceHandle::new(Panicky)).unwrap();

        assert!(matches!(
            broken.wait_until(deadline(1000)),
            Some(ReadOutcome::Failed(_))
        ));
        assert!(matches!(
            panicky.wait_until(deadline(1000)),
            Some(ReadOutcome::Failed(_))
        ));

        // Worker survived the panic
        let ok = pool
            .submit(SourceHandle::new(Fixed(Bytes::from_static(b"ok"))))
            .unwrap();
        assert!(matches!(
            ok.wait_until(deadline(1000)),
            Some(ReadOutcome::Data(_))
        ));
    }

    #[test]
    fn test_slow_read_times_out_then_completes() {
        let pool = ReadPool::new(1).unwrap();
        let read = pool
            .submit(SourceHandle::new(Slow(Duration::from_millis(100))))
            .unwrap();

        assert!(read.wait_until(deadline(5)).is_none());
        assert!(matches!(
            read.wait_until(deadline(2000)),
            Some(ReadOutcome::Data(_))
        ));
    }

    #[test]
    fn test_cancelled_before_start() {
        let pool = ReadPool::new(1).unwrap();
        // Occupy the only worker so the next job waits in the channel
        let _busy = pool
            .submit(SourceHandle::new(Slow(Duration::from_millis(50))))
            .unwrap();
        let queued = pool
            .submit(SourceHandle::new(Fixed(Bytes::from_static(b"never"))))
            .unwrap();
        queued.cancel();
        assert!(queued.is_cancelled());

        assert!(matches!(
            queued.wait_until(deadline(2000)),
            Some(ReadOutcome::Cancelled)
        ));
    }

    #[test]
    fn test_shutdown_stops_submissions() {
        let pool = ReadPool::new(4).unwrap();
        assert!(pool.shutdown(Duration::from_secs(1)));
        assert!(pool.is_shut_down());
        assert!(pool
            .submit(SourceHandle::new(Fixed(Bytes::new())))
            .is_none());
        assert_eq!(pool.submissions(), 0);

        // Idempotent
        assert!(pool.shutdown(Duration::from_millis(10)));
    }
}
