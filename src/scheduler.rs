//! C8: the scheduler (spec §4.7 "Scheduler", §6 "Cancellation and timeouts").
//!
//! `ConcurrentFifo` runs reconstruction and query jobs on a bounded pool of
//! worker threads pulling from one shared FIFO queue, mirroring the
//! teacher's `spawn_compaction_thread`/`spawn_flush_thread` background-
//! thread-plus-shutdown-channel shape. `Serial` runs every job inline on the
//! calling thread instead, which is what makes the tagging delete policy
//! legal (spec §4.6).
//!
//! A low-duty ticker thread wakes every 10µs so time-based maintenance (e.g.
//! opportunistic compaction once a level crosses its low watermark) has
//! somewhere to run without piggybacking on caller threads; today it is a
//! no-op tick, kept as the hook future maintenance jobs attach to.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Sender};

use crate::config::SchedulerKind;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct Scheduler {
    kind: SchedulerKind,
    job_tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    ticker_shutdown: Option<Sender<()>>,
    ticker: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(kind: SchedulerKind, thread_count: usize) -> Self {
        match kind {
            SchedulerKind::Serial => Self {
                kind,
                job_tx: None,
                workers: Vec::new(),
                ticker_shutdown: None,
                ticker: None,
            },
            SchedulerKind::ConcurrentFifo => {
                let (job_tx, job_rx) = channel::unbounded::<Job>();
                let workers = (0..thread_count.max(1))
                    .map(|_| {
                        let job_rx = job_rx.clone();
                        thread::spawn(move || {
                            while let Ok(job) = job_rx.recv() {
                                job();
                            }
                        })
                    })
                    .collect();

                let (ticker_shutdown, shutdown_rx) = channel::bounded::<()>(0);
                let ticker = thread::spawn(move || {
                    let tick = channel::tick(Duration::from_micros(10));
                    loop {
                        channel::select! {
                            recv(tick) -> _ => {}
                            recv(shutdown_rx) -> _ => break,
                        }
                    }
                });

                Self {
                    kind,
                    job_tx: Some(job_tx),
                    workers,
                    ticker_shutdown: Some(ticker_shutdown),
                    ticker: Some(ticker),
                }
            }
        }
    }

    pub fn is_serial(&self) -> bool {
        matches!(self.kind, SchedulerKind::Serial)
    }

    /// Submit a job. Under the serial scheduler it runs inline before this
    /// call returns; under the concurrent scheduler it is enqueued FIFO for
    /// the next free worker.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        match &self.job_tx {
            Some(tx) => {
                let _ = tx.send(Box::new(job));
            }
            None => job(),
        }
    }

    /// Drains outstanding tasks then joins every worker (spec §4.8
    /// "Shutdown drains outstanding tasks then joins").
    pub fn shutdown(&mut self) {
        if let Some(shutdown) = self.ticker_shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.ticker.take() {
            let _ = handle.join();
        }
        self.job_tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn serial_scheduler_runs_jobs_inline() {
        let scheduler = Scheduler::new(SchedulerKind::Serial, 1);
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        scheduler.submit(move || {
            ran2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_scheduler_eventually_runs_every_job() {
        let mut scheduler = Scheduler::new(SchedulerKind::ConcurrentFifo, 2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let counter = counter.clone();
            scheduler.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        scheduler.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }
}
