use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A boxed unit of shadow work. Comparison jobs own everything they need
/// (upstream client, sink, metrics handles) so the pool itself stays
/// domain-agnostic.
pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Fixed-size pool of workers draining a bounded channel. Enqueue never
/// blocks: a full queue means the job is dropped and counted, not waited on.
///
/// `enqueue`/`shutdown` both take `&self` so the pool can live behind an
/// `Arc` shared with every connection handler while the owner that started
/// it still drives shutdown directly.
pub struct WorkerPool {
    tx: Mutex<Option<mpsc::Sender<Job>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    accepting: AtomicBool,
    dropped: AtomicU64,
}

impl WorkerPool {
    pub fn spawn(worker_count: usize, queue_size: usize) -> WorkerPool {
        let (tx, rx) = mpsc::channel(queue_size);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut handles = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let rx = rx.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let job = rx.lock().await.recv().await;
                    match job {
                        Some(job) => job.await,
                        None => break,
                    }
                }
                tracing::debug!(worker_id, "shadow worker exited");
            }));
        }

        WorkerPool {
            tx: Mutex::new(Some(tx)),
            handles: Mutex::new(handles),
            accepting: AtomicBool::new(true),
            dropped: AtomicU64::new(0),
        }
    }

    /// Non-blocking enqueue. Returns `false` (and counts a drop) if the
    /// queue is full or the pool is shutting down — the request path never
    /// waits on this.
    pub fn enqueue(&self, job: Job) -> bool {
        if !self.accepting.load(Ordering::Relaxed) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let sender = self.tx.lock().unwrap().clone();
        match sender {
            Some(sender) => match sender.try_send(job) {
                Ok(()) => true,
                Err(_) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    false
                }
            },
            None => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop accepting new jobs, let workers drain the queue for up to
    /// `grace`, then abort whatever is left: workers honour process
    /// shutdown by stopping acceptance, draining for a grace period, then
    /// exiting.
    pub async fn shutdown(&self, grace: Duration) {
        self.accepting.store(false, Ordering::Relaxed);
        // Dropping the sender closes the channel so workers can observe EOF.
        self.tx.lock().unwrap().take();

        let handles: Vec<JoinHandle<()>> = self.handles.lock().unwrap().drain(..).collect();
        let drain = futures_util::future::join_all(handles);
        if tokio::time::timeout(grace, drain).await.is_err() {
            tracing::warn!("worker pool did not drain within grace period, some shadow jobs were abandoned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_enqueued_job_runs() {
        let pool = WorkerPool::spawn(2, 8);
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        let accepted = pool.enqueue(Box::pin(async move {
            ran2.store(true, Ordering::SeqCst);
        }));
        assert!(accepted);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(ran.load(Ordering::SeqCst));
        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_full_queue_drops_and_counts() {
        let pool = WorkerPool::spawn(1, 1);
        let blocker = Arc::new(tokio::sync::Notify::new());
        let blocker2 = blocker.clone();
        pool.enqueue(Box::pin(async move {
            blocker2.notified().await;
        }));
        // give the worker a moment to pick up the blocking job
        tokio::time::sleep(Duration::from_millis(20)).await;

        let counter = Arc::new(AtomicUsize::new(0));
        let mut dropped_any = false;
        for _ in 0..4 {
            let counter = counter.clone();
            let accepted = pool.enqueue(Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
            if !accepted {
                dropped_any = true;
            }
        }
        assert!(dropped_any);
        assert!(pool.dropped_count() > 0);
        blocker.notify_waiters();
        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let pool = WorkerPool::spawn(1, 8);
        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_is_dropped() {
        let pool = WorkerPool::spawn(1, 8);
        pool.shutdown(Duration::from_secs(1)).await;
        let accepted = pool.enqueue(Box::pin(async {}));
        assert!(!accepted);
        assert_eq!(pool.dropped_count(), 1);
    }
}
