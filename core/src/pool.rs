use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::error;
use tokio::task::JoinSet;

/// Bounded worker pool: N long-lived tasks draining one shared, closeable
/// queue. Both the dispatch side and the ingestion side run on this shape.
///
/// The first handler error aborts the pool: the failing worker closes the
/// queue, the remaining workers stop at their next job boundary, and `join`
/// surfaces that error after every worker has exited. Completion is only
/// declared once the producer dropped its sender and the join barrier has
/// drained all workers.
pub struct WorkerPool<T, E> {
    tx: async_channel::Sender<T>,
    workers: JoinSet<Result<(), E>>,
    aborted: Arc<AtomicBool>,
}

impl<T, E> WorkerPool<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub fn start<F, Fut>(workers: usize, capacity: usize, handler: F) -> Self
    where
        F: Fn(T) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send,
    {
        let (tx, rx) = async_channel::bounded(capacity.max(1));
        let aborted = Arc::new(AtomicBool::new(false));
        let mut set = JoinSet::new();
        for _ in 0..workers.max(1) {
            let rx: async_channel::Receiver<T> = rx.clone();
            let aborted = Arc::clone(&aborted);
            let handler = handler.clone();
            set.spawn(async move {
                while let Ok(item) = rx.recv().await {
                    if aborted.load(Ordering::SeqCst) {
                        break;
                    }
                    if let Err(err) = handler(item).await {
                        aborted.store(true, Ordering::SeqCst);
                        rx.close();
                        return Err(err);
                    }
                }
                Ok(())
            });
        }
        Self { tx, workers: set, aborted }
    }

    /// Feed one item, waiting while the queue is full. Returns false once
    /// the pool has aborted and closed the queue.
    pub async fn submit(&self, item: T) -> bool {
        self.tx.send(item).await.is_ok()
    }

    /// Producer handle for feeding the pool from outside the async runtime
    /// (`send_blocking` from a capture thread). The queue closes once both
    /// this handle and the pool's own sender are gone.
    pub fn sender(&self) -> async_channel::Sender<T> {
        self.tx.clone()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Stop accepting new items. Anything already queued still drains;
    /// blocked producers are woken with a send error.
    pub fn close(&self) {
        self.tx.close();
    }

    /// Close the queue and wait for every worker to drain and exit. Returns
    /// the first handler error, if any.
    pub async fn join(mut self) -> Result<(), E> {
        drop(self.tx);
        let mut first_err = None;
        while let Some(joined) = self.workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
                Err(join_err) => error!("pool.event=worker_panic reason={join_err}"),
            }
        }
        match first_err {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}
