//! Dedicated event-loop thread with a blocking submission facade.
//!
//! A single-threaded tokio runtime runs on its own named thread. Synchronous
//! callers submit futures with [`EventLoopBridge::run_sync`] and wait on a
//! flume channel for the output, bounded by a timeout. All async state owned
//! by the adapter lives on this one loop.

use crate::client::millis;
use crate::error::McpError;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub struct EventLoopBridge {
    name: String,
    handle: Handle,
    running: AtomicBool,
    stop_tx: parking_lot::Mutex<Option<oneshot::Sender<()>>>,
    done_rx: flume::Receiver<()>,
    thread: parking_lot::Mutex<Option<thread::JoinHandle<()>>>,
}

impl EventLoopBridge {
    /// Build the runtime and start the loop thread.
    pub fn start(name: &str) -> Result<Self, McpError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let (done_tx, done_rx) = flume::bounded(1);

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                runtime.block_on(async {
                    let _ = stop_rx.await;
                });
                // Dropping the runtime cancels whatever is still scheduled.
                drop(runtime);
                let _ = done_tx.send(());
            })?;

        tracing::debug!("Event loop '{name}' started");
        Ok(Self {
            name: name.to_string(),
            handle,
            running: AtomicBool::new(true),
            stop_tx: parking_lot::Mutex::new(Some(stop_tx)),
            done_rx,
            thread: parking_lot::Mutex::new(Some(thread)),
        })
    }

    /// Whether the loop accepts work.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && !self.done_rx.is_disconnected()
    }

    /// Schedule a task on the loop without waiting for it.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Run `future` on the loop and block the caller until it completes.
    ///
    /// Returns `BridgeTimeout` if no output arrives within `timeout`; the task
    /// keeps running on the loop. Must not be called from the loop thread.
    pub fn run_sync<F, T>(&self, future: F, timeout: Duration) -> Result<T, McpError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if !self.is_running() {
            return Err(McpError::BridgeStopped);
        }
        let (tx, rx) = flume::bounded(1);
        self.handle.spawn(async move {
            let _ = tx.send(future.await);
        });

        match rx.recv_timeout(timeout) {
            Ok(output) => Ok(output),
            Err(flume::RecvTimeoutError::Timeout) => Err(McpError::BridgeTimeout {
                timeout_ms: millis(timeout),
            }),
            Err(flume::RecvTimeoutError::Disconnected) => Err(McpError::BridgeStopped),
        }
    }

    /// Stop the loop and join its thread, waiting at most `join_timeout`.
    ///
    /// A thread that does not finish in time is detached with a warning.
    /// Calling this more than once is a no-op.
    pub fn shutdown(&self, join_timeout: Duration) {
        self.running.store(false, Ordering::Release);
        let Some(stop) = self.stop_tx.lock().take() else {
            return;
        };
        let _ = stop.send(());

        match self.done_rx.recv_timeout(join_timeout) {
            Ok(()) | Err(flume::RecvTimeoutError::Disconnected) => {
                let thread = self.thread.lock().take();
                if thread.is_some_and(|t| t.join().is_err()) {
                    tracing::warn!("Event loop '{}' panicked", self.name);
                }
                tracing::debug!("Event loop '{}' stopped", self.name);
            }
            Err(flume::RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    "Event loop '{}' did not stop within {}ms; detaching",
                    self.name,
                    millis(join_timeout)
                );
                self.thread.lock().take();
            }
        }
    }
}

impl Drop for EventLoopBridge {
    fn drop(&mut self) {
        self.shutdown(Duration::from_secs(2));
    }
}
