//! Background worker loop.
//!
//! Cooperative polling: each tick drains the outbox once. A failpoint abort
//! ends the thread the way a crash would; restarting the loop (or another
//! process) resumes from reclaimed leases.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::pipelines::ProcessOptions;
use crate::runtime::Runtime;

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn a worker thread that drains the outbox on an interval.
    pub fn spawn(name: &'static str, runtime: Arc<Runtime>, tick: Duration) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, runtime, shutdown_rx, tick))
            .expect("failed to spawn worker thread");

        WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }

    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn worker_loop(
    name: &'static str,
    runtime: Arc<Runtime>,
    shutdown_rx: mpsc::Receiver<()>,
    tick: Duration,
) {
    loop {
        match shutdown_rx.recv_timeout(tick) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
        if let Err(err) = runtime.process_outbox(ProcessOptions::default()) {
            // A crash-style abort (armed failpoint) ends this worker; a
            // fresh one picks the leases up after the reclaim interval.
            warn!(worker = name, error = %err, "outbox drain aborted");
            if matches!(
                err,
                crate::error::PipelineError::Store(settleproxy_store::StoreError::Failpoint(_))
            ) {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_shuts_down_cleanly() {
        let runtime = Arc::new(Runtime::in_memory());
        let handle = WorkerHandle::spawn("test-worker", runtime, Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(30));
        handle.shutdown();
    }
}
