use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

use super::ResultStore;

/// Background thread running [`ResultStore::sweep`] every `sweep_interval`.
///
/// Stops when [`Sweeper::shutdown`] is called or the handle is dropped.
pub struct Sweeper {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    pub fn spawn(store: Arc<ResultStore>) -> io::Result<Self> {
        let interval = store.config().sweep_interval;
        let (stop, stopped) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("logsift-sweeper".to_string())
            .spawn(move || {
                info!("Sweeper started, interval {:?}", interval);
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => match store.sweep() {
                            Ok(report) => debug!("Sweep finished: {:?}", report),
                            Err(e) => warn!("Sweep failed: {}", e),
                        },
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("Sweeper stopped");
            })?;

        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    /// Stops the thread and waits for a sweep in progress to finish
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Sweeper thread panicked");
            }
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
