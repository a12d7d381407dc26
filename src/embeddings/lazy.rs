//! Single-flight lazy initialization for heavyweight model handles
//!
//! The first caller runs the initializer while holding the slot's init lock.
//! Callers that arrive during that flight block on the lock and receive the
//! same outcome: the loaded handle, or the flight's failure. A failure is not
//! cached beyond its flight; the next caller to arrive afterwards starts a
//! fresh attempt.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::EmbeddingError;

pub struct ModelSlot<M> {
    model: RwLock<Option<Arc<M>>>,
    /// Held for the duration of an initialization flight
    init_lock: Mutex<Option<String>>,
    /// Completed (failed) flights, lets waiters detect that a flight ended
    failed_flights: AtomicU64,
}

impl<M> Default for ModelSlot<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> ModelSlot<M> {
    pub fn new() -> Self {
        Self {
            model: RwLock::new(None),
            init_lock: Mutex::new(None),
            failed_flights: AtomicU64::new(0),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.read().is_some()
    }

    pub fn get(&self) -> Option<Arc<M>> {
        self.model.read().clone()
    }

    /// Return the loaded handle, initializing it with `init` if needed
    pub fn get_or_init<F>(&self, init: F) -> Result<Arc<M>, EmbeddingError>
    where
        F: FnOnce() -> Result<M, EmbeddingError>,
    {
        if let Some(model) = self.get() {
            return Ok(model);
        }

        let observed = self.failed_flights.load(Ordering::Acquire);
        let mut last_error = self.init_lock.lock();

        if let Some(model) = self.get() {
            return Ok(model);
        }
        if self.failed_flights.load(Ordering::Acquire) != observed {
            // The flight we waited on failed; share its outcome
            let reason = last_error
                .clone()
                .unwrap_or_else(|| "model initialization failed".to_string());
            return Err(EmbeddingError::ModelLoad(reason));
        }

        match init() {
            Ok(model) => {
                let model = Arc::new(model);
                *self.model.write() = Some(model.clone());
                *last_error = None;
                Ok(model)
            }
            Err(e) => {
                *last_error = Some(e.to_string());
                self.failed_flights.fetch_add(1, Ordering::AcqRel);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{mpsc, Barrier};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_concurrent_first_calls_initialize_once() {
        let slot = Arc::new(ModelSlot::<String>::new());
        let inits = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let slot = slot.clone();
                let inits = inits.clone();
                thread::spawn(move || {
                    slot.get_or_init(|| {
                        inits.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(50));
                        Ok("model".to_string())
                    })
                    .unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().as_str(), "model");
        }
        assert_eq!(inits.load(Ordering::SeqCst), 1);
        assert!(slot.is_loaded());
    }

    #[test]
    fn test_failure_is_retried_by_next_caller() {
        let slot = ModelSlot::<u32>::new();

        let first = slot.get_or_init(|| Err(EmbeddingError::ModelLoad("missing file".into())));
        assert!(matches!(first, Err(EmbeddingError::ModelLoad(_))));
        assert!(!slot.is_loaded());

        let second = slot.get_or_init(|| Ok(7)).unwrap();
        assert_eq!(*second, 7);

        // Loaded handle is reused, initializer not called again
        let third = slot.get_or_init(|| panic!("must not reinitialize")).unwrap();
        assert!(Arc::ptr_eq(&second, &third));
    }

    #[test]
    fn test_waiters_share_a_failed_flight() {
        let slot = Arc::new(ModelSlot::<u32>::new());
        let inits = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let leader = {
            let slot = slot.clone();
            let inits = inits.clone();
            thread::spawn(move || {
                slot.get_or_init(|| {
                    inits.fetch_add(1, Ordering::SeqCst);
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Err(EmbeddingError::ModelLoad("corrupt model".into()))
                })
            })
        };
        started_rx.recv().unwrap();

        // Every waiter arrives while the leader's flight is still open
        let arrived = Arc::new(Barrier::new(4));
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let slot = slot.clone();
                let inits = inits.clone();
                let arrived = arrived.clone();
                thread::spawn(move || {
                    arrived.wait();
                    slot.get_or_init(|| {
                        inits.fetch_add(1, Ordering::SeqCst);
                        Ok(1)
                    })
                })
            })
            .collect();
        arrived.wait();
        thread::sleep(Duration::from_millis(100));
        release_tx.send(()).unwrap();

        assert!(matches!(leader.join().unwrap(), Err(EmbeddingError::ModelLoad(_))));
        for waiter in waiters {
            assert!(matches!(waiter.join().unwrap(), Err(EmbeddingError::ModelLoad(_))));
        }
        assert_eq!(inits.load(Ordering::SeqCst), 1);
        assert!(!slot.is_loaded());
    }
}
