//! Isolated indexer process
//!
//! The sync engine runs on a dedicated OS thread with its own current-thread
//! runtime so that decryption and index writes never run on the caller's
//! executor. The caller talks to the worker through a ready/go handshake and
//! a cancellation token.
//!
//! Startup handshake:
//! 1. the worker opens the user's store and reports it back as ready
//! 2. `start` checks whether `stop` was requested meanwhile
//! 3. `start` sends go (run the engine) or abort (tear down)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::crypto::{Decryptor, KeyMaterial};
use crate::error::{IndexError, Result};
use crate::remote::MailboxSource;
use crate::store::{IndexStore, StoreProvider};
use crate::sync::{SyncEngine, SyncSettings};

/// The running indexer as seen by callers
#[derive(Clone)]
pub struct ActiveIndexer {
    pub user_id: String,
    pub store: Arc<dyn IndexStore>,
}

struct Worker {
    user_id: String,
    store: Arc<dyn IndexStore>,
    cancel: CancellationToken,
    thread: JoinHandle<()>,
}

enum Slot {
    Idle,
    Starting {
        user_id: String,
        /// Set by `stop` while the worker is still initialising
        stop_requested: Arc<AtomicBool>,
    },
    Running(Worker),
}

type ReadySender = oneshot::Sender<Result<Arc<dyn IndexStore>>>;

/// Owns at most one indexing worker
pub struct IndexerProcess {
    provider: Arc<dyn StoreProvider>,
    remote: Arc<dyn MailboxSource>,
    decryptor: Arc<dyn Decryptor>,
    settings: SyncSettings,
    slot: Mutex<Slot>,
    /// Serialises `start` calls
    lifecycle: Mutex<()>,
}

impl IndexerProcess {
    pub fn new(
        provider: Arc<dyn StoreProvider>,
        remote: Arc<dyn MailboxSource>,
        decryptor: Arc<dyn Decryptor>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            provider,
            remote,
            decryptor,
            settings,
            slot: Mutex::new(Slot::Idle),
            lifecycle: Mutex::new(()),
        }
    }

    /// Start indexing for `user_id`
    ///
    /// No-op if already running for that user. A worker for another user is
    /// stopped first.
    pub async fn start(&self, user_id: &str, keys: KeyMaterial) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        let stop_requested = Arc::new(AtomicBool::new(false));
        let previous = {
            let mut slot = self.slot.lock().await;
            if let Slot::Running(worker) = &*slot {
                if worker.user_id == user_id {
                    return Ok(());
                }
            }
            std::mem::replace(
                &mut *slot,
                Slot::Starting {
                    user_id: user_id.to_string(),
                    stop_requested: stop_requested.clone(),
                },
            )
        };
        if let Slot::Running(worker) = previous {
            info!("Switching indexer from {} to {}", worker.user_id, user_id);
            if let Err(e) = shutdown(worker).await {
                self.clear_starting(&stop_requested).await;
                return Err(e);
            }
        }

        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (go_tx, go_rx) = oneshot::channel();
        let thread = match self.spawn_worker(user_id, keys, cancel.clone(), ready_tx, go_rx) {
            Ok(thread) => thread,
            Err(e) => {
                self.clear_starting(&stop_requested).await;
                return Err(e);
            }
        };

        let store = match ready_rx.await {
            Ok(Ok(store)) => store,
            Ok(Err(e)) => {
                self.clear_starting(&stop_requested).await;
                join(thread).await?;
                return Err(e);
            }
            Err(_) => {
                self.clear_starting(&stop_requested).await;
                join(thread).await?;
                return Err(IndexError::Worker(
                    "Indexer worker exited during startup".to_string(),
                ));
            }
        };

        let mut slot = self.slot.lock().await;
        let still_wanted = matches!(
            &*slot,
            Slot::Starting { stop_requested: latch, .. } if Arc::ptr_eq(latch, &stop_requested)
        ) && !stop_requested.load(Ordering::SeqCst);

        if !still_wanted {
            drop(slot);
            info!("Indexer for {} stopped during startup", user_id);
            let _ = go_tx.send(false);
            join(thread).await?;
            store.terminate().await?;
            return Ok(());
        }

        if go_tx.send(true).is_err() {
            *slot = Slot::Idle;
            drop(slot);
            join(thread).await?;
            store.terminate().await?;
            return Err(IndexError::Worker(
                "Indexer worker exited before running".to_string(),
            ));
        }

        *slot = Slot::Running(Worker {
            user_id: user_id.to_string(),
            store,
            cancel,
            thread,
        });
        info!("Indexer started for {}", user_id);
        Ok(())
    }

    /// Stop the current worker, if any
    ///
    /// Returns once the worker thread has finished its current page and the
    /// store has been terminated. A worker that is still starting is torn
    /// down by `start` as soon as it reports ready.
    pub async fn stop(&self) -> Result<()> {
        let previous = {
            let mut slot = self.slot.lock().await;
            std::mem::replace(&mut *slot, Slot::Idle)
        };

        match previous {
            Slot::Idle => Ok(()),
            Slot::Starting {
                user_id,
                stop_requested,
            } => {
                info!("Stop requested while indexer for {} is starting", user_id);
                stop_requested.store(true, Ordering::SeqCst);
                Ok(())
            }
            Slot::Running(worker) => {
                info!("Stopping indexer for {}", worker.user_id);
                shutdown(worker).await
            }
        }
    }

    /// The running worker's user and store
    pub async fn active(&self) -> Option<ActiveIndexer> {
        match &*self.slot.lock().await {
            Slot::Running(worker) => Some(ActiveIndexer {
                user_id: worker.user_id.clone(),
                store: worker.store.clone(),
            }),
            _ => None,
        }
    }

    async fn clear_starting(&self, stop_requested: &Arc<AtomicBool>) {
        let mut slot = self.slot.lock().await;
        if matches!(
            &*slot,
            Slot::Starting { stop_requested: latch, .. } if Arc::ptr_eq(latch, stop_requested)
        ) {
            *slot = Slot::Idle;
        }
    }

    fn spawn_worker(
        &self,
        user_id: &str,
        keys: KeyMaterial,
        cancel: CancellationToken,
        ready_tx: ReadySender,
        go_rx: oneshot::Receiver<bool>,
    ) -> Result<JoinHandle<()>> {
        let user_id = user_id.to_string();
        let provider = self.provider.clone();
        let remote = self.remote.clone();
        let decryptor = self.decryptor.clone();
        let settings = self.settings.clone();

        std::thread::Builder::new()
            .name("mail-indexer".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(IndexError::Worker(format!(
                            "Failed to build indexer runtime: {}",
                            e
                        ))));
                        return;
                    }
                };

                runtime.block_on(async move {
                    let store = match provider.open(&user_id).await {
                        Ok(store) => store,
                        Err(e) => {
                            error!("Failed to open index for {}: {}", user_id, e);
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };

                    if ready_tx.send(Ok(store.clone())).is_err() {
                        warn!("Indexer start for {} was abandoned", user_id);
                        let _ = store.terminate().await;
                        return;
                    }

                    match go_rx.await {
                        Ok(true) => {}
                        // Aborted: the starter joins and terminates the store
                        Ok(false) => return,
                        Err(_) => {
                            warn!("Indexer start for {} was abandoned", user_id);
                            let _ = store.terminate().await;
                            return;
                        }
                    }

                    let engine = SyncEngine::new(store, remote, decryptor, keys, settings);
                    engine.run_forever(&cancel).await;
                });
            })
            .map_err(|e| IndexError::Worker(format!("Failed to spawn indexer thread: {}", e)))
    }
}

/// Cancel, join, then terminate the store
async fn shutdown(worker: Worker) -> Result<()> {
    worker.cancel.cancel();
    join(worker.thread).await?;
    worker.store.terminate().await?;
    info!("Indexer stopped for {}", worker.user_id);
    Ok(())
}

async fn join(thread: JoinHandle<()>) -> Result<()> {
    tokio::task::spawn_blocking(move || thread.join())
        .await
        .map_err(|e| IndexError::Worker(e.to_string()))?
        .map_err(|_| IndexError::Worker("Indexer thread panicked".to_string()))
}
