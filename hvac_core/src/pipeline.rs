//! Sequential evaluation pipeline.
//!
//! One worker thread drains an unbounded FIFO of equipment ids. The engine
//! sits behind a mutex shared by the worker and the caller, so at most one
//! evaluation runs at any instant. A failing or panicking item is reported
//! and the queue moves on.
//!
//! The worker is shut down and joined when the `Pipeline` is dropped. An
//! in-flight evaluation always completes first.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_channel as xch;
use serde::Serialize;

use crate::engine::{Engine, EvaluationReport};
use crate::error::Result;

const POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ItemOutcome {
    Evaluated(EvaluationReport),
    Failed { equipment_id: String, error: String },
}

impl ItemOutcome {
    pub fn equipment_id(&self) -> &str {
        match self {
            ItemOutcome::Evaluated(r) => &r.equipment_id,
            ItemOutcome::Failed { equipment_id, .. } => equipment_id,
        }
    }
}

/// Result of a run-all request: the synchronously evaluated first unit and
/// how many more were queued.
#[derive(Debug, Clone, PartialEq)]
pub struct RunAll {
    pub first: Option<ItemOutcome>,
    pub enqueued: usize,
}

fn panic_text(p: &(dyn std::any::Any + Send)) -> &str {
    p.downcast_ref::<&str>()
        .copied()
        .or_else(|| p.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn evaluate_item(engine: &Mutex<Engine>, equipment_id: &str) -> ItemOutcome {
    let mut guard = engine.lock().unwrap_or_else(PoisonError::into_inner);
    match catch_unwind(AssertUnwindSafe(|| guard.evaluate(equipment_id))) {
        Ok(Ok(report)) => ItemOutcome::Evaluated(report),
        Ok(Err(e)) => {
            tracing::error!(equipment_id, error = %e, "evaluation failed");
            ItemOutcome::Failed {
                equipment_id: equipment_id.to_string(),
                error: format!("{e:#}"),
            }
        }
        Err(p) => {
            let msg = panic_text(p.as_ref());
            tracing::error!(equipment_id, panic = msg, "evaluation panicked");
            ItemOutcome::Failed {
                equipment_id: equipment_id.to_string(),
                error: format!("evaluation panicked: {msg}"),
            }
        }
    }
}

pub struct Pipeline {
    engine: Arc<Mutex<Engine>>,
    tx: xch::Sender<String>,
    /// Kept so pending work can be drained and replaced.
    rx: xch::Receiver<String>,
    reports: xch::Receiver<ItemOutcome>,
    pending: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl Pipeline {
    pub fn spawn(engine: Engine) -> Self {
        let engine = Arc::new(Mutex::new(engine));
        let (tx, rx) = xch::unbounded::<String>();
        let (report_tx, reports) = xch::unbounded();
        let pending = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker_engine = engine.clone();
        let worker_rx = rx.clone();
        let worker_pending = pending.clone();
        let worker_shutdown = shutdown.clone();
        let join_handle = std::thread::spawn(move || {
            loop {
                if worker_shutdown.load(Ordering::Relaxed) {
                    tracing::debug!("evaluation worker received shutdown signal");
                    break;
                }
                match worker_rx.recv_timeout(POLL) {
                    Ok(id) => {
                        let outcome = evaluate_item(&worker_engine, &id);
                        let sent = report_tx.send(outcome);
                        worker_pending.fetch_sub(1, Ordering::SeqCst);
                        if sent.is_err() {
                            tracing::debug!("report consumer gone, exiting worker");
                            break;
                        }
                    }
                    Err(xch::RecvTimeoutError::Timeout) => {}
                    Err(xch::RecvTimeoutError::Disconnected) => break,
                }
            }
            tracing::trace!("evaluation worker exiting cleanly");
        });

        Self {
            engine,
            tx,
            rx,
            reports,
            pending,
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    /// Run `f` with exclusive access to the engine, between evaluations.
    pub fn with_engine<R>(&self, f: impl FnOnce(&mut Engine) -> R) -> R {
        let mut guard = self.engine.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Queue one unit. Never blocks and never rejects.
    pub fn enqueue(&self, equipment_id: impl Into<String>) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(equipment_id.into()).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!("evaluation queue closed, dropping item");
        }
    }

    /// Items queued or in flight.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Evaluate the first eligible unit now and queue the rest.
    pub fn run_all(&self) -> Result<RunAll> {
        let ids = self.with_engine(|e| e.eligible())?;
        let mut ids = ids.into_iter();
        let first = ids.next().map(|id| evaluate_item(&self.engine, &id));
        let mut enqueued = 0;
        for id in ids {
            self.enqueue(id);
            enqueued += 1;
        }
        tracing::info!(enqueued, "run-all started");
        Ok(RunAll { first, enqueued })
    }

    /// Drop everything still queued and queue `ids` instead. The in-flight
    /// item, if any, still completes. Returns how many queued items were dropped.
    pub fn replace_pending(&self, ids: impl IntoIterator<Item = String>) -> usize {
        let mut dropped = 0;
        for _ in self.rx.try_iter() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            dropped += 1;
        }
        for id in ids {
            self.enqueue(id);
        }
        if dropped > 0 {
            tracing::info!(dropped, "pending evaluations superseded");
        }
        dropped
    }

    /// Wait until nothing is queued or in flight. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.pending() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        true
    }

    /// Outcomes reported by the worker since the last call.
    pub fn drain_reports(&self) -> Vec<ItemOutcome> {
        self.reports.try_iter().collect()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => {
                    tracing::trace!("evaluation worker joined");
                }
                Err(e) => {
                    tracing::warn!(?e, "evaluation worker panicked during shutdown");
                }
            }
        }
    }
}
