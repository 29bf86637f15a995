//! Per-device IRP queue engine
//!
//! One queue owns one dedicated worker thread consuming an ordered,
//! unbounded work stream. Requests execute strictly one at a time, in
//! submission order, so a device never sees two concurrent transfers.
//! The type-specific behavior (how to process a request, what to do once it
//! finished) is plugged in through [`IrpHandler`]; the engine itself only
//! sequences work, tracks the active-job count, and implements cooperative
//! abort.

use crate::error::UsbError;
use async_channel::{Receiver, Sender, unbounded};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, warn};

/// How long [`IrpQueue::abort`] waits for the worker to drain.
pub const ABORT_GRACE: Duration = Duration::from_secs(4);

/// Minimal surface the engine needs from a request type.
///
/// The engine records domain errors and sets the completion flag; everything
/// else about a request stays opaque to it.
pub trait QueuedIrp: Clone + Send + 'static {
    /// Records a processing error on the request.
    fn set_error(&self, error: UsbError);
    /// Marks the request complete and wakes waiters.
    fn mark_complete(&self);
}

/// Type-specific processing plugged into the generic engine.
pub trait IrpHandler<T>: Send + 'static {
    /// Executes one request. A returned [`UsbError`] is recorded on the
    /// request; it never propagates to the worker.
    fn process(&mut self, irp: &T) -> Result<(), UsbError>;

    /// Runs after the request's completion flag is set, e.g. to dispatch
    /// events. Must not fail.
    fn finish(&mut self, irp: &T);
}

enum Job<T> {
    Irp(T),
    /// Drain barrier: everything enqueued before it has been consumed once
    /// the worker reaches it.
    Drain(Arc<DrainGate>),
}

#[derive(Default)]
struct DrainGate {
    drained: Mutex<bool>,
    signal: Condvar,
}

struct QueueShared {
    /// Set while an abort is in progress; checked at dequeue boundaries only.
    aborting: AtomicBool,
    /// Requests dequeued but not yet finished. At most 1 by construction.
    active_jobs: AtomicUsize,
}

/// A strictly-ordered, single-worker request queue for one device.
///
/// `enqueue` never blocks; the worker blocks inside the transfer primitive
/// for at most the configured timeout. Dropping the queue closes the work
/// stream; the worker finishes what is already queued and exits.
pub struct IrpQueue<T: QueuedIrp> {
    tx: Sender<Job<T>>,
    shared: Arc<QueueShared>,
}

impl<T: QueuedIrp> IrpQueue<T> {
    /// Creates a queue and spawns its worker thread.
    pub fn new<H: IrpHandler<T>>(handler: H) -> Self {
        Self::with_name(handler, "irp-worker")
    }

    /// Creates a queue with a custom worker thread name, e.g. to tell
    /// per-device workers apart in logs.
    pub fn with_name<H: IrpHandler<T>>(handler: H, thread_name: &str) -> Self {
        let (tx, rx) = unbounded();
        let shared = Arc::new(QueueShared {
            aborting: AtomicBool::new(false),
            active_jobs: AtomicUsize::new(0),
        });
        let worker_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || run_worker(handler, rx, worker_shared))
            .expect("failed to spawn IRP worker thread");
        Self { tx, shared }
    }

    /// Appends a request to the work stream. Returns immediately.
    ///
    /// The request completes in submission order. If the queue is aborting
    /// when the worker reaches it, the request is discarded: it is never
    /// processed and its completion signal never fires. Callers waiting on a
    /// request must therefore always use a deadline.
    pub fn enqueue(&self, irp: T) {
        if self.tx.try_send(Job::Irp(irp)).is_err() {
            // Unbounded channel; this only fails once the worker is gone.
            warn!("IRP dropped: worker channel closed");
        }
    }

    /// Aborts all queued requests and waits for the queue to drain.
    ///
    /// The request currently being processed cannot be aborted and is left
    /// to finish normally; requests still queued behind it are consumed
    /// without being executed. Blocks until the drain is confirmed or the
    /// grace period ([`ABORT_GRACE`]) elapses, whichever comes first. The
    /// in-flight transfer is never interrupted.
    ///
    /// The aborting flag is cleared only once the drain is confirmed: if the
    /// grace period expires first, the flag stays set until the worker gets
    /// past the in-flight transfer, and requests enqueued in that window are
    /// still discarded. Afterwards the queue accepts work again.
    pub fn abort(&self) {
        self.shared.aborting.store(true, Ordering::SeqCst);

        let gate = Arc::new(DrainGate::default());
        if self.tx.try_send(Job::Drain(Arc::clone(&gate))).is_err() {
            warn!("abort: worker channel closed, nothing to drain");
            self.shared.aborting.store(false, Ordering::SeqCst);
            return;
        }

        let drained = gate.drained.lock().unwrap();
        let (drained, result) = gate
            .signal
            .wait_timeout_while(drained, ABORT_GRACE, |drained| !*drained)
            .unwrap();
        if result.timed_out() && !*drained {
            warn!(
                "abort: queue not drained within {:?}, leaving in-flight transfer to finish",
                ABORT_GRACE
            );
        }
    }

    /// Whether a request is currently being processed.
    ///
    /// True from the moment the worker dequeues a request until its finish
    /// hook has run. Requests still waiting in the stream do not count, so
    /// between two back-to-back requests this can momentarily read false.
    pub fn is_busy(&self) -> bool {
        self.shared.active_jobs.load(Ordering::SeqCst) > 0
    }
}

fn run_worker<T, H>(mut handler: H, rx: Receiver<Job<T>>, shared: Arc<QueueShared>)
where
    T: QueuedIrp,
    H: IrpHandler<T>,
{
    debug!("IRP worker started");
    while let Ok(job) = rx.recv_blocking() {
        match job {
            Job::Irp(irp) => {
                shared.active_jobs.fetch_add(1, Ordering::SeqCst);
                if shared.aborting.load(Ordering::SeqCst) {
                    debug!("discarding queued IRP while aborting");
                } else if catch_unwind(AssertUnwindSafe(|| execute(&mut handler, &irp))).is_err() {
                    error!("panic while processing IRP");
                }
                shared.active_jobs.fetch_sub(1, Ordering::SeqCst);
            }
            Job::Drain(gate) => {
                // Everything ahead of the barrier has been consumed; the
                // drain is confirmed, so the flag can be cleared.
                shared.aborting.store(false, Ordering::SeqCst);
                *gate.drained.lock().unwrap() = true;
                gate.signal.notify_all();
            }
        }
    }
    debug!("IRP worker stopped");
}

fn execute<T, H>(handler: &mut H, irp: &T)
where
    T: QueuedIrp,
    H: IrpHandler<T>,
{
    if let Err(error) = handler.process(irp) {
        irp.set_error(error);
    }
    irp.mark_complete();
    handler.finish(irp);
}
