//! Receipt routing: T0/T1 receipts are buffered and flushed as batch
//! artifacts, T2/T3 receipts are written individually.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use vigil_core::{BatchArtifact, Event, EventBus, Receipt, ReceiptSink};

pub struct ReceiptBuffer {
    pending: Mutex<Vec<Receipt>>,
    sink: Arc<dyn ReceiptSink>,
    max_batch_size: usize,
    events: EventBus,
}

impl ReceiptBuffer {
    pub fn new(sink: Arc<dyn ReceiptSink>, max_batch_size: usize, events: EventBus) -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            sink,
            max_batch_size: max_batch_size.max(1),
            events,
        }
    }

    /// Route a receipt by tier: buffered for T0/T1, written through for T2/T3.
    pub fn emit(&self, receipt: Receipt) -> vigil_core::Result<()> {
        if receipt.tier.batches_receipts() {
            self.push(receipt)
        } else {
            debug!(
                action_id = %receipt.action_id,
                tier = %receipt.tier,
                "writing individual receipt"
            );
            self.sink.append_receipt(&receipt)
        }
    }

    /// Buffer a receipt, flushing when the batch is full.
    pub fn push(&self, receipt: Receipt) -> vigil_core::Result<()> {
        let mut pending = self.pending.lock();
        pending.push(receipt);
        if pending.len() >= self.max_batch_size {
            self.flush_locked(&mut pending)?;
        }
        Ok(())
    }

    /// Write every buffered receipt as one batch artifact. Either all of them
    /// land in the sink or none do; on failure they stay buffered.
    pub fn flush(&self) -> vigil_core::Result<Option<BatchArtifact>> {
        let mut pending = self.pending.lock();
        self.flush_locked(&mut pending)
    }

    fn flush_locked(
        &self,
        pending: &mut Vec<Receipt>,
    ) -> vigil_core::Result<Option<BatchArtifact>> {
        if pending.is_empty() {
            return Ok(None);
        }
        let batch = BatchArtifact::seal(std::mem::take(pending));
        if let Err(e) = self.sink.append_batch(&batch) {
            error!(
                receipts = batch.len(),
                error = %e,
                "batch flush failed, receipts kept buffered"
            );
            *pending = batch.receipts;
            return Err(e);
        }
        info!(batch_id = %batch.id, receipts = batch.len(), "receipt batch flushed");
        self.events.publish(Event::BatchFlushed {
            batch_id: batch.id,
            receipts: batch.len(),
        });
        Ok(Some(batch))
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flush on a fixed cadence until `shutdown` flips to `true`, then flush
    /// one last time.
    pub fn spawn_flusher(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "receipt flusher started");
            let mut last_flush = Instant::now();
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = tick.tick() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                if *shutdown.borrow() {
                    break;
                }
                if last_flush.elapsed() >= interval {
                    if let Err(e) = self.flush() {
                        error!(error = %e, "scheduled receipt flush failed");
                    }
                    last_flush = Instant::now();
                }
            }
            if let Err(e) = self.flush() {
                error!(error = %e, "final receipt flush failed");
            }
            info!("receipt flusher stopped");
        })
    }
}

/// Receipt sink that keeps everything in memory.
#[derive(Default)]
pub struct MemoryReceiptSink {
    receipts: Mutex<Vec<Receipt>>,
    batches: Mutex<Vec<BatchArtifact>>,
}

impl MemoryReceiptSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Individually written receipts.
    pub fn receipts(&self) -> Vec<Receipt> {
        self.receipts.lock().clone()
    }

    pub fn batches(&self) -> Vec<BatchArtifact> {
        self.batches.lock().clone()
    }

    /// Every receipt, individual or batched.
    pub fn all(&self) -> Vec<Receipt> {
        let mut all = self.receipts();
        for batch in self.batches.lock().iter() {
            all.extend(batch.receipts.iter().cloned());
        }
        all
    }

    pub fn for_action(&self, action_id: vigil_core::ActionId) -> Vec<Receipt> {
        self.all()
            .into_iter()
            .filter(|r| r.action_id == action_id)
            .collect()
    }
}

impl ReceiptSink for MemoryReceiptSink {
    fn append_receipt(&self, receipt: &Receipt) -> vigil_core::Result<()> {
        self.receipts.lock().push(receipt.clone());
        Ok(())
    }

    fn append_batch(&self, batch: &BatchArtifact) -> vigil_core::Result<()> {
        self.batches.lock().push(batch.clone());
        Ok(())
    }
}
