use anyhow::Result;
use speedcam_proto::SpeedEvent;
use std::future::Future;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_CAPACITY: usize = 256;

/// A consumer of speed events. Errors are logged by the bus and the event
/// is dropped for that sink only.
pub trait Sink: Send + 'static {
    fn name(&self) -> &'static str;
    fn handle(&mut self, ev: &SpeedEvent) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub delivered: u64,
    pub failed: u64,
    /// Events skipped because the sink fell behind the bus.
    pub lagged: u64,
}

/// Non-blocking fan-out from the engine to every sink.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SpeedEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Never waits on a sink. Returns how many sinks will see the event.
    pub fn publish(&self, ev: SpeedEvent) -> usize {
        match self.tx.send(ev) {
            Ok(n) => n,
            Err(broadcast::error::SendError(ev)) => {
                debug!("bus: no sinks attached, event for track {} dropped", ev.track_id);
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SpeedEvent> {
        self.tx.subscribe()
    }

    /// Runs `sink` on its own task until every bus handle is dropped.
    pub fn spawn<S: Sink>(&self, sink: S) -> JoinHandle<SinkStats> {
        tokio::spawn(run_sink(sink, self.subscribe()))
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

pub async fn run_sink<S: Sink>(mut sink: S, mut rx: broadcast::Receiver<SpeedEvent>) -> SinkStats {
    let mut stats = SinkStats::default();
    loop {
        match rx.recv().await {
            Ok(ev) => match sink.handle(&ev).await {
                Ok(()) => stats.delivered += 1,
                Err(e) => {
                    stats.failed += 1;
                    warn!("{}: event for track {} dropped: {:#}", sink.name(), ev.track_id, e);
                }
            },
            Err(RecvError::Lagged(n)) => {
                stats.lagged += n;
                warn!("{}: fell behind, {} events skipped", sink.name(), n);
            }
            Err(RecvError::Closed) => break,
        }
    }
    info!(
        "{}: stopped ({} delivered, {} failed, {} skipped)",
        sink.name(),
        stats.delivered,
        stats.failed,
        stats.lagged
    );
    stats
}
