//! Per-stream worker pool
//!
//! Each stream is pinned to one worker task for its whole life, so the
//! stages of its pipeline never see two packets at once and need no locks.
//! Workers also tick their pipelines, which keeps timer-driven receiver
//! reports on the same task as the packets they describe.

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::packet::Packet;
use crate::pipeline::{Pipeline, PipelineStage, StreamState};

pub type StreamId = u64;

type StreamTable = Arc<Mutex<HashMap<StreamId, StreamState>>>;

enum WorkerCommand {
    Attach(StreamId, Box<Pipeline>),
    Packet(StreamId, Packet),
    Detach(StreamId),
}

fn lock(streams: &StreamTable) -> MutexGuard<'_, HashMap<StreamId, StreamState>> {
    streams.lock().unwrap_or_else(|e| e.into_inner())
}

/// Move `stream_id` to `target` if the lifecycle allows it.
fn transition(streams: &StreamTable, stream_id: StreamId, target: StreamState) -> bool {
    let mut streams = lock(streams);
    let current = streams.get(&stream_id).copied().unwrap_or(StreamState::Idle);
    if !current.can_transition_to(&target) {
        return false;
    }
    if target.is_closed() {
        streams.remove(&stream_id);
    } else {
        streams.insert(stream_id, target);
    }
    true
}

/// Fixed set of worker tasks owning stream pipelines
pub struct StreamWorkerPool {
    senders: Vec<mpsc::Sender<WorkerCommand>>,
    handles: Vec<JoinHandle<()>>,
    streams: StreamTable,
    dropped: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl StreamWorkerPool {
    /// Spawn `workers` tasks on the current tokio runtime.
    pub fn new(workers: usize, queue_depth: usize, tick: Duration) -> Self {
        let workers = workers.max(1);
        let cancel = CancellationToken::new();
        let streams: StreamTable = Arc::new(Mutex::new(HashMap::new()));
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for index in 0..workers {
            let (tx, rx) = mpsc::channel(queue_depth.max(1));
            let mut worker = StreamWorker {
                index,
                rx,
                pipelines: HashMap::new(),
                streams: streams.clone(),
                tick,
                cancel: cancel.clone(),
            };
            handles.push(tokio::spawn(async move {
                if let Err(e) = worker.run().await {
                    error!("StreamWorker {}: {}", worker.index, e);
                }
            }));
            senders.push(tx);
        }
        info!("StreamWorkerPool: {} workers, queue depth {}", workers, queue_depth);

        Self {
            senders,
            handles,
            streams,
            dropped: Arc::new(AtomicU64::new(0)),
            cancel,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(
            config.workers,
            config.queue_depth,
            Duration::from_millis(config.tick_ms.max(1)),
        )
    }

    pub fn workers(&self) -> usize {
        self.senders.len()
    }

    /// Worker a stream is pinned to
    pub fn worker_for(&self, stream_id: StreamId) -> usize {
        (stream_id % self.senders.len() as u64) as usize
    }

    pub fn stream_state(&self, stream_id: StreamId) -> Option<StreamState> {
        lock(&self.streams).get(&stream_id).copied()
    }

    /// Packets `deliver` refused
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Hand a stream's pipeline to its worker. Packets may be delivered as
    /// soon as this returns.
    pub async fn attach(&self, stream_id: StreamId, pipeline: Pipeline) -> Result<()> {
        if self.cancel.is_cancelled() {
            bail!("worker pool is shut down");
        }
        {
            let mut streams = lock(&self.streams);
            if streams.contains_key(&stream_id) {
                bail!("stream {} is already attached", stream_id);
            }
            streams.insert(
                stream_id,
                StreamState::Running {
                    started_at: Instant::now(),
                },
            );
        }
        let worker = self.worker_for(stream_id);
        if self.senders[worker]
            .send(WorkerCommand::Attach(stream_id, Box::new(pipeline)))
            .await
            .is_err()
        {
            lock(&self.streams).remove(&stream_id);
            return Err(anyhow!("worker {} has stopped", worker));
        }
        debug!("StreamWorkerPool: stream {} on worker {}", stream_id, worker);
        Ok(())
    }

    /// Queue a packet for its stream without waiting. Returns false, and
    /// drops the packet, when the stream is not running or its worker's
    /// queue is full.
    pub fn deliver(&self, stream_id: StreamId, packet: Packet) -> bool {
        let accepts = lock(&self.streams)
            .get(&stream_id)
            .is_some_and(|state| state.accepts_packets());
        if !accepts {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let worker = self.worker_for(stream_id);
        match self.senders[worker].try_send(WorkerCommand::Packet(stream_id, packet)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("StreamWorkerPool: worker {} queue full, dropping packet", worker);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Stop accepting packets for a stream and let its worker flush and
    /// drop the pipeline.
    pub async fn detach(&self, stream_id: StreamId) -> Result<()> {
        let running = self
            .stream_state(stream_id)
            .is_some_and(|state| state.accepts_packets());
        if !running || !transition(&self.streams, stream_id, StreamState::Draining) {
            bail!("stream {} is not running", stream_id);
        }
        let worker = self.worker_for(stream_id);
        self.senders[worker]
            .send(WorkerCommand::Detach(stream_id))
            .await
            .map_err(|_| anyhow!("worker {} has stopped", worker))
    }

    /// Cancel every worker and wait for them to finish.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.cancel.cancel();
        for handle in self.handles.drain(..) {
            handle.await?;
        }
        lock(&self.streams).clear();
        info!("StreamWorkerPool: shut down");
        Ok(())
    }
}

impl Drop for StreamWorkerPool {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct StreamWorker {
    index: usize,
    rx: mpsc::Receiver<WorkerCommand>,
    pipelines: HashMap<StreamId, Box<Pipeline>>,
    streams: StreamTable,
    tick: Duration,
    cancel: CancellationToken,
}

impl StreamWorker {
    fn handle(&mut self, command: WorkerCommand) {
        match command {
            WorkerCommand::Attach(stream_id, pipeline) => {
                self.pipelines.insert(stream_id, pipeline);
            }
            WorkerCommand::Packet(stream_id, packet) => match self.pipelines.get_mut(&stream_id) {
                Some(pipeline) => pipeline.read(packet),
                None => debug!(
                    "StreamWorker {}: packet for unknown stream {}",
                    self.index, stream_id
                ),
            },
            WorkerCommand::Detach(stream_id) => {
                if let Some(mut pipeline) = self.pipelines.remove(&stream_id) {
                    drain(&mut pipeline);
                    debug!(
                        "StreamWorker {}: stream {} closed, {}",
                        self.index,
                        stream_id,
                        pipeline.health().summary()
                    );
                }
                transition(&self.streams, stream_id, StreamState::Closed);
            }
        }
    }
}

/// Disable every stage network side first, so held packets flush through
/// the stages above before those switch off.
fn drain(pipeline: &mut Pipeline) {
    for name in pipeline.handler_names() {
        pipeline.set_enabled(name, false);
    }
}

#[async_trait]
impl PipelineStage for StreamWorker {
    async fn run(&mut self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                command = self.rx.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = ticker.tick() => {
                    for pipeline in self.pipelines.values_mut() {
                        pipeline.tick();
                    }
                }
            }
        }
        self.shutdown().await
    }

    fn name(&self) -> &'static str {
        "StreamWorker"
    }

    async fn shutdown(&mut self) -> Result<()> {
        for (stream_id, mut pipeline) in self.pipelines.drain() {
            drain(&mut pipeline);
            transition(&self.streams, stream_id, StreamState::Draining);
            transition(&self.streams, stream_id, StreamState::Closed);
        }
        debug!("StreamWorker {}: stopped", self.index);
        Ok(())
    }
}
