//! Reorder stage for the receiver pipeline
//!
//! Buffers RTP packets per SSRC and releases them in sequence order, so the
//! stages above it see each stream in order even when the network reorders.
//! Memory is bounded: a full queue gives up on the oldest gap instead of
//! growing, and the number of tracked sources is capped.

use log::{debug, info, warn};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::packet::{Packet, PacketError};
use crate::pipeline::handler::{Context, Handler};
use crate::pipeline::health::PipelineHealth;
use crate::sequence::seq_less_than;

/// Default queue capacity per stream
pub const MAX_QUEUE_SIZE: usize = 100;

/// Largest forward jump still treated as the same sequence space
const MAX_DROPOUT: u16 = 3000;
/// Largest backward distance still treated as a late packet
const MAX_MISORDER: u16 = 100;

/// Reorder stage configuration
#[derive(Debug, Clone)]
pub struct ReorderConfig {
    /// Maximum number of packets to buffer per SSRC
    pub capacity: usize,
    /// How long the head of a queue may wait for a missing predecessor
    /// before it is released anyway
    pub max_hold_ms: u64,
    /// SSRCs with a queue; packets of further sources pass through
    pub max_streams: usize,
    /// An empty queue is dropped after this long without packets
    pub idle_ms: u64,
}

impl Default for ReorderConfig {
    fn default() -> Self {
        Self {
            capacity: MAX_QUEUE_SIZE,
            max_hold_ms: 150,
            max_streams: 16,
            idle_ms: 10_000,
        }
    }
}

/// Result of offering a packet to the queue
#[derive(Debug)]
pub enum PushOutcome {
    /// Stored until its turn comes
    Queued,
    /// Same sequence number already waiting
    Duplicate,
    /// At or shortly before the last released sequence number
    Late,
    /// Stored, but the queue overflowed and gave up this (lowest) packet
    Evicted(Packet),
    /// Far outside the sequence window. Held until its successor shows the
    /// sender restarted.
    Probation,
    /// The sender restarted. Everything queued from the old sequence space,
    /// in order; the new packets are queued behind it.
    Resync(Vec<Packet>),
}

struct QueuedPacket {
    seq: u16,
    packet: Packet,
}

/// Sequence-ordered packet queue for one stream
///
/// Entries stay sorted by wraparound-aware sequence order. `pop` only
/// releases the head when it directly follows the last released packet or
/// when the queue is full.
///
/// A packet more than `MAX_DROPOUT` ahead of (or `MAX_MISORDER` behind) the
/// last released one is held on probation. When the next packet directly
/// follows it, the queue restarts in the new sequence space; otherwise it
/// is replaced by the next such packet.
pub struct PacketReorderQueue {
    buffer: VecDeque<QueuedPacket>,
    capacity: usize,
    last_delivered: Option<u16>,
    probation: Option<QueuedPacket>,
    packets_received: u64,
    packets_reordered: u64,
    packets_skipped: u64,
    resyncs: u64,
}

impl PacketReorderQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::new(),
            capacity: capacity.max(1),
            last_delivered: None,
            probation: None,
            packets_received: 0,
            packets_reordered: 0,
            packets_skipped: 0,
            resyncs: 0,
        }
    }

    /// Insert an RTP packet keyed by its sequence number
    pub fn push(&mut self, packet: Packet) -> Result<PushOutcome, PacketError> {
        let seq = packet.rtp_header()?.sequence_number();
        self.packets_received += 1;

        if let Some(last) = self.last_delivered {
            let ahead = seq.wrapping_sub(last);
            if ahead == 0 || ahead > u16::MAX - MAX_MISORDER {
                return Ok(PushOutcome::Late);
            }
            if ahead > MAX_DROPOUT {
                return Ok(self.probe(seq, packet));
            }
        }
        if self.buffer.iter().any(|p| p.seq == seq) {
            return Ok(PushOutcome::Duplicate);
        }

        // first entry that must come after the new one
        let pos = self.buffer.iter().position(|p| seq_less_than(seq, p.seq));
        match pos {
            Some(i) => {
                self.buffer.insert(i, QueuedPacket { seq, packet });
                self.packets_reordered += 1;
            }
            None => self.buffer.push_back(QueuedPacket { seq, packet }),
        }

        if self.buffer.len() > self.capacity {
            if let Some(evicted) = self.buffer.pop_front() {
                self.skip_to(evicted.seq);
                return Ok(PushOutcome::Evicted(evicted.packet));
            }
        }
        Ok(PushOutcome::Queued)
    }

    /// Next packet in sequence order, if it may be released now
    pub fn pop(&mut self) -> Option<Packet> {
        let front = self.buffer.front()?;
        let contiguous = match self.last_delivered {
            None => true,
            Some(last) => front.seq == last.wrapping_add(1),
        };
        if !contiguous && self.buffer.len() < self.capacity {
            return None;
        }
        self.release_front()
    }

    /// Release the head if it has waited at least `max_hold_ms`, giving up
    /// on whatever gap precedes it.
    pub fn pop_expired(&mut self, now_ms: u64, max_hold_ms: u64) -> Option<Packet> {
        if let Some(packet) = self.pop() {
            return Some(packet);
        }
        let front = self.buffer.front()?;
        if now_ms.saturating_sub(front.packet.received_at_ms()) < max_hold_ms {
            return None;
        }
        self.release_front()
    }

    /// Remove everything, in sequence order. A packet on probation comes
    /// last.
    pub fn drain_all(&mut self) -> Vec<Packet> {
        if let Some(held) = self.probation.take() {
            self.buffer.push_back(held);
        }
        if let Some(back) = self.buffer.back() {
            self.last_delivered = Some(back.seq);
        }
        self.buffer.drain(..).map(|p| p.packet).collect()
    }

    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last_delivered(&self) -> Option<u16> {
        self.last_delivered
    }

    /// Times the queue restarted in a new sequence space
    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }

    /// (received, reordered, skipped, buffered)
    pub fn stats(&self) -> (u64, u64, u64, usize) {
        (
            self.packets_received,
            self.packets_reordered,
            self.packets_skipped,
            self.buffer.len(),
        )
    }

    fn probe(&mut self, seq: u16, packet: Packet) -> PushOutcome {
        let confirmed = self
            .probation
            .as_ref()
            .is_some_and(|held| held.seq.wrapping_add(1) == seq);
        let Some(held) = self.probation.take().filter(|_| confirmed) else {
            self.probation = Some(QueuedPacket { seq, packet });
            return PushOutcome::Probation;
        };

        let flushed = self.buffer.drain(..).map(|p| p.packet).collect();
        self.buffer.push_back(held);
        self.buffer.push_back(QueuedPacket { seq, packet });
        self.last_delivered = None;
        self.resyncs += 1;
        PushOutcome::Resync(flushed)
    }

    fn release_front(&mut self) -> Option<Packet> {
        let front = self.buffer.pop_front()?;
        self.skip_to(front.seq);
        Some(front.packet)
    }

    fn skip_to(&mut self, seq: u16) {
        if let Some(last) = self.last_delivered {
            let gap = seq.wrapping_sub(last).wrapping_sub(1);
            self.packets_skipped += gap as u64;
        }
        self.last_delivered = Some(seq);
    }
}

struct SourceQueue {
    queue: PacketReorderQueue,
    last_seen_ms: u64,
}

/// Reorder stage: one `PacketReorderQueue` per SSRC
///
/// RTCP and non-RTP packets pass straight through. While disabled, queued
/// packets are flushed in order and new packets pass through unbuffered.
/// At most `max_streams` sources are queued; empty queues idle for
/// `idle_ms` are dropped on tick or when a new source needs room.
pub struct ReorderStage {
    queues: HashMap<u32, SourceQueue>,
    config: ReorderConfig,
    health: Arc<PipelineHealth>,
    enabled: bool,
}

impl ReorderStage {
    pub fn new(config: ReorderConfig, health: Arc<PipelineHealth>) -> Self {
        Self {
            queues: HashMap::new(),
            config,
            health,
            enabled: true,
        }
    }

    /// Packets buffered for `ssrc`
    pub fn queued(&self, ssrc: u32) -> usize {
        self.queues.get(&ssrc).map_or(0, |s| s.queue.size())
    }

    /// Sources that currently have a queue
    pub fn streams(&self) -> usize {
        self.queues.len()
    }

    fn prune(&mut self, now_ms: u64) {
        let idle_ms = self.config.idle_ms;
        self.queues.retain(|ssrc, source| {
            let keep =
                !source.queue.is_empty() || now_ms.saturating_sub(source.last_seen_ms) < idle_ms;
            if !keep {
                debug!("ReorderStage: dropping idle ssrc {:#010x}", ssrc);
            }
            keep
        });
    }

    fn flush(&mut self, ctx: &mut Context<'_>) {
        let mut ssrcs: Vec<u32> = self.queues.keys().copied().collect();
        ssrcs.sort_unstable();
        for ssrc in ssrcs {
            if let Some(source) = self.queues.get_mut(&ssrc) {
                let flushed = source.queue.drain_all();
                if !flushed.is_empty() {
                    debug!(
                        "ReorderStage: flushing {} packets for ssrc {:#010x}",
                        flushed.len(),
                        ssrc
                    );
                }
                for packet in flushed {
                    ctx.fire_read(packet);
                }
            }
        }
    }
}

impl Handler for ReorderStage {
    fn name(&self) -> &'static str {
        "ReorderStage"
    }

    fn enable(&mut self) {
        self.enabled = true;
    }

    fn disable(&mut self) {
        self.enabled = false;
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn read(&mut self, ctx: &mut Context<'_>, packet: Packet) {
        if !self.enabled {
            self.flush(ctx);
            ctx.fire_read(packet);
            return;
        }
        if !packet.is_rtp() {
            ctx.fire_read(packet);
            return;
        }
        let ssrc = match packet.rtp_header() {
            Ok(head) => head.ssrc(),
            Err(e) => {
                debug!("ReorderStage: dropping malformed RTP: {}", e);
                self.health.record_malformed();
                return;
            }
        };

        let now_ms = ctx.now_ms();
        if !self.queues.contains_key(&ssrc) && self.queues.len() >= self.config.max_streams {
            self.prune(now_ms);
            if self.queues.len() >= self.config.max_streams {
                debug!(
                    "ReorderStage: {} sources queued, passing ssrc {:#010x} through",
                    self.queues.len(),
                    ssrc
                );
                ctx.fire_read(packet);
                return;
            }
        }

        let capacity = self.config.capacity;
        let source = self.queues.entry(ssrc).or_insert_with(|| {
            info!("ReorderStage: new stream ssrc {:#010x}", ssrc);
            SourceQueue {
                queue: PacketReorderQueue::new(capacity),
                last_seen_ms: now_ms,
            }
        });
        source.last_seen_ms = now_ms;
        let queue = &mut source.queue;
        match queue.push(packet) {
            Ok(PushOutcome::Queued) => {}
            Ok(PushOutcome::Duplicate) => {
                debug!("ReorderStage: duplicate on ssrc {:#010x}", ssrc);
            }
            Ok(PushOutcome::Late) => {
                self.health.record_late_drop();
                debug!("ReorderStage: late packet on ssrc {:#010x}", ssrc);
            }
            Ok(PushOutcome::Evicted(evicted)) => {
                self.health.record_reorder_eviction();
                warn!("ReorderStage: queue full for ssrc {:#010x}, skipping gap", ssrc);
                ctx.fire_read(evicted);
            }
            Ok(PushOutcome::Probation) => {
                debug!("ReorderStage: sequence jump on ssrc {:#010x}", ssrc);
            }
            Ok(PushOutcome::Resync(flushed)) => {
                info!(
                    "ReorderStage: ssrc {:#010x} restarted its sequence, flushing {} packets",
                    ssrc,
                    flushed.len()
                );
                for packet in flushed {
                    ctx.fire_read(packet);
                }
            }
            Err(e) => {
                self.health.record_malformed();
                debug!("ReorderStage: dropping malformed RTP: {}", e);
            }
        }
        while let Some(ready) = queue.pop() {
            ctx.fire_read(ready);
        }
    }

    fn on_tick(&mut self, ctx: &mut Context<'_>) {
        if !self.enabled {
            self.flush(ctx);
            return;
        }
        let now_ms = ctx.now_ms();
        for source in self.queues.values_mut() {
            while let Some(ready) = source.queue.pop_expired(now_ms, self.config.max_hold_ms) {
                ctx.fire_read(ready);
            }
        }
        self.prune(now_ms);
    }
}
