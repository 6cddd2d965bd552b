//! Handler contract for packet-processing stages
//!
//! A handler sees each packet once per direction and decides what to pass
//! on: calling `fire_read`/`fire_write` zero times drops the packet, once
//! passes it through, more than once fans out (an original and a recovered
//! packet, a flushed queue).

use std::collections::VecDeque;

use crate::packet::Packet;

/// Work queued between stages of one `Pipeline`
#[derive(Debug)]
pub(crate) enum Event {
    /// Inbound packet for the handler at this index (or the inbound sink
    /// past the last handler)
    Read(usize, Packet),
    /// Outbound packet for the handler at this index
    Write(usize, Packet),
    /// Outbound packet that left the first handler
    Transmit(Packet),
}

/// What a handler can do while processing a packet or tick
pub struct Context<'a> {
    index: usize,
    queue: &'a mut VecDeque<Event>,
    now_ms: u64,
    has_outbound: bool,
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        index: usize,
        queue: &'a mut VecDeque<Event>,
        now_ms: u64,
        has_outbound: bool,
    ) -> Self {
        Self {
            index,
            queue,
            now_ms,
            has_outbound,
        }
    }

    /// Pass a packet to the next handler towards the application
    pub fn fire_read(&mut self, packet: Packet) {
        self.queue.push_back(Event::Read(self.index + 1, packet));
    }

    /// Pass a packet to the next handler towards the network
    pub fn fire_write(&mut self, packet: Packet) {
        let event = match self.index.checked_sub(1) {
            Some(previous) => Event::Write(previous, packet),
            None => Event::Transmit(packet),
        };
        self.queue.push_back(event);
    }

    /// Pipeline clock reading taken when this call started
    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Whether outbound packets reach anything once they leave the pipeline
    pub fn has_outbound(&self) -> bool {
        self.has_outbound
    }

    /// Position of the handler being called (0 is the network side)
    pub fn index(&self) -> usize {
        self.index
    }
}

/// One stage of a `Pipeline`
///
/// Handlers run on the stream's worker only, so they keep plain mutable
/// state. A disabled handler still forwards packets; it just skips its
/// side effects.
pub trait Handler: Send {
    fn name(&self) -> &'static str;

    fn enable(&mut self);

    fn disable(&mut self);

    fn is_enabled(&self) -> bool;

    /// Inbound packet, network towards application
    fn read(&mut self, ctx: &mut Context<'_>, packet: Packet) {
        ctx.fire_read(packet);
    }

    /// Outbound packet, application towards network
    fn write(&mut self, ctx: &mut Context<'_>, packet: Packet) {
        ctx.fire_write(packet);
    }

    /// Periodic call from the stream's worker
    fn on_tick(&mut self, _ctx: &mut Context<'_>) {}
}
