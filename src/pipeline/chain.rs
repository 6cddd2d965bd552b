//! Ordered handler chain for one stream

use std::collections::VecDeque;
use std::sync::Arc;

use log::debug;

use super::clock::Clock;
use super::handler::{Context, Event, Handler};
use super::health::PipelineHealth;
use crate::packet::Packet;

/// Receives packets leaving either end of a pipeline
pub type Sink = Box<dyn FnMut(Packet) + Send>;

/// Handlers in network-to-application order
///
/// Index 0 sits next to the network. `read` enters at index 0 and walks
/// up; `write` enters at the last handler and walks down. Forwarded
/// packets are queued and processed in the order they were fired, so a
/// handler never re-enters itself.
pub struct Pipeline {
    handlers: Vec<Box<dyn Handler>>,
    queue: VecDeque<Event>,
    clock: Arc<dyn Clock>,
    health: Arc<PipelineHealth>,
    inbound_sink: Option<Sink>,
    outbound_sink: Option<Sink>,
}

impl Pipeline {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_health(clock, Arc::new(PipelineHealth::new()))
    }

    pub fn with_health(clock: Arc<dyn Clock>, health: Arc<PipelineHealth>) -> Self {
        Self {
            handlers: Vec::new(),
            queue: VecDeque::new(),
            clock,
            health,
            inbound_sink: None,
            outbound_sink: None,
        }
    }

    /// Append a handler on the application side of the chain
    pub fn add_last(&mut self, handler: Box<dyn Handler>) {
        self.handlers.push(handler);
    }

    pub fn set_inbound_sink(&mut self, sink: impl FnMut(Packet) + Send + 'static) {
        self.inbound_sink = Some(Box::new(sink));
    }

    pub fn set_outbound_sink(&mut self, sink: impl FnMut(Packet) + Send + 'static) {
        self.outbound_sink = Some(Box::new(sink));
    }

    pub fn health(&self) -> &Arc<PipelineHealth> {
        &self.health
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn handler_names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    pub fn is_enabled(&self, name: &str) -> Option<bool> {
        self.handlers
            .iter()
            .find(|h| h.name() == name)
            .map(|h| h.is_enabled())
    }

    /// Feed a packet from the network
    pub fn read(&mut self, packet: Packet) {
        self.health.record_packet(self.clock.now_ms());
        self.queue.push_back(Event::Read(0, packet));
        self.drain();
    }

    /// Feed a packet from the application
    pub fn write(&mut self, packet: Packet) {
        let event = match self.handlers.len().checked_sub(1) {
            Some(last) => Event::Write(last, packet),
            None => Event::Transmit(packet),
        };
        self.queue.push_back(event);
        self.drain();
    }

    /// Give every handler its periodic call, network side first
    pub fn tick(&mut self) {
        for index in 0..self.handlers.len() {
            self.tick_one(index);
        }
    }

    /// Enable or disable the named handler. Returns false when no handler
    /// has that name.
    ///
    /// The handler gets a tick right after the switch so it can release
    /// anything it was holding.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        let Some(index) = self.handlers.iter().position(|h| h.name() == name) else {
            return false;
        };
        let handler = &mut self.handlers[index];
        if enabled {
            handler.enable();
        } else {
            handler.disable();
        }
        debug!(
            "Pipeline: {} {}",
            name,
            if enabled { "enabled" } else { "disabled" }
        );
        self.tick_one(index);
        true
    }

    fn tick_one(&mut self, index: usize) {
        let now_ms = self.clock.now_ms();
        let has_outbound = self.outbound_sink.is_some();
        let mut ctx = Context::new(index, &mut self.queue, now_ms, has_outbound);
        self.handlers[index].on_tick(&mut ctx);
        self.drain();
    }

    fn drain(&mut self) {
        let has_outbound = self.outbound_sink.is_some();
        while let Some(event) = self.queue.pop_front() {
            match event {
                Event::Read(index, packet) if index >= self.handlers.len() => {
                    if let Some(sink) = self.inbound_sink.as_mut() {
                        sink(packet);
                    }
                }
                Event::Read(index, packet) => {
                    let now_ms = self.clock.now_ms();
                    let mut ctx = Context::new(index, &mut self.queue, now_ms, has_outbound);
                    self.handlers[index].read(&mut ctx, packet);
                }
                Event::Write(index, packet) => {
                    let now_ms = self.clock.now_ms();
                    let mut ctx = Context::new(index, &mut self.queue, now_ms, has_outbound);
                    self.handlers[index].write(&mut ctx, packet);
                }
                Event::Transmit(packet) => {
                    if let Some(sink) = self.outbound_sink.as_mut() {
                        sink(packet);
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("handlers", &self.handler_names())
            .field("inbound_sink", &self.inbound_sink.is_some())
            .field("outbound_sink", &self.outbound_sink.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::clock::ManualClock;
    use crate::testutil::rtp_packet;
    use std::sync::Mutex;

    /// Forwards every inbound packet `copies` times and tags ticks.
    struct Fanout {
        name: &'static str,
        copies: usize,
        enabled: bool,
        ticks: Arc<Mutex<Vec<(&'static str, u64)>>>,
    }

    impl Fanout {
        fn boxed(
            name: &'static str,
            copies: usize,
            ticks: &Arc<Mutex<Vec<(&'static str, u64)>>>,
        ) -> Box<Self> {
            Box::new(Self {
                name,
                copies,
                enabled: true,
                ticks: ticks.clone(),
            })
        }
    }

    impl Handler for Fanout {
        fn name(&self) -> &'static str {
            self.name
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
            let copies = if self.enabled { self.copies } else { 1 };
            for _ in 0..copies {
                ctx.fire_read(packet.clone());
            }
        }

        fn on_tick(&mut self, ctx: &mut Context<'_>) {
            self.ticks.lock().unwrap().push((self.name, ctx.now_ms()));
        }
    }

    fn collect(pipeline: &mut Pipeline) -> (Arc<Mutex<Vec<Packet>>>, Arc<Mutex<Vec<Packet>>>) {
        let inbound = Arc::new(Mutex::new(Vec::new()));
        let outbound = Arc::new(Mutex::new(Vec::new()));
        let sink = inbound.clone();
        pipeline.set_inbound_sink(move |p| sink.lock().unwrap().push(p));
        let sink = outbound.clone();
        pipeline.set_outbound_sink(move |p| sink.lock().unwrap().push(p));
        (inbound, outbound)
    }

    #[test]
    fn test_fanout_and_drop() {
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new(Arc::new(ManualClock::new(0)));
        pipeline.add_last(Fanout::boxed("split", 2, &ticks));
        pipeline.add_last(Fanout::boxed("pass", 1, &ticks));
        let (inbound, _) = collect(&mut pipeline);

        pipeline.read(rtp_packet(1, 0, 1, 0));
        assert_eq!(inbound.lock().unwrap().len(), 2);

        pipeline.add_last(Fanout::boxed("drop", 0, &ticks));
        pipeline.read(rtp_packet(2, 0, 1, 0));
        assert_eq!(inbound.lock().unwrap().len(), 2);
        assert_eq!(pipeline.health().packets_in(), 2);
    }

    #[test]
    fn test_write_reaches_outbound_sink() {
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new(Arc::new(ManualClock::new(0)));
        pipeline.add_last(Fanout::boxed("a", 1, &ticks));
        pipeline.add_last(Fanout::boxed("b", 1, &ticks));
        let (inbound, outbound) = collect(&mut pipeline);

        pipeline.write(rtp_packet(9, 0, 1, 0));
        assert!(inbound.lock().unwrap().is_empty());
        assert_eq!(outbound.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_sinks_drop_silently() {
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new(Arc::new(ManualClock::new(0)));
        pipeline.add_last(Fanout::boxed("a", 1, &ticks));
        pipeline.read(rtp_packet(1, 0, 1, 0));
        pipeline.write(rtp_packet(1, 0, 1, 0));
        assert_eq!(pipeline.health().packets_in(), 1);
    }

    #[test]
    fn test_tick_order_and_clock() {
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let clock = ManualClock::new(500);
        let mut pipeline = Pipeline::new(Arc::new(clock.clone()));
        pipeline.add_last(Fanout::boxed("first", 1, &ticks));
        pipeline.add_last(Fanout::boxed("second", 1, &ticks));

        pipeline.tick();
        clock.advance(20);
        pipeline.tick();
        assert_eq!(
            *ticks.lock().unwrap(),
            vec![("first", 500), ("second", 500), ("first", 520), ("second", 520)]
        );
    }

    #[test]
    fn test_set_enabled_by_name() {
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new(Arc::new(ManualClock::new(0)));
        pipeline.add_last(Fanout::boxed("split", 3, &ticks));
        let (inbound, _) = collect(&mut pipeline);

        assert_eq!(pipeline.handler_names(), vec!["split"]);
        assert!(pipeline.set_enabled("split", false));
        assert_eq!(pipeline.is_enabled("split"), Some(false));
        assert!(!pipeline.set_enabled("missing", false));

        pipeline.read(rtp_packet(1, 0, 1, 0));
        assert_eq!(inbound.lock().unwrap().len(), 1);
        // the switch itself produced one tick
        assert_eq!(ticks.lock().unwrap().len(), 1);
    }
}
