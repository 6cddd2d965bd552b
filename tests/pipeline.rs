use std::sync::{Arc, Mutex};

use bytes::Bytes;
use rtp_pipeline::packet::{Packet, RtcpPacket};
use rtp_pipeline::pipeline::receiver::{PacketReorderQueue, PushOutcome};
use rtp_pipeline::pipeline::{ManualClock, Pipeline};
use rtp_pipeline::sequence::seq_less_than;
use rtp_pipeline::{EncodedFrame, PipelineConfig, build_receiver_pipeline};
use tokio::sync::mpsc;
use webrtc::util::marshal::Unmarshal;

const VIDEO_SSRC: u32 = 0x0a0b_0c0d;
const VP8: u8 = 96;
const RED: u8 = 116;
const ULPFEC: u8 = 117;

fn rtp(seq: u16, timestamp: u32, payload_type: u8, marker: bool, payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![0x80, ((marker as u8) << 7) | payload_type];
    buf.extend_from_slice(&seq.to_be_bytes());
    buf.extend_from_slice(&timestamp.to_be_bytes());
    buf.extend_from_slice(&VIDEO_SSRC.to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

fn vp8(seq: u16, timestamp: u32, start: bool, keyframe: bool, marker: bool) -> Vec<u8> {
    let mut payload = vec![if start { 0x10 } else { 0x00 }, if keyframe { 0x00 } else { 0x01 }];
    payload.resize(21, seq as u8);
    rtp(seq, timestamp, VP8, marker, &payload)
}

fn sender_report(ssrc: u32, ntp_seconds: u32, ntp_fraction: u32) -> Vec<u8> {
    let mut buf = vec![0x80, 200, 0, 6];
    for word in [ssrc, ntp_seconds, ntp_fraction, 0, 10, 1000] {
        buf.extend_from_slice(&word.to_be_bytes());
    }
    buf
}

/// Level-0 ULPFEC over `media` with a 16-bit mask starting at the first
/// packet's sequence number.
fn ulpfec(media: &[Vec<u8>]) -> Vec<u8> {
    let seq_of = |m: &Vec<u8>| u16::from_be_bytes([m[2], m[3]]);
    let base = seq_of(&media[0]);
    let prot_len = media.iter().map(|m| m.len() - 12).max().unwrap_or(0);
    let (mut b0, mut b1, mut ts, mut len, mut mask) = (0u8, 0u8, 0u32, 0u16, 0u16);
    let mut data = vec![0u8; prot_len];
    for m in media {
        b0 ^= m[0];
        b1 ^= m[1];
        ts ^= u32::from_be_bytes([m[4], m[5], m[6], m[7]]);
        len ^= (m.len() - 12) as u16;
        for (d, s) in data.iter_mut().zip(&m[12..]) {
            *d ^= s;
        }
        mask |= 0x8000 >> seq_of(m).wrapping_sub(base);
    }
    let mut out = vec![b0 & 0x3f, b1];
    out.extend_from_slice(&base.to_be_bytes());
    out.extend_from_slice(&ts.to_be_bytes());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&(prot_len as u16).to_be_bytes());
    out.extend_from_slice(&mask.to_be_bytes());
    out.extend_from_slice(&data);
    out
}

/// Wrap a whole RTP packet as the primary block of a RED packet.
fn red(media: &[u8]) -> Vec<u8> {
    let mut out = media[..12].to_vec();
    out[1] = (media[1] & 0x80) | RED;
    out.push(media[1] & 0x7f);
    out.extend_from_slice(&media[12..]);
    out
}

struct Receiver {
    pipeline: Pipeline,
    clock: ManualClock,
    frames: mpsc::Receiver<EncodedFrame>,
    sent: Arc<Mutex<Vec<Packet>>>,
}

fn receiver() -> Receiver {
    let clock = ManualClock::new(0);
    let (mut pipeline, frames) =
        build_receiver_pipeline(&PipelineConfig::default(), Arc::new(clock.clone()));
    let sent = Arc::new(Mutex::new(Vec::new()));
    let sink = sent.clone();
    pipeline.set_outbound_sink(move |p| sink.lock().unwrap().push(p));
    Receiver {
        pipeline,
        clock,
        frames,
        sent,
    }
}

#[test]
fn reordered_fragments_assemble_one_keyframe() {
    let mut rx = receiver();
    rx.pipeline.read(Packet::new(vp8(9, 0, true, false, true), 0));
    rx.pipeline.read(Packet::new(vp8(11, 3000, false, false, false), 1));
    rx.pipeline.read(Packet::new(vp8(12, 3000, false, false, true), 2));
    rx.pipeline.read(Packet::new(vp8(10, 3000, true, true, false), 3));

    let first = rx.frames.try_recv().unwrap();
    assert!(!first.keyframe);
    let frame = rx.frames.try_recv().unwrap();
    assert!(frame.keyframe);
    assert_eq!(frame.ssrc, VIDEO_SSRC);
    assert_eq!(frame.rtp_timestamp, 3000);
    assert_eq!(frame.size(), 60);
    assert!(rx.frames.try_recv().is_err());

    let summary = rx.pipeline.health().summary();
    assert_eq!(summary.frames_assembled, 2);
    assert_eq!(summary.keyframes, 1);
}

#[test]
fn reorder_queue_stays_bounded_across_wrap() {
    let mut queue = PacketReorderQueue::new(100);
    let mut released = Vec::new();
    for i in 0..150u16 {
        let seq = 65_500u16.wrapping_add(i);
        let packet = Packet::new(rtp(seq, 0, VP8, false, &[0]), 0);
        if let PushOutcome::Evicted(evicted) = queue.push(packet).unwrap() {
            released.push(evicted);
        }
        assert!(queue.size() <= 100);
    }
    while let Some(packet) = queue.pop() {
        released.push(packet);
    }

    assert_eq!(released.len(), 150);
    let seqs: Vec<u16> = released
        .iter()
        .map(|p| p.rtp_header().unwrap().sequence_number())
        .collect();
    assert!(seqs.windows(2).all(|w| seq_less_than(w[0], w[1])));
    assert_eq!(seqs[0], 65_500);
    assert_eq!(seqs[149], 65_500u16.wrapping_add(149));
}

#[test]
fn sender_report_is_answered_with_receiver_report() {
    let mut rx = receiver();
    for seq in 0..20u16 {
        if seq == 7 || seq == 8 {
            continue;
        }
        let seq = 1000 + seq;
        rx.pipeline
            .read(Packet::new(vp8(seq, seq as u32 * 90, true, false, true), seq as u64));
    }
    // everything after the gap waits in the reorder queue until it expires
    rx.clock.set(3000);
    rx.pipeline.tick();
    rx.pipeline
        .read(Packet::new(sender_report(VIDEO_SSRC, 0x0000_0102, 0x0304_0000), 2000));

    let sent = rx.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    let head = RtcpPacket::parse(sent[0].data()).unwrap();
    assert_eq!(head.packet_type(), 201);

    let mut bytes = Bytes::copy_from_slice(sent[0].data());
    let rr = rtcp::receiver_report::ReceiverReport::unmarshal(&mut bytes).unwrap();
    assert_eq!(rr.ssrc, VIDEO_SSRC);
    let block = &rr.reports[0];
    assert_eq!(block.ssrc, VIDEO_SSRC);
    assert_eq!(block.last_sequence_number, 1019);
    assert_eq!(block.total_lost, 2);
    assert_eq!(block.fraction_lost, 25); // (2 << 8) / 20
    assert_eq!(block.last_sender_report, 0x0102_0304);
    assert_eq!(block.delay, 65536);
    assert_eq!(rx.pipeline.health().rrs_sent(), 1);
}

#[test]
fn sender_restart_on_same_ssrc_keeps_frames_flowing() {
    let mut rx = receiver();
    for seq in 100..104u16 {
        rx.pipeline.read(Packet::new(vp8(seq, seq as u32 * 3000, true, true, true), seq as u64));
    }
    // same SSRC, new sequence space and a fresh keyframe in three fragments
    rx.pipeline.read(Packet::new(vp8(40_000, 900, true, true, false), 200));
    rx.pipeline.read(Packet::new(vp8(40_001, 900, false, false, false), 201));
    rx.pipeline.read(Packet::new(vp8(40_002, 900, false, false, true), 202));
    rx.pipeline.read(Packet::new(vp8(40_003, 3900, true, false, true), 203));

    let frames: Vec<EncodedFrame> = std::iter::from_fn(|| rx.frames.try_recv().ok()).collect();
    let timestamps: Vec<u32> = frames.iter().map(|f| f.rtp_timestamp).collect();
    assert_eq!(timestamps, vec![300_000, 303_000, 306_000, 309_000, 900, 3900]);
    assert!(frames[4].keyframe);
    assert_eq!(frames[4].size(), 60);

    let health = rx.pipeline.health();
    assert_eq!(health.late_drops(), 0);
    assert_eq!(health.depacketizer_resets(), 0);
}

#[test]
fn lost_fragment_is_recovered_by_fec() {
    let mut rx = receiver();
    let protected = vec![
        vp8(10, 3000, true, true, false),
        vp8(11, 3000, false, false, false),
        vp8(12, 3000, false, false, true),
    ];
    let fec = ulpfec(&protected);

    rx.pipeline.read(Packet::new(red(&protected[0]), 0));
    // 11 never arrives
    rx.pipeline.read(Packet::new(red(&protected[2]), 1));
    rx.pipeline.read(Packet::new(red(&rtp(13, 3000, ULPFEC, false, &fec)), 2));

    let frame = rx.frames.try_recv().unwrap();
    assert!(frame.keyframe);
    assert_eq!(frame.size(), 60);
    let health = rx.pipeline.health();
    assert_eq!(health.fec_recovered(), 1);
    assert_eq!(health.reorder_evictions(), 0);
}

#[test]
fn disabled_stages_still_pass_packets() {
    let mut rx = receiver();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    rx.pipeline
        .set_inbound_sink(move |p: Packet| sink.lock().unwrap().push(p.len()));
    for name in rx.pipeline.handler_names() {
        assert!(rx.pipeline.set_enabled(name, false));
    }
    rx.pipeline.read(Packet::new(vp8(5, 0, true, true, true), 0));
    rx.pipeline.read(Packet::new(vp8(4, 0, true, true, true), 0));
    rx.pipeline.read(Packet::new(sender_report(VIDEO_SSRC, 1, 2), 0));

    assert_eq!(seen.lock().unwrap().len(), 3);
    assert!(rx.sent.lock().unwrap().is_empty());
    assert!(rx.frames.try_recv().is_err());
}
