//! Extended sequence number tracking (RFC 3550 Appendix A.1)

/// Wraparound-aware `x < y` over the 16-bit sequence space.
///
/// `x` is before `y` when `y` is less than half the space ahead of it.
pub fn seq_less_than(x: u16, y: u16) -> bool {
    let diff = y as i32 - x as i32;
    if diff > 0 {
        diff < 0x8000
    } else if diff < 0 {
        diff < -0x8000
    } else {
        false
    }
}

/// Highest sequence number seen on one SSRC, extended with a wrap count.
///
/// `base_seq == 0` doubles as "nothing observed yet", so a stream whose
/// first packet really carries sequence number 0 is re-based on the next
/// packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceTracker {
    base_seq: u16,
    max_seq: u16,
    cycles: u32,
    extended_max: u32,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `seq` into the tracker. Returns true when it moved `max_seq`
    /// forward; late or duplicate packets leave the state untouched.
    pub fn observe(&mut self, seq: u16) -> bool {
        if self.base_seq == 0 {
            self.base_seq = seq;
            self.max_seq = seq;
            self.extended_max = (self.cycles << 16) | seq as u32;
            return true;
        }

        let advanced = !seq_less_than(seq, self.max_seq);
        if advanced {
            if seq < self.max_seq {
                self.cycles += 1;
            }
            self.max_seq = seq;
        }
        self.extended_max = (self.cycles << 16) | self.max_seq as u32;
        advanced
    }

    pub fn is_started(&self) -> bool {
        self.base_seq != 0
    }

    pub fn base_seq(&self) -> u16 {
        self.base_seq
    }

    pub fn max_seq(&self) -> u16 {
        self.max_seq
    }

    /// Number of times the 16-bit space wrapped.
    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    pub fn extended_max(&self) -> u32 {
        self.extended_max
    }

    #[cfg(test)]
    pub(crate) fn from_parts(base_seq: u16, max_seq: u16, cycles: u32) -> Self {
        Self {
            base_seq,
            max_seq,
            cycles,
            extended_max: (cycles << 16) | max_seq as u32,
        }
    }
}
