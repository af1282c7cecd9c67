use jack::Frames;

/// Longest message this bridge carries: status plus two data bytes.
/// SysEx and other variable-length traffic never reaches a queue.
pub const MAX_EVENT_BYTES: usize = 3;

/// One complete MIDI message with the frame time it was captured at.
///
/// Events are copied by value across the ring buffers; both sides of a
/// queue see the same 8-byte record and nothing is shared.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FramedEvent {
    pub bytes: [u8; MAX_EVENT_BYTES],
    pub len: u8,
    pub frame: Frames,
}

impl FramedEvent {
    /// Builds an event from raw bytes. Empty messages and messages longer
    /// than [`MAX_EVENT_BYTES`] are rejected.
    pub fn new(data: &[u8], frame: Frames) -> Option<Self> {
        if data.is_empty() || data.len() > MAX_EVENT_BYTES {
            return None;
        }
        let mut bytes = [0_u8; MAX_EVENT_BYTES];
        bytes[..data.len()].copy_from_slice(data);
        Some(Self {
            bytes,
            len: data.len() as u8,
            frame,
        })
    }

    /// The live bytes of the message.
    pub fn data(&self) -> &[u8] {
        &self.bytes[..usize::from(self.len)]
    }

    /// Note On with velocity 0 means Note Off by long-standing convention;
    /// rewrite it so consumers always see an explicit Note Off.
    pub fn canonicalize(&mut self) {
        if self.len == 3 && self.bytes[0] & 0xF0 == 0x90 && self.bytes[2] == 0x00 {
            self.bytes[0] = 0x80 | (self.bytes[0] & 0x0F);
            self.bytes[2] = 0x40;
        }
    }
}

/// Data bytes following a given status byte.
pub fn expected_data_len(status: u8) -> usize {
    match status {
        0x80..=0xBF | 0xE0..=0xEF => 2,
        0xC0..=0xDF => 1,
        0xF1 | 0xF3 => 1,
        0xF2 => 2,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_long_and_empty_messages() {
        assert!(FramedEvent::new(&[], 0).is_none());
        assert!(FramedEvent::new(&[0xF0, 0x01, 0x02, 0xF7], 0).is_none());
        assert!(FramedEvent::new(&[0x90, 0x3C, 0x40], 0).is_some());
    }

    #[test]
    fn data_returns_live_bytes_only() {
        let event = FramedEvent::new(&[0xC0, 0x05], 10).unwrap();
        assert_eq!(event.data(), &[0xC0, 0x05]);
        assert_eq!(event.frame, 10);
    }

    #[test]
    fn note_on_velocity_zero_becomes_note_off() {
        let mut event = FramedEvent::new(&[0x93, 0x3C, 0x00], 0).unwrap();
        event.canonicalize();
        assert_eq!(event.data(), &[0x83, 0x3C, 0x40]);
    }

    #[test]
    fn canonicalize_leaves_other_messages_alone() {
        let mut event = FramedEvent::new(&[0x90, 0x3C, 0x40], 0).unwrap();
        event.canonicalize();
        assert_eq!(event.data(), &[0x90, 0x3C, 0x40]);

        let mut short = FramedEvent::new(&[0xC0, 0x00], 0).unwrap();
        short.canonicalize();
        assert_eq!(short.data(), &[0xC0, 0x00]);
    }

    #[test]
    fn status_byte_data_lengths() {
        assert_eq!(expected_data_len(0x90), 2);
        assert_eq!(expected_data_len(0xB3), 2);
        assert_eq!(expected_data_len(0xE7), 2);
        assert_eq!(expected_data_len(0xC1), 1);
        assert_eq!(expected_data_len(0xD0), 1);
        assert_eq!(expected_data_len(0xF1), 1);
        assert_eq!(expected_data_len(0xF2), 2);
        assert_eq!(expected_data_len(0xF3), 1);
        assert_eq!(expected_data_len(0xF6), 0);
        assert_eq!(expected_data_len(0xF8), 0);
    }
}
