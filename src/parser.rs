use crate::event::{FramedEvent, MAX_EVENT_BYTES, expected_data_len};
use tracing::trace;

/// Running-status MIDI byte parser.
///
/// Feed it one byte at a time; it emits a [`FramedEvent`] whenever a
/// complete message has been assembled. The emitted event carries frame 0,
/// the caller stamps it with the capture time.
///
/// System Realtime bytes are emitted immediately without disturbing a
/// message in progress. Active Sensing and Reset are swallowed. SysEx
/// spans are skipped: 0xF0 clears the running status, so the payload
/// bytes fall through the no-status path until 0xF7 ends the span.
#[derive(Debug, Default)]
pub struct MidiParser {
    status: Option<u8>,
    needed: usize,
    data: [u8; 2],
    len: usize,
}

impl MidiParser {
    pub fn feed(&mut self, byte: u8) -> Option<FramedEvent> {
        if byte & 0x80 != 0 {
            return self.feed_status(byte);
        }

        let Some(status) = self.status else {
            // SysEx payload or a stray data byte with no status to attach to.
            trace!("discarding data byte {byte:#04x} with no running status");
            return None;
        };

        if self.len < self.data.len() {
            self.data[self.len] = byte;
        }
        self.len += 1;
        if self.len < self.needed {
            return None;
        }

        let mut bytes = [0_u8; MAX_EVENT_BYTES];
        bytes[0] = status;
        bytes[1..=self.needed].copy_from_slice(&self.data[..self.needed]);
        let mut event = FramedEvent {
            bytes,
            len: (1 + self.needed) as u8,
            frame: 0,
        };
        event.canonicalize();

        self.len = 0;
        if status >= 0xF0 {
            // System Common does not participate in running status.
            self.status = None;
            self.needed = 0;
        }
        Some(event)
    }

    fn feed_status(&mut self, byte: u8) -> Option<FramedEvent> {
        match byte {
            // Clock, Start, Continue, Stop: may interleave with anything,
            // emitted on the spot, message in progress untouched.
            0xF8 | 0xFA | 0xFB | 0xFC => FramedEvent::new(&[byte], 0),
            // Active Sensing and Reset are noise on a serial line.
            0xFE | 0xFF => None,
            // SysEx begin/end: drop the span, forget the running status.
            0xF0 | 0xF7 => {
                self.status = None;
                self.needed = 0;
                self.len = 0;
                None
            }
            _ => {
                self.needed = expected_data_len(byte);
                self.len = 0;
                if self.needed == 0 {
                    // Tune Request and undefined status bytes stand alone.
                    self.status = None;
                    FramedEvent::new(&[byte], 0)
                } else {
                    self.status = Some(byte);
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut parser = MidiParser::default();
        bytes
            .iter()
            .filter_map(|b| parser.feed(*b))
            .map(|event| event.data().to_vec())
            .collect()
    }

    #[test]
    fn note_on_assembled() {
        assert_eq!(collect(&[0x90, 0x3C, 0x40]), vec![vec![0x90, 0x3C, 0x40]]);
    }

    #[test]
    fn note_on_velocity_zero_rewritten() {
        assert_eq!(collect(&[0x90, 0x3C, 0x00]), vec![vec![0x80, 0x3C, 0x40]]);
    }

    #[test]
    fn running_status_continuation() {
        assert_eq!(
            collect(&[0x90, 0x3C, 0x40, 0x40, 0x40]),
            vec![vec![0x90, 0x3C, 0x40], vec![0x90, 0x40, 0x40]]
        );
    }

    #[test]
    fn repeated_status_byte_starts_fresh_message() {
        assert_eq!(
            collect(&[0x90, 0x3C, 0x40, 0x90, 0x3E, 0x40]),
            vec![vec![0x90, 0x3C, 0x40], vec![0x90, 0x3E, 0x40]]
        );
    }

    #[test]
    fn program_change_takes_one_data_byte() {
        assert_eq!(collect(&[0xC2, 0x10]), vec![vec![0xC2, 0x10]]);
        assert_eq!(collect(&[0xD0, 0x55]), vec![vec![0xD0, 0x55]]);
    }

    #[test]
    fn realtime_interleaved_inside_voice_message() {
        assert_eq!(
            collect(&[0x90, 0x3C, 0xF8, 0x40]),
            vec![vec![0xF8], vec![0x90, 0x3C, 0x40]]
        );
    }

    #[test]
    fn active_sensing_is_swallowed() {
        assert_eq!(
            collect(&[0x90, 0xFE, 0x3C, 0x40]),
            vec![vec![0x90, 0x3C, 0x40]]
        );
        assert!(collect(&[0xFE, 0xFE]).is_empty());
    }

    #[test]
    fn sysex_span_discarded_realtime_passes() {
        assert_eq!(collect(&[0xF0, 0x01, 0x02, 0xF8, 0x03, 0xF7]), vec![vec![0xF8]]);
    }

    #[test]
    fn sysex_cancels_running_status() {
        // Data bytes after the span have no status to attach to.
        assert!(collect(&[0x90, 0x3C, 0x40, 0xF0, 0xF7, 0x3C, 0x40]).len() == 1);
    }

    #[test]
    fn stray_data_bytes_discarded() {
        assert!(collect(&[0x01, 0x02, 0x03]).is_empty());
    }

    #[test]
    fn song_position_pointer_no_running_status() {
        assert_eq!(collect(&[0xF2, 0x10, 0x20]), vec![vec![0xF2, 0x10, 0x20]]);
        // A following data byte must be dropped, not parsed as another SPP.
        assert!(collect(&[0xF2, 0x10, 0x20, 0x30]).len() == 1);
    }

    #[test]
    fn song_select_and_quarter_frame() {
        assert_eq!(collect(&[0xF1, 0x05]), vec![vec![0xF1, 0x05]]);
        assert_eq!(collect(&[0xF3, 0x07]), vec![vec![0xF3, 0x07]]);
    }

    #[test]
    fn tune_request_stands_alone() {
        assert_eq!(collect(&[0xF6]), vec![vec![0xF6]]);
    }

    #[test]
    fn clock_does_not_disturb_running_status() {
        assert_eq!(
            collect(&[0x90, 0x3C, 0x40, 0xF8, 0x3E, 0x40]),
            vec![vec![0x90, 0x3C, 0x40], vec![0xF8], vec![0x90, 0x3E, 0x40]]
        );
    }
}
