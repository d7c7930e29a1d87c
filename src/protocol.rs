//! Wire framing for the DSO protocol: `[mark, len_lo, len_hi, command, (subcommand?), data…, checksum]`.

/// Normal-mode frame marker.
pub const MARK_NORMAL: u8 = 0x53;
/// Debug-mode frame marker.
pub const MARK_DEBUG: u8 = 0x43;

pub const CMD_ECHO: u8 = 0x00;
pub const CMD_READ_SETTINGS: u8 = 0x01;
pub const CMD_SAMPLE: u8 = 0x02;
pub const CMD_LOCK_PANEL: u8 = 0x12;
pub const CMD_SET_SYSTEM_TIME: u8 = 0x14;
pub const CMD_SCREENSHOT: u8 = 0x20;
pub const CMD_SETTINGS_RESPONSE: u8 = 0x81;
pub const CMD_SAMPLE_RESPONSE: u8 = 0x82;
pub const CMD_BUZZER: u8 = 0x44;
pub const CMD_INIT: u8 = 0x7F;

pub const SAMPLE_LEN_SUBCMD: u8 = 0x00;
pub const SAMPLE_DATA_SUBCMD: u8 = 0x01;
pub const SAMPLE_SUM_SUBCMD: u8 = 0x02;
pub const SAMPLE_STOP_SUBCMD: u8 = 0x03;

/// Commands that carry a subcommand byte.
const SUBCOMMAND_BEARING: [u8; 8] = [0x02, 0x10, 0x12, 0x20, 0x82, 0x90, 0x92, 0xA0];

fn has_subcommand(command: u8) -> bool {
    SUBCOMMAND_BEARING.contains(&command)
}

/// One protocol message on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub mark: u8,
    pub length: u16,
    pub command: u8,
    pub subcommand: Option<u8>,
    pub data: Vec<u8>,
    pub checksum_ok: bool,
}

impl Frame {
    /// Build a frame for encoding; `checksum_ok` is not meaningful until decoded back.
    pub fn new(mark: u8, command: u8, subcommand: Option<u8>, data: Vec<u8>) -> Self {
        // `length` counts command + subcommand? + data + the checksum byte itself.
        let length = 1 + subcommand.is_some() as u16 + data.len() as u16 + 1;
        Self {
            mark,
            length,
            command,
            subcommand,
            data,
            checksum_ok: true,
        }
    }

    pub fn is_response(&self) -> bool {
        self.command & 0x80 != 0
    }

    /// Serialize to the wire representation, appending the checksum byte.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + self.length as usize + 1);
        bytes.push(self.mark);
        bytes.push((self.length & 0xFF) as u8);
        bytes.push((self.length >> 8) as u8);
        bytes.push(self.command);
        if let Some(sub) = self.subcommand {
            bytes.push(sub);
        }
        bytes.extend_from_slice(&self.data);
        let checksum = sum_checksum(&bytes);
        bytes.push(checksum);
        bytes
    }

    /// Decode one frame from the front of `buffer`. `None` on an empty read
    /// (`buffer[0] == 0`) or a buffer too short to contain even a header.
    /// Trailing bytes beyond the frame are tolerated and ignored. An invalid
    /// checksum does not reject the frame; `checksum_ok` is set to `false`
    /// and left for the caller to act on.
    pub fn decode(buffer: &[u8]) -> Option<Frame> {
        if buffer.is_empty() || buffer[0] == 0 {
            return None;
        }
        if buffer.len() < 4 {
            return None;
        }

        let mark = buffer[0];
        let length = u16::from_le_bytes([buffer[1], buffer[2]]);
        let command = buffer[3];

        let checksum_idx = length as usize + 2;
        if buffer.len() <= checksum_idx {
            return Some(Frame {
                mark,
                length,
                command,
                subcommand: None,
                data: Vec::new(),
                checksum_ok: false,
            });
        }

        let (subcommand, data_start) = if length < 3 {
            (None, 4)
        } else if has_subcommand(command) {
            (Some(buffer[4]), 5)
        } else {
            (None, 4)
        };

        let data = buffer[data_start..checksum_idx].to_vec();
        let checksum_ok = sum_checksum(&buffer[..checksum_idx]) == buffer[checksum_idx];

        Some(Frame {
            mark,
            length,
            command,
            subcommand,
            data,
            checksum_ok,
        })
    }
}

fn sum_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_with_subcommand_and_data() {
        let frame = Frame::new(MARK_NORMAL, CMD_LOCK_PANEL, Some(0x01), vec![1]);
        let bytes = frame.encode();
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded.mark, frame.mark);
        assert_eq!(decoded.command, frame.command);
        assert_eq!(decoded.subcommand, frame.subcommand);
        assert_eq!(decoded.data, frame.data);
        assert!(decoded.checksum_ok);
    }

    #[test]
    fn roundtrip_bare_command() {
        let frame = Frame::new(MARK_NORMAL, CMD_SCREENSHOT, None, vec![]);
        let bytes = frame.encode();
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded.command, CMD_SCREENSHOT);
        assert!(decoded.data.is_empty());
        assert!(decoded.checksum_ok);
    }

    #[test]
    fn checksum_detects_corruption() {
        let bytes = [0x53, 0x02, 0x00, 0x01, 0x55];
        let decoded = Frame::decode(&bytes).unwrap();
        assert!(!decoded.checksum_ok);

        let mut fixed = bytes;
        fixed[4] = 0x56;
        let decoded = Frame::decode(&fixed).unwrap();
        assert!(decoded.checksum_ok);
    }

    #[test]
    fn decode_screenshot_request() {
        let bytes = [0x53, 0x02, 0x00, 0x20, 0x75];
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded.mark, MARK_NORMAL);
        assert_eq!(decoded.length, 2);
        assert_eq!(decoded.command, CMD_SCREENSHOT);
        assert!(decoded.data.is_empty());
        assert!(decoded.checksum_ok);
        assert!(!decoded.is_response());
    }

    #[test]
    fn decode_lock_panel_on() {
        let bytes = [0x53, 0x04, 0x00, 0x12, 0x01, 0x01, 0x6b];
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded.command, CMD_LOCK_PANEL);
        assert_eq!(decoded.subcommand, Some(0x01));
        assert_eq!(decoded.data, vec![1]);
        assert!(decoded.checksum_ok);
    }

    #[test]
    fn encode_bare_screenshot_frame() {
        let frame = Frame::new(MARK_NORMAL, CMD_SCREENSHOT, None, vec![]);
        assert_eq!(frame.encode(), vec![0x53, 0x02, 0x00, 0x20, 0x75]);
    }

    #[test]
    fn decode_empty_read_is_none() {
        assert!(Frame::decode(&[0x00, 0x02, 0x00, 0x01]).is_none());
        assert!(Frame::decode(&[]).is_none());
    }

    #[test]
    fn decode_tolerates_trailing_bytes() {
        let mut bytes = vec![0x53, 0x02, 0x00, 0x20, 0x75];
        bytes.extend_from_slice(&[0xAA; 32]);
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded.command, CMD_SCREENSHOT);
        assert!(decoded.checksum_ok);
    }

    #[test]
    fn decode_short_buffer_is_checksum_invalid() {
        let bytes = [0x53, 0x04, 0x00, 0x12, 0x01];
        let decoded = Frame::decode(&bytes).unwrap();
        assert!(!decoded.checksum_ok);
    }
}
