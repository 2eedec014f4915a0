//! Wire format of device requests and replies.
//!
//! Request: `\0 NAME \0`, payload length in 16-bit units (u16 LE), payload
//! words (LE, each at its own size), `END\0`.
//!
//! Reply: acknowledgement `ACK\0`, then for commands that return data the word
//! count (u16 LE), the words (u16 LE) and `END\0`.

use crate::error::TransportError;

/// Acknowledgement sentinel sent by the device for every accepted packet.
pub const ACK: &[u8; 4] = b"ACK\0";
/// Terminator closing every packet in both directions.
pub const END: &[u8; 4] = b"END\0";
/// Prefix of the busy report the device sends instead of an acknowledgement.
pub const BUSY_PREFIX: &[u8; 4] = b"MCU ";

/// Size of one payload word on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WordSize {
    #[default]
    Two,
    Four,
}

impl WordSize {
    /// Bytes occupied on the wire.
    pub fn bytes(self) -> usize {
        match self {
            WordSize::Two => 2,
            WordSize::Four => 4,
        }
    }

    /// Length contribution in 16-bit units.
    pub fn units(self) -> u16 {
        match self {
            WordSize::Two => 1,
            WordSize::Four => 2,
        }
    }

    fn mask(self) -> u64 {
        (1u64 << (self.bytes() * 8)) - 1
    }
}

/// Single payload word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Word {
    pub value: u64,
    pub size: WordSize,
}

/// Request payload: empty, one integer, a uniform or a mixed-size sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    words: Vec<Word>,
}

impl Payload {
    /// Payload with no words (length field 0).
    pub fn empty() -> Self {
        Self::default()
    }

    /// One 16-bit word.
    pub fn single(value: u64) -> Self {
        Self::words([value], WordSize::Two)
    }

    /// Uniform sequence of words of one size.
    pub fn words(values: impl IntoIterator<Item = u64>, size: WordSize) -> Self {
        Self {
            words: values.into_iter().map(|value| Word { value, size }).collect(),
        }
    }

    /// Sequence with a size per word.
    pub fn mixed(words: impl IntoIterator<Item = (u64, WordSize)>) -> Self {
        Self {
            words: words
                .into_iter()
                .map(|(value, size)| Word { value, size })
                .collect(),
        }
    }

    /// Payload words in wire order.
    pub fn as_slice(&self) -> &[Word] {
        &self.words
    }

    /// True when the payload carries no words.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Length field value: total size in 16-bit units.
    pub fn length_units(&self) -> u16 {
        self.words.iter().map(|w| w.size.units()).sum()
    }
}

impl From<u64> for Payload {
    fn from(value: u64) -> Self {
        Payload::single(value)
    }
}

/// What a command returns after its acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Acknowledgement only.
    None,
    /// Exactly this many 16-bit words.
    Words(usize),
    /// Whatever the device sends until the terminator.
    All,
}

impl Reply {
    /// Byte count of a `Words(n)` reply: length field, data and terminator.
    pub fn expected_bytes(self) -> Option<usize> {
        match self {
            Reply::Words(n) => Some(2 * n + 2 + END.len()),
            _ => None,
        }
    }
}

/// Encode a request packet.
pub fn encode_packet(name: &str, payload: &Payload) -> Vec<u8> {
    let body: usize = payload.as_slice().iter().map(|w| w.size.bytes()).sum();
    let mut packet = Vec::with_capacity(name.len() + 4 + body + END.len());
    packet.push(0);
    packet.extend_from_slice(name.as_bytes());
    packet.push(0);
    packet.extend_from_slice(&payload.length_units().to_le_bytes());
    for word in payload.as_slice() {
        let masked = word.value & word.size.mask();
        packet.extend_from_slice(&masked.to_le_bytes()[..word.size.bytes()]);
    }
    packet.extend_from_slice(END);
    packet
}

/// Request decoded from raw bytes. Used by device doubles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRequest {
    pub name: String,
    /// Length field in 16-bit units.
    pub length_units: u16,
    /// Payload bytes between the length field and the terminator.
    pub body: Vec<u8>,
}

impl DecodedRequest {
    /// Interpret the body as words of the given sizes.
    ///
    /// Returns `None` when the sizes do not cover the body exactly.
    pub fn words(&self, sizes: &[WordSize]) -> Option<Vec<u64>> {
        let mut offset = 0;
        let mut out = Vec::with_capacity(sizes.len());
        for size in sizes {
            let end = offset + size.bytes();
            let chunk = self.body.get(offset..end)?;
            let mut buf = [0u8; 8];
            buf[..chunk.len()].copy_from_slice(chunk);
            out.push(u64::from_le_bytes(buf));
            offset = end;
        }
        (offset == self.body.len()).then_some(out)
    }

    /// Interpret the body as a uniform sequence of 16-bit words.
    pub fn u16_words(&self) -> Vec<u16> {
        self.body
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect()
    }
}

/// Split one complete request packet into its parts.
pub fn decode_request(packet: &[u8]) -> Option<DecodedRequest> {
    let rest = packet.strip_prefix(&[0u8])?;
    let name_end = rest.iter().position(|&b| b == 0)?;
    let name = std::str::from_utf8(&rest[..name_end]).ok()?.to_string();
    let rest = &rest[name_end + 1..];
    let rest = rest.strip_suffix(END.as_slice())?;
    if rest.len() < 2 {
        return None;
    }
    let length_units = u16::from_le_bytes([rest[0], rest[1]]);
    Some(DecodedRequest {
        name,
        length_units,
        body: rest[2..].to_vec(),
    })
}

/// Encode reply data the way the device sends it after the acknowledgement.
pub fn encode_reply(words: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + 2 * words.len() + END.len());
    out.extend_from_slice(&(words.len() as u16).to_le_bytes());
    for w in words {
        out.extend_from_slice(&w.to_le_bytes());
    }
    out.extend_from_slice(END);
    out
}

/// Validate a data reply (everything after the acknowledgement) and extract
/// its words.
pub fn decode_reply(
    command: &str,
    reply: Reply,
    response: &[u8],
) -> Result<Vec<u16>, TransportError> {
    if response.is_empty() {
        return Err(TransportError::Timeout {
            command: command.to_string(),
        });
    }
    if !response.ends_with(END) {
        return Err(TransportError::MissingTerminator {
            command: command.to_string(),
        });
    }
    if let Some(expected) = reply.expected_bytes() {
        if response.len() != expected {
            return Err(TransportError::UnexpectedReplySize {
                command: command.to_string(),
                expected,
                received: response.len(),
            });
        }
    }
    let data = &response[..response.len() - END.len()];
    if data.len() < 2 {
        return Err(TransportError::UnexpectedReplySize {
            command: command.to_string(),
            expected: 2 + END.len(),
            received: response.len(),
        });
    }
    let declared = u16::from_le_bytes([data[0], data[1]]) as usize;
    let body = &data[2..];
    let actual = body.len() / 2;
    if declared != actual || body.len() % 2 != 0 {
        return Err(TransportError::LengthMismatch {
            command: command.to_string(),
            declared,
            actual,
        });
    }
    Ok(body
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect())
}

/// Check the 4-byte acknowledgement.
pub fn check_ack(command: &str, received: &[u8]) -> Result<(), TransportError> {
    if received.is_empty() {
        Err(TransportError::Timeout {
            command: command.to_string(),
        })
    } else if received == ACK {
        Ok(())
    } else if received.starts_with(BUSY_PREFIX) {
        Err(TransportError::DeviceBusy {
            command: command.to_string(),
        })
    } else {
        Err(TransportError::MissingAck {
            command: command.to_string(),
            received: received.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_empty_payload() {
        let packet = encode_packet("STATUS", &Payload::empty());
        assert_eq!(packet, b"\0STATUS\0\x00\x00END\0".to_vec());
    }

    #[test]
    fn test_encode_single_word() {
        let packet = encode_packet("SET ATT", &Payload::single(63));
        assert_eq!(packet, b"\0SET ATT\0\x01\x00\x3f\x00END\0".to_vec());
    }

    #[test]
    fn test_encode_mixed_sizes_counts_sixteen_bit_units() {
        let payload = Payload::mixed([(52400, WordSize::Two), (0x0102_0304, WordSize::Four)]);
        let packet = encode_packet("SET LFDAC", &payload);
        let decoded = decode_request(&packet).expect("decodes");
        assert_eq!(decoded.name, "SET LFDAC");
        assert_eq!(decoded.length_units, 3);
        assert_eq!(decoded.body, vec![0xb0, 0xcc, 0x04, 0x03, 0x02, 0x01]);
        assert_eq!(
            decoded.words(&[WordSize::Two, WordSize::Four]),
            Some(vec![52400, 0x0102_0304])
        );
    }

    #[test]
    fn test_values_wider_than_word_are_masked() {
        let packet = encode_packet("X", &Payload::words([0x1_2345, 0x1_0000_0001], WordSize::Two));
        let decoded = decode_request(&packet).expect("decodes");
        assert_eq!(decoded.u16_words(), vec![0x2345, 0x0001]);

        let packet = encode_packet("X", &Payload::words([0x1_0000_0001], WordSize::Four));
        let decoded = decode_request(&packet).expect("decodes");
        assert_eq!(decoded.words(&[WordSize::Four]), Some(vec![1]));
    }

    #[test]
    fn test_ack_check() {
        assert!(check_ack("STATUS", ACK).is_ok());
        assert!(check_ack("STATUS", b"").unwrap_err().is_timeout());
        assert!(check_ack("STATUS", b"MCU ").unwrap_err().is_device_busy());
        assert!(matches!(
            check_ack("STATUS", b"NAK\0"),
            Err(TransportError::MissingAck { .. })
        ));
    }

    #[test]
    fn test_decode_reply_words() {
        let raw = encode_reply(&[500, 700]);
        assert_eq!(raw.len(), Reply::Words(2).expected_bytes().unwrap_or(0));
        let words = decode_reply("GET PWR", Reply::Words(2), &raw).expect("valid reply");
        assert_eq!(words, vec![500, 700]);
    }

    #[test]
    fn test_decode_reply_failures_are_named() {
        let mut raw = encode_reply(&[1, 2]);
        raw.truncate(raw.len() - 1);
        assert!(matches!(
            decode_reply("GET PWR", Reply::All, &raw),
            Err(TransportError::MissingTerminator { .. })
        ));

        let raw = encode_reply(&[1]);
        assert!(matches!(
            decode_reply("GET PWR", Reply::Words(2), &raw),
            Err(TransportError::UnexpectedReplySize {
                expected: 10,
                received: 8,
                ..
            })
        ));

        let mut raw = encode_reply(&[1, 2]);
        raw[0] = 3;
        assert!(matches!(
            decode_reply("GET PWR", Reply::Words(2), &raw),
            Err(TransportError::LengthMismatch {
                declared: 3,
                actual: 2,
                ..
            })
        ));

        assert!(decode_reply("GET PWR", Reply::All, &[])
            .unwrap_err()
            .is_timeout());
    }
}
