//! The X-Trace wire format.
//!
//! An identity travels as upper-case hex text of the byte layout
//!
//! ```text
//! [header][task_id ...][op_id ...][flags]
//! ```
//!
//! The header's high nibble is the format version. Its low nibble packs both id lengths:
//! bit 3 selects the op id length (4 or 8 bytes) and bits 0-2 select the task id length
//! (4, 8, 12 or 20 bytes). The trailing flags byte must currently be [`FLAGS_SENTINEL`];
//! anything else is a format this decoder doesn't know and decodes as an invalid identity.

use super::Identity;
use crate::error::{Error, Result};

/// Upper bound on the length of wire text, in characters.
pub const MAX_WIRE_LEN: usize = 512;

pub const WIRE_VERSION: u8 = 2;

pub const FLAGS_SENTINEL: u8 = 0x01;

const TASK_LENS: [usize; 4] = [4, 8, 12, 20];
const OP_LENS: [usize; 2] = [4, 8];

const HEADER_OP_BIT: u8 = 0x08;
const HEADER_TASK_MASK: u8 = 0x07;

fn task_code(len: usize) -> Option<u8> {
    TASK_LENS.iter().position(|l| *l == len).map(|p| p as u8)
}

fn op_code(len: usize) -> Option<u8> {
    OP_LENS.iter().position(|l| *l == len).map(|p| p as u8)
}

/// The header byte for an identity's lengths.
pub fn header_byte(id: &Identity) -> Result<u8> {
    let task = task_code(id.task_len()).ok_or_else(|| {
        Error::Encoding(format!(
            "task id length {} has no wire representation",
            id.task_len()
        ))
    })?;
    let op = op_code(id.op_len()).ok_or_else(|| {
        Error::Encoding(format!(
            "op id length {} has no wire representation",
            id.op_len()
        ))
    })?;
    Ok((WIRE_VERSION << 4) | (op << 3) | task)
}

/// Lengths declared by a header, or `None` for versions and codes this decoder doesn't know.
fn header_lengths(header: u8) -> Option<(usize, usize)> {
    if header >> 4 != WIRE_VERSION {
        return None;
    }
    let task_len = *TASK_LENS.get((header & HEADER_TASK_MASK) as usize)?;
    let op_len = if header & HEADER_OP_BIT != 0 {
        OP_LENS[1]
    } else {
        OP_LENS[0]
    };
    Some((task_len, op_len))
}

pub fn encode(id: &Identity) -> Result<String> {
    let mut buf = Vec::with_capacity(2 + id.task_len() + id.op_len());
    buf.push(header_byte(id)?);
    buf.extend_from_slice(id.task_id());
    buf.extend_from_slice(id.op_id());
    buf.push(FLAGS_SENTINEL);

    if buf.len() * 2 > MAX_WIRE_LEN {
        return Err(Error::Encoding(format!(
            "wire text of {} characters exceeds {MAX_WIRE_LEN}",
            buf.len() * 2
        )));
    }
    Ok(hex::encode_upper(buf))
}

fn invalid(s: &str, why: &str) -> Result<Identity> {
    tracing::debug!(text = s, reason = why, "Wire text decodes to an invalid identity");
    Ok(Identity::blank())
}

pub fn decode(s: &str) -> Result<Identity> {
    if s.is_empty() {
        return Ok(Identity::blank());
    }
    if s.len() > MAX_WIRE_LEN {
        return invalid(s, "too long");
    }
    // lower-case hex is never produced by the encoder
    if !s
        .bytes()
        .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
    {
        return invalid(s, "not upper-case hex");
    }
    let bytes = match hex::decode(s) {
        Ok(bytes) => bytes,
        Err(_) => return invalid(s, "odd length"),
    };

    let Some((task_len, op_len)) = header_lengths(bytes[0]) else {
        return invalid(s, "unknown header");
    };
    let expected = 1 + task_len + op_len + 1;
    if bytes.len() != expected {
        return Err(Error::Parse(format!(
            "header declares {expected} bytes but the text holds {}",
            bytes.len()
        )));
    }
    if bytes[expected - 1] != FLAGS_SENTINEL {
        return invalid(s, "unknown flags");
    }

    Identity::from_raw_parts(&bytes[1..1 + task_len], &bytes[1 + task_len..expected - 1])
}

/// Field and style selection for rendering an identity.
///
/// Formats combine with `|`. When both [`WireFormat::FLAGS`] and [`WireFormat::SAMPLE`] are
/// selected, the full flags byte wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WireFormat(u8);

impl WireFormat {
    pub const HEADER: WireFormat = WireFormat(1);
    pub const TASK: WireFormat = WireFormat(2);
    pub const OP: WireFormat = WireFormat(4);
    /// The whole flags byte, as two hex digits.
    pub const FLAGS: WireFormat = WireFormat(8);
    /// Only the sample bit of the flags byte, as a single digit.
    pub const SAMPLE: WireFormat = WireFormat(16);
    pub const SEPARATORS: WireFormat = WireFormat(32);
    pub const LOWERCASE: WireFormat = WireFormat(64);

    /// What [`encode`] produces.
    pub const CANONICAL: WireFormat = WireFormat(1 | 2 | 4 | 8);
    /// Every field, dash separated, lower-case.
    pub const HUMAN: WireFormat = WireFormat(1 | 2 | 4 | 8 | 32 | 64);
    /// Task id and sample bit, for log lines.
    pub const LOG: WireFormat = WireFormat(2 | 16 | 32);

    pub const fn contains(self, other: WireFormat) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl std::ops::BitOr for WireFormat {
    type Output = WireFormat;

    fn bitor(self, rhs: Self) -> Self::Output {
        WireFormat(self.0 | rhs.0)
    }
}

pub fn format(id: &Identity, fmt: WireFormat) -> Result<String> {
    let mut fields: Vec<String> = Vec::with_capacity(4);
    if fmt.contains(WireFormat::HEADER) {
        fields.push(hex::encode([header_byte(id)?]));
    }
    if fmt.contains(WireFormat::TASK) {
        fields.push(hex::encode(id.task_id()));
    }
    if fmt.contains(WireFormat::OP) {
        fields.push(hex::encode(id.op_id()));
    }
    if fmt.contains(WireFormat::FLAGS) {
        fields.push(hex::encode([FLAGS_SENTINEL]));
    } else if fmt.contains(WireFormat::SAMPLE) {
        fields.push((FLAGS_SENTINEL & 1).to_string());
    }

    let sep = if fmt.contains(WireFormat::SEPARATORS) {
        "-"
    } else {
        ""
    };
    let joined = fields.join(sep);
    if fmt.contains(WireFormat::LOWERCASE) {
        Ok(joined)
    } else {
        Ok(joined.to_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::proptest_strategies::valid_identity;
    use proptest::prelude::*;

    const KNOWN: &str = "2B0102030405060708090A0B0C0D0E0F1011121314A1A2A3A4A5A6A7A801";

    fn known() -> Identity {
        let task: Vec<u8> = (1..=20).collect();
        Identity::from_raw_parts(&task, &[0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xA7, 0xA8])
            .unwrap()
    }

    #[test]
    fn encodes_known_layout() {
        assert_eq!(encode(&known()).unwrap(), KNOWN);
        assert_eq!(KNOWN.len(), 60);
    }

    #[test]
    fn decodes_known_layout() {
        let id = decode(KNOWN).unwrap();
        assert!(id.is_valid());
        assert_eq!(id, known());
    }

    #[test]
    fn round_trip_valid_identities() {
        proptest!(|(id in valid_identity())| {
            let text = encode(&id)?;
            prop_assert!(text.len() <= MAX_WIRE_LEN);
            let decoded = decode(&text)?;
            prop_assert_eq!(decoded.task_len(), id.task_len());
            prop_assert_eq!(decoded.op_len(), id.op_len());
            prop_assert_eq!(decoded, id);
        });
    }

    #[test]
    fn decode_never_yields_a_foreign_valid_identity() {
        proptest!(|(s in "[0-9A-Fa-f]{0,80}|.{0,80}")| {
            match decode(&s) {
                Ok(id) if id.is_valid() => prop_assert_eq!(encode(&id)?, s),
                Ok(_) => {}
                Err(Error::Parse(_)) => {}
                Err(e) => prop_assert!(false, "unexpected error {e:?}"),
            }
        });
    }

    #[test]
    fn legacy_lengths_round_trip() {
        let id = Identity::from_raw_parts(&[9; 12], &[3; 4]).unwrap();
        let text = encode(&id).unwrap();
        assert!(text.starts_with("22"));
        assert_eq!(decode(&text).unwrap(), id);
    }

    #[test]
    fn unencodable_lengths() {
        let id = Identity::from_raw_parts(&[9; 5], &[3; 8]).unwrap();
        assert!(matches!(encode(&id), Err(Error::Encoding(_))));
        let id = Identity::from_raw_parts(&[9; 20], &[3; 6]).unwrap();
        assert!(matches!(encode(&id), Err(Error::Encoding(_))));
    }

    #[test]
    fn soft_failures() {
        for s in [
            "",
            "zz",
            "2B0",
            &KNOWN.to_lowercase(),
            // version 1
            "1B0102030405060708090A0B0C0D0E0F1011121314A1A2A3A4A5A6A7A801",
            // reserved task length code
            "2C0102030405060708090A0B0C0D0E0F1011121314A1A2A3A4A5A6A7A801",
            // unknown flags
            "2B0102030405060708090A0B0C0D0E0F1011121314A1A2A3A4A5A6A7A803",
            &"0".repeat(MAX_WIRE_LEN + 2),
        ] {
            let id = decode(s).unwrap();
            assert!(!id.is_valid(), "{s} should decode as invalid");
        }
    }

    #[test]
    fn all_zero_ids_decode_invalid() {
        let text = encode(&Identity::blank()).unwrap();
        let id = decode(&text).unwrap();
        assert!(!id.is_valid());
    }

    #[test]
    fn contradictory_framing_is_an_error() {
        // header says 20 + 8 bytes, payload is one byte short
        let short = &KNOWN[..KNOWN.len() - 2];
        assert!(matches!(decode(short), Err(Error::Parse(_))));
        // header says 4 + 4 bytes
        let long = format!("20{}", &KNOWN[2..]);
        assert!(matches!(decode(&long), Err(Error::Parse(_))));
    }

    #[test]
    fn display_formats() {
        let id = known();
        assert_eq!(format(&id, WireFormat::CANONICAL).unwrap(), KNOWN);
        assert_eq!(
            format(&id, WireFormat::HUMAN).unwrap(),
            "2b-0102030405060708090a0b0c0d0e0f1011121314-a1a2a3a4a5a6a7a8-01"
        );
        assert_eq!(
            format(&id, WireFormat::LOG).unwrap(),
            "0102030405060708090A0B0C0D0E0F1011121314-1"
        );
        assert_eq!(
            format(&id, WireFormat::TASK | WireFormat::LOWERCASE).unwrap(),
            "0102030405060708090a0b0c0d0e0f1011121314"
        );
        assert_eq!(
            format(&id, WireFormat::FLAGS | WireFormat::SAMPLE).unwrap(),
            "01"
        );
    }
}
