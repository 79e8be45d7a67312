//! Wire types: TmNS Data Message header, Package header, and their big-endian serialization.
//!
//! ```text
//! Message header (24 bytes)
//!   0      ver<<4 | adf_word_count
//!   1      reserved
//!   2..4   flags
//!   4..8   message_type_id (MDID)
//!   8..12  sequence_number
//!   12..16 length_bytes (header + ADF + packages)
//!   16..20 timestamp seconds
//!   20..24 timestamp nanoseconds
//! Package header (12 bytes)
//!   0..4   package_type_id (PDID)
//!   4..6   length_bytes (header + payload)
//!   6      reserved
//!   7      status_flags
//!   8..12  time_delta
//! ```

pub const MESSAGE_HEADER_LEN: usize = 24;
pub const PACKAGE_HEADER_LEN: usize = 12;
/// Largest package payload a 16-bit package length can frame.
pub const MAX_PACKAGE_PAYLOAD: usize = u16::MAX as usize - PACKAGE_HEADER_LEN;
/// Largest ADF a 4-bit word count can describe.
pub const MAX_ADF_LEN: usize = 15 * 4;
/// Bytes of the header needed to recover MDID and length (egress framing).
pub const HEADER_PREFIX_LEN: usize = 16;

/// Message capture/generation time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    pub seconds: u32,
    pub nanoseconds: u32,
}

impl Timestamp {
    pub fn new(seconds: u32, nanoseconds: u32) -> Self {
        Timestamp { seconds, nanoseconds }
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.seconds as f64 + self.nanoseconds as f64 * 1e-9
    }

    pub fn as_nanos(&self) -> u64 {
        self.seconds as u64 * 1_000_000_000 + self.nanoseconds as u64
    }
}

/// Fixed 24-byte message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub version: u8,
    pub adf_word_count: u8,
    pub flags: u16,
    pub message_type_id: u32,
    pub sequence_number: u32,
    pub length_bytes: u32,
    pub timestamp: Timestamp,
}

impl MessageHeader {
    /// Header plus ADF length in bytes.
    pub fn header_len(&self) -> usize {
        MESSAGE_HEADER_LEN + self.adf_len()
    }

    pub fn adf_len(&self) -> usize {
        self.adf_word_count as usize * 4
    }

    pub fn write_to(&self, w: &mut Vec<u8>) {
        w.push(((self.version & 0x0f) << 4) | (self.adf_word_count & 0x0f));
        w.push(0);
        w.extend_from_slice(&self.flags.to_be_bytes());
        w.extend_from_slice(&self.message_type_id.to_be_bytes());
        w.extend_from_slice(&self.sequence_number.to_be_bytes());
        w.extend_from_slice(&self.length_bytes.to_be_bytes());
        w.extend_from_slice(&self.timestamp.seconds.to_be_bytes());
        w.extend_from_slice(&self.timestamp.nanoseconds.to_be_bytes());
    }
}

/// Fixed 12-byte package header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageHeader {
    pub package_type_id: u32,
    pub length_bytes: u16,
    pub status_flags: u8,
    pub time_delta: u32,
}

impl PackageHeader {
    pub fn write_to(&self, w: &mut Vec<u8>) {
        w.extend_from_slice(&self.package_type_id.to_be_bytes());
        w.extend_from_slice(&self.length_bytes.to_be_bytes());
        w.push(0);
        w.push(self.status_flags);
        w.extend_from_slice(&self.time_delta.to_be_bytes());
    }
}

/// One self-contained data block within a message. The payload is still bit packed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub header: PackageHeader,
    pub payload: Vec<u8>,
}

impl Package {
    /// Build a package; `length_bytes` is derived from the payload.
    ///
    /// The payload must be at most [`MAX_PACKAGE_PAYLOAD`] bytes. Debug builds panic on a longer
    /// payload; release builds keep only the first [`MAX_PACKAGE_PAYLOAD`] bytes.
    pub fn new(package_type_id: u32, status_flags: u8, time_delta: u32, mut payload: Vec<u8>) -> Self {
        debug_assert!(
            payload.len() <= MAX_PACKAGE_PAYLOAD,
            "package payload of {} bytes exceeds {}",
            payload.len(),
            MAX_PACKAGE_PAYLOAD
        );
        payload.truncate(MAX_PACKAGE_PAYLOAD);
        let length_bytes = (PACKAGE_HEADER_LEN + payload.len()) as u16;
        Package {
            header: PackageHeader {
                package_type_id,
                length_bytes,
                status_flags,
                time_delta,
            },
            payload,
        }
    }

    pub fn package_type_id(&self) -> u32 {
        self.header.package_type_id
    }

    pub fn length_bytes(&self) -> u16 {
        self.header.length_bytes
    }

    pub fn write_to(&self, w: &mut Vec<u8>) {
        self.header.write_to(w);
        w.extend_from_slice(&self.payload);
    }
}

/// One TmNS Data Message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    pub adf_payload: Vec<u8>,
    pub packages: Vec<Package>,
}

impl Message {
    /// Build a message with `length_bytes` computed from the ADF and packages.
    /// The ADF is zero-padded to a whole number of 4-byte words and must be at most
    /// [`MAX_ADF_LEN`] bytes. Debug builds panic on a longer ADF; release builds keep only the
    /// first [`MAX_ADF_LEN`] bytes.
    pub fn new(
        message_type_id: u32,
        sequence_number: u32,
        timestamp: Timestamp,
        mut adf_payload: Vec<u8>,
        packages: Vec<Package>,
    ) -> Self {
        debug_assert!(
            adf_payload.len() <= MAX_ADF_LEN,
            "ADF of {} bytes exceeds {}",
            adf_payload.len(),
            MAX_ADF_LEN
        );
        adf_payload.truncate(MAX_ADF_LEN);
        let words = (adf_payload.len() + 3) / 4;
        adf_payload.resize(words * 4, 0);
        let packages_len: usize = packages.iter().map(|p| p.length_bytes() as usize).sum();
        let length_bytes = (MESSAGE_HEADER_LEN + adf_payload.len() + packages_len) as u32;
        Message {
            header: MessageHeader {
                version: 1,
                adf_word_count: words as u8,
                flags: 0,
                message_type_id,
                sequence_number,
                length_bytes,
                timestamp,
            },
            adf_payload,
            packages,
        }
    }

    pub fn message_type_id(&self) -> u32 {
        self.header.message_type_id
    }

    pub fn length_bytes(&self) -> u32 {
        self.header.length_bytes
    }

    pub fn timestamp(&self) -> Timestamp {
        self.header.timestamp
    }

    /// Length implied by the structure (header + ADF + package lengths).
    pub fn structural_len(&self) -> u64 {
        MESSAGE_HEADER_LEN as u64
            + self.adf_payload.len() as u64
            + self
                .packages
                .iter()
                .map(|p| p.length_bytes() as u64)
                .sum::<u64>()
    }

    /// Serialize exactly as framed on the wire. Header fields are written as stored.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.header.length_bytes as usize);
        self.header.write_to(&mut out);
        out.extend_from_slice(&self.adf_payload);
        for p in &self.packages {
            p.write_to(&mut out);
        }
        out
    }
}

/// A message framed only by its 16-byte prefix: MDID and length known, the rest opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub message_type_id: u32,
    pub length_bytes: u32,
    /// The full message bytes, header included, exactly as read.
    pub bytes: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_message_computes_length() {
        let pkg = Package::new(0x10, 0, 0, vec![1, 2, 3, 4]);
        let msg = Message::new(0xabc, 7, Timestamp::new(1, 2), vec![9, 9], vec![pkg]);
        assert_eq!(msg.header.adf_word_count, 1);
        assert_eq!(msg.adf_payload, vec![9, 9, 0, 0]);
        assert_eq!(msg.length_bytes(), 24 + 4 + 16);
        assert_eq!(msg.structural_len(), msg.length_bytes() as u64);
        assert_eq!(msg.to_bytes().len(), msg.length_bytes() as usize);
    }

    #[test]
    fn header_layout_is_big_endian() {
        let msg = Message::new(0x0102_0304, 0x0a0b_0c0d, Timestamp::new(5, 6), Vec::new(), Vec::new());
        let b = msg.to_bytes();
        assert_eq!(b[0], 0x10);
        assert_eq!(b[1], 0);
        assert_eq!(&b[4..8], &[1, 2, 3, 4]);
        assert_eq!(&b[8..12], &[0x0a, 0x0b, 0x0c, 0x0d]);
        assert_eq!(&b[12..16], &[0, 0, 0, 24]);
        assert_eq!(&b[16..20], &[0, 0, 0, 5]);
        assert_eq!(&b[20..24], &[0, 0, 0, 6]);
    }

    #[test]
    fn largest_package_fills_length_field() {
        let pkg = Package::new(1, 0, 0, vec![0; MAX_PACKAGE_PAYLOAD]);
        assert_eq!(pkg.length_bytes(), u16::MAX);
        let msg = Message::new(1, 0, Timestamp::default(), vec![0; MAX_ADF_LEN], vec![pkg]);
        assert_eq!(msg.header.adf_word_count, 15);
        assert_eq!(msg.to_bytes().len(), msg.length_bytes() as usize);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "exceeds")]
    fn oversized_package_payload_panics_in_debug() {
        Package::new(1, 0, 0, vec![0; MAX_PACKAGE_PAYLOAD + 1]);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "exceeds")]
    fn oversized_adf_panics_in_debug() {
        Message::new(1, 0, Timestamp::default(), vec![0; MAX_ADF_LEN + 1], Vec::new());
    }

    #[test]
    fn timestamp_seconds() {
        let t = Timestamp::new(10, 500_000_000);
        assert!((t.as_secs_f64() - 10.5).abs() < 1e-12);
        assert_eq!(t.as_nanos(), 10_500_000_000);
    }
}
