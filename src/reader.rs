//! Message/Package reader: frames a byte stream into [`Message`]s without looking inside
//! package payloads.
//!
//! Two entry points:
//!
//! - [`read_message`] / [`MessageReader`]: full structural decode (header, ADF, packages).
//! - [`read_raw_message`]: minimal framing used by egress; only MDID and length are decoded.
//!
//! Short reads are distinguished from a clean end of stream: zero bytes before a header is
//! `Ok(None)`, anything else short is [`ProtocolError::Truncated`].

use crate::error::ProtocolError;
use crate::message::{
    Message, MessageHeader, Package, PackageHeader, RawMessage, Timestamp, HEADER_PREFIX_LEN,
    MESSAGE_HEADER_LEN, PACKAGE_HEADER_LEN,
};
use byteorder::{BigEndian, ByteOrder};
use std::io::{ErrorKind, Read};

const MAX_PREALLOC: usize = 64 * 1024;

/// Fill `buf` as far as the source allows; returns bytes read (less than `buf.len()` only at EOF).
fn read_full<R: Read + ?Sized>(r: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn read_exact_or_truncated<R: Read + ?Sized>(
    r: &mut R,
    buf: &mut [u8],
    context: &'static str,
) -> Result<(), ProtocolError> {
    let got = read_full(r, buf)?;
    if got < buf.len() {
        return Err(ProtocolError::Truncated {
            context,
            expected: buf.len(),
            got,
        });
    }
    Ok(())
}

fn parse_message_header(b: &[u8; MESSAGE_HEADER_LEN]) -> MessageHeader {
    MessageHeader {
        version: b[0] >> 4,
        adf_word_count: b[0] & 0x0f,
        flags: BigEndian::read_u16(&b[2..4]),
        message_type_id: BigEndian::read_u32(&b[4..8]),
        sequence_number: BigEndian::read_u32(&b[8..12]),
        length_bytes: BigEndian::read_u32(&b[12..16]),
        timestamp: Timestamp {
            seconds: BigEndian::read_u32(&b[16..20]),
            nanoseconds: BigEndian::read_u32(&b[20..24]),
        },
    }
}

fn parse_package_header(b: &[u8; PACKAGE_HEADER_LEN]) -> PackageHeader {
    PackageHeader {
        package_type_id: BigEndian::read_u32(&b[0..4]),
        length_bytes: BigEndian::read_u16(&b[4..6]),
        status_flags: b[7],
        time_delta: BigEndian::read_u32(&b[8..12]),
    }
}

/// Read one message. `Ok(None)` when the source is exhausted before the first header byte.
pub fn read_message<R: Read + ?Sized>(r: &mut R) -> Result<Option<Message>, ProtocolError> {
    let mut hdr = [0u8; MESSAGE_HEADER_LEN];
    let got = read_full(r, &mut hdr)?;
    if got == 0 {
        return Ok(None);
    }
    if got < MESSAGE_HEADER_LEN {
        return Err(ProtocolError::Truncated {
            context: "message header",
            expected: MESSAGE_HEADER_LEN,
            got,
        });
    }
    let header = parse_message_header(&hdr);
    let declared = header.length_bytes;
    if (declared as u64) < header.header_len() as u64 {
        return Err(ProtocolError::LengthMismatch {
            message_type_id: header.message_type_id,
            declared,
            actual: header.header_len() as u64,
        });
    }

    let mut adf_payload = vec![0u8; header.adf_len()];
    if !adf_payload.is_empty() {
        read_exact_or_truncated(r, &mut adf_payload, "auxiliary data field")?;
    }

    let mut packages = Vec::new();
    let mut consumed = header.header_len() as u64;
    while consumed < declared as u64 {
        let package = read_package(r)?;
        consumed += package.length_bytes() as u64;
        if consumed > declared as u64 {
            return Err(ProtocolError::LengthMismatch {
                message_type_id: header.message_type_id,
                declared,
                actual: consumed,
            });
        }
        packages.push(package);
    }

    Ok(Some(Message {
        header,
        adf_payload,
        packages,
    }))
}

/// Read one package (header and raw payload).
pub fn read_package<R: Read + ?Sized>(r: &mut R) -> Result<Package, ProtocolError> {
    let mut hdr = [0u8; PACKAGE_HEADER_LEN];
    read_exact_or_truncated(r, &mut hdr, "package header")?;
    let header = parse_package_header(&hdr);
    let payload_len = (header.length_bytes as usize)
        .checked_sub(PACKAGE_HEADER_LEN)
        .ok_or(ProtocolError::MalformedPackageLength {
            package_type_id: header.package_type_id,
            length_bytes: header.length_bytes,
        })?;
    let mut payload = vec![0u8; payload_len];
    read_exact_or_truncated(r, &mut payload, "package payload")?;
    Ok(Package { header, payload })
}

/// Minimal framing: 16-byte prefix (MDID, length), then `length_bytes - 16` opaque bytes.
/// `Ok(None)` on a clean end of stream.
pub fn read_raw_message<R: Read + ?Sized>(r: &mut R) -> Result<Option<RawMessage>, ProtocolError> {
    let mut prefix = [0u8; HEADER_PREFIX_LEN];
    let got = read_full(r, &mut prefix)?;
    if got == 0 {
        return Ok(None);
    }
    if got < HEADER_PREFIX_LEN {
        return Err(ProtocolError::Truncated {
            context: "message header prefix",
            expected: HEADER_PREFIX_LEN,
            got,
        });
    }
    let message_type_id = BigEndian::read_u32(&prefix[4..8]);
    let length_bytes = BigEndian::read_u32(&prefix[12..16]);
    if (length_bytes as usize) < MESSAGE_HEADER_LEN {
        return Err(ProtocolError::LengthMismatch {
            message_type_id,
            declared: length_bytes,
            actual: MESSAGE_HEADER_LEN as u64,
        });
    }
    // the declared length is untrusted: grow with the data instead of allocating it up front
    let tail_len = length_bytes as usize - HEADER_PREFIX_LEN;
    let mut bytes = Vec::with_capacity(HEADER_PREFIX_LEN + tail_len.min(MAX_PREALLOC));
    bytes.extend_from_slice(&prefix);
    let got = Read::take(&mut *r, tail_len as u64).read_to_end(&mut bytes)?;
    if got < tail_len {
        return Err(ProtocolError::Truncated {
            context: "message body",
            expected: tail_len,
            got,
        });
    }
    Ok(Some(RawMessage {
        message_type_id,
        length_bytes,
        bytes,
    }))
}

/// Lazy sequence of messages over a byte source.
///
/// Yields `Err` at most once; the stream is considered unrecoverable after a protocol error.
pub struct MessageReader<R> {
    inner: CountingReader<R>,
    done: bool,
    last_offset: u64,
}

impl<R: Read> MessageReader<R> {
    pub fn new(inner: R) -> Self {
        MessageReader {
            inner: CountingReader { inner, count: 0 },
            done: false,
            last_offset: 0,
        }
    }

    /// Byte offset where the most recently returned message (or error) started.
    pub fn last_offset(&self) -> u64 {
        self.last_offset
    }

    /// Total bytes consumed so far.
    pub fn position(&self) -> u64 {
        self.inner.count
    }

    pub fn into_inner(self) -> R {
        self.inner.inner
    }
}

impl<R: Read> Iterator for MessageReader<R> {
    type Item = Result<Message, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.last_offset = self.inner.count;
        match read_message(&mut self.inner) {
            Ok(Some(m)) => Some(Ok(m)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        Message::new(
            0x0000_0010,
            1,
            Timestamp::new(100, 250),
            vec![0xde, 0xad, 0xbe, 0xef],
            vec![
                Package::new(0x0101, 0x80, 5, vec![1, 2, 3]),
                Package::new(0x0102, 0, 0, Vec::new()),
            ],
        )
    }

    #[test]
    fn empty_source_is_end_of_stream() {
        let mut src: &[u8] = &[];
        assert!(read_message(&mut src).unwrap().is_none());
        assert!(read_raw_message(&mut src).unwrap().is_none());
    }

    #[test]
    fn reads_back_serialized_message() {
        let msg = sample();
        let bytes = msg.to_bytes();
        let mut src = bytes.as_slice();
        let back = read_message(&mut src).unwrap().unwrap();
        assert_eq!(back, msg);
        assert!(src.is_empty());
    }

    #[test]
    fn short_header_is_truncated() {
        let bytes = sample().to_bytes();
        let mut src = &bytes[..10];
        match read_message(&mut src) {
            Err(ProtocolError::Truncated { context, got, .. }) => {
                assert_eq!(context, "message header");
                assert_eq!(got, 10);
            }
            other => panic!("expected truncated, got {:?}", other),
        }
    }

    #[test]
    fn short_payload_is_truncated() {
        let bytes = sample().to_bytes();
        let mut src = &bytes[..bytes.len() - 1];
        assert!(matches!(
            read_message(&mut src),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn package_length_below_header_is_malformed() {
        let mut bytes = Vec::new();
        PackageHeader {
            package_type_id: 7,
            length_bytes: 4,
            status_flags: 0,
            time_delta: 0,
        }
        .write_to(&mut bytes);
        let mut src = bytes.as_slice();
        assert!(matches!(
            read_package(&mut src),
            Err(ProtocolError::MalformedPackageLength { package_type_id: 7, length_bytes: 4 })
        ));
    }

    #[test]
    fn declared_length_shorter_than_packages_is_mismatch() {
        let mut msg = sample();
        msg.header.length_bytes -= 2;
        let bytes = msg.to_bytes();
        let mut src = bytes.as_slice();
        assert!(matches!(
            read_message(&mut src),
            Err(ProtocolError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn raw_framing_keeps_bytes_verbatim() {
        let msg = sample();
        let bytes = msg.to_bytes();
        let mut src = bytes.as_slice();
        let raw = read_raw_message(&mut src).unwrap().unwrap();
        assert_eq!(raw.message_type_id, 0x10);
        assert_eq!(raw.length_bytes as usize, bytes.len());
        assert_eq!(raw.bytes, bytes);
    }

    #[test]
    fn iterator_stops_after_error() {
        let mut bytes = sample().to_bytes();
        bytes.extend_from_slice(&[0u8; 5]);
        let mut reader = MessageReader::new(bytes.as_slice());
        assert!(reader.next().unwrap().is_ok());
        assert_eq!(reader.last_offset(), 0);
        assert!(reader.next().unwrap().is_err());
        assert!(reader.next().is_none());
    }
}
