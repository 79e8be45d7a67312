//! Bit/field decoder: turns a package payload into named, timestamped measurement samples.
//!
//! A package type's layout is an ordered list of [`FieldSpec`]s. Fields are read MSB-first
//! and are not byte aligned. A field repeats [`Repetition::Fixed`] times, or for the last
//! field only, [`Repetition::Unbounded`] until fewer than `width_bits` remain.

use crate::error::{DecodeError, Overrun};
use std::collections::HashMap;

/// Time step between successive samples of one measurement when the schema gives none (~8 kHz).
pub const DEFAULT_TIME_INCREMENT: f64 = 0.000125;

/// Maximum width of a single field.
pub const MAX_FIELD_WIDTH: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repetition {
    Fixed(u32),
    Unbounded,
}

/// One schema-declared field of a package data structure.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub width_bits: u32,
    /// `None` for structural padding.
    pub measurement_name: Option<String>,
    pub repetition: Repetition,
}

impl FieldSpec {
    pub fn new(width_bits: u32, measurement_name: Option<&str>, repetition: Repetition) -> Self {
        FieldSpec {
            width_bits,
            measurement_name: measurement_name.map(str::to_string),
            repetition,
        }
    }

    pub fn bound(width_bits: u32, name: &str) -> Self {
        Self::new(width_bits, Some(name), Repetition::Fixed(1))
    }

    pub fn padding(width_bits: u32) -> Self {
        Self::new(width_bits, None, Repetition::Fixed(1))
    }
}

/// One decoded value with its timestamp in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedSample {
    pub raw_value: u64,
    pub timestamp: f64,
}

/// Measurement name → samples in payload order.
pub type Measurements = HashMap<String, Vec<DecodedSample>>;

/// Decoding rules for one package type.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageLayout {
    pub package_type_id: u32,
    pub name: String,
    pub fields: Vec<FieldSpec>,
    pub time_increment: f64,
}

impl PackageLayout {
    /// Bits consumed by the finite part of the layout.
    pub fn fixed_bits(&self) -> u64 {
        self.fields
            .iter()
            .map(|f| match f.repetition {
                Repetition::Fixed(n) => f.width_bits as u64 * n as u64,
                Repetition::Unbounded => 0,
            })
            .sum()
    }

    pub fn decode(&self, payload: &[u8], base_timestamp: f64) -> Result<Measurements, DecodeError> {
        decode_fields(
            self.package_type_id,
            &self.fields,
            payload,
            base_timestamp,
            self.time_increment,
        )
    }
}

/// PDID → layout. Immutable once built; safe to share across threads.
#[derive(Debug, Clone, Default)]
pub struct DecoderTable {
    layouts: HashMap<u32, PackageLayout>,
}

impl DecoderTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the previous layout for the same PDID, if any.
    pub fn insert(&mut self, layout: PackageLayout) -> Option<PackageLayout> {
        self.layouts.insert(layout.package_type_id, layout)
    }

    pub fn get(&self, package_type_id: u32) -> Option<&PackageLayout> {
        self.layouts.get(&package_type_id)
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    pub fn layouts(&self) -> impl Iterator<Item = &PackageLayout> {
        self.layouts.values()
    }

    /// Decode one package payload by type.
    pub fn decode(
        &self,
        package_type_id: u32,
        payload: &[u8],
        base_timestamp: f64,
    ) -> Result<Measurements, DecodeError> {
        self.get(package_type_id)
            .ok_or(DecodeError::UnknownPackageType(package_type_id))?
            .decode(payload, base_timestamp)
    }
}

/// MSB-first bit cursor over a byte slice.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BitReader { data, pos: 0 }
    }

    /// Bit offset from the start of the slice.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() * 8 - self.pos
    }

    /// Read `width` (1..=64) bits as an unsigned integer; `None` if not enough bits remain.
    pub fn read(&mut self, width: u32) -> Option<u64> {
        if width == 0 || width > MAX_FIELD_WIDTH || width as usize > self.remaining() {
            return None;
        }
        let mut out = 0u64;
        let mut left = width;
        while left > 0 {
            let byte = self.data[self.pos / 8];
            let used = (self.pos % 8) as u32;
            let avail = 8 - used;
            let take = avail.min(left);
            let chunk = (byte >> (avail - take)) & (((1u16 << take) - 1) as u8);
            out = (out << take) | chunk as u64;
            left -= take;
            self.pos += take as usize;
        }
        Some(out)
    }
}

/// Decode `payload` against `fields`.
///
/// Each bound field appends a sample at `base_timestamp + index * time_increment`, where
/// `index` counts earlier samples of the same measurement in this payload. Only the last field
/// may be [`Repetition::Unbounded`].
pub fn decode_fields(
    package_type_id: u32,
    fields: &[FieldSpec],
    payload: &[u8],
    base_timestamp: f64,
    time_increment: f64,
) -> Result<Measurements, DecodeError> {
    if let Some(index) = fields[..fields.len().saturating_sub(1)]
        .iter()
        .position(|f| f.repetition == Repetition::Unbounded)
    {
        return Err(DecodeError::UnboundedNotLast { package_type_id, index });
    }

    let mut reader = BitReader::new(payload);
    let mut out: Measurements = HashMap::new();
    let payload_bits = payload.len() * 8;

    let mut emit = |field: &FieldSpec, value: u64| {
        if let Some(name) = &field.measurement_name {
            let samples = out.entry(name.clone()).or_default();
            let timestamp = base_timestamp + samples.len() as f64 * time_increment;
            samples.push(DecodedSample {
                raw_value: value,
                timestamp,
            });
        }
    };

    for field in fields {
        match field.repetition {
            Repetition::Fixed(n) => {
                for _ in 0..n {
                    let bit_offset = reader.position();
                    let value = reader.read(field.width_bits).ok_or(DecodeError::FieldOverrun {
                        package_type_id,
                        bit_offset,
                        payload_bits,
                        kind: Overrun::FieldPastEnd {
                            width_bits: field.width_bits,
                        },
                    })?;
                    emit(field, value);
                }
            }
            Repetition::Unbounded => {
                // A trailing group shorter than one field is dropped.
                while reader.remaining() >= field.width_bits as usize && field.width_bits > 0 {
                    match reader.read(field.width_bits) {
                        Some(value) => emit(field, value),
                        None => break,
                    }
                }
                return Ok(out);
            }
        }
    }

    if reader.remaining() > 0 {
        return Err(DecodeError::FieldOverrun {
            package_type_id,
            bit_offset: reader.position(),
            payload_bits,
            kind: Overrun::UndecodedTail,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_reader_crosses_byte_boundaries() {
        let data = [0b1010_1100, 0b0101_0011];
        let mut r = BitReader::new(&data);
        assert_eq!(r.read(3), Some(0b101));
        assert_eq!(r.read(7), Some(0b01100_01));
        assert_eq!(r.read(6), Some(0b01_0011));
        assert_eq!(r.remaining(), 0);
        assert_eq!(r.read(1), None);
    }

    #[test]
    fn bit_reader_full_width() {
        let data = [0xffu8, 0, 0, 0, 0, 0, 0, 0x01];
        let mut r = BitReader::new(&data);
        assert_eq!(r.read(64), Some(0xff00_0000_0000_0001));
        assert_eq!(r.read(0), None);
    }

    #[test]
    fn unaligned_fields() {
        // 4-bit "hi", 12-bit "lo"
        let fields = vec![FieldSpec::bound(4, "hi"), FieldSpec::bound(12, "lo")];
        let m = decode_fields(1, &fields, &[0xa1, 0x23], 0.0, 0.1).unwrap();
        assert_eq!(m["hi"][0].raw_value, 0xa);
        assert_eq!(m["lo"][0].raw_value, 0x123);
    }

    #[test]
    fn fixed_repetition_advances_time_per_measurement() {
        let fields = vec![FieldSpec::new(8, Some("v"), Repetition::Fixed(3))];
        let m = decode_fields(1, &fields, &[1, 2, 3], 10.0, 0.5).unwrap();
        let v = &m["v"];
        assert_eq!(v.iter().map(|s| s.raw_value).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(v.iter().map(|s| s.timestamp).collect::<Vec<_>>(), vec![10.0, 10.5, 11.0]);
    }

    #[test]
    fn unbounded_drops_short_tail() {
        let fields = vec![FieldSpec::new(12, Some("s"), Repetition::Unbounded)];
        // 32 bits: two 12-bit samples, 8 bits dropped
        let m = decode_fields(1, &fields, &[0x12, 0x34, 0x56, 0x78], 0.0, 1.0).unwrap();
        assert_eq!(m["s"].len(), 2);
        assert_eq!(m["s"][0].raw_value, 0x123);
        assert_eq!(m["s"][1].raw_value, 0x456);
    }

    #[test]
    fn undecoded_tail_is_overrun() {
        let fields = vec![FieldSpec::bound(8, "a")];
        let err = decode_fields(9, &fields, &[1, 2], 0.0, 1.0).unwrap_err();
        assert_eq!(
            err,
            DecodeError::FieldOverrun {
                package_type_id: 9,
                bit_offset: 8,
                payload_bits: 16,
                kind: Overrun::UndecodedTail,
            }
        );
    }

    #[test]
    fn unbounded_before_other_fields_is_rejected() {
        let fields = vec![
            FieldSpec::bound(8, "a"),
            FieldSpec::new(8, Some("s"), Repetition::Unbounded),
            FieldSpec::bound(8, "b"),
        ];
        let err = decode_fields(5, &fields, &[1, 2, 3], 0.0, 1.0).unwrap_err();
        assert_eq!(err, DecodeError::UnboundedNotLast { package_type_id: 5, index: 1 });
    }

    #[test]
    fn table_reports_unknown_type() {
        let table = DecoderTable::new();
        assert_eq!(
            table.decode(0x42, &[], 0.0),
            Err(DecodeError::UnknownPackageType(0x42))
        );
    }

    #[test]
    fn fixed_bits_ignores_unbounded() {
        let layout = PackageLayout {
            package_type_id: 1,
            name: "p".into(),
            fields: vec![
                FieldSpec::new(8, Some("a"), Repetition::Fixed(2)),
                FieldSpec::padding(4),
                FieldSpec::new(16, Some("b"), Repetition::Unbounded),
            ],
            time_increment: DEFAULT_TIME_INCREMENT,
        };
        assert_eq!(layout.fixed_bits(), 20);
    }
}
