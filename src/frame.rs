//! Message decoding: run the field decoder over every package of a framed message.
//!
//! A package that fails to decode (unknown type, overrun) is reported in `rejected` and the
//! remaining packages are still decoded.

use crate::decode::{DecoderTable, Measurements};
use crate::error::DecodeError;
use crate::message::{Message, Package};

/// Result of decoding one message: decoded packages and the ones that were rejected.
#[derive(Debug)]
pub struct MessageDecodeResult {
    pub message_type_id: u32,
    pub sequence_number: u32,
    pub packages: Vec<DecodedPackage>,
    pub rejected: Vec<RejectedPackage>,
}

#[derive(Debug)]
pub struct DecodedPackage {
    pub index: usize,
    pub package_type_id: u32,
    pub base_timestamp: f64,
    pub measurements: Measurements,
}

#[derive(Debug)]
pub struct RejectedPackage {
    pub index: usize,
    pub package_type_id: u32,
    pub reason: DecodeError,
}

/// Package base time in seconds: message time plus `time_delta` nanoseconds.
pub fn package_base_time(message: &Message, package: &Package) -> f64 {
    message.timestamp().as_secs_f64() + package.header.time_delta as f64 * 1e-9
}

/// Decode every package of `message` against `table`.
pub fn decode_message(table: &DecoderTable, message: &Message) -> MessageDecodeResult {
    let mut packages = Vec::new();
    let mut rejected = Vec::new();
    for (index, package) in message.packages.iter().enumerate() {
        let base_timestamp = package_base_time(message, package);
        match table.decode(package.package_type_id(), &package.payload, base_timestamp) {
            Ok(measurements) => packages.push(DecodedPackage {
                index,
                package_type_id: package.package_type_id(),
                base_timestamp,
                measurements,
            }),
            Err(reason) => rejected.push(RejectedPackage {
                index,
                package_type_id: package.package_type_id(),
                reason,
            }),
        }
    }
    MessageDecodeResult {
        message_type_id: message.message_type_id(),
        sequence_number: message.header.sequence_number,
        packages,
        rejected,
    }
}

impl MessageDecodeResult {
    /// Merge all decoded packages into one measurement map, keeping package order.
    pub fn merged(&self) -> Measurements {
        let mut out = Measurements::new();
        for p in &self.packages {
            for (name, samples) in &p.measurements {
                out.entry(name.clone()).or_default().extend_from_slice(samples);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{FieldSpec, PackageLayout};
    use crate::message::Timestamp;

    #[test]
    fn rejected_package_does_not_stop_the_rest() {
        let mut table = DecoderTable::new();
        table.insert(PackageLayout {
            package_type_id: 1,
            name: "one".into(),
            fields: vec![FieldSpec::bound(8, "x")],
            time_increment: 0.0,
        });
        let msg = Message::new(
            7,
            3,
            Timestamp::new(2, 0),
            Vec::new(),
            vec![
                Package::new(99, 0, 0, vec![0]),
                Package::new(1, 0, 500_000_000, vec![42]),
            ],
        );
        let res = decode_message(&table, &msg);
        assert_eq!(res.rejected.len(), 1);
        assert_eq!(res.rejected[0].reason, DecodeError::UnknownPackageType(99));
        assert_eq!(res.packages.len(), 1);
        assert_eq!(res.packages[0].index, 1);
        assert!((res.packages[0].base_timestamp - 2.5).abs() < 1e-9);
        assert_eq!(res.merged()["x"][0].raw_value, 42);
    }
}
