//! Format messages and decoded measurements for display (text dump, hex, CSV).

use crate::decode::DecodedSample;
use crate::frame::MessageDecodeResult;
use crate::message::Message;
use std::collections::HashSet;
use std::io::{self, Write};

/// Format a time of day (seconds, taken modulo one day) as HH:MM:SS[.mmm].
pub fn format_seconds_as_tod(seconds: f64) -> String {
    if seconds < 0.0 || !seconds.is_finite() {
        return format!("{}", seconds);
    }
    let secs = seconds % 86400.0;
    let h = (secs / 3600.0) as u32;
    let m = ((secs % 3600.0) / 60.0) as u32;
    let s_frac = secs % 60.0;
    let s = s_frac as u32;
    let frac = s_frac - (s as f64);
    if frac.abs() > 1e-6 {
        format!("{:02}:{:02}:{:02}.{:03}", h, m, s, (frac * 1000.0) as u32)
    } else {
        format!("{:02}:{:02}:{:02}", h, m, s)
    }
}

pub fn hex_string(b: &[u8]) -> String {
    b.iter().map(|x| format!("{:02x}", x)).collect::<Vec<_>>().join(" ")
}

/// Hex dump with byte offsets, 16 bytes per line.
pub fn write_hex_with_offset(w: &mut dyn Write, data: &[u8], indent: &str) -> io::Result<()> {
    const COLS: usize = 16;
    for (i, chunk) in data.chunks(COLS).enumerate() {
        writeln!(w, "{}offset {:4}: {}", indent, i * COLS, hex_string(chunk))?;
    }
    Ok(())
}

/// Header summary plus per-package headers and payload hex.
pub fn write_message(w: &mut dyn Write, index: u64, msg: &Message) -> io::Result<()> {
    let h = &msg.header;
    writeln!(
        w,
        "=== message {}  mdid 0x{:08x}  seq {}  len {}  ver {}  flags 0x{:04x}  time {}.{:09} ({}) ===",
        index,
        h.message_type_id,
        h.sequence_number,
        h.length_bytes,
        h.version,
        h.flags,
        h.timestamp.seconds,
        h.timestamp.nanoseconds,
        format_seconds_as_tod(h.timestamp.as_secs_f64()),
    )?;
    if !msg.adf_payload.is_empty() {
        writeln!(w, "  adf ({} words):", h.adf_word_count)?;
        write_hex_with_offset(w, &msg.adf_payload, "    ")?;
    }
    for (i, p) in msg.packages.iter().enumerate() {
        writeln!(
            w,
            "  package [{}] pdid 0x{:08x}  len {}  status 0x{:02x}  time_delta {}",
            i, p.header.package_type_id, p.header.length_bytes, p.header.status_flags, p.header.time_delta
        )?;
        write_hex_with_offset(w, &p.payload, "    ")?;
    }
    Ok(())
}

/// Decoded measurements of one message, sorted by name, followed by rejected packages.
pub fn write_decoded(w: &mut dyn Write, result: &MessageDecodeResult) -> io::Result<()> {
    for p in &result.packages {
        writeln!(
            w,
            "  package [{}] pdid 0x{:08x}  DECODED  base {:.9}",
            p.index, p.package_type_id, p.base_timestamp
        )?;
        let mut names: Vec<_> = p.measurements.keys().collect();
        names.sort();
        for name in names {
            let samples = &p.measurements[name];
            writeln!(w, "    {}: {}", name, samples_summary(samples))?;
        }
    }
    for r in &result.rejected {
        writeln!(
            w,
            "  package [{}] pdid 0x{:08x}  REJECTED: {}",
            r.index, r.package_type_id, r.reason
        )?;
    }
    Ok(())
}

/// One-line summary: a single value inline, otherwise count and first/last values.
pub fn samples_summary(samples: &[DecodedSample]) -> String {
    match samples {
        [] => "[]".to_string(),
        [one] => format!("{} @ {:.9}", one.raw_value, one.timestamp),
        [first, .., last] => format!(
            "{} samples [{} .. {}] @ {:.9} .. {:.9}",
            samples.len(),
            first.raw_value,
            last.raw_value,
            first.timestamp,
            last.timestamp
        ),
    }
}

/// CSV header for a measurement series.
pub fn write_csv_header(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "value,timestamp")
}

pub fn write_csv_rows(w: &mut dyn Write, samples: &[DecodedSample]) -> io::Result<()> {
    for s in samples {
        writeln!(w, "{},{:.9}", s.raw_value, s.timestamp)?;
    }
    Ok(())
}

/// File-system friendly name for a measurement (CSV file stem).
pub fn sanitize_file_stem(name: &str) -> String {
    let s: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect();
    if s.is_empty() || s.starts_with('.') {
        format!("m{}", s)
    } else {
        s
    }
}

/// One file stem per name, in order. Names that sanitize to a stem already taken (compared
/// case-insensitively) get a `_2`, `_3`, ... suffix.
pub fn unique_file_stems<'a, I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut taken = HashSet::new();
    let mut stems = Vec::new();
    for name in names {
        let base = sanitize_file_stem(name);
        let mut stem = base.clone();
        let mut n = 1;
        while !taken.insert(stem.to_ascii_lowercase()) {
            n += 1;
            stem = format!("{}_{}", base, n);
        }
        stems.push(stem);
    }
    stems
}
