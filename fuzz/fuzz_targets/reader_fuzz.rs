//! Reader fuzz target: frame arbitrary bytes as a TDM stream, then decode what frames.
//! Neither the reader nor the decoder may panic.
//! Build with: cargo fuzz run reader_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    use tmnshark::{decode_message, DecoderTable, FieldSpec, MessageReader, PackageLayout, Repetition};

    let mut table = DecoderTable::new();
    table.insert(PackageLayout {
        package_type_id: 0x0101,
        name: "fuzz".into(),
        fields: vec![
            FieldSpec::bound(3, "a"),
            FieldSpec::padding(5),
            FieldSpec::new(13, Some("b"), Repetition::Unbounded),
        ],
        time_increment: 0.000125,
    });
    for msg in MessageReader::new(data) {
        match msg {
            Ok(m) => {
                let _ = decode_message(&table, &m);
            }
            Err(_) => break,
        }
    }
    let _ = tmnshark::read_raw_message(&mut &data[..]);
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run reader_fuzz");
}
