//! TmNSquid: extract measurements from a binary TDM stream.
//!
//! Usage:
//!   tmnsquid -m SCHEMA.tdl [-d OUT_DIR] [--dump[=FILE]] FILE.bin
//!
//! Every message is framed, every package decoded against the schema, and each measurement is
//! written to `OUT_DIR/<measurement>.csv` (`value,timestamp`). Packages that fail to decode are
//! counted and skipped. `--dump` writes a per-message text dump (stdout by default).

use anyhow::Context;
use clap::Parser;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use tmnshark::{decode_message, dump, DecodedSample, MessageReader, SchemaTables};

#[derive(Parser)]
#[command(version, about = "Extract measurements from a binary TmNS Data Message stream")]
struct Cli {
    /// Binary file of concatenated TDMs
    input: PathBuf,

    /// Schema table file
    #[arg(short = 'm', long, env = "TMNSHARK_SCHEMA")]
    schema: PathBuf,

    /// Directory for the per-measurement CSV files
    #[arg(short = 'd', long, default_value = "measurements")]
    out_dir: PathBuf,

    /// Write a text dump of every message ("-" for stdout)
    #[arg(long, num_args = 0..=1, default_missing_value = "-")]
    dump: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tmnshark=info,tmnsquid=info")),
        )
        .init();

    let cli = Cli::parse();
    let tables = SchemaTables::load(&cli.schema)?;
    let file = File::open(&cli.input).with_context(|| format!("open {}", cli.input.display()))?;

    let mut dump_writer: Option<Box<dyn Write>> = match &cli.dump {
        None => None,
        Some(p) if p.as_os_str() == "-" => Some(Box::new(std::io::stdout())),
        Some(p) => Some(Box::new(BufWriter::new(
            File::create(p).with_context(|| format!("create dump {}", p.display()))?,
        ))),
    };

    let mut series: BTreeMap<String, Vec<DecodedSample>> = BTreeMap::new();
    let mut messages = 0u64;
    let mut decoded = 0u64;
    let mut rejected = 0u64;
    let mut reader = MessageReader::new(BufReader::new(file));
    while let Some(next) = reader.next() {
        let msg = next.with_context(|| format!("{} at byte {}", cli.input.display(), reader.last_offset()))?;
        let result = decode_message(&tables.decoders, &msg);
        if let Some(w) = dump_writer.as_mut() {
            dump::write_message(w.as_mut(), messages, &msg)?;
            dump::write_decoded(w.as_mut(), &result)?;
        }
        for r in &result.rejected {
            tracing::warn!(message = messages, package = r.index, reason = %r.reason, "package skipped");
        }
        messages += 1;
        decoded += result.packages.len() as u64;
        rejected += result.rejected.len() as u64;
        for (name, samples) in result.merged() {
            series.entry(name).or_default().extend(samples);
        }
    }
    if let Some(w) = dump_writer.as_mut() {
        w.flush()?;
    }

    std::fs::create_dir_all(&cli.out_dir).with_context(|| format!("create {}", cli.out_dir.display()))?;
    let stems = dump::unique_file_stems(series.keys().map(String::as_str));
    for ((name, samples), stem) in series.iter().zip(&stems) {
        let path = cli.out_dir.join(format!("{}.csv", stem));
        if stem != &dump::sanitize_file_stem(name) {
            tracing::warn!(measurement = %name, file = %path.display(), "file name collides with another measurement");
        }
        let mut w = BufWriter::new(File::create(&path).with_context(|| format!("create {}", path.display()))?);
        dump::write_csv_header(&mut w)?;
        dump::write_csv_rows(&mut w, samples)?;
        w.flush()?;
    }

    eprintln!("input: {}", cli.input.display());
    eprintln!("messages: {}", messages);
    eprintln!("packages decoded: {}", decoded);
    eprintln!("packages skipped: {}", rejected);
    eprintln!("measurements: {} (csv in {})", series.len(), cli.out_dir.display());
    Ok(())
}
