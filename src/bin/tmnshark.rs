//! TmNShark: move TmNS Data Messages between the network, PCAP files and binary streams.
//!
//! Usage:
//!   tmnshark mi [-I IFACE | -i CAPTURE.pcap[ng] | --role ROLE -m SCHEMA] (-p PIPE | -o FILE) [-P PORT] [-q]
//!   tmnshark mo -m SCHEMA (-p PIPE | -i FILE) [-o OUT.pcap] [-q]
//!
//! `mi` without `-i` captures live until Ctrl-C; with `-i` it replays the capture and exits.
//! `mo` from a pipe runs until Ctrl-C, recreating the pipe whenever the writer goes away;
//! `mo` from a file replays it once.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tmnshark::bridge::egress::{self, Emitter, PcapEmitter, UdpEmitter};
use tmnshark::bridge::sink::{self as sinks, TdmSink};
use tmnshark::bridge::source::open_source;
use tmnshark::bridge::{ingest, BridgeConfig, Session, Summary, DEFAULT_SOURCE_PORT, DEFAULT_TTL};
use tmnshark::capture::{PacketSource, UdpListener};
use tmnshark::schema::{EndpointTable, SchemaTables, DEFAULT_ENDPOINT, DEFAULT_TDM_PORT};

const DEFAULT_BINARY_FILE: &str = "tmns.bin";

#[derive(Parser)]
#[command(version, about = "TmNS Data Message capture/replay bridge")]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Message input: capture or replay IP packets and write the TDMs they carry
    Mi(MiArgs),
    /// Message output: read a TDM stream and emit each message as a UDP datagram
    Mo(MoArgs),
}

#[derive(Args)]
struct MiArgs {
    /// Interface to capture on (raw capture, needs CAP_NET_RAW)
    #[arg(short = 'I', long, env = "TMNSHARK_INTERFACE", conflicts_with = "input")]
    interface: Option<String>,

    /// PCAP/PCAPNG file to replay instead of capturing live
    #[arg(short = 'i', long, env = "TMNSHARK_INPUT")]
    input: Option<PathBuf>,

    /// Named pipe to write the TDM stream to (created if missing)
    #[arg(short = 'p', long, env = "TMNSHARK_PIPE", conflicts_with = "output")]
    pipe: Option<PathBuf>,

    /// Binary file to append the TDM stream to
    #[arg(short = 'o', long, env = "TMNSHARK_OUTPUT")]
    output: Option<PathBuf>,

    /// UDP destination port carrying TDMs
    #[arg(short = 'P', long, env = "TMNSHARK_PORT", default_value_t = DEFAULT_TDM_PORT)]
    port: u16,

    /// Replay the capture as fast as possible instead of at recorded rate
    #[arg(short = 'q', long, env = "TMNSHARK_QUICK")]
    quick: bool,

    /// Schema table file (needed with --role)
    #[arg(short = 'm', long, env = "TMNSHARK_SCHEMA")]
    schema: Option<PathBuf>,

    /// Receive by joining the multicast groups this role subscribes to
    #[arg(long, env = "TMNSHARK_ROLE", requires = "schema", conflicts_with_all = ["input", "interface"])]
    role: Option<String>,

    /// Local interface address for multicast joins
    #[arg(long, env = "TMNSHARK_GROUP_INTERFACE", default_value_t = Ipv4Addr::UNSPECIFIED)]
    group_interface: Ipv4Addr,
}

#[derive(Args)]
struct MoArgs {
    /// Named pipe to read the TDM stream from (created if missing)
    #[arg(short = 'p', long, env = "TMNSHARK_PIPE", conflicts_with = "input")]
    pipe: Option<PathBuf>,

    /// Binary file of TDMs to replay
    #[arg(short = 'i', long, env = "TMNSHARK_INPUT")]
    input: Option<PathBuf>,

    /// Append frames to this PCAP file instead of sending on the network
    #[arg(short = 'o', long, env = "TMNSHARK_PCAP_OUTPUT")]
    output: Option<PathBuf>,

    /// Schema table file with message destinations
    #[arg(short = 'm', long, env = "TMNSHARK_SCHEMA")]
    schema: PathBuf,

    /// Replay as fast as possible. CAUTION: may saturate the network.
    #[arg(short = 'q', long, env = "TMNSHARK_QUICK")]
    quick: bool,

    /// Destination for message types the schema does not list (overrides the schema default)
    #[arg(long, env = "TMNSHARK_DEFAULT_DEST")]
    default_dest: Option<SocketAddrV4>,

    /// Added to each MDID before destination lookup
    #[arg(long, env = "TMNSHARK_MDID_OFFSET", default_value_t = 0)]
    mdid_offset: u32,

    #[arg(long, env = "TMNSHARK_TTL", default_value_t = DEFAULT_TTL)]
    ttl: u8,

    #[arg(long, env = "TMNSHARK_SOURCE_PORT", default_value_t = DEFAULT_SOURCE_PORT)]
    source_port: u16,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tmnshark=info")),
        )
        .init();

    let cli = Cli::parse();
    let shutdown = Arc::new(AtomicBool::new(false));
    install_interrupt_handler(Arc::clone(&shutdown))?;
    let mut session = Session::new(shutdown);

    let summary = match cli.mode {
        Mode::Mi(args) => run_mi(args, &mut session)?,
        Mode::Mo(args) => run_mo(args, &mut session)?,
    };
    eprintln!(
        "TDMs: {}  restarts: {}{}",
        summary.messages,
        summary.restarts,
        if summary.interrupted { "  (interrupted)" } else { "" }
    );
    Ok(())
}

/// First Ctrl-C asks every loop to stop; a second one exits immediately (e.g. while blocked
/// opening a pipe).
fn install_interrupt_handler(shutdown: Arc<AtomicBool>) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        if shutdown.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        eprintln!("\nstopping (Ctrl-C again to force)");
    })
    .context("install Ctrl-C handler")
}

fn run_mi(args: MiArgs, session: &mut Session) -> anyhow::Result<Summary> {
    let config = BridgeConfig {
        tdm_port: args.port,
        quick: args.quick,
        ..BridgeConfig::default()
    };
    let (path, pipe) = match (&args.pipe, &args.output) {
        (Some(p), _) => (p.clone(), true),
        (None, Some(o)) => (o.clone(), false),
        (None, None) => (PathBuf::from(DEFAULT_BINARY_FILE), false),
    };
    let mut sink: Box<dyn TdmSink> =
        sinks::open_sink(&path, pipe, false, session).with_context(|| format!("open sink {}", path.display()))?;

    if let Some(capture) = &args.input {
        return ingest::replay_pcap(capture, sink.as_mut(), &config, session)
            .with_context(|| format!("replay {}", capture.display()));
    }

    let mut source: Box<dyn PacketSource> = match &args.role {
        Some(role) => {
            let schema = args.schema.as_ref().context("--role needs --schema")?;
            let tables = SchemaTables::load(schema)?;
            let groups = tables.subscription_groups(role)?;
            Box::new(UdpListener::bind(config.tdm_port, &groups, args.group_interface)?)
        }
        None => live_sniffer(args.interface.as_deref(), config.tdm_port)?,
    };
    Ok(ingest::run_live(source.as_mut(), sink.as_mut(), session)?)
}

#[cfg(target_os = "linux")]
fn live_sniffer(interface: Option<&str>, port: u16) -> anyhow::Result<Box<dyn PacketSource>> {
    let sniffer = tmnshark::capture::Sniffer::open(interface, port).context("open raw capture (needs CAP_NET_RAW)")?;
    Ok(Box::new(sniffer))
}

#[cfg(not(target_os = "linux"))]
fn live_sniffer(_interface: Option<&str>, _port: u16) -> anyhow::Result<Box<dyn PacketSource>> {
    bail!("raw capture is only available on Linux; use --role to receive by multicast subscription")
}

fn run_mo(args: MoArgs, session: &mut Session) -> anyhow::Result<Summary> {
    let tables = SchemaTables::load(&args.schema)?;
    let mut endpoints: EndpointTable = tables.endpoints;
    if let Some(dest) = args.default_dest {
        endpoints.set_default_endpoint(dest);
    }
    if endpoints.default_endpoint() != DEFAULT_ENDPOINT {
        tracing::info!(default = %endpoints.default_endpoint(), "default destination");
    }
    let config = BridgeConfig {
        source_port: args.source_port,
        ttl: args.ttl,
        mdid_offset: args.mdid_offset,
        quick: args.quick,
        ..BridgeConfig::default()
    };

    let mut emitter: Box<dyn Emitter> = match &args.output {
        Some(out) => Box::new(PcapEmitter::append(out, &config).with_context(|| format!("open {}", out.display()))?),
        None => Box::new(UdpEmitter::bind(&config)?),
    };

    match (&args.pipe, &args.input) {
        (Some(pipe), _) => {
            let mut source = open_source(pipe, true)?;
            Ok(egress::run_stream(source.as_mut(), emitter.as_mut(), &endpoints, &config, session)?)
        }
        (None, input) => {
            let input = input.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_BINARY_FILE));
            if !input.exists() {
                bail!("input file {} does not exist", input.display());
            }
            if is_fifo(&input) {
                let mut source = open_source(&input, true)?;
                return Ok(egress::run_stream(source.as_mut(), emitter.as_mut(), &endpoints, &config, session)?);
            }
            let batch = egress::build_replay_batch(&input, &endpoints, &config)
                .with_context(|| format!("read {}", input.display()))?;
            Ok(egress::replay_batch(&batch, emitter.as_mut(), &config, session)?)
        }
    }
}

fn is_fifo(path: &std::path::Path) -> bool {
    use std::os::unix::fs::FileTypeExt;
    std::fs::metadata(path)
        .map(|m| m.file_type().is_fifo())
        .unwrap_or(false)
}
