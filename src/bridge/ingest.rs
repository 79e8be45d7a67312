//! Ingest (`mi`): network or PCAP → file or named pipe.

use crate::bridge::sink::{Delivery, TdmSink};
use crate::bridge::{BridgeConfig, Pacer, Session, Summary};
use crate::capture::PacketSource;
use crate::error::BridgeError;
use crate::pcap;
use std::path::Path;

/// Running count is logged every this many messages in live mode.
pub const PROGRESS_EVERY: u64 = 1000;

/// Write one payload, recovering from reader disconnects. The payload whose write found the
/// reader gone is written again in full once a new reader attaches.
pub fn deliver(sink: &mut dyn TdmSink, payload: &[u8], session: &mut Session) -> Result<(), BridgeError> {
    loop {
        match sink.deliver(payload)? {
            Delivery::Delivered => {
                session.record();
                return Ok(());
            }
            Delivery::StreamClosed => {
                tracing::warn!(count = session.count(), "reader disconnected; recreating pipe");
                session.record_restart();
                sink.reopen(session)?;
                tracing::info!(restarts = session.restarts(), "resuming");
            }
        }
    }
}

/// Forward every payload from a live source until shutdown.
pub fn run_live(source: &mut dyn PacketSource, sink: &mut dyn TdmSink, session: &mut Session) -> Result<Summary, BridgeError> {
    while !session.is_shutdown() {
        let Some(payload) = source.next_payload()? else {
            continue;
        };
        match deliver(sink, &payload, session) {
            Ok(()) => {}
            Err(BridgeError::Interrupted) => break,
            Err(e) => return Err(e),
        }
        tracing::debug!(len = payload.len(), count = session.count(), "tdm");
        if session.count() % PROGRESS_EVERY == 0 {
            tracing::info!(count = session.count(), "running");
        }
    }
    sink.flush()?;
    let summary = Summary::from(&*session);
    tracing::info!(total = summary.messages, restarts = summary.restarts, "capture stopped");
    Ok(summary)
}

/// Replay the TDM datagrams (destination port == `config.tdm_port`) of a PCAP/PCAPNG file,
/// paced by capture time unless `config.quick`. Ends after the last packet or on shutdown.
pub fn replay_pcap(path: &Path, sink: &mut dyn TdmSink, config: &BridgeConfig, session: &mut Session) -> Result<Summary, BridgeError> {
    let mut pacer = Pacer::new(config.quick);
    let mut skipped = 0u64;
    let result = pcap::for_each_datagram(path, |d| {
        if d.destination.port() != config.tdm_port {
            skipped += 1;
            return Ok(());
        }
        if !pacer.wait(d.timestamp, session) {
            return Err(BridgeError::Interrupted);
        }
        deliver(sink, d.payload, session)?;
        tracing::debug!(len = d.payload.len(), dst = %d.destination, count = session.count(), "tdm");
        Ok(())
    });
    let frames = match result {
        Ok(frames) => Some(frames),
        Err(BridgeError::Interrupted) => None,
        Err(e) => return Err(e),
    };
    sink.flush()?;
    let summary = Summary::from(&*session);
    tracing::info!(
        pcap = %path.display(),
        frames = frames.unwrap_or_default(),
        other_udp = skipped,
        total = summary.messages,
        interrupted = summary.interrupted,
        "replay finished"
    );
    Ok(summary)
}
