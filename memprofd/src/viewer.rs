//! Viewer-side wiring (spec §6 "Viewer stream", §4.H). Two ingestion
//! modes: a direct TCP listener that receives full `Snapshot` documents
//! from a runtime with no broker in between, and a broker-polling mode
//! that drives a `ConsumerAggregator` off raw ALLOC/FREE lines fetched
//! with RECEIVE.

use std::sync::Arc;
use std::time::Duration;

use memprof_common::schema::Snapshot;
use memprof_consumer::ConsumerAggregator;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::config::RegistryConfig;

/// Accept direct runtime connections on `bind_addr` and log a one-line
/// summary of each `Snapshot` as it arrives. Runs until the process exits.
pub async fn run_direct(bind_addr: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    tracing::info!(bind_addr, "viewer listening for direct runtime connections");
    loop {
        let (socket, peer) = listener.accept().await?;
        tracing::debug!(%peer, "viewer accepted a direct runtime connection");
        tokio::spawn(async move {
            if let Err(err) = consume_direct_stream(socket).await {
                tracing::debug!(%err, "direct snapshot stream ended");
            }
        });
    }
}

async fn consume_direct_stream(socket: TcpStream) -> anyhow::Result<()> {
    let mut reader = BufReader::new(socket);
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(());
        }
        match Snapshot::from_line(line.trim_end()) {
            Ok(snap) => log::info!(
                "snapshot: heap_current={} heap_peak={} active_allocs={} leak_bytes={}",
                snap.general.heap_current,
                snap.general.heap_peak,
                snap.general.active_allocs,
                snap.general.leak_bytes,
            ),
            Err(err) => log::debug!("dropping malformed snapshot line: {err}"),
        }
    }
}

/// Poll the broker with RECEIVE for `topic`/`app_id` and feed every
/// payload line into a `ConsumerAggregator`, logging periodic summaries.
/// `registry_config` governs the aggregator's timeline capacity, leak
/// threshold, and histogram ladder, plus the backoff between polls when
/// a queue comes back empty (spec §3's config surface).
pub async fn run_broker_poll(broker_addr: &str, topic: &str, app_id: &str, registry_config: &RegistryConfig) -> anyhow::Result<()> {
    let aggregator = Arc::new(match registry_config.histogram_ladder() {
        Some(ladder) => ConsumerAggregator::with_histogram_ladder(
            registry_config.timeline_capacity,
            registry_config.leak_threshold_ms,
            ladder,
        ),
        None => ConsumerAggregator::new(registry_config.timeline_capacity, registry_config.leak_threshold_ms),
    });
    let poll_backoff = Duration::from_millis(registry_config.snapshot_period_ms);

    let mut stream = TcpStream::connect(broker_addr).await?;
    let subscribe = format!("SUBSCRIBE|{topic}|{app_id}\n");
    stream.write_all(subscribe.as_bytes()).await?;
    let mut reader = BufReader::new(stream);
    let mut ack = String::new();
    reader.read_line(&mut ack).await?;
    tracing::info!(broker_addr, topic, app_id, reply = ack.trim_end(), "subscribed to broker topic");

    loop {
        let receive = format!("RECEIVE|{topic}|{app_id}\n");
        reader.get_mut().write_all(receive.as_bytes()).await?;
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        let reply = line.trim_end();

        if let Some(payload) = reply.strip_prefix("OK|") {
            let decoded = memprof_common::codec::percent_decode_str(payload);
            aggregator.process_event(&decoded);
        } else {
            tokio::time::sleep(poll_backoff).await;
        }
    }
}
