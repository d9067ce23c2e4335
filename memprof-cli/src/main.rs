//! Operator CLI for the memory profiler. Talks the broker's
//! SUBSCRIBE/PUBLISH/RECEIVE protocol directly, or tails a runtime's
//! direct snapshot stream (spec §6).

use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use memprof_common::codec::{percent_decode_str, percent_encode_str};
use memprof_common::schema::Snapshot;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[derive(Parser)]
#[command(name = "memprof", about = "Operator CLI for the memory profiler broker and viewer stream")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Subscribe to a topic and print every payload the broker pushes or
    /// hands back via RECEIVE.
    Subscribe {
        #[arg(long, default_value = "127.0.0.1:5000")]
        broker_addr: String,
        #[arg(long)]
        topic: String,
        #[arg(long, default_value = "memprof-cli")]
        app_id: String,
    },
    /// Publish one payload to a topic.
    Publish {
        #[arg(long, default_value = "127.0.0.1:5000")]
        broker_addr: String,
        #[arg(long)]
        topic: String,
        #[arg(long)]
        payload: String,
        #[arg(long, default_value = "memprof-cli")]
        app_id: String,
    },
    /// Tail a runtime's direct snapshot stream (no broker in between).
    Tail {
        #[arg(long, default_value = "127.0.0.1:7070")]
        addr: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Subscribe { broker_addr, topic, app_id } => subscribe(&broker_addr, &topic, &app_id).await,
        Command::Publish { broker_addr, topic, payload, app_id } => publish(&broker_addr, &topic, &payload, &app_id).await,
        Command::Tail { addr } => tail(&addr).await,
    }
}

async fn send_command(stream: &mut BufReader<TcpStream>, line: &str) -> anyhow::Result<String> {
    stream.get_mut().write_all(line.as_bytes()).await?;
    stream.get_mut().write_all(b"\n").await?;
    let mut reply = String::new();
    stream.read_line(&mut reply).await?;
    Ok(reply.trim_end().to_string())
}

async fn subscribe(broker_addr: &str, topic: &str, app_id: &str) -> anyhow::Result<()> {
    let stream = TcpStream::connect(broker_addr).await.context("connecting to broker")?;
    let mut stream = BufReader::new(stream);

    let reply = send_command(&mut stream, &format!("SUBSCRIBE|{topic}|{app_id}")).await?;
    if !reply.starts_with("OK") {
        anyhow::bail!("broker refused SUBSCRIBE: {reply}");
    }
    println!("{} topic={topic} app_id={app_id}", "subscribed".green());

    loop {
        let reply = send_command(&mut stream, &format!("RECEIVE|{topic}|{app_id}")).await?;
        if let Some(payload) = reply.strip_prefix("OK|") {
            println!("{} {}", "event".cyan(), percent_decode_str(payload));
        } else {
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }
}

async fn publish(broker_addr: &str, topic: &str, payload: &str, app_id: &str) -> anyhow::Result<()> {
    let stream = TcpStream::connect(broker_addr).await.context("connecting to broker")?;
    let mut stream = BufReader::new(stream);
    let encoded_payload = percent_encode_str(payload);
    let reply = send_command(&mut stream, &format!("PUBLISH|{topic}|{encoded_payload}|{app_id}")).await?;
    if reply.starts_with("OK") {
        println!("{} {reply}", "published".green());
        Ok(())
    } else {
        println!("{} {reply}", "rejected".red());
        anyhow::bail!("broker rejected PUBLISH: {reply}")
    }
}

async fn tail(addr: &str) -> anyhow::Result<()> {
    let stream = TcpStream::connect(addr).await.context("connecting to the direct snapshot stream")?;
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(());
        }
        match Snapshot::from_line(line.trim_end()) {
            Ok(snap) => println!(
                "{} heap={} peak={} active={} leak_bytes={}",
                "snapshot".blue(),
                snap.general.heap_current,
                snap.general.heap_peak,
                snap.general.active_allocs,
                snap.general.leak_bytes,
            ),
            Err(err) => eprintln!("{} {err}", "malformed snapshot line:".red()),
        }
    }
}
