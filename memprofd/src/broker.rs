//! Pub/sub broker (spec §4.G): accepts TCP clients, routes
//! SUBSCRIBE/UNSUBSCRIBE/PUBLISH/RECEIVE commands, and fans out snapshots
//! and raw events to the subscribers of each topic.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use memprof_common::codec::{percent_decode_str, percent_encode_str};
use memprof_common::{ProfilerError, PROFILER_TOPICS};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use crate::metrics::Metrics;

type Socket = Arc<Mutex<OwnedWriteHalf>>;

#[derive(Default)]
struct State {
    subscribers: HashMap<String, HashSet<String>>,
    queues: HashMap<String, HashMap<String, VecDeque<String>>>,
    live_sockets: HashMap<String, Socket>,
}

/// Owns the broker's shared routing state and the accept loop.
pub struct Broker {
    state: Mutex<State>,
    metrics: Arc<Metrics>,
}

impl Broker {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { state: Mutex::new(State::default()), metrics }
    }

    /// Accept connections on `bind_addr` until the process is shut down.
    pub async fn run(self: Arc<Self>, bind_addr: &str) -> anyhow::Result<()> {
        let listener = TcpListener::bind(bind_addr).await?;
        tracing::info!(bind_addr, "broker listening");
        self.run_on(listener).await
    }

    /// Same as [`Broker::run`] but accepts an already-bound listener
    /// (used by tests that bind to an ephemeral port).
    pub async fn run_on(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            let (socket, peer) = listener.accept().await?;
            tracing::debug!(%peer, "broker accepted connection");
            let broker = self.clone();
            tokio::spawn(async move {
                broker.metrics.inc_connection_opened();
                broker.handle_connection(socket).await;
                broker.metrics.inc_connection_closed();
            });
        }
    }

    async fn handle_connection(&self, socket: tokio::net::TcpStream) {
        let (read_half, write_half) = socket.into_split();
        let writer: Socket = Arc::new(Mutex::new(write_half));
        let mut reader = BufReader::new(read_half);
        let mut owned_app_ids: HashSet<String> = HashSet::new();
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break, // EOF
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(%err, "broker connection read error");
                    break;
                }
            }
            let trimmed = line.trim_end_matches(['\n', '\r']);
            if trimmed.is_empty() {
                continue;
            }
            let reply = self.dispatch(trimmed, &writer, &mut owned_app_ids).await;
            let mut w = writer.lock().await;
            if w.write_all(reply.as_bytes()).await.is_err() || w.write_all(b"\n").await.is_err() {
                break;
            }
        }

        self.forget_socket(&writer).await;
    }

    async fn dispatch(&self, line: &str, writer: &Socket, owned_app_ids: &mut HashSet<String>) -> String {
        let fields: Vec<String> = line.split('|').map(percent_decode_str).collect();
        let command = fields[0].as_str();

        if PROFILER_TOPICS.contains(&command) {
            self.metrics.inc_publish(self.has_subscribers(command).await);
            return self.publish(command, line, None, writer, owned_app_ids).await;
        }

        match command {
            "SUBSCRIBE" if fields.len() >= 3 => {
                self.metrics.inc_subscribe();
                self.subscribe(&fields[1], &fields[2], writer, owned_app_ids).await
            }
            "UNSUBSCRIBE" if fields.len() >= 3 => {
                self.metrics.inc_unsubscribe();
                self.unsubscribe(&fields[1], &fields[2]).await
            }
            "PUBLISH" if fields.len() >= 4 => {
                let had_subscribers = self.has_subscribers(&fields[1]).await;
                self.metrics.inc_publish(had_subscribers);
                self.publish(&fields[1], &fields[2], Some(&fields[3]), writer, owned_app_ids).await
            }
            "RECEIVE" if fields.len() >= 3 => self.receive(&fields[1], &fields[2], writer, owned_app_ids).await,
            _ => {
                self.metrics.inc_protocol_error();
                error_reply(ProfilerError::ProtocolMalformed(format!(
                    "unrecognized command or wrong field count: {command}"
                )))
            }
        }
    }

    async fn has_subscribers(&self, topic: &str) -> bool {
        self.state.lock().await.subscribers.get(topic).is_some_and(|s| !s.is_empty())
    }

    async fn remember_live_socket(&self, app_id: &str, writer: &Socket, owned_app_ids: &mut HashSet<String>) {
        owned_app_ids.insert(app_id.to_string());
        self.state.lock().await.live_sockets.insert(app_id.to_string(), writer.clone());
    }

    async fn subscribe(&self, topic: &str, app_id: &str, writer: &Socket, owned_app_ids: &mut HashSet<String>) -> String {
        self.remember_live_socket(app_id, writer, owned_app_ids).await;
        let mut state = self.state.lock().await;
        state.subscribers.entry(topic.to_string()).or_default().insert(app_id.to_string());
        state
            .queues
            .entry(topic.to_string())
            .or_default()
            .entry(app_id.to_string())
            .or_default();
        "OK".to_string()
    }

    async fn unsubscribe(&self, topic: &str, app_id: &str) -> String {
        let mut state = self.state.lock().await;
        match state.subscribers.get_mut(topic) {
            Some(subs) if subs.remove(app_id) => "OK".to_string(),
            _ => error_reply(ProfilerError::UnknownTopic(format!("{app_id} is not subscribed to {topic}"))),
        }
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &str,
        app_id: Option<&str>,
        writer: &Socket,
        owned_app_ids: &mut HashSet<String>,
    ) -> String {
        if let Some(app_id) = app_id {
            self.remember_live_socket(app_id, writer, owned_app_ids).await;
        }

        let mut state = self.state.lock().await;
        let Some(subs) = state.subscribers.get(topic).cloned() else {
            return error_reply(ProfilerError::UnknownTopic(format!("no subscribers for {topic}")));
        };
        if subs.is_empty() {
            return error_reply(ProfilerError::UnknownTopic(format!("no subscribers for {topic}")));
        }

        let mut pushed = 0usize;
        for subscriber in &subs {
            state
                .queues
                .entry(topic.to_string())
                .or_default()
                .entry(subscriber.clone())
                .or_default()
                .push_back(payload.to_string());

            if let Some(socket) = state.live_sockets.get(subscriber).cloned() {
                let line = format!("OK|{}\n", percent_encode_str(payload));
                let mut w = socket.lock().await;
                if w.write_all(line.as_bytes()).await.is_ok() {
                    pushed += 1;
                }
            }
        }

        format!("OK|{}", percent_encode_str(&format!("pushed={pushed} queued_for={}", subs.len())))
    }

    async fn receive(&self, topic: &str, app_id: &str, writer: &Socket, owned_app_ids: &mut HashSet<String>) -> String {
        self.remember_live_socket(app_id, writer, owned_app_ids).await;
        let mut state = self.state.lock().await;
        let queue_was_empty;
        let popped = match state.queues.get_mut(topic).and_then(|by_app| by_app.get_mut(app_id)) {
            Some(q) => {
                queue_was_empty = q.is_empty();
                q.pop_front()
            }
            None => {
                queue_was_empty = true;
                None
            }
        };
        self.metrics.inc_receive(queue_was_empty);
        match popped {
            Some(payload) => format!("OK|{}", percent_encode_str(&payload)),
            None => error_reply(ProfilerError::UnknownTopic(format!("queue empty for {app_id} on {topic}"))),
        }
    }

    /// On disconnect, drop this socket from every `live_sockets` entry
    /// (by socket equality) while leaving subscribers and queued messages
    /// intact so a reconnecting client can still RECEIVE (spec §4.G).
    async fn forget_socket(&self, writer: &Socket) {
        let mut state = self.state.lock().await;
        state.live_sockets.retain(|_, sock| !Arc::ptr_eq(sock, writer));
    }
}

/// Render a semantic broker error as the wire's `ERROR|<reason>` reply
/// (spec §7: the broker surfaces these to clients but never terminates
/// their session).
fn error_reply(err: ProfilerError) -> String {
    format!("ERROR|{}", percent_encode_str(&err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt as _, AsyncWriteExt as _, BufReader as TokioBufReader};
    use tokio::net::TcpStream;

    async fn spawn_broker() -> String {
        let metrics = Arc::new(Metrics::new());
        let broker = Arc::new(Broker::new(metrics));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            loop {
                let (socket, _) = listener.accept().await.unwrap();
                let broker = broker.clone();
                tokio::spawn(async move { broker.handle_connection(socket).await });
            }
        });
        addr
    }

    async fn send_and_recv(stream: &mut TcpStream, line: &str) -> String {
        stream.write_all(format!("{line}\n").as_bytes()).await.unwrap();
        let mut reader = TokioBufReader::new(stream);
        let mut reply = String::new();
        tokio::time::timeout(Duration::from_secs(2), reader.read_line(&mut reply)).await.unwrap().unwrap();
        reply.trim_end().to_string()
    }

    #[tokio::test]
    async fn subscribe_publish_receive_round_trip() {
        let addr = spawn_broker().await;

        let mut sub = TcpStream::connect(&addr).await.unwrap();
        let reply = send_and_recv(&mut sub, "SUBSCRIBE|MEMORY_UPDATE|viewer1").await;
        assert_eq!(reply, "OK");

        let mut publisher = TcpStream::connect(&addr).await.unwrap();
        let reply = send_and_recv(&mut publisher, "PUBLISH|MEMORY_UPDATE|hello-world|runtime1").await;
        assert!(reply.starts_with("OK|"));

        let reply = send_and_recv(&mut sub, "RECEIVE|MEMORY_UPDATE|viewer1").await;
        assert_eq!(reply, "OK|hello-world");

        let reply = send_and_recv(&mut sub, "RECEIVE|MEMORY_UPDATE|viewer1").await;
        assert!(reply.starts_with("ERROR|"));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_errors() {
        let addr = spawn_broker().await;
        let mut publisher = TcpStream::connect(&addr).await.unwrap();
        let reply = send_and_recv(&mut publisher, "PUBLISH|LEAK_DETECTED|payload|runtime1").await;
        assert!(reply.starts_with("ERROR|"));
    }

    #[tokio::test]
    async fn unsubscribe_without_prior_subscribe_errors() {
        let addr = spawn_broker().await;
        let mut client = TcpStream::connect(&addr).await.unwrap();
        let reply = send_and_recv(&mut client, "UNSUBSCRIBE|FILE_STATS|ghost").await;
        assert!(reply.starts_with("ERROR|"));
    }
}
