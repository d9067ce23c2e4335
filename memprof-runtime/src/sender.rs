//! Reconnecting TCP sender (spec §4.C). Never blocks the caller for more
//! than one write syscall plus at most one connect attempt, and never
//! surfaces a network error upward.

use std::io::Write;
use std::net::TcpStream;
use std::sync::Mutex;
use std::time::Duration;

use memprof_common::ProfilerError;

const IO_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Disconnected,
    Connecting,
    Connected,
}

struct Inner {
    state: SenderState,
    stream: Option<TcpStream>,
}

/// A line-delimited TCP sender that reconnects lazily and swallows every
/// transport error (spec §7 `TransportTransient`).
pub struct Sender {
    host: String,
    port: u16,
    inner: Mutex<Inner>,
}

impl Sender {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            inner: Mutex::new(Inner { state: SenderState::Disconnected, stream: None }),
        }
    }

    pub fn state(&self) -> SenderState {
        self.inner.lock().unwrap().state
    }

    /// Send one line (payload + `\n`). On any failure the current payload
    /// is dropped and the connection is torn down so the next call
    /// attempts a fresh connect.
    pub fn send_line(&self, payload: &[u8]) {
        let mut inner = self.inner.lock().unwrap();

        if inner.stream.is_none() {
            inner.state = SenderState::Connecting;
            match TcpStream::connect((self.host.as_str(), self.port)) {
                Ok(stream) => {
                    let _ = stream.set_write_timeout(Some(IO_TIMEOUT));
                    let _ = stream.set_read_timeout(Some(IO_TIMEOUT));
                    inner.stream = Some(stream);
                    inner.state = SenderState::Connected;
                }
                Err(err) => {
                    let err = ProfilerError::TransportTransient(format!(
                        "connect to {}:{} failed: {err}",
                        self.host, self.port
                    ));
                    log::debug!("memprof sender: {err}");
                    inner.state = SenderState::Disconnected;
                    return;
                }
            }
        }

        let mut line = Vec::with_capacity(payload.len() + 1);
        line.extend_from_slice(payload);
        line.push(b'\n');

        let write_result = inner.stream.as_mut().map(|s| s.write_all(&line));
        match write_result {
            Some(Ok(())) => {
                inner.state = SenderState::Connected;
            }
            Some(Err(err)) => {
                let err = ProfilerError::TransportTransient(format!("write failed, dropping payload: {err}"));
                log::debug!("memprof sender: {err}");
                inner.stream = None;
                inner.state = SenderState::Disconnected;
            }
            None => unreachable!("stream was just established above"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;

    #[test]
    fn reconnects_and_delivers_after_listener_appears() {
        // No listener yet: send_line must not panic or block.
        let sender = Sender::new("127.0.0.1", 18111);
        sender.send_line(b"first");
        assert_eq!(sender.state(), SenderState::Disconnected);

        let listener = TcpListener::bind("127.0.0.1:18111").unwrap();
        sender.send_line(b"hello");
        let (socket, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(socket);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "hello\n");
        assert_eq!(sender.state(), SenderState::Connected);
    }
}
