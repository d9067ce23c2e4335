//! Broker wire-protocol scenarios from spec §8 (scenarios 5-7).

use std::sync::Arc;
use std::time::Duration;

use memprof_common::codec::{percent_decode_str, percent_encode_str};
use memprofd::{Broker, Metrics};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

async fn spawn_broker() -> String {
    let broker = Arc::new(Broker::new(Arc::new(Metrics::new())));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move { broker.run_on(listener).await });
    addr
}

async fn read_line(stream: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    tokio::time::timeout(Duration::from_secs(2), stream.read_line(&mut line)).await.unwrap().unwrap();
    line.trim_end().to_string()
}

#[tokio::test]
async fn publish_with_no_subscribers_does_not_disconnect_the_client() {
    let addr = spawn_broker().await;
    let mut stream = BufReader::new(TcpStream::connect(&addr).await.unwrap());
    stream.get_mut().write_all(b"PUBLISH|MEMORY_UPDATE|%7B...%7D|APP-1\n").await.unwrap();
    let reply = read_line(&mut stream).await;
    assert!(reply.starts_with("ERROR|"), "got {reply}");

    // The connection must still be usable afterwards.
    stream.get_mut().write_all(b"SUBSCRIBE|MEMORY_UPDATE|APP-1\n").await.unwrap();
    let reply = read_line(&mut stream).await;
    assert_eq!(reply, "OK");
}

#[tokio::test]
async fn publish_with_one_live_subscriber_pushes_exactly_once() {
    let addr = spawn_broker().await;

    let mut a = BufReader::new(TcpStream::connect(&addr).await.unwrap());
    a.get_mut().write_all(b"SUBSCRIBE|T|A\n").await.unwrap();
    let reply = read_line(&mut a).await;
    assert!(reply.starts_with("OK"));

    let mut b = BufReader::new(TcpStream::connect(&addr).await.unwrap());
    b.get_mut().write_all(b"PUBLISH|T|hello|B\n").await.unwrap();
    let b_reply = read_line(&mut b).await;
    assert!(b_reply.starts_with("OK"));

    // A's socket receives the live push, unprompted by RECEIVE.
    let pushed = read_line(&mut a).await;
    assert_eq!(pushed, "OK|hello");
}

#[test]
fn percent_encoding_round_trips_the_spec_example() {
    let input = "a|b%c\nd";
    let encoded = percent_encode_str(input);
    assert_eq!(encoded, "a%7Cb%25c%0Ad");
    assert_eq!(percent_decode_str(&encoded), input);
}
