//! Two peers talking newline-delimited JSON over an in-memory byte stream.

use duplex_rpc::{json_lines, JsonLinesReader, JsonLinesWriter, Peer, PeerConfig, RpcError};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Notify;

fn connected_pair() -> (Peer, Peer) {
    let (left_io, right_io) = tokio::io::duplex(64 * 1024);

    let (left_read, left_write) = tokio::io::split(left_io);
    let (reader, writer) = json_lines(left_read, left_write);
    let left = Peer::builder()
        .config(PeerConfig::default().with_name("left"))
        .local_method_sync("add", |params| {
            let [a, b]: [i64; 2] = serde_json::from_value(params)?;
            Ok(json!(a + b))
        })
        .remote_method("divide")
        .connect(reader, writer);

    let (right_read, right_write) = tokio::io::split(right_io);
    let (reader, writer) = json_lines(right_read, right_write);
    let right = Peer::builder()
        .config(PeerConfig::default().with_name("right"))
        .local_method_sync("divide", |params| {
            let [a, b]: [f64; 2] = serde_json::from_value(params)?;
            if b == 0.0 {
                return Err(RpcError::new(400, "div by zero"));
            }
            Ok(json!(a / b))
        })
        .remote_method("add")
        .connect(reader, writer);

    (left, right)
}

#[tokio::test]
async fn test_calls_in_both_directions() {
    let (left, right) = connected_pair();

    assert_eq!(
        right.methods().invoke("add", json!([2, 3])).await.unwrap(),
        json!(5)
    );
    assert_eq!(
        left.methods().invoke("divide", json!([6, 3])).await.unwrap(),
        json!(2.0)
    );

    let err = left
        .methods()
        .invoke("divide", json!([1, 0]))
        .await
        .unwrap_err();
    assert_eq!(err.rpc(), Some(&RpcError::new(400, "div by zero")));
}

#[tokio::test]
async fn test_notifications_cross_the_stream() {
    let (left, right) = connected_pair();
    let received = Arc::new(Notify::new());
    {
        let received = received.clone();
        right.on("ready", move |data| {
            assert_eq!(data, &json!({"from": "left"}));
            received.notify_one();
        });
    }

    left.emit("ready", json!({"from": "left"})).unwrap();

    tokio::time::timeout(Duration::from_secs(2), received.notified())
        .await
        .expect("notification never arrived");
}

#[tokio::test]
async fn test_closing_one_side_fails_the_others_calls() {
    let (left, right) = connected_pair();

    // Never answers
    left.register_local_method("hang", |_| async move {
        futures::future::pending::<()>().await;
        Ok(json!(null))
    });

    let call = tokio::spawn({
        let right = right.clone();
        async move { right.call("hang", json!(null)).await }
    });
    tokio::time::timeout(Duration::from_secs(2), async {
        while right.pending_calls() == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    left.close();
    tokio::time::timeout(Duration::from_secs(2), left.closed())
        .await
        .unwrap();

    let err = tokio::time::timeout(Duration::from_secs(2), call)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(err.is_connection_closed());
    assert!(right.is_closed());
}

#[tokio::test]
async fn test_raw_lines_against_a_peer() {
    let (client_io, peer_io) = tokio::io::duplex(64 * 1024);
    let (peer_read, peer_write) = tokio::io::split(peer_io);
    let (reader, writer) = json_lines(peer_read, peer_write);
    let _peer = Peer::builder()
        .local_method_sync("ping", |_| Ok(json!("pong")))
        .connect(reader, writer);

    let (client_read, mut client_write) = tokio::io::split(client_io);
    client_write
        .write_all(b"not json at all\n\n{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n")
        .await
        .unwrap();

    let mut lines = BufReader::new(client_read).lines();
    let line = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let reply: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(reply, json!({"jsonrpc": "2.0", "id": 1, "result": "pong"}));
}

#[tokio::test]
async fn test_invalid_utf8_line_is_skipped() {
    let (client_io, peer_io) = tokio::io::duplex(64 * 1024);
    let (peer_read, peer_write) = tokio::io::split(peer_io);
    let (reader, writer) = json_lines(peer_read, peer_write);
    let peer = Peer::builder()
        .local_method_sync("ping", |_| Ok(json!("pong")))
        .connect(reader, writer);

    let (client_read, mut client_write) = tokio::io::split(client_io);
    client_write
        .write_all(b"\xff\xfe garbage\n{\"id\":1,\"method\":\"ping\"}\n")
        .await
        .unwrap();

    let mut lines = BufReader::new(client_read).lines();
    let line = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
        .await
        .unwrap()
        .unwrap()
        .expect("peer closed the stream");
    let reply: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(reply, json!({"jsonrpc": "2.0", "id": 1, "result": "pong"}));
    assert!(!peer.is_closed());
}

#[tokio::test]
async fn test_oversized_line_fails_outstanding_calls() {
    let (client_io, peer_io) = tokio::io::duplex(64 * 1024);
    let (peer_read, peer_write) = tokio::io::split(peer_io);
    let peer = Peer::connect(
        JsonLinesReader::new(peer_read).with_max_message_bytes(64),
        JsonLinesWriter::new(peer_write),
    );

    let call = tokio::spawn({
        let peer = peer.clone();
        async move { peer.call("slow", json!(null)).await }
    });

    let (client_read, mut client_write) = tokio::io::split(client_io);
    let mut lines = BufReader::new(client_read).lines();
    let sent = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(sent.contains("\"slow\""));

    let mut oversized = vec![b'x'; 200];
    oversized.push(b'\n');
    client_write.write_all(&oversized).await.unwrap();

    let err = tokio::time::timeout(Duration::from_secs(2), call)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(err.is_connection_closed(), "unexpected error: {}", err);
    assert!(err.to_string().contains("stream error"));

    tokio::time::timeout(Duration::from_secs(2), peer.closed())
        .await
        .unwrap();
    assert!(peer.is_closed());
}
