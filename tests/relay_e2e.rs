use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use peerhub::config::Config;
use peerhub::server::Server;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn test_config(max_clients: usize) -> Config {
    Config {
        port: 0,
        max_clients,
        heartbeat_interval_secs: 30,
        heartbeat_timeout_secs: 60,
    }
}

async fn connect(port: u16) -> Client {
    let (stream, _) = connect_async(format!("ws://127.0.0.1:{port}/ws"))
        .await
        .expect("websocket connect failed");
    stream
}

/// Next JSON envelope from the stream, skipping transport ping/pong frames.
async fn recv_json(client: &mut Client) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(10), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended unexpectedly")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).expect("invalid JSON"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn send_json(client: &mut Client, value: Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .expect("send failed");
}

async fn assert_silent(client: &mut Client) {
    let quiet = timeout(Duration::from_millis(300), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                other => break other,
            }
        }
    })
    .await;
    assert!(quiet.is_err(), "expected silence, got {quiet:?}");
}

#[tokio::test]
async fn welcome_assigns_id_and_announces_joins() {
    let mut server = Server::new(test_config(10));
    let port = server.start(0).await.expect("start failed");

    let mut a = connect(port).await;
    let welcome_a = recv_json(&mut a).await;
    assert_eq!(welcome_a["type"], "id");
    assert!(welcome_a["peers"].as_array().unwrap().is_empty());
    let id_a = welcome_a["id"].as_str().unwrap().to_string();
    assert_eq!(server.client_count(), 1);

    let mut b = connect(port).await;
    let welcome_b = recv_json(&mut b).await;
    assert_eq!(welcome_b["peers"], json!([id_a]));

    let joined = recv_json(&mut a).await;
    assert_eq!(joined["type"], "peer-joined");
    assert_eq!(joined["id"], welcome_b["id"]);

    drop(a);
    drop(b);
    server.stop().await;
}

#[tokio::test]
async fn routes_broadcast_and_unicast_between_three_peers() {
    let mut server = Server::new(test_config(10));
    let port = server.start(0).await.expect("start failed");

    let mut a = connect(port).await;
    let id_a = recv_json(&mut a).await["id"].as_str().unwrap().to_string();
    let mut b = connect(port).await;
    let id_b = recv_json(&mut b).await["id"].as_str().unwrap().to_string();
    let mut c = connect(port).await;
    let id_c = recv_json(&mut c).await["id"].as_str().unwrap().to_string();

    // drain join announcements: a sees b and c, b sees c
    recv_json(&mut a).await;
    recv_json(&mut a).await;
    recv_json(&mut b).await;

    send_json(
        &mut a,
        json!({"type": "text-message", "to": null, "content": "hi"}),
    )
    .await;
    for peer in [&mut b, &mut c] {
        let msg = recv_json(peer).await;
        assert_eq!(msg["type"], "text-message");
        assert_eq!(msg["content"], "hi");
        assert_eq!(msg["from"], id_a.as_str());
    }
    assert_silent(&mut a).await;

    send_json(
        &mut b,
        json!({"type": "offer", "to": id_c, "sdp": "x", "sdpType": "offer"}),
    )
    .await;
    let offer = recv_json(&mut c).await;
    assert_eq!(offer["type"], "offer");
    assert_eq!(offer["from"], id_b.as_str());
    assert_eq!(offer["sdp"], "x");
    assert_silent(&mut a).await;
    assert_silent(&mut b).await;

    drop(a);
    drop(b);
    drop(c);
    server.stop().await;
}

#[tokio::test]
async fn invalid_frames_are_dropped_silently() {
    let mut server = Server::new(test_config(10));
    let port = server.start(0).await.expect("start failed");

    let mut a = connect(port).await;
    recv_json(&mut a).await;
    let mut b = connect(port).await;
    recv_json(&mut b).await;
    recv_json(&mut a).await; // b joined

    send_json(&mut b, json!({"type": "bogus"})).await;
    send_json(&mut b, json!({"type": "offer"})).await;

    // neither the sender nor anyone else hears about dropped frames
    assert_silent(&mut a).await;
    assert_silent(&mut b).await;

    // the connection is still usable afterwards
    send_json(&mut b, json!({"type": "text-message", "content": "still here"})).await;
    let msg = recv_json(&mut a).await;
    assert_eq!(msg["content"], "still here");

    drop(a);
    drop(b);
    server.stop().await;
}

#[tokio::test]
async fn refuses_connections_past_capacity() {
    let mut server = Server::new(test_config(1));
    let port = server.start(0).await.expect("start failed");

    let mut a = connect(port).await;
    recv_json(&mut a).await;

    // the refusal happens at the upgrade, before any identity is assigned
    let refused = connect_async(format!("ws://127.0.0.1:{port}/ws")).await;
    assert!(refused.is_err());
    assert_eq!(server.client_count(), 1);
    assert_silent(&mut a).await;

    drop(a);
    server.stop().await;
}

#[tokio::test]
async fn disconnect_broadcasts_peer_left() {
    let mut server = Server::new(test_config(10));
    let port = server.start(0).await.expect("start failed");

    let mut a = connect(port).await;
    recv_json(&mut a).await;
    let mut b = connect(port).await;
    let id_b = recv_json(&mut b).await["id"].as_str().unwrap().to_string();
    recv_json(&mut a).await; // b joined

    b.send(Message::Close(None)).await.expect("close failed");
    drop(b);

    let left = recv_json(&mut a).await;
    assert_eq!(left["type"], "peer-left");
    assert_eq!(left["id"], id_b.as_str());

    drop(a);
    server.stop().await;
}

#[tokio::test]
async fn evicts_peers_that_miss_heartbeats() {
    // tight sweep with a full period of slack so the responsive client's
    // pong round-trips comfortably inside the timeout
    let mut server = Server::new(Config {
        port: 0,
        max_clients: 10,
        heartbeat_interval_secs: 1,
        heartbeat_timeout_secs: 2,
    });
    let port = server.start(0).await.expect("start failed");

    let mut a = connect(port).await;
    recv_json(&mut a).await;
    let mut b = connect(port).await;
    let id_b = recv_json(&mut b).await["id"].as_str().unwrap().to_string();
    recv_json(&mut a).await; // b joined

    // b stops reading: no pongs, no traffic — the sweep evicts it while the
    // still-responsive a only sees the departure
    let left = recv_json(&mut a).await;
    assert_eq!(left["type"], "peer-left");
    assert_eq!(left["id"], id_b.as_str());

    drop(a);
    drop(b);
    server.stop().await;
}

#[tokio::test]
async fn start_is_idempotent_and_stop_notifies_clients() {
    let mut server = Server::new(test_config(10));
    let port = server.start(0).await.expect("start failed");
    assert!(server.is_running());

    // second start reports the existing port instead of rebinding
    let again = server.start(0).await.expect("restart failed");
    assert_eq!(again, port);

    let mut a = connect(port).await;
    recv_json(&mut a).await;

    let stopper = tokio::spawn(async move {
        server.stop().await;
        server
    });

    let notice = recv_json(&mut a).await;
    assert_eq!(notice["type"], "server-shutdown");

    // drain until the server closes the stream
    while let Some(Ok(_)) = a.next().await {}
    drop(a);

    let mut server = stopper.await.expect("stop task panicked");
    assert!(!server.is_running());
    assert_eq!(server.client_count(), 0);

    // stopping again is a no-op
    server.stop().await;

    // the port is released and can be rebound
    let rebound = server.start(port).await.expect("rebind failed");
    assert_eq!(rebound, port);
    server.stop().await;
}
