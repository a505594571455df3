//! End-to-end tests for the replication transport.
//!
//! Each test binds a real server on port 0 and drives it either with raw
//! `tokio-tungstenite` connections or with [`ReplicationClient`]s attached
//! to their own buses, the way separate node processes would be.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::sync::Arc;
use std::time::Duration;

use chatbridge_core::{Bus, InstanceBook, InstanceHandle};
use chatbridge_socket::handshake::{AUTHENTICATION, INSTANCES, SOCKET_ID};
use chatbridge_socket::{
    ClientConfig, ConnectionState, ReplicationClient, ServerConfig, ServerHandle, spawn_client,
    spawn_server,
};
use chatbridge_types::{
    BusEvent, Channel, InstanceIdentity, InstanceType, MinecraftChatEvent, Origin, SocketId,
};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

const SECRET: &str = "S1";
const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn local_server() -> ServerConfig {
    ServerConfig {
        host: String::from("127.0.0.1"),
        port: 0,
    }
}

async fn server(bus: &Arc<Bus>) -> ServerHandle {
    spawn_server(&local_server(), Arc::clone(bus), SECRET)
        .await
        .unwrap()
}

async fn raw_connect(
    handle: &ServerHandle,
    key: &str,
    instances: &str,
    socket_id: i64,
) -> Result<Socket, WsError> {
    let mut request = format!("ws://{}/", handle.local_addr())
        .into_client_request()
        .unwrap();
    let headers = request.headers_mut();
    headers.insert(AUTHENTICATION, HeaderValue::from_str(key).unwrap());
    headers.insert(INSTANCES, HeaderValue::from_str(instances).unwrap());
    headers.insert(SOCKET_ID, HeaderValue::from(socket_id));
    tokio_tungstenite::connect_async(request)
        .await
        .map(|(socket, _)| socket)
}

async fn next_text(socket: &mut Socket) -> Value {
    loop {
        let message = tokio::time::timeout(WAIT, socket.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Reads until the server closes, returning the text frames seen first.
async fn until_closed(socket: &mut Socket) -> Vec<Value> {
    tokio::time::timeout(WAIT, async {
        let mut frames = Vec::new();
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    frames.push(serde_json::from_str(text.as_str()).unwrap());
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => return frames,
                Some(Ok(_)) => {}
            }
        }
    })
    .await
    .unwrap()
}

/// Collects every `minecraft-chat` event a bus sees, with its origin.
fn chat_tap(bus: &Bus) -> mpsc::UnboundedReceiver<(Origin, String)> {
    let (tx, rx) = mpsc::unbounded_channel();
    bus.subscribe(Channel::MinecraftChat, move |event| {
        if let BusEvent::MinecraftChat(chat) = event {
            tx.send((chat.meta.origin(), chat.message.clone())).ok();
        }
        Ok(())
    });
    rx
}

fn say(handle: &InstanceHandle, bus: &Bus, message: &str) {
    bus.publish(&BusEvent::from(MinecraftChatEvent {
        meta: handle.event_meta(),
        message: message.to_owned(),
    }))
    .unwrap();
}

struct Node {
    bus: Arc<Bus>,
    guild: Arc<InstanceHandle>,
    client: Arc<ReplicationClient>,
    state: watch::Receiver<ConnectionState>,
}

fn client_node(handle: &ServerHandle, guild: &str) -> Node {
    let bus = Arc::new(Bus::new());
    let instances = Arc::new(InstanceBook::new());
    instances.register(InstanceIdentity::new("node", InstanceType::Main));
    let guild = instances.register(InstanceIdentity::new(guild, InstanceType::Minecraft));
    let (client, _task) = spawn_client(
        ClientConfig {
            uri: format!("ws://{}/", handle.local_addr()),
            key: String::from(SECRET),
            reconnect_delay: Duration::from_millis(100),
        },
        Arc::clone(&bus),
        instances,
    );
    let state = client.subscribe_state();
    Node {
        bus,
        guild,
        client,
        state,
    }
}

async fn connected(node: &mut Node) -> SocketId {
    let state = tokio::time::timeout(
        WAIT,
        node.state
            .wait_for(|state| matches!(state, ConnectionState::Connected(_))),
    )
    .await
    .unwrap()
    .unwrap();
    match *state {
        ConnectionState::Connected(id) => Some(id),
        ConnectionState::Disconnected => None,
    }
    .unwrap()
}

async fn expect(rx: &mut mpsc::UnboundedReceiver<(Origin, String)>) -> (Origin, String) {
    tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

async fn expect_silence(rx: &mut mpsc::UnboundedReceiver<(Origin, String)>) {
    tokio::time::sleep(QUIET).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn matching_secret_gets_connection_info_first() {
    let bus = Arc::new(Bus::new());
    let handle = server(&bus).await;

    let mut socket = raw_connect(&handle, "S1", "[]", -1).await.unwrap();
    let first = next_text(&mut socket).await;
    assert_eq!(
        first,
        serde_json::json!({"name": "connection-info", "data": {"socketId": 0}})
    );
}

#[tokio::test]
async fn wrong_secret_is_rejected_with_401() {
    let bus = Arc::new(Bus::new());
    let handle = server(&bus).await;

    let error = raw_connect(&handle, "S2", "[]", -1).await.unwrap_err();
    assert!(matches!(
        error,
        WsError::Http(response) if response.status() == StatusCode::UNAUTHORIZED
    ));
    assert!(handle.sessions().is_empty());
}

#[tokio::test]
async fn malformed_handshake_is_rejected_with_409() {
    let bus = Arc::new(Bus::new());
    let handle = server(&bus).await;

    let error = raw_connect(&handle, "S1", "not json", -1).await.unwrap_err();
    assert!(matches!(
        error,
        WsError::Http(response) if response.status() == StatusCode::CONFLICT
    ));
}

#[tokio::test]
async fn socket_id_survives_a_reconnect() {
    let bus = Arc::new(Bus::new());
    let handle = server(&bus).await;
    let guild = r#"[{"instanceName":"guild-a","instanceType":"minecraft"}]"#;

    let mut socket = raw_connect(&handle, SECRET, guild, -1).await.unwrap();
    assert_eq!(next_text(&mut socket).await["data"]["socketId"], 0);
    socket.close(None).await.unwrap();
    drop(socket);

    let mut socket = raw_connect(&handle, SECRET, guild, 0).await.unwrap();
    assert_eq!(next_text(&mut socket).await["data"]["socketId"], 0);

    let mut other = raw_connect(&handle, SECRET, "[]", -1).await.unwrap();
    assert_eq!(next_text(&mut other).await["data"]["socketId"], 1);
}

#[tokio::test]
async fn internal_event_from_the_wire_closes_the_connection() {
    let bus = Arc::new(Bus::new());
    let mut tap = chat_tap(&bus);
    let handle = server(&bus).await;

    let mut socket = raw_connect(&handle, SECRET, "[]", -1).await.unwrap();
    next_text(&mut socket).await;

    let leak = serde_json::json!({
        "name": "minecraft-chat",
        "data": {
            "eventId": "main:node:0",
            "instanceName": "node",
            "instanceType": "main",
            "createdAt": "2024-01-01T00:00:00Z",
            "message": "leak"
        }
    });
    socket
        .send(Message::Text(leak.to_string().into()))
        .await
        .unwrap();

    assert_eq!(until_closed(&mut socket).await, Vec::<Value>::new());
    assert!(tap.try_recv().is_err());
}

#[tokio::test]
async fn events_replicate_without_loops_across_a_reconnect() {
    let hub_bus = Arc::new(Bus::new());
    let mut hub_tap = chat_tap(&hub_bus);
    let handle = server(&hub_bus).await;

    let mut a = client_node(&handle, "guild-a");
    let mut b = client_node(&handle, "guild-b");
    let mut a_tap = chat_tap(&a.bus);
    let mut b_tap = chat_tap(&b.bus);
    let a_id = connected(&mut a).await;
    connected(&mut b).await;

    // Client to hub and to the other client, never back to the sender.
    say(&a.guild, &a.bus, "one");
    assert_eq!(expect(&mut a_tap).await, (Origin::Local, String::from("one")));
    assert_eq!(expect(&mut hub_tap).await, (Origin::Remote, String::from("one")));
    assert_eq!(expect(&mut b_tap).await, (Origin::Remote, String::from("one")));
    expect_silence(&mut a_tap).await;
    expect_silence(&mut hub_tap).await;
    expect_silence(&mut b_tap).await;

    // Drop a's link; it reconnects with the same id.
    assert!(handle.disconnect(a_id));
    tokio::time::timeout(
        WAIT,
        a.state
            .wait_for(|state| *state == ConnectionState::Disconnected),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(connected(&mut a).await, a_id);
    assert_eq!(a.client.last_socket_id(), Some(a_id));

    // Hub to both clients, exactly once each.
    let hub_guild = InstanceHandle::new(InstanceIdentity::new("hub", InstanceType::Discord));
    say(&hub_guild, &hub_bus, "two");
    assert_eq!(expect(&mut hub_tap).await, (Origin::Local, String::from("two")));
    assert_eq!(expect(&mut a_tap).await, (Origin::Remote, String::from("two")));
    assert_eq!(expect(&mut b_tap).await, (Origin::Remote, String::from("two")));
    expect_silence(&mut a_tap).await;
    expect_silence(&mut hub_tap).await;
    expect_silence(&mut b_tap).await;
}

#[tokio::test]
async fn reconnecting_client_replays_instance_state() {
    let hub_bus = Arc::new(Bus::new());
    let (tx, mut announcements) = mpsc::unbounded_channel();
    hub_bus.subscribe(Channel::InstanceAnnouncement, move |event| {
        tx.send(event.meta().instance_name.clone()).ok();
        Ok(())
    });
    let handle = server(&hub_bus).await;

    let mut a = client_node(&handle, "guild-a");
    let a_id = connected(&mut a).await;
    let first = tokio::time::timeout(WAIT, announcements.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, "guild-a");

    handle.disconnect(a_id);
    let again = tokio::time::timeout(WAIT, announcements.recv())
        .await
        .unwrap()
        .unwrap();
    // The internal main instance is never announced.
    assert_eq!(again, "guild-a");
}

#[tokio::test]
async fn shutdown_closes_peers_and_stops_forwarding() {
    let bus = Arc::new(Bus::new());
    let handle = server(&bus).await;
    let mut socket = raw_connect(&handle, SECRET, "[]", -1).await.unwrap();
    next_text(&mut socket).await;
    assert_eq!(bus.wildcard_count(), 1);

    handle.shutdown();
    assert_eq!(bus.wildcard_count(), 0);

    let hub = InstanceHandle::new(InstanceIdentity::new("hub", InstanceType::Discord));
    say(&hub, &bus, "after shutdown");
    assert_eq!(until_closed(&mut socket).await, Vec::<Value>::new());
}
