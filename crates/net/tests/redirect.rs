mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{init_tracing, wait_until, Recorder};
use tether_net::{Client, ClientConfig, Identity, Server, ServerConfig};
use tether_wire::Payload;

struct Peer {
    client: Client,
    events: Arc<Recorder>,
}

async fn connect_peer(addr: std::net::SocketAddr, name: &str, identity: &str) -> Peer {
    let client = Client::new(ClientConfig::new(addr, name).identity(Identity::new(identity)));
    let events = Arc::new(Recorder::default());
    client.listeners().register(events.clone());
    client.connect().await.unwrap();
    Peer { client, events }
}

#[tokio::test]
async fn redirect_reaches_exactly_the_matching_peers() {
    init_tracing();

    let server = Server::new(ServerConfig::new("127.0.0.1:0".parse().unwrap()));
    let addr = server.start().await.unwrap();

    let bob = connect_peer(addr, "bob", "id-bob").await;
    let carol = connect_peer(addr, "carol", "id-carol").await;
    let dave = connect_peer(addr, "dave", "id-dave").await;
    assert!(wait_until(Duration::from_secs(2), || server.clients().len() == 3).await);

    let mut payload = Payload::new();
    payload.write_text("note", "for bob only");

    // Match by display name
    assert_eq!(server.redirect("bob", &payload).await, 1);
    assert!(
        wait_until(Duration::from_secs(2), || {
            bob.events.client_messages.lock().len() == 1
        })
        .await
    );
    assert_eq!(
        bob.events.client_messages.lock()[0].text("note"),
        Some("for bob only")
    );

    // Match by stable identity
    assert_eq!(server.redirect("id-carol", &payload).await, 1);
    assert!(
        wait_until(Duration::from_secs(2), || {
            carol.events.client_messages.lock().len() == 1
        })
        .await
    );

    // No match is not an error and reaches nobody
    assert_eq!(server.redirect("nobody", &payload).await, 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(bob.events.client_messages.lock().len(), 1);
    assert_eq!(carol.events.client_messages.lock().len(), 1);
    assert_eq!(dave.events.client_messages.lock().len(), 0);

    for peer in [bob, carol, dave] {
        peer.client.close().await;
    }
    server.close().await;
}

#[tokio::test]
async fn broadcast_reaches_every_peer() {
    init_tracing();

    let server = Server::new(ServerConfig::new("127.0.0.1:0".parse().unwrap()));
    let addr = server.start().await.unwrap();

    let bob = connect_peer(addr, "bob", "id-bob").await;
    let carol = connect_peer(addr, "carol", "id-carol").await;
    assert!(wait_until(Duration::from_secs(2), || server.clients().len() == 2).await);

    let mut payload = Payload::new();
    payload.write_text("note", "to everyone");

    assert_eq!(server.broadcast(&payload).await, 2);

    for peer in [&bob, &carol] {
        assert!(
            wait_until(Duration::from_secs(2), || {
                peer.events.client_messages.lock().len() == 1
            })
            .await
        );
    }

    bob.client.close().await;
    carol.client.close().await;
    server.close().await;
}

#[tokio::test]
async fn client_messages_are_acknowledged_and_dispatched() {
    init_tracing();

    let server = Server::new(ServerConfig::new("127.0.0.1:0".parse().unwrap()));
    let server_events = Arc::new(Recorder::default());
    server.listeners().register(server_events.clone());
    let addr = server.start().await.unwrap();

    let peer = connect_peer(addr, "sender", "id-sender").await;

    let mut payload = Payload::new();
    payload.write_text("note", "upstream");
    payload.write_number("seq", 1i64);
    peer.client.send(&payload).await.unwrap();

    assert!(
        wait_until(Duration::from_secs(2), || {
            server_events.server_messages.lock().len() == 1
        })
        .await
    );
    let received = server_events.server_messages.lock()[0].clone();
    assert_eq!(received.text("note"), Some("upstream"));
    assert_eq!(received.number("seq").and_then(|n| n.as_i64()), Some(1));

    peer.client.close().await;
    server.close().await;
}
