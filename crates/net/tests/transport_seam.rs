mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{init_tracing, wait_until, Recorder};
use tether_net::{Client, ClientConfig, ConnectionState, Server, ServerConfig};
use tether_wire::Payload;

/// Both engines run over externally established duplex streams, the way a
/// caller plugs in a TLS session: the server never binds a socket, the
/// client never dials one.
#[tokio::test]
async fn engines_run_over_externally_supplied_streams() {
    init_tracing();

    let peer_addr: std::net::SocketAddr = "127.0.0.1:55001".parse().unwrap();

    let server = Server::new(ServerConfig::new("127.0.0.1:0".parse().unwrap()));
    let server_events = Arc::new(Recorder::default());
    server.listeners().register(server_events.clone());

    let (near, far) = tokio::io::duplex(1 << 16);
    server.serve_connection(Box::new(far), peer_addr);

    let client = Client::new(ClientConfig::new(peer_addr, "wrapped"));
    let client_events = Arc::new(Recorder::default());
    client.listeners().register(client_events.clone());

    client.connect_with(Box::new(near)).await.unwrap();
    assert_eq!(client.state(), ConnectionState::Operative);
    assert!(
        wait_until(Duration::from_secs(2), || {
            server.client_named("wrapped").is_some()
        })
        .await
    );

    // Upstream
    let mut upstream = Payload::new();
    upstream.write_text("direction", "up");
    client.send(&upstream).await.unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || {
            server_events.server_messages.lock().len() == 1
        })
        .await
    );

    // Downstream
    let mut downstream = Payload::new();
    downstream.write_text("direction", "down");
    assert_eq!(server.broadcast(&downstream).await, 1);
    assert!(
        wait_until(Duration::from_secs(2), || {
            client_events.client_messages.lock().len() == 1
        })
        .await
    );
    assert_eq!(
        client_events.client_messages.lock()[0].text("direction"),
        Some("down")
    );

    client.close().await;
    server.close().await;
}
