mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{init_tracing, wait_until, Recorder};
use tether_net::{
    Client, ClientConfig, ConnectionState, DisconnectReason, Error, Identity, Server, ServerConfig,
};

#[tokio::test]
async fn banned_identity_is_declined_without_registration() {
    init_tracing();

    let server = Server::new(ServerConfig::new("127.0.0.1:0".parse().unwrap()));
    let server_events = Arc::new(Recorder::default());
    server.listeners().register(server_events.clone());
    let addr = server.start().await.unwrap();

    let banned = Identity::new("AA:BB:CC:DD:EE:FF");
    server.ban([banned.clone()]).await;

    let client = Client::new(ClientConfig::new(addr, "mallory").identity(banned));
    let result = client.connect().await;

    assert!(matches!(result, Err(Error::Rejected(_))));
    assert_eq!(client.state(), ConnectionState::Disconnected);

    // The registry never saw the peer and no connect event fired
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(server.clients().is_empty());
    assert_eq!(server_events.client_connects.load(Ordering::SeqCst), 0);

    server.close().await;
}

#[tokio::test]
async fn unban_allows_reconnection() {
    init_tracing();

    let server = Server::new(ServerConfig::new("127.0.0.1:0".parse().unwrap()));
    let addr = server.start().await.unwrap();

    let identity = Identity::new("11:22:33:44:55:66");
    server.ban([identity.clone()]).await;

    let client = Client::new(ClientConfig::new(addr, "redeemed").identity(identity.clone()));
    assert!(client.connect().await.is_err());

    server.unban([identity]);
    client.connect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Operative);

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn banning_a_connected_client_expels_it() {
    init_tracing();

    let server = Server::new(ServerConfig::new("127.0.0.1:0".parse().unwrap()));
    let server_events = Arc::new(Recorder::default());
    server.listeners().register(server_events.clone());
    let addr = server.start().await.unwrap();

    let identity = Identity::new("DE:AD:BE:EF:00:01");
    let client = Client::new(ClientConfig::new(addr, "target").identity(identity.clone()));
    let client_events = Arc::new(Recorder::default());
    client.listeners().register(client_events.clone());
    client.connect().await.unwrap();

    assert!(wait_until(Duration::from_secs(2), || server.clients().len() == 1).await);

    server.ban([identity.clone()]).await;

    assert!(server.is_banned(&identity));
    assert!(server.clients().is_empty());
    assert!(
        wait_until(Duration::from_secs(2), || {
            server_events.client_disconnects.load(Ordering::SeqCst) == 1
        })
        .await
    );
    assert_eq!(
        server_events.last_client_disconnect.lock().as_ref().map(|d| d.0),
        Some(DisconnectReason::Banned)
    );

    // The client observes the server-initiated disconnect
    assert!(
        wait_until(Duration::from_secs(2), || {
            client_events.server_disconnects.load(Ordering::SeqCst) == 1
        })
        .await
    );
    assert_eq!(
        client_events.last_server_disconnect.lock().as_ref().map(|d| d.0),
        Some(DisconnectReason::KilledByServer)
    );

    server.close().await;
}

#[tokio::test]
async fn kick_expels_without_banning() {
    init_tracing();

    let server = Server::new(ServerConfig::new("127.0.0.1:0".parse().unwrap()));
    let addr = server.start().await.unwrap();

    let identity = Identity::new("CA:FE:CA:FE:00:02");
    let client = Client::new(ClientConfig::new(addr, "loud").identity(identity.clone()));
    client.connect().await.unwrap();
    assert!(wait_until(Duration::from_secs(2), || server.clients().len() == 1).await);

    server.kick([identity.clone()]).await;
    assert!(server.clients().is_empty());
    assert!(!server.is_banned(&identity));

    // Kicked, not banned: the client may come back
    assert!(
        wait_until(Duration::from_secs(2), || {
            client.state() == ConnectionState::Disconnected
        })
        .await
    );
    client.connect().await.unwrap();
    assert!(wait_until(Duration::from_secs(2), || server.clients().len() == 1).await);

    client.close().await;
    server.close().await;
}
