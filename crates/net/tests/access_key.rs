mod common;

use std::time::Duration;

use common::{init_tracing, wait_until};
use tether_net::{Client, ClientConfig, ConnectionState, Error, Server, ServerConfig};

#[tokio::test]
async fn wrong_access_key_is_declined() {
    init_tracing();

    let server =
        Server::new(ServerConfig::new("127.0.0.1:0".parse().unwrap()).access_key("sesame"));
    let addr = server.start().await.unwrap();

    let client = Client::new(ClientConfig::new(addr, "guesser").access_key("password"));
    let result = client.connect().await;

    match result {
        Err(Error::Rejected(reason)) => assert!(reason.contains("access key")),
        other => panic!("expected rejection, got {:?}", other.err()),
    }
    assert!(server.clients().is_empty());

    server.close().await;
}

#[tokio::test]
async fn missing_access_key_is_declined() {
    init_tracing();

    let server =
        Server::new(ServerConfig::new("127.0.0.1:0".parse().unwrap()).access_key("sesame"));
    let addr = server.start().await.unwrap();

    let client = Client::new(ClientConfig::new(addr, "hopeful"));
    assert!(matches!(client.connect().await, Err(Error::Rejected(_))));

    server.close().await;
}

#[tokio::test]
async fn correct_access_key_is_accepted() {
    init_tracing();

    let server =
        Server::new(ServerConfig::new("127.0.0.1:0".parse().unwrap()).access_key("sesame"));
    let addr = server.start().await.unwrap();

    let client = Client::new(ClientConfig::new(addr, "keyholder").access_key("sesame"));
    client.connect().await.unwrap();

    assert_eq!(client.state(), ConnectionState::Operative);
    assert!(wait_until(Duration::from_secs(2), || server.clients().len() == 1).await);

    client.close().await;
    server.close().await;
}
