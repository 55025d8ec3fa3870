mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{init_tracing, wait_until};
use tether_net::{Client, ClientConfig, ConnectionState, RetryPolicy};
use tether_wire::{keys, read_frame, write_frame, Payload};
use tokio::time::timeout;

/// Drives the far end of an in-memory duplex stream as a minimal server:
/// withholds the accept until the test has queued its frames, then checks
/// every queued frame comes through exactly once.
#[tokio::test]
async fn frames_sent_before_acceptance_drain_exactly_once() {
    init_tracing();

    let (near, far) = tokio::io::duplex(1 << 16);

    let client = Arc::new(Client::new(
        ClientConfig::new("127.0.0.1:49305".parse().unwrap(), "queued").retry(RetryPolicy {
            interval: Duration::from_secs(2),
            deadline: Duration::from_secs(5),
        }),
    ));

    let connect_task = {
        let client = client.clone();
        tokio::spawn(async move { client.connect_with(Box::new(near)).await })
    };

    assert!(
        wait_until(Duration::from_secs(2), || {
            client.state() == ConnectionState::AwaitingAccept
        })
        .await
    );

    // Queue three frames while the handshake is still pending
    for seq in 0..3i64 {
        let mut payload = Payload::new();
        payload.write_number("seq", seq);
        client.send(&payload).await.unwrap();
    }

    let (mut far_reader, mut far_writer) = tokio::io::split(far);

    // The first frame on the wire is the connect request
    let request = read_frame(&mut far_reader).await.unwrap();
    assert_eq!(request.text(keys::COMMAND), Some("connect"));
    assert_eq!(request.text(keys::ARGUMENT), Some("queued"));

    let mut accept = Payload::new();
    accept.write_text(keys::MAC, "server-id");
    accept.write_boolean(keys::COMMAND_ENABLED, true);
    accept.write_text(keys::COMMAND, keys::command::ACCEPT);
    write_frame(&mut far_writer, &accept).await.unwrap();

    connect_task.await.unwrap().unwrap();
    assert_eq!(client.state(), ConnectionState::Operative);

    // Every queued frame arrives exactly once, in some order
    let mut seen = Vec::new();
    while seen.len() < 3 {
        let frame = timeout(Duration::from_secs(2), read_frame(&mut far_reader))
            .await
            .expect("queued frame never arrived")
            .unwrap();
        if frame.boolean(keys::COMMAND_ENABLED) == Some(false) {
            seen.push(frame.number("seq").and_then(|n| n.as_i64()).unwrap());
        }
    }
    seen.sort_unstable();
    assert_eq!(seen, vec![0, 1, 2]);

    // Nothing else pending: no duplicates follow
    match timeout(Duration::from_millis(200), read_frame(&mut far_reader)).await {
        Err(_) => {}
        Ok(frame) => {
            let frame = frame.unwrap();
            assert_eq!(
                frame.boolean(keys::COMMAND_ENABLED),
                Some(true),
                "unexpected duplicate data frame"
            );
        }
    }

    client.close().await;
}
