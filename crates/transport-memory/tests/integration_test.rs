//! Integration tests for memory channels

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use exthost_transport::{Channel, TransportError};
use exthost_transport_memory::MemoryChannel;
use tokio::time::timeout;
use tracing::info;

#[tokio::test]
async fn test_memory_echo_peer() {
    let _ = tracing_subscriber::fmt::try_init();

    let (client, server) = MemoryChannel::pair();

    // Start echo peer
    let server_task = tokio::spawn(async move {
        loop {
            match server.recv().await {
                Ok(data) => {
                    info!("Peer echoing {} bytes", data.len());
                    if let Err(e) = server.send(data).await {
                        info!("Peer send error: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    info!("Peer receive error: {}", e);
                    break;
                }
            }
        }
    });

    let test_messages = vec![
        Bytes::from("Hello, Memory!"),
        Bytes::from("Test message 2"),
        Bytes::from("🦀 Rust is awesome!"),
    ];

    for msg in test_messages {
        client.send(msg.clone()).await.expect("Failed to send");

        let response = timeout(Duration::from_secs(1), client.recv())
            .await
            .expect("Timeout")
            .expect("Failed to receive");

        assert_eq!(msg, response);
    }

    // Closing our end stops the peer loop
    client.close().await.expect("Failed to close");
    timeout(Duration::from_secs(1), server_task)
        .await
        .expect("Peer did not stop")
        .expect("Peer panicked");
}

#[tokio::test]
async fn test_concurrent_senders_keep_per_sender_order() {
    let _ = tracing_subscriber::fmt::try_init();

    let (client, server) = MemoryChannel::pair();
    let client = Arc::new(client);

    let mut tasks = Vec::new();
    for sender in 0u8..4 {
        let client = Arc::clone(&client);
        tasks.push(tokio::spawn(async move {
            for seq in 0u8..25 {
                client
                    .send(Bytes::from(vec![sender, seq]))
                    .await
                    .expect("Failed to send");
            }
        }));
    }

    let mut last_seen = [None::<u8>; 4];
    for _ in 0..100 {
        let data = timeout(Duration::from_secs(1), server.recv())
            .await
            .expect("Timeout")
            .expect("Failed to receive");
        let (sender, seq) = (data[0] as usize, data[1]);

        if let Some(previous) = last_seen[sender] {
            assert!(seq > previous, "sender {sender} out of order");
        }
        last_seen[sender] = Some(seq);
    }

    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(last_seen, [Some(24); 4]);
}

#[tokio::test]
async fn test_close_wakes_blocked_receiver() {
    let (left, right) = MemoryChannel::pair();

    let waiter = tokio::spawn(async move { right.recv().await });

    tokio::time::sleep(Duration::from_millis(10)).await;
    left.close().await.unwrap();

    let result = timeout(Duration::from_secs(1), waiter)
        .await
        .expect("Receiver was not woken")
        .unwrap();
    assert!(matches!(result, Err(TransportError::Closed)));
}
