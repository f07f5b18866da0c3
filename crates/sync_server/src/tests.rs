#[cfg(test)]
mod tests {
    use crate::*;
    use futures::{SinkExt, StreamExt};
    use std::sync::Arc;
    use std::time::Duration;
    use sync_core::ShutdownState;
    use tokio_tungstenite::{connect_async, tungstenite::Message};

    fn free_port_config() -> ServerConfig {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").expect("probe listener");
        let bind_address = probe.local_addr().expect("probe address");
        drop(probe);
        ServerConfig {
            bind_address,
            ..ServerConfig::default()
        }
    }

    async fn next_event(
        socket: &mut tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    ) -> serde_json::Value {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
                .await
                .expect("frame before timeout")
                .expect("open socket")
                .expect("valid frame");
            if let Message::Text(text) = frame {
                return serde_json::from_str(&text).expect("json frame");
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_core_server_creation() {
        let server = create_server();
        assert_eq!(server.config().sync.tick_interval_ms, 50);
        assert_eq!(server.connection_manager().connection_count().await, 0);
        assert_eq!(server.service().inspect(|m| m.registry().len()).await, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_websocket_round_trip_and_shutdown() {
        let config = free_port_config();
        let url = format!("ws://{}", config.bind_address);
        let server = Arc::new(create_server_with_config(config));
        let shutdown = ShutdownState::new();

        let running = {
            let server = server.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { server.start_with_shutdown_state(shutdown).await })
        };

        let mut socket = None;
        for _ in 0..50 {
            if let Ok((ws, _)) = connect_async(url.as_str()).await {
                socket = Some(ws);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let mut socket = socket.expect("server accepted the connection");

        socket
            .send(Message::Text(r#"{"event":"ping","data":{}}"#.into()))
            .await
            .expect("send ping");
        let pong = next_event(&mut socket).await;
        assert_eq!(pong["event"], "pong");
        assert!(pong["data"]["timestamp"].as_u64().is_some());

        let create = r#"{"event":"create_lobby","data":{"character":{"id":3,"name":"Kit","classType":"warrior"}}}"#;
        socket.send(Message::Text(create.into())).await.expect("send create");
        let created = next_event(&mut socket).await;
        assert_eq!(created["event"], "lobby_created");
        assert_eq!(created["data"]["players"][0]["characterId"], 3);
        assert_eq!(created["data"]["players"][0]["isHost"], true);

        shutdown.initiate_shutdown();
        let result = tokio::time::timeout(Duration::from_secs(10), running)
            .await
            .expect("server stopped in time")
            .expect("server task");
        assert!(result.is_ok());
        assert!(shutdown.is_shutdown_complete());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_does_not_wait_out_the_persistence_timeout() {
        let server = Arc::new(create_server_with_config(free_port_config()));
        let shutdown = ShutdownState::new();
        let running = {
            let server = server.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { server.start_with_shutdown_state(shutdown).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        shutdown.initiate_shutdown();
        let result = tokio::time::timeout(Duration::from_millis(1500), running)
            .await
            .expect("server stopped before the persistence timeout")
            .expect("server task");
        assert!(result.is_ok());
        assert!(server.service().inspect(|m| m.is_closed()).await);
    }
}
