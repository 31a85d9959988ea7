#![allow(dead_code)]

use std::{future, net::SocketAddr, sync::Arc, time::Duration};

use archway_gateway::{proxy::UpstreamClient, serve, state::AppState};
use axum::Router;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Starts a gateway on an ephemeral port. The returned state is the one the
/// server uses, so tests can watch the registry directly.
pub async fn spawn_gateway(ai_service_url: &str) -> (SocketAddr, Arc<AppState>) {
    let upstream =
        UpstreamClient::new(ai_service_url, Duration::from_secs(5)).expect("upstream client");
    let state = Arc::new(AppState::new(upstream, 64, None));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind gateway");
    let addr = listener.local_addr().expect("gateway addr");

    let server_state = Arc::clone(&state);
    tokio::spawn(async move {
        let _ = serve(listener, server_state, future::pending()).await;
    });

    (addr, state)
}

/// Serves `router` on an ephemeral port and returns its base URL.
pub async fn spawn_upstream(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind upstream");
    let addr = listener.local_addr().expect("upstream addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}

pub async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("websocket connect");
    client
}

/// Upgrades complete before the server registers the socket, so tests wait
/// for the registry to catch up before sending.
pub async fn wait_for_connections(state: &AppState, expected: usize) {
    for _ in 0..300 {
        if state.registry().len() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {expected} registered connections, found {}",
        state.registry().len()
    );
}
