use std::sync::Arc;

use tca_rs::{server, session::SessionStore};

#[tokio::main]
async fn main() {
    env_logger::init();

    // Read port from args
    let port: u16 = std::env::args()
        .nth(1)
        .unwrap_or_else(|| String::from("5000"))
        .parse()
        .expect("Invalid port");

    let store = Arc::new(SessionStore::new());
    let session = store.get_or_create(&port.to_string());
    store.set_active(&session);

    let state = server::AppState {
        store: store.clone(),
        http: reqwest::Client::new(),
        session_key: port.to_string(),
    };

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .expect("Could not bind listener");

    println!("Listening on http://localhost:{}", port);
    println!(
        "Configure the download session at http://localhost:{}/config",
        port
    );

    axum::serve(listener, server::router(state))
        .await
        .expect("Server exited with error");
}
