use std::sync::{Arc, Mutex};

use axum::Router;
use roomcast::{AppState, rooms};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let port = dotenv::var("PORT").unwrap_or_else(|_| "8080".to_owned());

    let app_state = AppState {
        registry: Arc::new(Mutex::new(rooms::Registry::new())),
    };

    let app = Router::new()
        .merge(rooms::router())
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
