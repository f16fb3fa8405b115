pub mod protocol;
pub mod rooms;

use std::sync::{Arc, Mutex};

use axum::extract::FromRef;

use rooms::Registry;

/// The one registry for the process, built in `main` and shared with every
/// connection task. Locked per event; nothing awaits while holding it, so
/// registry mutations stay atomic with respect to each other.
pub type SharedRegistry = Arc<Mutex<Registry>>;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub registry: SharedRegistry,
}
