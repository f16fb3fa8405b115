pub mod msg;
pub mod registry;
mod ws;

use axum::{Router, routing::get};

use crate::AppState;

pub use msg::handle_msg;
pub use registry::{ConnHandle, ConnId, Participant, Registry, RegistryError, RejoinOutcome};

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws::relay_ws))
}
