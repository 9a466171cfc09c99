use crate::runtime::RuntimeCommand;
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

pub mod handlers;
pub mod responses;

#[derive(Clone)]
pub struct ApiState {
    pub state: Arc<RwLock<AppState>>,
    pub commands: mpsc::Sender<RuntimeCommand>,
}

pub fn router(state: Arc<RwLock<AppState>>, commands: mpsc::Sender<RuntimeCommand>) -> Router {
    Router::new()
        .route("/api/health", get(handlers::get_health))
        .route("/api/spot", get(handlers::get_spot))
        .route("/api/spot/toggle", post(handlers::post_toggle))
        .route("/api/spot/reset", post(handlers::post_reset))
        .route("/api/payment/pay", post(handlers::post_pay))
        .route("/api/payment/cancel", post(handlers::post_cancel_payment))
        .route(
            "/api/history",
            get(handlers::get_history).delete(handlers::delete_history),
        )
        .with_state(ApiState { state, commands })
}
