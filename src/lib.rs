//! Barangay community server: nearby errands, a moderated bulletin board,
//! friends, direct messages and tickets to officials.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::sync::{broadcast, Mutex};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod board;
pub mod client;
pub mod config;
pub mod cron;
pub mod db;
pub mod error;
pub mod events;
pub mod friends;
pub mod geo;
pub mod location;
pub mod messages;
pub mod models;
pub mod posts;
pub mod proximity;
pub mod tasks;
pub mod tickets;

use db::Database;
use events::ChangeEvent;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub tx: broadcast::Sender<ChangeEvent>,
}

impl AppState {
    pub fn new(db: Database, event_capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(event_capacity);
        AppState {
            db: Arc::new(Mutex::new(db)),
            tx,
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // Auth
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/users/:username/role", post(auth::set_role))
        // Tasks
        .route("/api/tasks", get(tasks::list_tasks).post(tasks::create_task))
        .route("/api/tasks/:id", get(tasks::get_task).delete(tasks::delete_task))
        .route("/api/tasks/:id/accept", post(tasks::accept_task))
        .route("/api/tasks/:id/complete", post(tasks::complete_task))
        .route("/api/tasks/:id/cancel", post(tasks::cancel_task))
        // Bulletin board
        .route("/api/posts", get(posts::list_posts).post(posts::create_post))
        .route("/api/posts/:id", axum::routing::delete(posts::delete_post))
        .route("/api/posts/:id/moderate", post(posts::moderate_post))
        // Friends
        .route("/api/friends", get(friends::list_friends))
        .route(
            "/api/friends/requests",
            get(friends::list_incoming).post(friends::send_request),
        )
        .route("/api/friends/requests/:id/respond", post(friends::respond_request))
        // Messages
        .route(
            "/api/messages",
            get(messages::get_conversation).post(messages::send_message),
        )
        .route("/api/messages/:id/read", post(messages::mark_read))
        // Tickets
        .route("/api/tickets", get(tickets::list_tickets).post(tickets::open_ticket))
        .route("/api/tickets/:id/respond", post(tickets::respond_ticket))
        .route("/api/tickets/:id/status", post(tickets::update_ticket_status))
        // SSE
        .route("/api/events", get(events::sse_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
