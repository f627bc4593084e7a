//! Direct messages with delivery receipts.
//!
//! Fetching a conversation as the recipient marks pending messages
//! delivered; reading is an explicit call. Receipts never move backwards.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    auth::require_user,
    db::Database,
    error::{AppError, AppResult},
    events::{notify, ChangeEvent, ChangeKind, Table},
    models::{Message, ReceiptStatus},
    AppState,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub username: String,
    pub to: String,
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct ConversationQuery {
    pub username: String,
    pub with: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadRequest {
    pub username: String,
}

pub fn send(db: &Database, req: &SendMessageRequest) -> AppResult<Message> {
    let body = req.body.trim();
    if body.is_empty() {
        return Err(AppError::validation("message body is required"));
    }
    if req.username == req.to {
        return Err(AppError::validation("cannot message yourself"));
    }
    require_user(db, &req.username)?;
    require_user(db, &req.to)?;
    Ok(db.insert_message(&req.username, &req.to, body)?)
}

/// Returns the conversation and the ids whose receipt moved to delivered.
pub fn conversation(db: &Database, viewer: &str, other: &str) -> AppResult<(Vec<Message>, Vec<String>)> {
    require_user(db, viewer)?;
    require_user(db, other)?;
    let delivered = db.mark_delivered(viewer, other)?;
    Ok((db.get_conversation(viewer, other)?, delivered))
}

pub fn read(db: &Database, id: &str, reader: &str) -> AppResult<Message> {
    let message = db.get_message(id)?.ok_or_else(|| AppError::not_found("message", id))?;
    if message.recipient_id != reader {
        return Err(AppError::forbidden(format!("{reader} did not receive message {id}")));
    }
    if message.status.is_before(ReceiptStatus::Read) {
        db.mark_read(id, reader)?;
    }
    db.get_message(id)?.ok_or_else(|| AppError::not_found("message", id))
}

// === HTTP handlers ===

pub async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> AppResult<(StatusCode, Json<Message>)> {
    let db = state.db.lock().await;
    let message = send(&db, &req)?;
    notify(
        &state.tx,
        ChangeEvent::new(Table::Messages, ChangeKind::Insert, &message.id).by(&req.username),
    );
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Query(query): Query<ConversationQuery>,
) -> AppResult<Json<Vec<Message>>> {
    let db = state.db.lock().await;
    let (messages, delivered) = conversation(&db, &query.username, &query.with)?;
    for id in delivered {
        notify(
            &state.tx,
            ChangeEvent::new(Table::Messages, ChangeKind::Update, id).by(&query.username),
        );
    }
    Ok(Json(messages))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ReadRequest>,
) -> AppResult<Json<Message>> {
    let db = state.db.lock().await;
    let before = db.get_message(&id)?.map(|m| m.status);
    let message = read(&db, &id, &req.username)?;
    if before != Some(message.status) {
        notify(&state.tx, ChangeEvent::new(Table::Messages, ChangeKind::Update, id).by(req.username));
    }
    Ok(Json(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_user("ana", "Ana", Role::Resident).unwrap();
        db.create_user("ben", "Ben", Role::Resident).unwrap();
        db
    }

    fn msg(from: &str, to: &str, body: &str) -> SendMessageRequest {
        SendMessageRequest {
            username: from.to_string(),
            to: to.to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_sender_view_does_not_deliver() {
        let db = setup();
        send(&db, &msg("ana", "ben", "hi")).unwrap();

        let (messages, delivered) = conversation(&db, "ana", "ben").unwrap();
        assert!(delivered.is_empty());
        assert_eq!(messages[0].status, ReceiptStatus::Sent);
    }

    #[test]
    fn test_recipient_view_delivers() {
        let db = setup();
        let sent = send(&db, &msg("ana", "ben", "hi")).unwrap();

        let (messages, delivered) = conversation(&db, "ben", "ana").unwrap();
        assert_eq!(delivered, vec![sent.id.clone()]);
        assert_eq!(messages[0].status, ReceiptStatus::Delivered);

        let (_, again) = conversation(&db, "ben", "ana").unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_read_receipt() {
        let db = setup();
        let sent = send(&db, &msg("ana", "ben", "hi")).unwrap();

        assert_eq!(read(&db, &sent.id, "ana").unwrap_err().status(), StatusCode::FORBIDDEN);
        let read_msg = read(&db, &sent.id, "ben").unwrap();
        assert_eq!(read_msg.status, ReceiptStatus::Read);
        // read implies delivered
        assert!(read_msg.delivered_at.is_some());

        // a later fetch leaves it read
        let (messages, delivered) = conversation(&db, "ben", "ana").unwrap();
        assert!(delivered.is_empty());
        assert_eq!(messages[0].status, ReceiptStatus::Read);
    }

    #[test]
    fn test_send_validation() {
        let db = setup();
        assert_eq!(send(&db, &msg("ana", "ben", " ")).unwrap_err().status(), StatusCode::BAD_REQUEST);
        assert_eq!(send(&db, &msg("ana", "ana", "x")).unwrap_err().status(), StatusCode::BAD_REQUEST);
        assert_eq!(send(&db, &msg("ana", "zed", "x")).unwrap_err().status(), StatusCode::NOT_FOUND);
    }
}
