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
    models::{FriendRequest, FriendStatus, User},
    AppState,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendRequestBody {
    pub username: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RespondBody {
    pub username: String,
    pub accept: bool,
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub username: String,
}

pub fn send(db: &Database, from: &str, to: &str) -> AppResult<FriendRequest> {
    if from == to {
        return Err(AppError::validation("cannot send a friend request to yourself"));
    }
    require_user(db, from)?;
    require_user(db, to)?;

    if let Some(existing) = db.find_active_friendship(from, to)? {
        let what = match existing.status {
            FriendStatus::Accepted => "already friends",
            _ => "a request is already pending",
        };
        return Err(AppError::conflict(format!("{from} and {to}: {what}")));
    }
    Ok(db.insert_friend_request(from, to)?)
}

pub fn respond(db: &Database, id: &str, username: &str, accept: bool) -> AppResult<FriendRequest> {
    let request = db
        .get_friend_request(id)?
        .ok_or_else(|| AppError::not_found("friend request", id))?;
    if request.addressee_id != username {
        return Err(AppError::forbidden(format!("request {id} is not addressed to {username}")));
    }
    if request.status != FriendStatus::Pending {
        return Err(AppError::conflict(format!("request {id} is already {}", request.status)));
    }

    let status = if accept { FriendStatus::Accepted } else { FriendStatus::Declined };
    db.respond_friend_request(id, username, status)?;
    db.get_friend_request(id)?
        .ok_or_else(|| AppError::not_found("friend request", id))
}

// === HTTP handlers ===

pub async fn send_request(
    State(state): State<AppState>,
    Json(body): Json<FriendRequestBody>,
) -> AppResult<(StatusCode, Json<FriendRequest>)> {
    let db = state.db.lock().await;
    let request = send(&db, &body.username, &body.to)?;
    notify(
        &state.tx,
        ChangeEvent::new(Table::FriendRequests, ChangeKind::Insert, &request.id).by(&body.username),
    );
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn respond_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RespondBody>,
) -> AppResult<Json<FriendRequest>> {
    let db = state.db.lock().await;
    let request = respond(&db, &id, &body.username, body.accept)?;
    tracing::info!("Friend request {} {}", id, request.status);
    notify(
        &state.tx,
        ChangeEvent::new(Table::FriendRequests, ChangeKind::Update, id).by(body.username),
    );
    Ok(Json(request))
}

pub async fn list_friends(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> AppResult<Json<Vec<User>>> {
    let db = state.db.lock().await;
    require_user(&db, &query.username)?;
    Ok(Json(db.list_friends(&query.username)?))
}

pub async fn list_incoming(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> AppResult<Json<Vec<FriendRequest>>> {
    let db = state.db.lock().await;
    require_user(&db, &query.username)?;
    Ok(Json(db.list_incoming_requests(&query.username)?))
}
