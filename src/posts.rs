//! Community feed. New posts wait for a moderator before they show up.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    auth::{require_role, require_user},
    db::Database,
    error::{AppError, AppResult},
    events::{notify, ChangeEvent, ChangeKind, Table},
    models::{Post, PostStatus, Role},
    AppState,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePostRequest {
    pub username: String,
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    /// Only moderators may ask for anything other than approved posts.
    pub status: Option<PostStatus>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerateRequest {
    pub username: String,
    pub decision: PostStatus,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuthorQuery {
    pub username: String,
}

pub fn create(db: &Database, req: &CreatePostRequest) -> AppResult<Post> {
    let body = req.body.trim();
    if body.is_empty() {
        return Err(AppError::validation("post body is required"));
    }
    require_user(db, &req.username)?;
    Ok(db.insert_post(&req.username, body)?)
}

pub fn feed(db: &Database, status: PostStatus, viewer: Option<&str>) -> AppResult<Vec<Post>> {
    if status != PostStatus::Approved {
        let viewer = viewer.ok_or_else(|| AppError::forbidden("moderator required"))?;
        require_role(db, viewer, &[Role::Moderator, Role::Official])?;
    }
    Ok(db.list_posts(status)?)
}

pub fn moderate(db: &Database, id: &str, req: &ModerateRequest) -> AppResult<Post> {
    require_role(db, &req.username, &[Role::Moderator, Role::Official])?;
    let post = db.get_post(id)?.ok_or_else(|| AppError::not_found("post", id))?;

    if req.decision == PostStatus::Pending {
        return Err(AppError::validation("decision must be approved or rejected"));
    }
    if post.status == req.decision {
        return Err(AppError::conflict(format!("post {id} is already {}", post.status)));
    }

    db.moderate_post(id, &req.username, req.decision, req.note.as_deref())?;
    db.get_post(id)?.ok_or_else(|| AppError::not_found("post", id))
}

pub fn remove(db: &Database, id: &str, author: &str) -> AppResult<()> {
    let post = db.get_post(id)?.ok_or_else(|| AppError::not_found("post", id))?;
    if post.author_id != author {
        return Err(AppError::forbidden(format!("{author} did not write post {id}")));
    }
    db.delete_post(id, author)?;
    Ok(())
}

// === HTTP handlers ===

pub async fn create_post(
    State(state): State<AppState>,
    Json(req): Json<CreatePostRequest>,
) -> AppResult<(StatusCode, Json<Post>)> {
    let db = state.db.lock().await;
    let post = create(&db, &req)?;
    notify(&state.tx, ChangeEvent::new(Table::Posts, ChangeKind::Insert, &post.id).by(&req.username));
    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn list_posts(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
) -> AppResult<Json<Vec<Post>>> {
    let db = state.db.lock().await;
    let status = query.status.unwrap_or(PostStatus::Approved);
    Ok(Json(feed(&db, status, query.username.as_deref())?))
}

pub async fn moderate_post(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ModerateRequest>,
) -> AppResult<Json<Post>> {
    let db = state.db.lock().await;
    let post = moderate(&db, &id, &req)?;
    tracing::info!("Post {} {} by {}", id, post.status, req.username);
    notify(&state.tx, ChangeEvent::new(Table::Posts, ChangeKind::Update, id).by(req.username));
    Ok(Json(post))
}

pub async fn delete_post(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<AuthorQuery>,
) -> AppResult<StatusCode> {
    let db = state.db.lock().await;
    remove(&db, &id, &query.username)?;
    notify(&state.tx, ChangeEvent::new(Table::Posts, ChangeKind::Delete, id).by(query.username));
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_user("lito", "Lito", Role::Resident).unwrap();
        db.create_user("mod", "Moderator", Role::Moderator).unwrap();
        db
    }

    fn post_req(body: &str) -> CreatePostRequest {
        CreatePostRequest {
            username: "lito".to_string(),
            body: body.to_string(),
        }
    }

    fn decision(username: &str, decision: PostStatus) -> ModerateRequest {
        ModerateRequest {
            username: username.to_string(),
            decision,
            note: None,
        }
    }

    #[test]
    fn test_pending_posts_hidden_from_feed() {
        let db = setup();
        let post = create(&db, &post_req("Lost cat near the chapel")).unwrap();
        assert!(feed(&db, PostStatus::Approved, None).unwrap().is_empty());

        let pending = feed(&db, PostStatus::Pending, Some("mod")).unwrap();
        assert_eq!(pending[0].id, post.id);

        moderate(&db, &post.id, &decision("mod", PostStatus::Approved)).unwrap();
        assert_eq!(feed(&db, PostStatus::Approved, None).unwrap().len(), 1);
    }

    #[test]
    fn test_residents_cannot_moderate() {
        let db = setup();
        let post = create(&db, &post_req("hello")).unwrap();
        let err = moderate(&db, &post.id, &decision("lito", PostStatus::Approved)).unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        let err = feed(&db, PostStatus::Pending, Some("lito")).unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        let err = feed(&db, PostStatus::Pending, None).unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_takedown_and_repeat_decision() {
        let db = setup();
        let post = create(&db, &post_req("hello")).unwrap();
        moderate(&db, &post.id, &decision("mod", PostStatus::Approved)).unwrap();

        let err = moderate(&db, &post.id, &decision("mod", PostStatus::Approved)).unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        let err = moderate(&db, &post.id, &decision("mod", PostStatus::Pending)).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let taken_down = moderate(&db, &post.id, &decision("mod", PostStatus::Rejected)).unwrap();
        assert_eq!(taken_down.status, PostStatus::Rejected);
    }

    #[test]
    fn test_empty_body_rejected() {
        let db = setup();
        let err = create(&db, &post_req("  ")).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_only_author_removes() {
        let db = setup();
        let post = create(&db, &post_req("hello")).unwrap();
        let err = remove(&db, &post.id, "mod").unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        remove(&db, &post.id, "lito").unwrap();
        assert!(db.get_post(&post.id).unwrap().is_none());
    }
}
