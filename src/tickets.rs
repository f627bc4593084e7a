//! Tickets from residents to barangay officials.

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
    models::{Role, Ticket, TicketStatus},
    AppState,
};

const DEFAULT_CATEGORY: &str = "general";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenTicketRequest {
    pub username: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TicketQuery {
    pub username: String,
    pub status: Option<TicketStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RespondTicketRequest {
    pub username: String,
    pub response: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketStatusRequest {
    pub username: String,
    pub status: TicketStatus,
}

pub fn open(db: &Database, req: &OpenTicketRequest) -> AppResult<Ticket> {
    let subject = req.subject.trim();
    let body = req.body.trim();
    if subject.is_empty() || body.is_empty() {
        return Err(AppError::validation("subject and body are required"));
    }
    let category = req
        .category
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_CATEGORY);

    require_user(db, &req.username)?;
    Ok(db.insert_ticket(&req.username, subject, body, category)?)
}

/// Officials see every ticket; everyone else sees their own.
pub fn list(db: &Database, viewer: &str, status: Option<TicketStatus>) -> AppResult<Vec<Ticket>> {
    let user = require_user(db, viewer)?;
    if user.role == Role::Official {
        return Ok(db.list_tickets(status)?);
    }
    let mine = db.list_tickets_by_reporter(viewer)?;
    Ok(match status {
        Some(s) => mine.into_iter().filter(|t| t.status == s).collect(),
        None => mine,
    })
}

pub fn respond(db: &Database, id: &str, req: &RespondTicketRequest) -> AppResult<Ticket> {
    require_role(db, &req.username, &[Role::Official])?;
    let response = req.response.trim();
    if response.is_empty() {
        return Err(AppError::validation("response is required"));
    }
    let ticket = db.get_ticket(id)?.ok_or_else(|| AppError::not_found("ticket", id))?;
    if db.respond_ticket(id, &req.username, response)? == 0 {
        return Err(AppError::conflict(format!("ticket {id} is already {}", ticket.status)));
    }
    db.get_ticket(id)?.ok_or_else(|| AppError::not_found("ticket", id))
}

/// Officials may resolve or close; the reporter may only close.
pub fn set_status(db: &Database, id: &str, req: &TicketStatusRequest) -> AppResult<Ticket> {
    let user = require_user(db, &req.username)?;
    let ticket = db.get_ticket(id)?.ok_or_else(|| AppError::not_found("ticket", id))?;

    let allowed = match req.status {
        TicketStatus::Resolved => user.role == Role::Official,
        TicketStatus::Closed => user.role == Role::Official || ticket.reporter_id == user.username,
        TicketStatus::Open | TicketStatus::InProgress => {
            return Err(AppError::validation("status must be resolved or closed"));
        }
    };
    if !allowed {
        return Err(AppError::forbidden(format!(
            "{} may not mark ticket {id} {}",
            req.username, req.status
        )));
    }
    if ticket.status == req.status || db.set_ticket_status(id, req.status)? == 0 {
        return Err(AppError::conflict(format!("ticket {id} is already {}", ticket.status)));
    }
    db.get_ticket(id)?.ok_or_else(|| AppError::not_found("ticket", id))
}

// === HTTP handlers ===

pub async fn open_ticket(
    State(state): State<AppState>,
    Json(req): Json<OpenTicketRequest>,
) -> AppResult<(StatusCode, Json<Ticket>)> {
    let db = state.db.lock().await;
    let ticket = open(&db, &req)?;
    tracing::info!("Ticket {} opened by {} ({})", ticket.id, req.username, ticket.category);
    notify(&state.tx, ChangeEvent::new(Table::Tickets, ChangeKind::Insert, &ticket.id).by(&req.username));
    Ok((StatusCode::CREATED, Json(ticket)))
}

pub async fn list_tickets(
    State(state): State<AppState>,
    Query(query): Query<TicketQuery>,
) -> AppResult<Json<Vec<Ticket>>> {
    let db = state.db.lock().await;
    Ok(Json(list(&db, &query.username, query.status)?))
}

pub async fn respond_ticket(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RespondTicketRequest>,
) -> AppResult<Json<Ticket>> {
    let db = state.db.lock().await;
    let ticket = respond(&db, &id, &req)?;
    notify(&state.tx, ChangeEvent::new(Table::Tickets, ChangeKind::Update, id).by(req.username));
    Ok(Json(ticket))
}

pub async fn update_ticket_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<TicketStatusRequest>,
) -> AppResult<Json<Ticket>> {
    let db = state.db.lock().await;
    let ticket = set_status(&db, &id, &req)?;
    tracing::info!("Ticket {} marked {} by {}", id, ticket.status, req.username);
    notify(&state.tx, ChangeEvent::new(Table::Tickets, ChangeKind::Update, id).by(req.username));
    Ok(Json(ticket))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_user("rosa", "Rosa", Role::Resident).unwrap();
        db.create_user("tomas", "Tomas", Role::Resident).unwrap();
        db.create_user("kap", "Kapitan", Role::Official).unwrap();
        db
    }

    fn ticket_req(username: &str, subject: &str) -> OpenTicketRequest {
        OpenTicketRequest {
            username: username.to_string(),
            subject: subject.to_string(),
            body: "Please look into this".to_string(),
            category: None,
        }
    }

    fn status_req(username: &str, status: TicketStatus) -> TicketStatusRequest {
        TicketStatusRequest {
            username: username.to_string(),
            status,
        }
    }

    #[test]
    fn test_open_defaults_category() {
        let db = setup();
        let t = open(&db, &ticket_req("rosa", "Flooding")).unwrap();
        assert_eq!(t.category, DEFAULT_CATEGORY);
        assert_eq!(t.status, TicketStatus::Open);
    }

    #[test]
    fn test_visibility() {
        let db = setup();
        open(&db, &ticket_req("rosa", "Flooding")).unwrap();
        open(&db, &ticket_req("tomas", "Noise")).unwrap();

        assert_eq!(list(&db, "rosa", None).unwrap().len(), 1);
        assert_eq!(list(&db, "kap", None).unwrap().len(), 2);
        assert_eq!(list(&db, "kap", Some(TicketStatus::Closed)).unwrap().len(), 0);
    }

    #[test]
    fn test_only_officials_respond() {
        let db = setup();
        let t = open(&db, &ticket_req("rosa", "Flooding")).unwrap();
        let reply = RespondTicketRequest {
            username: "tomas".to_string(),
            response: "on it".to_string(),
        };
        assert_eq!(respond(&db, &t.id, &reply).unwrap_err().status(), StatusCode::FORBIDDEN);

        let reply = RespondTicketRequest {
            username: "kap".to_string(),
            response: "Team sent".to_string(),
        };
        let t = respond(&db, &t.id, &reply).unwrap();
        assert_eq!(t.status, TicketStatus::InProgress);
        assert_eq!(t.response.as_deref(), Some("Team sent"));
    }

    #[test]
    fn test_status_permissions() {
        let db = setup();
        let t = open(&db, &ticket_req("rosa", "Flooding")).unwrap();

        let err = set_status(&db, &t.id, &status_req("rosa", TicketStatus::Resolved)).unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        let err = set_status(&db, &t.id, &status_req("tomas", TicketStatus::Closed)).unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        let err = set_status(&db, &t.id, &status_req("kap", TicketStatus::Open)).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let resolved = set_status(&db, &t.id, &status_req("kap", TicketStatus::Resolved)).unwrap();
        assert_eq!(resolved.status, TicketStatus::Resolved);
        let closed = set_status(&db, &t.id, &status_req("rosa", TicketStatus::Closed)).unwrap();
        assert_eq!(closed.status, TicketStatus::Closed);

        let err = set_status(&db, &t.id, &status_req("kap", TicketStatus::Resolved)).unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }
}
