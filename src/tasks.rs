//! Task directory: validation, lifecycle transitions and HTTP handlers.

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
    geo::Coordinate,
    models::{NewTask, Task},
    proximity::filter_nearby,
    AppState,
};

/// Address label stamped on tasks created from the creator's position.
pub const CURRENT_LOCATION_LABEL: &str = "My current location";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub username: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub payment_amount: Option<f64>,
    #[serde(default)]
    pub location_lat: Option<f64>,
    #[serde(default)]
    pub location_lng: Option<f64>,
    #[serde(default)]
    pub location_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorRequest {
    pub username: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListTasksQuery {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

impl ListTasksQuery {
    pub fn viewer(&self) -> AppResult<Option<Coordinate>> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Coordinate::new(lat, lng)
                .map(Some)
                .map_err(|e| AppError::validation(e.to_string())),
            (None, None) => Ok(None),
            _ => Err(AppError::validation("lat and lng must be given together")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Accept,
    Complete,
    Cancel,
    Delete,
}

impl Transition {
    fn verb(&self) -> &'static str {
        match self {
            Transition::Accept => "accept",
            Transition::Complete => "complete",
            Transition::Cancel => "cancel",
            Transition::Delete => "delete",
        }
    }
}

impl CreateTaskRequest {
    /// Required-field checks, run before anything touches storage.
    pub fn validate(self) -> AppResult<NewTask> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(AppError::validation("title is required"));
        }
        let description = self.description.trim();
        if description.is_empty() {
            return Err(AppError::validation("description is required"));
        }
        if let Some(amount) = self.payment_amount {
            if !amount.is_finite() || amount < 0.0 {
                return Err(AppError::validation("payment_amount must be a non-negative number"));
            }
        }

        let location = match (self.location_lat, self.location_lng) {
            (Some(lat), Some(lng)) => {
                Some(Coordinate::new(lat, lng).map_err(|e| AppError::validation(e.to_string()))?)
            }
            (None, None) => None,
            _ => {
                return Err(AppError::validation(
                    "location_lat and location_lng must be given together",
                ))
            }
        };

        let address = self
            .location_address
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty());
        let location_address = match (location, address) {
            (Some(_), None) => Some(CURRENT_LOCATION_LABEL.to_string()),
            (_, address) => address,
        };

        Ok(NewTask {
            title: title.to_string(),
            description: description.to_string(),
            payment_amount: self.payment_amount,
            location,
            location_address,
            creator_id: self.username,
        })
    }
}

pub fn list(db: &Database, viewer: Option<Coordinate>) -> AppResult<Vec<Task>> {
    Ok(filter_nearby(db.list_tasks()?, viewer))
}

pub fn create(db: &Database, req: CreateTaskRequest) -> AppResult<Task> {
    let new = req.validate()?;
    require_user(db, &new.creator_id)?;
    Ok(db.insert_task(&new)?)
}

/// Explains why a conditional update matched no row.
fn rejection(task: &Task, username: &str, transition: Transition) -> AppError {
    let is_creator = task.creator_id == username;
    let is_accepter = task.accepted_by.as_deref() == Some(username);
    let verb = transition.verb();

    let forbidden = match transition {
        Transition::Accept => is_creator,
        Transition::Complete => !is_creator && !is_accepter,
        Transition::Cancel | Transition::Delete => !is_creator,
    };
    if forbidden {
        return AppError::forbidden(format!("{username} may not {verb} task {}", task.id));
    }
    AppError::conflict(format!("cannot {verb} task {} while it is {}", task.id, task.status))
}

/// Applies a lifecycle transition. Returns the updated task, or `None` after
/// a delete.
pub fn transition(
    db: &Database,
    id: &str,
    username: &str,
    kind: Transition,
) -> AppResult<Option<Task>> {
    require_user(db, username)?;
    let changed = match kind {
        Transition::Accept => db.accept_task(id, username)?,
        Transition::Complete => db.complete_task(id, username)?,
        Transition::Cancel => db.cancel_task(id, username)?,
        Transition::Delete => db.delete_task(id, username)?,
    };

    let current = db.get_task(id)?;
    match (changed, current) {
        (0, None) => Err(AppError::not_found("task", id)),
        (0, Some(task)) => Err(rejection(&task, username, kind)),
        (_, task) => Ok(task),
    }
}

// === HTTP handlers ===

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> AppResult<Json<Vec<Task>>> {
    let viewer = query.viewer()?;
    let db = state.db.lock().await;
    Ok(Json(list(&db, viewer)?))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Task>> {
    let db = state.db.lock().await;
    db.get_task(&id)?
        .map(Json)
        .ok_or_else(|| AppError::not_found("task", id))
}

pub async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> AppResult<(StatusCode, Json<Task>)> {
    let db = state.db.lock().await;
    let task = create(&db, req)?;
    tracing::info!("Task {} created by {}", task.id, task.creator_id);
    notify(
        &state.tx,
        ChangeEvent::new(Table::Tasks, ChangeKind::Insert, &task.id).by(&task.creator_id),
    );
    Ok((StatusCode::CREATED, Json(task)))
}

async fn apply(
    state: AppState,
    id: String,
    username: String,
    kind: Transition,
) -> AppResult<Option<Task>> {
    let db = state.db.lock().await;
    let task = transition(&db, &id, &username, kind)?;
    tracing::info!("Task {} {} by {}", id, kind.verb(), username);

    let change = if task.is_some() { ChangeKind::Update } else { ChangeKind::Delete };
    notify(&state.tx, ChangeEvent::new(Table::Tasks, change, id).by(username));
    Ok(task)
}

pub async fn accept_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ActorRequest>,
) -> AppResult<Json<Option<Task>>> {
    apply(state, id, req.username, Transition::Accept).await.map(Json)
}

pub async fn complete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ActorRequest>,
) -> AppResult<Json<Option<Task>>> {
    apply(state, id, req.username, Transition::Complete).await.map(Json)
}

pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ActorRequest>,
) -> AppResult<Json<Option<Task>>> {
    apply(state, id, req.username, Transition::Cancel).await.map(Json)
}

pub async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(req): Query<ActorRequest>,
) -> AppResult<StatusCode> {
    apply(state, id, req.username, Transition::Delete).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Role, TaskStatus};

    fn request(title: &str) -> CreateTaskRequest {
        CreateTaskRequest {
            username: "maria".to_string(),
            title: title.to_string(),
            description: "Please help".to_string(),
            payment_amount: None,
            location_lat: None,
            location_lng: None,
            location_address: None,
        }
    }

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_user("maria", "Maria", Role::Resident).unwrap();
        db.create_user("juan", "Juan", Role::Resident).unwrap();
        db.create_user("ana", "Ana", Role::Resident).unwrap();
        db
    }

    fn status_of(err: AppError) -> StatusCode {
        err.status()
    }

    #[test]
    fn test_validation_rejects_blank_title() {
        let err = request("   ").validate().unwrap_err();
        assert_eq!(status_of(err), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_validation_rejects_negative_payment() {
        let mut req = request("Mow lawn");
        req.payment_amount = Some(-5.0);
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_half_location() {
        let mut req = request("Mow lawn");
        req.location_lat = Some(14.5);
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_out_of_range_location() {
        let mut req = request("Mow lawn");
        req.location_lat = Some(95.0);
        req.location_lng = Some(120.0);
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_location_gets_placeholder_address() {
        let mut req = request("Mow lawn");
        req.location_lat = Some(14.5995);
        req.location_lng = Some(120.9842);
        let new = req.validate().unwrap();
        assert_eq!(new.location_address.as_deref(), Some(CURRENT_LOCATION_LABEL));
    }

    #[test]
    fn test_explicit_address_is_kept() {
        let mut req = request("Mow lawn");
        req.location_lat = Some(14.5995);
        req.location_lng = Some(120.9842);
        req.location_address = Some(" 12 Mabini St. ".to_string());
        let new = req.validate().unwrap();
        assert_eq!(new.location_address.as_deref(), Some("12 Mabini St."));
    }

    #[test]
    fn test_create_requires_known_user() {
        let db = setup();
        let mut req = request("Mow lawn");
        req.username = "ghost".to_string();
        assert_eq!(status_of(create(&db, req).unwrap_err()), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_transition_errors() {
        let db = setup();
        let task = create(&db, request("Carry sacks")).unwrap();

        let err = transition(&db, &task.id, "maria", Transition::Accept).unwrap_err();
        assert_eq!(status_of(err), StatusCode::FORBIDDEN);

        let err = transition(&db, &task.id, "juan", Transition::Complete).unwrap_err();
        assert_eq!(status_of(err), StatusCode::FORBIDDEN);

        let err = transition(&db, &task.id, "maria", Transition::Complete).unwrap_err();
        assert_eq!(status_of(err), StatusCode::CONFLICT);

        let err = transition(&db, "missing", "juan", Transition::Accept).unwrap_err();
        assert_eq!(status_of(err), StatusCode::NOT_FOUND);

        let accepted = transition(&db, &task.id, "juan", Transition::Accept).unwrap().unwrap();
        assert_eq!(accepted.status, TaskStatus::InProgress);

        let err = transition(&db, &task.id, "ana", Transition::Accept).unwrap_err();
        assert_eq!(status_of(err), StatusCode::CONFLICT);

        let err = transition(&db, &task.id, "maria", Transition::Delete).unwrap_err();
        assert_eq!(status_of(err), StatusCode::CONFLICT);

        let done = transition(&db, &task.id, "maria", Transition::Complete).unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.accepted_by.as_deref(), Some("juan"));
    }

    #[test]
    fn test_delete_returns_none() {
        let db = setup();
        let task = create(&db, request("Return ladder")).unwrap();
        assert!(transition(&db, &task.id, "maria", Transition::Delete).unwrap().is_none());
        assert!(db.get_task(&task.id).unwrap().is_none());
    }

    #[test]
    fn test_list_applies_viewer_filter() {
        let db = setup();
        let mut near = request("near");
        near.location_lat = Some(14.5999);
        near.location_lng = Some(120.9842);
        let mut far = request("far");
        far.location_lat = Some(14.6050);
        far.location_lng = Some(120.9842);
        create(&db, near).unwrap();
        create(&db, far).unwrap();
        create(&db, request("anywhere")).unwrap();

        assert_eq!(list(&db, None).unwrap().len(), 3);

        let viewer = Coordinate::new(14.5995, 120.9842).unwrap();
        let titles: Vec<_> = list(&db, Some(viewer)).unwrap().into_iter().map(|t| t.title).collect();
        assert_eq!(titles, vec!["anywhere", "near"]);
    }

    #[test]
    fn test_list_query_viewer() {
        let q = ListTasksQuery { lat: Some(14.0), lng: None };
        assert!(q.viewer().is_err());
        let q = ListTasksQuery::default();
        assert_eq!(q.viewer().unwrap(), None);
        let q = ListTasksQuery { lat: Some(14.0), lng: Some(121.0) };
        assert!(q.viewer().unwrap().is_some());
    }
}
