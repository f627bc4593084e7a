use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    db::Database,
    error::{AppError, AppResult},
    events::{notify, ChangeEvent, ChangeKind, Table},
    models::{Role, User},
    AppState,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignRoleRequest {
    /// The official making the change.
    pub username: String,
    pub role: Role,
}

/// Self-registration always yields a resident; other roles are granted by
/// an official or at start-up.

pub fn register_user(db: &Database, req: RegisterRequest) -> AppResult<User> {
    let username = req.username.trim();
    if username.is_empty() {
        return Err(AppError::validation("username is required"));
    }
    if db.get_user(username)?.is_some() {
        return Err(AppError::conflict("Username already exists"));
    }
    let display_name = req
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(username);

    Ok(db.create_user(username, display_name, Role::Resident)?)
}

/// Looks up `username` and requires it to hold one of `roles`.
pub fn require_role(db: &Database, username: &str, roles: &[Role]) -> AppResult<User> {
    let user = db
        .get_user(username)?
        .ok_or_else(|| AppError::not_found("user", username))?;
    if roles.contains(&user.role) {
        return Ok(user);
    }
    let wanted: Vec<&str> = roles.iter().map(Role::as_str).collect();
    Err(AppError::forbidden(format!(
        "{username} must be one of [{}]",
        wanted.join(", ")
    )))
}

pub fn require_user(db: &Database, username: &str) -> AppResult<User> {
    db.get_user(username)?
        .ok_or_else(|| AppError::not_found("user", username))
}

/// Makes sure every name in `usernames` exists as an official.
pub fn bootstrap_officials(db: &Database, usernames: &[String]) -> AppResult<()> {
    for name in usernames {
        match db.get_user(name)? {
            Some(user) if user.role == Role::Official => {}
            Some(_) => {
                db.set_role(name, Role::Official)?;
                tracing::info!("Promoted {} to official", name);
            }
            None => {
                db.create_user(name, name, Role::Official)?;
                tracing::info!("Created official {}", name);
            }
        }
    }
    Ok(())
}

pub fn assign_role(db: &Database, target: &str, req: &AssignRoleRequest) -> AppResult<User> {
    require_role(db, &req.username, &[Role::Official])?;
    if req.username == target {
        return Err(AppError::validation("officials cannot change their own role"));
    }
    let user = require_user(db, target)?;
    if user.role == req.role {
        return Err(AppError::conflict(format!("{target} is already a {}", req.role)));
    }
    db.set_role(target, req.role)?;
    require_user(db, target)
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<User>)> {
    let db = state.db.lock().await;
    let user = register_user(&db, req)?;
    tracing::info!("Registered user {} ({})", user.username, user.role);
    notify(&state.tx, ChangeEvent::new(Table::Users, ChangeKind::Insert, &user.username));
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<User>> {
    let db = state.db.lock().await;
    require_user(&db, &req.username)?;
    db.touch_login(&req.username)?;
    Ok(Json(require_user(&db, &req.username)?))
}

pub async fn set_role(
    State(state): State<AppState>,
    Path(target): Path<String>,
    Json(req): Json<AssignRoleRequest>,
) -> AppResult<Json<User>> {
    let db = state.db.lock().await;
    let user = assign_role(&db, &target, &req)?;
    tracing::info!("{} made {} a {}", req.username, target, user.role);
    notify(&state.tx, ChangeEvent::new(Table::Users, ChangeKind::Update, target).by(req.username));
    Ok(Json(user))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(username: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.to_string(),
            display_name: None,
        }
    }

    #[test]
    fn test_register_defaults() {
        let db = Database::open_in_memory().unwrap();
        let user = register_user(&db, req("  lito ")).unwrap();
        assert_eq!(user.username, "lito");
        assert_eq!(user.display_name, "lito");
        assert_eq!(user.role, Role::Resident);
    }

    #[test]
    fn test_register_twice_conflicts() {
        let db = Database::open_in_memory().unwrap();
        register_user(&db, req("lito")).unwrap();
        let err = register_user(&db, req("lito")).unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_register_blank_username() {
        let db = Database::open_in_memory().unwrap();
        let err = register_user(&db, req(" ")).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_require_role() {
        let db = Database::open_in_memory().unwrap();
        bootstrap_officials(&db, &["kap".to_string()]).unwrap();
        register_user(&db, req("lito")).unwrap();

        assert!(require_role(&db, "kap", &[Role::Official]).is_ok());
        let err = require_role(&db, "lito", &[Role::Moderator, Role::Official]).unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert!(err.to_string().contains("moderator, official"));
        let err = require_role(&db, "lito", &[]).unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        let err = require_role(&db, "ghost", &[Role::Official]).unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_register_ignores_requested_role() {
        let db = Database::open_in_memory().unwrap();
        let body = r#"{"username": "sneaky", "role": "official"}"#;
        let request: RegisterRequest = serde_json::from_str(body).unwrap();
        let user = register_user(&db, request).unwrap();
        assert_eq!(user.role, Role::Resident);
    }

    #[test]
    fn test_bootstrap_officials() {
        let db = Database::open_in_memory().unwrap();
        register_user(&db, req("kap")).unwrap();
        let names = vec!["kap".to_string(), "sec".to_string()];
        bootstrap_officials(&db, &names).unwrap();
        bootstrap_officials(&db, &names).unwrap();

        assert_eq!(require_user(&db, "kap").unwrap().role, Role::Official);
        assert_eq!(require_user(&db, "sec").unwrap().role, Role::Official);
    }

    #[test]
    fn test_only_officials_assign_roles() {
        let db = Database::open_in_memory().unwrap();
        bootstrap_officials(&db, &["kap".to_string()]).unwrap();
        register_user(&db, req("lito")).unwrap();
        register_user(&db, req("rosa")).unwrap();

        let by = |username: &str, role| AssignRoleRequest {
            username: username.to_string(),
            role,
        };
        let err = assign_role(&db, "rosa", &by("lito", Role::Moderator)).unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        let err = assign_role(&db, "kap", &by("kap", Role::Resident)).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let rosa = assign_role(&db, "rosa", &by("kap", Role::Moderator)).unwrap();
        assert_eq!(rosa.role, Role::Moderator);
        let err = assign_role(&db, "rosa", &by("kap", Role::Moderator)).unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        let err = assign_role(&db, "ghost", &by("kap", Role::Moderator)).unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
