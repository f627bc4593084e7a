//! Client-side task board.
//!
//! Holds the viewer location (acquired once, never persisted), the last
//! fetched candidate list, and the filtered list to display. Every change
//! notification triggers a full re-fetch. Fetches are tagged with a
//! monotonically increasing token and a response older than the last one
//! applied is dropped, so a slow stale fetch cannot overwrite newer state.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

use crate::{
    db::Database,
    events::{ChangeEvent, ChangeKind, Table},
    geo::Coordinate,
    location::{LocationError, LocationProvider},
    models::Task,
    proximity::filter_nearby,
    tasks,
};

#[derive(Debug, Error)]
pub enum BoardError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("stream error: {0}")]
    Stream(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Where the board gets its candidate list from.
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Full, unfiltered candidate set, most recent first.
    async fn list_tasks(&self) -> Result<Vec<Task>, BoardError>;
}

/// Reads straight from an in-process database.
#[derive(Clone)]
pub struct DirectorySource {
    db: Arc<Mutex<Database>>,
}

impl DirectorySource {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        DirectorySource { db }
    }
}

#[async_trait]
impl TaskSource for DirectorySource {
    async fn list_tasks(&self) -> Result<Vec<Task>, BoardError> {
        let db = self.db.lock().await;
        tasks::list(&db, None).map_err(|e| BoardError::Storage(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FetchToken(u64);

#[derive(Debug, Default)]
pub struct TaskBoard {
    viewer: Option<Coordinate>,
    candidates: Vec<Task>,
    visible: Vec<Task>,
    issued: u64,
    applied: u64,
    warning: Option<String>,
    error: Option<String>,
}

impl TaskBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visible(&self) -> &[Task] {
        &self.visible
    }

    pub fn viewer(&self) -> Option<Coordinate> {
        self.viewer
    }

    /// Non-blocking notice shown when location could not be acquired.
    pub fn warning(&self) -> Option<&str> {
        self.warning.as_deref()
    }

    /// Message from the last failed fetch, cleared by the next success.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Asks `provider` for the viewer position once. On failure the board
    /// keeps showing everything and records a warning; nothing is retried.
    pub async fn acquire_location(&mut self, provider: &dyn LocationProvider) -> Option<Coordinate> {
        match provider.current_location().await {
            Ok(at) => {
                tracing::info!("Viewer location acquired: {}, {}", at.lat(), at.lng());
                self.warning = None;
                self.set_viewer(Some(at));
            }
            Err(e) => {
                let notice = match e {
                    LocationError::PermissionDenied => {
                        "Location access denied. You can still view all tasks.".to_string()
                    }
                    LocationError::Unavailable(reason) => {
                        format!("Location unavailable ({reason}). You can still view all tasks.")
                    }
                };
                tracing::warn!("{}", notice);
                self.warning = Some(notice);
                self.set_viewer(None);
            }
        }
        self.viewer
    }

    pub fn set_viewer(&mut self, viewer: Option<Coordinate>) {
        self.viewer = viewer;
        self.visible = filter_nearby(self.candidates.clone(), viewer);
    }

    pub fn begin_fetch(&mut self) -> FetchToken {
        self.issued += 1;
        FetchToken(self.issued)
    }

    /// Applies a fetch result. Returns false if the response was stale and
    /// dropped. A failed fetch leaves the displayed list untouched.
    pub fn apply(&mut self, token: FetchToken, result: Result<Vec<Task>, BoardError>) -> bool {
        if token.0 <= self.applied {
            tracing::debug!("Dropping stale task list (token {}, applied {})", token.0, self.applied);
            return false;
        }
        match result {
            Ok(tasks) => {
                self.applied = token.0;
                self.error = None;
                self.visible = filter_nearby(tasks.clone(), self.viewer);
                self.candidates = tasks;
                true
            }
            Err(e) => {
                tracing::error!("Failed to fetch tasks: {}", e);
                self.error = Some(e.to_string());
                false
            }
        }
    }

    pub async fn refresh(&mut self, source: &dyn TaskSource) -> bool {
        let token = self.begin_fetch();
        let result = source.list_tasks().await;
        self.apply(token, result)
    }
}

/// Fetch that releases the board lock while waiting on the source, so
/// several may be in flight at once.
pub async fn refresh_shared(board: &Mutex<TaskBoard>, source: &dyn TaskSource) -> bool {
    let token = board.lock().await.begin_fetch();
    let result = source.list_tasks().await;
    board.lock().await.apply(token, result)
}

/// Adapts an in-process change channel. A lagged receiver yields a
/// synthetic task update so the board still re-fetches.
pub fn local_changes(rx: broadcast::Receiver<ChangeEvent>) -> impl Stream<Item = ChangeEvent> {
    BroadcastStream::new(rx).map(|msg| match msg {
        Ok(event) => event,
        Err(BroadcastStreamRecvError::Lagged(n)) => {
            tracing::warn!("Board missed {} change events", n);
            ChangeEvent::new(Table::Tasks, ChangeKind::Update, "")
        }
    })
}

/// Keeps `board` in sync with `source`: fetches once, then re-fetches on
/// every task change until `changes` ends. Notifications are not coalesced.
pub async fn watch<S>(board: Arc<Mutex<TaskBoard>>, source: Arc<dyn TaskSource>, changes: S)
where
    S: Stream<Item = ChangeEvent>,
{
    refresh_shared(&board, source.as_ref()).await;

    futures::pin_mut!(changes);
    while let Some(event) = changes.next().await {
        if event.table != Table::Tasks {
            continue;
        }
        let board = board.clone();
        let source = source.clone();
        tokio::spawn(async move {
            refresh_shared(&board, source.as_ref()).await;
        });
    }
    tracing::info!("Change feed closed, board stops watching");
}
