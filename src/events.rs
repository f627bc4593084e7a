use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::AppState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Users,
    Tasks,
    Posts,
    FriendRequests,
    Messages,
    Tickets,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Signal that a row changed. Carries no row data; subscribers re-fetch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    pub id: String,
    pub user_id: Option<String>,
}

impl ChangeEvent {
    pub fn new(table: Table, kind: ChangeKind, id: impl Into<String>) -> Self {
        ChangeEvent {
            table,
            kind,
            id: id.into(),
            user_id: None,
        }
    }

    pub fn by(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Publishes `event`. Having no subscribers is not an error.
pub fn notify(tx: &broadcast::Sender<ChangeEvent>, event: ChangeEvent) {
    tracing::debug!(table = ?event.table, kind = ?event.kind, id = %event.id, "change");
    let _ = tx.send(event);
}

pub async fn sse_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::info!("New SSE connection established");
    let rx = state.tx.subscribe();

    let stream = tokio_stream::wrappers::BroadcastStream::new(rx).map(|msg| match msg {
        Ok(event) => {
            let data = serde_json::to_string(&event).unwrap_or_default();
            Ok(Event::default().event("change").data(data))
        }
        Err(_lag) => {
            // missed events only mean missed re-fetch triggers; the next one catches up
            tracing::warn!("SSE stream lagged");
            Ok(Event::default().comment("lagged"))
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let event = ChangeEvent::new(Table::FriendRequests, ChangeKind::Update, "r1").by("ana");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["table"], "friend_requests");
        assert_eq!(json["kind"], "update");
        assert_eq!(json["id"], "r1");
        assert_eq!(json["user_id"], "ana");
    }

    #[tokio::test]
    async fn test_notify_without_subscribers() {
        let (tx, rx) = broadcast::channel(4);
        drop(rx);
        notify(&tx, ChangeEvent::new(Table::Tasks, ChangeKind::Insert, "t1"));
    }

    #[tokio::test]
    async fn test_notify_reaches_subscriber() {
        let (tx, mut rx) = broadcast::channel(4);
        notify(&tx, ChangeEvent::new(Table::Tasks, ChangeKind::Delete, "t9"));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.kind, ChangeKind::Delete);
        assert_eq!(got.id, "t9");
    }
}
