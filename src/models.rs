use std::str::FromStr;

use rusqlite::{types::Type, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo::{Coordinate, CoordinateError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Status-like enums stored as TEXT and exchanged as lowercase strings.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant { kind: $kind, value: other.to_string() }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum!(
    /// Lifecycle of a task on the board.
    TaskStatus, "task status" {
        Open => "open",
        InProgress => "in_progress",
        Completed => "completed",
        Cancelled => "cancelled",
    }
);

text_enum!(Role, "role" {
    Resident => "resident",
    Moderator => "moderator",
    Official => "official",
});

text_enum!(PostStatus, "post status" {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

text_enum!(FriendStatus, "friend request status" {
    Pending => "pending",
    Accepted => "accepted",
    Declined => "declined",
});

text_enum!(
    /// Delivery receipt of a direct message. Only ever moves forward.
    ReceiptStatus, "receipt status" {
        Sent => "sent",
        Delivered => "delivered",
        Read => "read",
    }
);

text_enum!(TicketStatus, "ticket status" {
    Open => "open",
    InProgress => "in_progress",
    Resolved => "resolved",
    Closed => "closed",
});

impl TaskStatus {
    /// Whether a task in this status must carry an accepter.
    pub fn requires_accepter(&self) -> bool {
        matches!(self, TaskStatus::InProgress | TaskStatus::Completed)
    }
}

impl ReceiptStatus {
    fn rank(&self) -> u8 {
        match self {
            ReceiptStatus::Sent => 0,
            ReceiptStatus::Delivered => 1,
            ReceiptStatus::Read => 2,
        }
    }

    pub fn is_before(&self, other: ReceiptStatus) -> bool {
        self.rank() < other.rank()
    }
}

fn text_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = UnknownVariant>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// ============================================================
// Users
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub display_name: String,
    pub role: Role,
    pub created_at: String,
    pub last_login: String,
}

impl TryFrom<&Row<'_>> for User {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(User {
            username: row.get(0)?,
            display_name: row.get(1)?,
            role: text_column(row, 2)?,
            created_at: row.get(3)?,
            last_login: row.get(4)?,
        })
    }
}

// ============================================================
// Tasks
// ============================================================

/// A task on the neighborhood board.
///
/// On the wire the location is two flat nullable columns
/// (`location_lat`, `location_lng`); in memory it is a single optional
/// [`Coordinate`]. Decoding rejects a lone half or an out-of-range value
/// instead of guessing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "TaskRecord", try_from = "TaskRecord")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub payment_amount: Option<f64>,
    pub location: Option<Coordinate>,
    pub location_address: Option<String>,
    pub status: TaskStatus,
    pub creator_id: String,
    pub creator_name: String,
    pub accepted_by: Option<String>,
    pub created_at: String,
}

/// Validated input for a new task.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub payment_amount: Option<f64>,
    pub location: Option<Coordinate>,
    pub location_address: Option<String>,
    pub creator_id: String,
}

/// Flat record shape of a [`Task`] as exchanged with clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    pub payment_amount: Option<f64>,
    pub location_lat: Option<f64>,
    pub location_lng: Option<f64>,
    pub location_address: Option<String>,
    pub status: TaskStatus,
    pub creator_id: String,
    #[serde(default)]
    pub creator_name: String,
    pub accepted_by: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskRecordError {
    #[error("location_lat and location_lng must be present together")]
    HalfLocation,
    #[error(transparent)]
    Coordinate(#[from] CoordinateError),
    #[error("payment_amount must be a non-negative number")]
    Payment,
}

impl TryFrom<TaskRecord> for Task {
    type Error = TaskRecordError;

    fn try_from(r: TaskRecord) -> Result<Self, Self::Error> {
        let location = match (r.location_lat, r.location_lng) {
            (Some(lat), Some(lng)) => Some(Coordinate::new(lat, lng)?),
            (None, None) => None,
            _ => return Err(TaskRecordError::HalfLocation),
        };
        if let Some(amount) = r.payment_amount {
            if !amount.is_finite() || amount < 0.0 {
                return Err(TaskRecordError::Payment);
            }
        }
        Ok(Task {
            id: r.id,
            title: r.title,
            description: r.description,
            payment_amount: r.payment_amount,
            location,
            location_address: r.location_address,
            status: r.status,
            creator_id: r.creator_id,
            creator_name: r.creator_name,
            accepted_by: r.accepted_by,
            created_at: r.created_at,
        })
    }
}

impl From<Task> for TaskRecord {
    fn from(t: Task) -> Self {
        TaskRecord {
            id: t.id,
            title: t.title,
            description: t.description,
            payment_amount: t.payment_amount,
            location_lat: t.location.map(|c| c.lat()),
            location_lng: t.location.map(|c| c.lng()),
            location_address: t.location_address,
            status: t.status,
            creator_id: t.creator_id,
            creator_name: t.creator_name,
            accepted_by: t.accepted_by,
            created_at: t.created_at,
        }
    }
}

/// Column order: id, title, description, payment_amount, location_lat,
/// location_lng, location_address, status, creator_id, creator_name,
/// accepted_by, created_at.
impl TryFrom<&Row<'_>> for Task {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        let record = TaskRecord {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            payment_amount: row.get(3)?,
            location_lat: row.get(4)?,
            location_lng: row.get(5)?,
            location_address: row.get(6)?,
            status: text_column(row, 7)?,
            creator_id: row.get(8)?,
            creator_name: row.get(9)?,
            accepted_by: row.get(10)?,
            created_at: row.get(11)?,
        };
        Task::try_from(record)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Real, Box::new(e)))
    }
}

// ============================================================
// Feed
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub body: String,
    pub status: PostStatus,
    pub moderated_by: Option<String>,
    pub moderation_note: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<&Row<'_>> for Post {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Post {
            id: row.get(0)?,
            author_id: row.get(1)?,
            author_name: row.get(2)?,
            body: row.get(3)?,
            status: text_column(row, 4)?,
            moderated_by: row.get(5)?,
            moderation_note: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}

// ============================================================
// Friends
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendRequest {
    pub id: String,
    pub requester_id: String,
    pub addressee_id: String,
    pub status: FriendStatus,
    pub created_at: String,
    pub responded_at: Option<String>,
}

impl TryFrom<&Row<'_>> for FriendRequest {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(FriendRequest {
            id: row.get(0)?,
            requester_id: row.get(1)?,
            addressee_id: row.get(2)?,
            status: text_column(row, 3)?,
            created_at: row.get(4)?,
            responded_at: row.get(5)?,
        })
    }
}

// ============================================================
// Direct messages
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub body: String,
    pub status: ReceiptStatus,
    pub created_at: String,
    pub delivered_at: Option<String>,
    pub read_at: Option<String>,
}

impl TryFrom<&Row<'_>> for Message {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Message {
            id: row.get(0)?,
            sender_id: row.get(1)?,
            recipient_id: row.get(2)?,
            body: row.get(3)?,
            status: text_column(row, 4)?,
            created_at: row.get(5)?,
            delivered_at: row.get(6)?,
            read_at: row.get(7)?,
        })
    }
}

// ============================================================
// Tickets
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub reporter_id: String,
    pub subject: String,
    pub body: String,
    pub category: String,
    pub status: TicketStatus,
    pub assigned_to: Option<String>,
    pub response: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<&Row<'_>> for Ticket {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Ticket {
            id: row.get(0)?,
            reporter_id: row.get(1)?,
            subject: row.get(2)?,
            body: row.get(3)?,
            category: row.get(4)?,
            status: text_column(row, 5)?,
            assigned_to: row.get(6)?,
            response: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }
}
