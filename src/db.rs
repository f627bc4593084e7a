use std::path::Path;

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result};
use uuid::Uuid;

use crate::models::{
    FriendRequest, FriendStatus, Message, NewTask, Post, PostStatus, Role, Task, TaskStatus,
    Ticket, TicketStatus, User,
};

/// Fixed-width UTC timestamp, so TEXT ordering matches time ordering.
pub fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn cutoff(retention_days: i64) -> String {
    (Utc::now() - chrono::Duration::days(retention_days)).to_rfc3339_opts(SecondsFormat::Micros, true)
}

const TASK_SELECT: &str = "SELECT t.id, t.title, t.description, t.payment_amount, t.location_lat, t.location_lng, \
     t.location_address, t.status, t.creator_id, COALESCE(u.display_name, t.creator_id), t.accepted_by, t.created_at \
     FROM tasks t LEFT JOIN users u ON u.username = t.creator_id";

const POST_SELECT: &str = "SELECT p.id, p.author_id, COALESCE(u.display_name, p.author_id), p.body, p.status, \
     p.moderated_by, p.moderation_note, p.created_at, p.updated_at \
     FROM posts p LEFT JOIN users u ON u.username = p.author_id";

const FRIEND_SELECT: &str =
    "SELECT id, requester_id, addressee_id, status, created_at, responded_at FROM friend_requests";

const MESSAGE_SELECT: &str =
    "SELECT id, sender_id, recipient_id, body, status, created_at, delivered_at, read_at FROM messages";

const TICKET_SELECT: &str = "SELECT id, reporter_id, subject, body, category, status, assigned_to, response, \
     created_at, updated_at FROM tickets";

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                username TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'resident',
                created_at TEXT NOT NULL,
                last_login TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                payment_amount REAL CHECK (payment_amount IS NULL OR payment_amount >= 0),
                location_lat REAL,
                location_lng REAL,
                location_address TEXT,
                status TEXT NOT NULL DEFAULT 'open',
                creator_id TEXT NOT NULL,
                accepted_by TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                CHECK ((location_lat IS NULL) = (location_lng IS NULL)),
                FOREIGN KEY(creator_id) REFERENCES users(username) ON DELETE CASCADE,
                FOREIGN KEY(accepted_by) REFERENCES users(username) ON DELETE SET NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks(created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);

            CREATE TABLE IF NOT EXISTS posts (
                id TEXT PRIMARY KEY,
                author_id TEXT NOT NULL,
                body TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                moderated_by TEXT,
                moderation_note TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY(author_id) REFERENCES users(username) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_posts_status ON posts(status, created_at DESC);

            CREATE TABLE IF NOT EXISTS friend_requests (
                id TEXT PRIMARY KEY,
                requester_id TEXT NOT NULL,
                addressee_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                responded_at TEXT,
                FOREIGN KEY(requester_id) REFERENCES users(username) ON DELETE CASCADE,
                FOREIGN KEY(addressee_id) REFERENCES users(username) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_friend_requests_requester ON friend_requests(requester_id);
            CREATE INDEX IF NOT EXISTS idx_friend_requests_addressee ON friend_requests(addressee_id);

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                sender_id TEXT NOT NULL,
                recipient_id TEXT NOT NULL,
                body TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'sent',
                created_at TEXT NOT NULL,
                delivered_at TEXT,
                read_at TEXT,
                FOREIGN KEY(sender_id) REFERENCES users(username) ON DELETE CASCADE,
                FOREIGN KEY(recipient_id) REFERENCES users(username) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_messages_pair ON messages(sender_id, recipient_id);

            CREATE TABLE IF NOT EXISTS tickets (
                id TEXT PRIMARY KEY,
                reporter_id TEXT NOT NULL,
                subject TEXT NOT NULL,
                body TEXT NOT NULL,
                category TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'open',
                assigned_to TEXT,
                response TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY(reporter_id) REFERENCES users(username) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_tickets_reporter ON tickets(reporter_id);
        "#,
        )?;

        Ok(Database { conn })
    }

    // ========== Users ==========

    pub fn create_user(&self, username: &str, display_name: &str, role: Role) -> Result<User> {
        let now = now();
        self.conn.execute(
            "INSERT INTO users (username, display_name, role, created_at, last_login) VALUES (?1, ?2, ?3, ?4, ?4)",
            params![username, display_name, role.as_str(), now],
        )?;
        Ok(User {
            username: username.to_string(),
            display_name: display_name.to_string(),
            role,
            created_at: now.clone(),
            last_login: now,
        })
    }

    pub fn get_user(&self, username: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT username, display_name, role, created_at, last_login FROM users WHERE username = ?1",
                params![username],
                |row| User::try_from(row),
            )
            .optional()
    }

    pub fn set_role(&self, username: &str, role: Role) -> Result<usize> {
        self.conn.execute(
            "UPDATE users SET role = ?2 WHERE username = ?1",
            params![username, role.as_str()],
        )
    }

    pub fn touch_login(&self, username: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE users SET last_login = ?1 WHERE username = ?2",
            params![now(), username],
        )?;
        Ok(())
    }

    // ========== Tasks ==========

    pub fn insert_task(&self, new: &NewTask) -> Result<Task> {
        let id = Uuid::new_v4().to_string();
        let now = now();
        self.conn.execute(
            "INSERT INTO tasks (id, title, description, payment_amount, location_lat, location_lng, location_address, status, creator_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'open', ?8, ?9, ?9)",
            params![
                id,
                new.title,
                new.description,
                new.payment_amount,
                new.location.map(|c| c.lat()),
                new.location.map(|c| c.lng()),
                new.location_address,
                new.creator_id,
                now
            ],
        )?;
        self.get_task(&id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    pub fn get_task(&self, id: &str) -> Result<Option<Task>> {
        self.conn
            .query_row(&format!("{TASK_SELECT} WHERE t.id = ?1"), params![id], |row| {
                Task::try_from(row)
            })
            .optional()
    }

    /// Every task, most recent first.
    pub fn list_tasks(&self) -> Result<Vec<Task>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{TASK_SELECT} ORDER BY t.created_at DESC, t.rowid DESC"))?;
        let rows = stmt.query_map([], |row| Task::try_from(row))?;
        rows.collect()
    }

    /// Open → in_progress, by anyone but the creator. Returns rows changed.
    pub fn accept_task(&self, id: &str, username: &str) -> Result<usize> {
        self.conn.execute(
            "UPDATE tasks SET status = 'in_progress', accepted_by = ?2, updated_at = ?3
             WHERE id = ?1 AND status = 'open' AND creator_id <> ?2",
            params![id, username, now()],
        )
    }

    /// In_progress → completed, by the creator or the accepter.
    pub fn complete_task(&self, id: &str, username: &str) -> Result<usize> {
        self.conn.execute(
            "UPDATE tasks SET status = 'completed', updated_at = ?3
             WHERE id = ?1 AND status = 'in_progress' AND (creator_id = ?2 OR accepted_by = ?2)",
            params![id, username, now()],
        )
    }

    /// Open or in_progress → cancelled, by the creator. Clears the accepter.
    pub fn cancel_task(&self, id: &str, username: &str) -> Result<usize> {
        self.conn.execute(
            "UPDATE tasks SET status = 'cancelled', accepted_by = NULL, updated_at = ?3
             WHERE id = ?1 AND creator_id = ?2 AND status IN ('open', 'in_progress')",
            params![id, username, now()],
        )
    }

    /// Removes an open task owned by `username`.
    pub fn delete_task(&self, id: &str, username: &str) -> Result<usize> {
        self.conn.execute(
            "DELETE FROM tasks WHERE id = ?1 AND creator_id = ?2 AND status = 'open'",
            params![id, username],
        )
    }

    pub fn count_tasks_by_status(&self, status: TaskStatus) -> Result<i64> {
        self.conn.query_row(
            "SELECT COUNT(*) FROM tasks WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )
    }

    // ========== Posts ==========

    pub fn insert_post(&self, author_id: &str, body: &str) -> Result<Post> {
        let id = Uuid::new_v4().to_string();
        let now = now();
        self.conn.execute(
            "INSERT INTO posts (id, author_id, body, status, created_at, updated_at) VALUES (?1, ?2, ?3, 'pending', ?4, ?4)",
            params![id, author_id, body, now],
        )?;
        self.get_post(&id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    pub fn get_post(&self, id: &str) -> Result<Option<Post>> {
        self.conn
            .query_row(&format!("{POST_SELECT} WHERE p.id = ?1"), params![id], |row| {
                Post::try_from(row)
            })
            .optional()
    }

    pub fn list_posts(&self, status: PostStatus) -> Result<Vec<Post>> {
        let mut stmt = self.conn.prepare(&format!(
            "{POST_SELECT} WHERE p.status = ?1 ORDER BY p.created_at DESC, p.rowid DESC"
        ))?;
        let rows = stmt.query_map(params![status.as_str()], |row| Post::try_from(row))?;
        rows.collect()
    }

    pub fn moderate_post(
        &self,
        id: &str,
        moderator: &str,
        status: PostStatus,
        note: Option<&str>,
    ) -> Result<usize> {
        self.conn.execute(
            "UPDATE posts SET status = ?2, moderated_by = ?3, moderation_note = ?4, updated_at = ?5 WHERE id = ?1",
            params![id, status.as_str(), moderator, note, now()],
        )
    }

    pub fn delete_post(&self, id: &str, author_id: &str) -> Result<usize> {
        self.conn.execute(
            "DELETE FROM posts WHERE id = ?1 AND author_id = ?2",
            params![id, author_id],
        )
    }

    // ========== Friends ==========

    pub fn insert_friend_request(&self, requester: &str, addressee: &str) -> Result<FriendRequest> {
        let id = Uuid::new_v4().to_string();
        let now = now();
        self.conn.execute(
            "INSERT INTO friend_requests (id, requester_id, addressee_id, status, created_at) VALUES (?1, ?2, ?3, 'pending', ?4)",
            params![id, requester, addressee, now],
        )?;
        Ok(FriendRequest {
            id,
            requester_id: requester.to_string(),
            addressee_id: addressee.to_string(),
            status: FriendStatus::Pending,
            created_at: now,
            responded_at: None,
        })
    }

    pub fn get_friend_request(&self, id: &str) -> Result<Option<FriendRequest>> {
        self.conn
            .query_row(&format!("{FRIEND_SELECT} WHERE id = ?1"), params![id], |row| {
                FriendRequest::try_from(row)
            })
            .optional()
    }

    /// Latest pending or accepted request between two users, either direction.
    pub fn find_active_friendship(&self, a: &str, b: &str) -> Result<Option<FriendRequest>> {
        self.conn
            .query_row(
                &format!(
                    "{FRIEND_SELECT} WHERE status IN ('pending', 'accepted')
                     AND ((requester_id = ?1 AND addressee_id = ?2) OR (requester_id = ?2 AND addressee_id = ?1))
                     ORDER BY created_at DESC LIMIT 1"
                ),
                params![a, b],
                |row| FriendRequest::try_from(row),
            )
            .optional()
    }

    pub fn respond_friend_request(&self, id: &str, addressee: &str, status: FriendStatus) -> Result<usize> {
        self.conn.execute(
            "UPDATE friend_requests SET status = ?3, responded_at = ?4
             WHERE id = ?1 AND addressee_id = ?2 AND status = 'pending'",
            params![id, addressee, status.as_str(), now()],
        )
    }

    pub fn list_incoming_requests(&self, username: &str) -> Result<Vec<FriendRequest>> {
        let mut stmt = self.conn.prepare(&format!(
            "{FRIEND_SELECT} WHERE addressee_id = ?1 AND status = 'pending' ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map(params![username], |row| FriendRequest::try_from(row))?;
        rows.collect()
    }

    pub fn list_friends(&self, username: &str) -> Result<Vec<User>> {
        let mut stmt = self.conn.prepare(
            "SELECT u.username, u.display_name, u.role, u.created_at, u.last_login
             FROM friend_requests f
             JOIN users u ON u.username = CASE WHEN f.requester_id = ?1 THEN f.addressee_id ELSE f.requester_id END
             WHERE f.status = 'accepted' AND (f.requester_id = ?1 OR f.addressee_id = ?1)
             ORDER BY u.display_name ASC",
        )?;
        let rows = stmt.query_map(params![username], |row| User::try_from(row))?;
        rows.collect()
    }

    // ========== Messages ==========

    pub fn insert_message(&self, sender: &str, recipient: &str, body: &str) -> Result<Message> {
        let id = Uuid::new_v4().to_string();
        let now = now();
        self.conn.execute(
            "INSERT INTO messages (id, sender_id, recipient_id, body, status, created_at) VALUES (?1, ?2, ?3, ?4, 'sent', ?5)",
            params![id, sender, recipient, body, now],
        )?;
        self.get_message(&id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    pub fn get_message(&self, id: &str) -> Result<Option<Message>> {
        self.conn
            .query_row(&format!("{MESSAGE_SELECT} WHERE id = ?1"), params![id], |row| {
                Message::try_from(row)
            })
            .optional()
    }

    /// Both directions between `a` and `b`, oldest first.
    pub fn get_conversation(&self, a: &str, b: &str) -> Result<Vec<Message>> {
        let mut stmt = self.conn.prepare(&format!(
            "{MESSAGE_SELECT} WHERE (sender_id = ?1 AND recipient_id = ?2) OR (sender_id = ?2 AND recipient_id = ?1)
             ORDER BY created_at ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map(params![a, b], |row| Message::try_from(row))?;
        rows.collect()
    }

    /// Marks every `sent` message from `sender` to `recipient` as delivered.
    /// Returns the ids that changed.
    pub fn mark_delivered(&self, recipient: &str, sender: &str) -> Result<Vec<String>> {
        let ids: Vec<String> = {
            let mut stmt = self.conn.prepare(
                "SELECT id FROM messages WHERE recipient_id = ?1 AND sender_id = ?2 AND status = 'sent'",
            )?;
            let rows = stmt.query_map(params![recipient, sender], |row| row.get(0))?;
            rows.collect::<Result<_>>()?
        };
        if !ids.is_empty() {
            self.conn.execute(
                "UPDATE messages SET status = 'delivered', delivered_at = ?3
                 WHERE recipient_id = ?1 AND sender_id = ?2 AND status = 'sent'",
                params![recipient, sender, now()],
            )?;
        }
        Ok(ids)
    }

    pub fn mark_read(&self, id: &str, recipient: &str) -> Result<usize> {
        let now = now();
        self.conn.execute(
            "UPDATE messages SET status = 'read', read_at = ?3, delivered_at = COALESCE(delivered_at, ?3)
             WHERE id = ?1 AND recipient_id = ?2 AND status <> 'read'",
            params![id, recipient, now],
        )
    }

    // ========== Tickets ==========

    pub fn insert_ticket(&self, reporter: &str, subject: &str, body: &str, category: &str) -> Result<Ticket> {
        let id = Uuid::new_v4().to_string();
        let now = now();
        self.conn.execute(
            "INSERT INTO tickets (id, reporter_id, subject, body, category, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'open', ?6, ?6)",
            params![id, reporter, subject, body, category, now],
        )?;
        self.get_ticket(&id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    pub fn get_ticket(&self, id: &str) -> Result<Option<Ticket>> {
        self.conn
            .query_row(&format!("{TICKET_SELECT} WHERE id = ?1"), params![id], |row| {
                Ticket::try_from(row)
            })
            .optional()
    }

    pub fn list_tickets_by_reporter(&self, reporter: &str) -> Result<Vec<Ticket>> {
        let mut stmt = self.conn.prepare(&format!(
            "{TICKET_SELECT} WHERE reporter_id = ?1 ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt.query_map(params![reporter], |row| Ticket::try_from(row))?;
        rows.collect()
    }

    pub fn list_tickets(&self, status: Option<TicketStatus>) -> Result<Vec<Ticket>> {
        let mut stmt = self.conn.prepare(&format!(
            "{TICKET_SELECT} WHERE (?1 IS NULL OR status = ?1) ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt.query_map(params![status.map(|s| s.as_str())], |row| Ticket::try_from(row))?;
        rows.collect()
    }

    pub fn respond_ticket(&self, id: &str, official: &str, response: &str) -> Result<usize> {
        self.conn.execute(
            "UPDATE tickets SET status = 'in_progress', assigned_to = ?2, response = ?3, updated_at = ?4
             WHERE id = ?1 AND status IN ('open', 'in_progress')",
            params![id, official, response, now()],
        )
    }

    pub fn set_ticket_status(&self, id: &str, status: TicketStatus) -> Result<usize> {
        self.conn.execute(
            "UPDATE tickets SET status = ?2, updated_at = ?3 WHERE id = ?1 AND status <> 'closed'",
            params![id, status.as_str(), now()],
        )
    }

    // ========== Garbage Collection ==========

    /// Deletes cancelled tasks untouched for `retention_days`.
    pub fn gc_cancelled_tasks(&self, retention_days: i64) -> Result<usize> {
        self.conn.execute(
            "DELETE FROM tasks WHERE status = 'cancelled' AND updated_at < ?1",
            params![cutoff(retention_days)],
        )
    }

    /// Deletes rejected posts untouched for `retention_days`.
    pub fn gc_rejected_posts(&self, retention_days: i64) -> Result<usize> {
        self.conn.execute(
            "DELETE FROM posts WHERE status = 'rejected' AND updated_at < ?1",
            params![cutoff(retention_days)],
        )
    }

    #[cfg(test)]
    fn backdate(&self, table: &str, id: &str, days: i64) -> Result<()> {
        let then = cutoff(days);
        self.conn.execute(
            &format!("UPDATE {table} SET updated_at = ?1 WHERE id = ?2"),
            params![then, id],
        )?;
        Ok(())
    }
}
