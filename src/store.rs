#![forbid(unsafe_code)]

//! SQLite persistence for users, videos, subscriptions, reactions and
//! comments.
//!
//! The schema keeps `videos.channel` as a denormalized username string (no
//! rename feature exists, so the orphaning risk stays theoretical) and the
//! like/dislike counters on `videos` as denormalized mirrors of the
//! reaction tables. Reaction toggles and the account-deletion cascade run
//! inside transactions; SQLite's own isolation is the only cross-request
//! protection for the counters.

use std::path::Path;

use anyhow::{Context, Result};
use libsql::{Builder, Connection, Row, Transaction, params};

/// A row in `users`. `password_hash` is a PHC-format Argon2id string.
#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub profile_image: Option<String>,
    pub banner_image: Option<String>,
    pub bio: Option<String>,
}

/// A row in `videos`. `upload_time` is an RFC 3339 string in KST.
#[derive(Debug, Clone)]
pub struct VideoRow {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub channel: String,
    pub filename: String,
    pub thumbnail: Option<String>,
    pub views: i64,
    pub likes: i64,
    pub dislikes: i64,
    pub duration: String,
    pub upload_time: String,
}

/// Fields required to create a video; counters start at zero.
#[derive(Debug, Clone)]
pub struct NewVideo {
    pub title: String,
    pub description: String,
    pub channel: String,
    pub filename: String,
    pub thumbnail: Option<String>,
    pub duration: String,
    pub upload_time: String,
}

#[derive(Debug, Clone)]
pub struct CommentRow {
    pub id: i64,
    pub video_id: i64,
    pub user_id: i64,
    pub username: String,
    pub content: String,
    pub created_at: String,
}

/// A user as it appears in search results, with a live subscriber count.
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub id: i64,
    pub username: String,
    pub subscriber_count: i64,
}

/// Counter state after a reaction toggle. `active` reports whether the
/// caller's reaction is set after the transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReactionCounts {
    pub likes: i64,
    pub dislikes: i64,
    pub active: bool,
}

#[derive(Debug, Clone, Copy)]
enum Reaction {
    Like,
    Dislike,
}

impl Reaction {
    fn table(self) -> &'static str {
        match self {
            Self::Like => "video_likes",
            Self::Dislike => "video_dislikes",
        }
    }

    fn counter(self) -> &'static str {
        match self {
            Self::Like => "likes",
            Self::Dislike => "dislikes",
        }
    }

    fn opposite(self) -> Self {
        match self {
            Self::Like => Self::Dislike,
            Self::Dislike => Self::Like,
        }
    }
}

async fn configure_connection(conn: &Connection) -> Result<()> {
    // `PRAGMA journal_mode` returns a row, which libsql's `execute_batch`
    // rejects, so each pragma runs through `query` instead.
    conn.query("PRAGMA journal_mode=WAL", ()).await?;
    conn.query("PRAGMA synchronous=NORMAL", ()).await?;
    conn.query("PRAGMA foreign_keys=ON", ()).await?;
    Ok(())
}

async fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            profile_image TEXT,
            banner_image TEXT,
            bio TEXT
        );

        CREATE TABLE IF NOT EXISTS videos (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            channel TEXT NOT NULL,
            filename TEXT NOT NULL,
            thumbnail TEXT,
            views INTEGER NOT NULL DEFAULT 0,
            likes INTEGER NOT NULL DEFAULT 0,
            dislikes INTEGER NOT NULL DEFAULT 0,
            duration TEXT NOT NULL DEFAULT '0:00',
            upload_time TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS subscriptions (
            follower_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            channel TEXT NOT NULL,
            PRIMARY KEY (follower_id, channel)
        );

        CREATE TABLE IF NOT EXISTS video_likes (
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            video_id INTEGER NOT NULL REFERENCES videos(id) ON DELETE CASCADE,
            PRIMARY KEY (user_id, video_id)
        );

        CREATE TABLE IF NOT EXISTS video_dislikes (
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            video_id INTEGER NOT NULL REFERENCES videos(id) ON DELETE CASCADE,
            PRIMARY KEY (user_id, video_id)
        );

        CREATE TABLE IF NOT EXISTS comments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            video_id INTEGER NOT NULL REFERENCES videos(id) ON DELETE CASCADE,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            username TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_comments_video ON comments(video_id);
        CREATE INDEX IF NOT EXISTS idx_subscriptions_channel ON subscriptions(channel);
        CREATE INDEX IF NOT EXISTS idx_videos_channel ON videos(channel);
        "#,
    )
    .await?;
    Ok(())
}

/// Wrapper around the SQLite connection. Clones share the underlying
/// connection, which is how the handlers use it.
#[derive(Clone)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Opens (and if necessary creates) the database and ensures the
    /// expected schema exists.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
        }
        let db = Builder::new_local(path)
            .build()
            .await
            .with_context(|| format!("opening database {}", path.display()))?;
        let conn = db.connect()?;
        configure_connection(&conn).await?;
        ensure_schema(&conn).await?;
        Ok(Self { conn })
    }

    // --- users ---------------------------------------------------------

    pub async fn create_user(&self, username: &str, password_hash: &str) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO users (username, password_hash) VALUES (?1, ?2)",
                params![username, password_hash],
            )
            .await?;
        Ok(self.conn.last_insert_rowid())
    }

    pub async fn user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, username, password_hash, profile_image, banner_image, bio
                 FROM users WHERE username = ?1",
            )
            .await?;
        let mut rows = stmt.query([username]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_user(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, username, password_hash, profile_image, banner_image, bio
                 FROM users WHERE id = ?1",
            )
            .await?;
        let mut rows = stmt.query(params![id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_user(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn set_password_hash(&self, user_id: i64, password_hash: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE users SET password_hash = ?1 WHERE id = ?2",
                params![password_hash, user_id],
            )
            .await?;
        Ok(())
    }

    pub async fn set_profile_image(&self, user_id: i64, filename: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE users SET profile_image = ?1 WHERE id = ?2",
                params![filename, user_id],
            )
            .await?;
        Ok(())
    }

    pub async fn set_banner_image(&self, user_id: i64, filename: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE users SET banner_image = ?1 WHERE id = ?2",
                params![filename, user_id],
            )
            .await?;
        Ok(())
    }

    pub async fn set_bio(&self, user_id: i64, bio: &str) -> Result<()> {
        self.conn
            .execute("UPDATE users SET bio = ?1 WHERE id = ?2", params![bio, user_id])
            .await?;
        Ok(())
    }

    /// Removes the user's video rows (matched by channel string, since
    /// videos carry no user FK) and the user row itself in one transaction.
    /// Subscriptions, comments and reactions go via FK cascade. Files are
    /// the caller's responsibility.
    pub async fn delete_user_cascade(&self, user_id: i64, username: &str) -> Result<()> {
        let tx = self.conn.transaction().await?;
        tx.execute("DELETE FROM videos WHERE channel = ?1", params![username])
            .await?;
        tx.execute("DELETE FROM users WHERE id = ?1", params![user_id])
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn search_users(&self, query: &str) -> Result<Vec<ChannelInfo>> {
        let pattern = format!("%{query}%");
        let mut stmt = self
            .conn
            .prepare(
                "SELECT u.id, u.username,
                        (SELECT COUNT(*) FROM subscriptions s WHERE s.channel = u.username)
                 FROM users u
                 WHERE u.username LIKE ?1
                 ORDER BY u.id",
            )
            .await?;
        let mut rows = stmt.query([pattern]).await?;
        let mut users = Vec::new();
        while let Some(row) = rows.next().await? {
            users.push(row_to_channel_info(&row)?);
        }
        Ok(users)
    }

    /// Most recently created users first (highest id first).
    pub async fn recent_users(&self, limit: i64) -> Result<Vec<ChannelInfo>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT u.id, u.username,
                        (SELECT COUNT(*) FROM subscriptions s WHERE s.channel = u.username)
                 FROM users u
                 ORDER BY u.id DESC
                 LIMIT ?1",
            )
            .await?;
        let mut rows = stmt.query(params![limit]).await?;
        let mut users = Vec::new();
        while let Some(row) = rows.next().await? {
            users.push(row_to_channel_info(&row)?);
        }
        Ok(users)
    }

    // --- videos --------------------------------------------------------

    pub async fn insert_video(&self, video: &NewVideo) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO videos (title, description, channel, filename, thumbnail,
                                     duration, upload_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    video.title.as_str(),
                    video.description.as_str(),
                    video.channel.as_str(),
                    video.filename.as_str(),
                    video.thumbnail.as_deref(),
                    video.duration.as_str(),
                    video.upload_time.as_str(),
                ],
            )
            .await?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Catalog listing, newest upload first. With a query, matches a
    /// case-insensitive substring against title, description or channel.
    pub async fn list_videos(&self, query: Option<&str>) -> Result<Vec<VideoRow>> {
        let mut videos = Vec::new();
        if let Some(query) = query {
            let pattern = format!("%{query}%");
            let mut stmt = self
                .conn
                .prepare(&format!(
                    "{VIDEO_SELECT} WHERE title LIKE ?1 OR description LIKE ?1 OR channel LIKE ?1
                     ORDER BY upload_time DESC, id DESC"
                ))
                .await?;
            let mut rows = stmt.query([pattern]).await?;
            while let Some(row) = rows.next().await? {
                videos.push(row_to_video(&row)?);
            }
        } else {
            let mut stmt = self
                .conn
                .prepare(&format!("{VIDEO_SELECT} ORDER BY upload_time DESC, id DESC"))
                .await?;
            let mut rows = stmt.query(params![]).await?;
            while let Some(row) = rows.next().await? {
                videos.push(row_to_video(&row)?);
            }
        }
        Ok(videos)
    }

    pub async fn video_by_id(&self, id: i64) -> Result<Option<VideoRow>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{VIDEO_SELECT} WHERE id = ?1"))
            .await?;
        let mut rows = stmt.query(params![id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_video(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn videos_by_channel(&self, channel: &str) -> Result<Vec<VideoRow>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{VIDEO_SELECT} WHERE channel = ?1 ORDER BY upload_time DESC, id DESC"
            ))
            .await?;
        let mut rows = stmt.query([channel]).await?;
        let mut videos = Vec::new();
        while let Some(row) = rows.next().await? {
            videos.push(row_to_video(&row)?);
        }
        Ok(videos)
    }

    /// Bumps the view counter by one and returns the updated row, or `None`
    /// when the video does not exist. Every call counts; there is no viewer
    /// de-duplication.
    pub async fn record_view(&self, id: i64) -> Result<Option<VideoRow>> {
        let changed = self
            .conn
            .execute("UPDATE videos SET views = views + 1 WHERE id = ?1", params![id])
            .await?;
        if changed == 0 {
            return Ok(None);
        }
        self.video_by_id(id).await
    }

    /// Partial text update; `None` fields are left untouched.
    pub async fn update_video_text(
        &self,
        id: i64,
        title: Option<&str>,
        description: Option<&str>,
        duration: Option<&str>,
    ) -> Result<()> {
        if let Some(title) = title {
            self.conn
                .execute("UPDATE videos SET title = ?1 WHERE id = ?2", params![title, id])
                .await?;
        }
        if let Some(description) = description {
            self.conn
                .execute(
                    "UPDATE videos SET description = ?1 WHERE id = ?2",
                    params![description, id],
                )
                .await?;
        }
        if let Some(duration) = duration {
            self.conn
                .execute(
                    "UPDATE videos SET duration = ?1 WHERE id = ?2",
                    params![duration, id],
                )
                .await?;
        }
        Ok(())
    }

    pub async fn set_video_thumbnail(&self, id: i64, filename: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE videos SET thumbnail = ?1 WHERE id = ?2",
                params![filename, id],
            )
            .await?;
        Ok(())
    }

    /// Deletes the row; comments and reactions follow via FK cascade.
    pub async fn delete_video(&self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM videos WHERE id = ?1", params![id])
            .await?;
        Ok(())
    }

    // --- reactions -----------------------------------------------------

    pub async fn toggle_like(&self, user_id: i64, video_id: i64) -> Result<Option<ReactionCounts>> {
        self.toggle_reaction(user_id, video_id, Reaction::Like).await
    }

    pub async fn toggle_dislike(
        &self,
        user_id: i64,
        video_id: i64,
    ) -> Result<Option<ReactionCounts>> {
        self.toggle_reaction(user_id, video_id, Reaction::Dislike).await
    }

    /// One atomic transition of the {neutral, liked, disliked} state
    /// machine. Activating one side first clears the other, so at most one
    /// reaction row exists per (user, video). Counters mirror the row sets
    /// and are floored at zero.
    async fn toggle_reaction(
        &self,
        user_id: i64,
        video_id: i64,
        reaction: Reaction,
    ) -> Result<Option<ReactionCounts>> {
        let tx = self.conn.transaction().await?;

        let mut rows = tx
            .query("SELECT id FROM videos WHERE id = ?1", params![video_id])
            .await?;
        if rows.next().await?.is_none() {
            return Ok(None);
        }

        let active = if reaction_exists(&tx, reaction, user_id, video_id).await? {
            remove_reaction(&tx, reaction, user_id, video_id).await?;
            false
        } else {
            if reaction_exists(&tx, reaction.opposite(), user_id, video_id).await? {
                remove_reaction(&tx, reaction.opposite(), user_id, video_id).await?;
            }
            tx.execute(
                &format!(
                    "INSERT INTO {} (user_id, video_id) VALUES (?1, ?2)",
                    reaction.table()
                ),
                params![user_id, video_id],
            )
            .await?;
            tx.execute(
                &format!(
                    "UPDATE videos SET {counter} = {counter} + 1 WHERE id = ?1",
                    counter = reaction.counter()
                ),
                params![video_id],
            )
            .await?;
            true
        };

        let mut rows = tx
            .query(
                "SELECT likes, dislikes FROM videos WHERE id = ?1",
                params![video_id],
            )
            .await?;
        let row = rows.next().await?.context("video vanished mid-toggle")?;
        let counts = ReactionCounts {
            likes: row.get(0)?,
            dislikes: row.get(1)?,
            active,
        };
        tx.commit().await?;
        Ok(Some(counts))
    }

    // --- subscriptions -------------------------------------------------

    /// Flips the (follower, channel) edge and returns the resulting state.
    pub async fn toggle_subscription(&self, follower_id: i64, channel: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM subscriptions WHERE follower_id = ?1 AND channel = ?2",
                params![follower_id, channel],
            )
            .await?;
        if removed > 0 {
            return Ok(false);
        }
        self.conn
            .execute(
                "INSERT INTO subscriptions (follower_id, channel) VALUES (?1, ?2)",
                params![follower_id, channel],
            )
            .await?;
        Ok(true)
    }

    pub async fn is_subscribed(&self, follower_id: i64, channel: &str) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare("SELECT 1 FROM subscriptions WHERE follower_id = ?1 AND channel = ?2")
            .await?;
        let mut rows = stmt.query(params![follower_id, channel]).await?;
        Ok(rows.next().await?.is_some())
    }

    pub async fn subscriptions_for(&self, follower_id: i64) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT channel FROM subscriptions WHERE follower_id = ?1 ORDER BY channel")
            .await?;
        let mut rows = stmt.query(params![follower_id]).await?;
        let mut channels = Vec::new();
        while let Some(row) = rows.next().await? {
            channels.push(row.get(0)?);
        }
        Ok(channels)
    }

    pub async fn subscriber_count(&self, channel: &str) -> Result<i64> {
        let mut stmt = self
            .conn
            .prepare("SELECT COUNT(*) FROM subscriptions WHERE channel = ?1")
            .await?;
        let mut rows = stmt.query([channel]).await?;
        let row = rows.next().await?.context("COUNT returned no row")?;
        Ok(row.get(0)?)
    }

    // --- comments ------------------------------------------------------

    pub async fn insert_comment(
        &self,
        video_id: i64,
        user_id: i64,
        username: &str,
        content: &str,
        created_at: &str,
    ) -> Result<CommentRow> {
        self.conn
            .execute(
                "INSERT INTO comments (video_id, user_id, username, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![video_id, user_id, username, content, created_at],
            )
            .await?;
        let id = self.conn.last_insert_rowid();
        Ok(CommentRow {
            id,
            video_id,
            user_id,
            username: username.to_string(),
            content: content.to_string(),
            created_at: created_at.to_string(),
        })
    }

    /// Newest comments first.
    pub async fn comments_for_video(&self, video_id: i64) -> Result<Vec<CommentRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, video_id, user_id, username, content, created_at
                 FROM comments WHERE video_id = ?1
                 ORDER BY created_at DESC, id DESC",
            )
            .await?;
        let mut rows = stmt.query(params![video_id]).await?;
        let mut comments = Vec::new();
        while let Some(row) = rows.next().await? {
            comments.push(row_to_comment(&row)?);
        }
        Ok(comments)
    }

    pub async fn comment_by_id(&self, id: i64) -> Result<Option<CommentRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, video_id, user_id, username, content, created_at
                 FROM comments WHERE id = ?1",
            )
            .await?;
        let mut rows = stmt.query(params![id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_comment(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn update_comment_content(&self, id: i64, content: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE comments SET content = ?1 WHERE id = ?2",
                params![content, id],
            )
            .await?;
        Ok(())
    }

    pub async fn delete_comment(&self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM comments WHERE id = ?1", params![id])
            .await?;
        Ok(())
    }
}

const VIDEO_SELECT: &str = "SELECT id, title, description, channel, filename, thumbnail,
                                   views, likes, dislikes, duration, upload_time
                            FROM videos";

async fn reaction_exists(
    tx: &Transaction,
    reaction: Reaction,
    user_id: i64,
    video_id: i64,
) -> Result<bool> {
    let mut rows = tx
        .query(
            &format!(
                "SELECT 1 FROM {} WHERE user_id = ?1 AND video_id = ?2",
                reaction.table()
            ),
            params![user_id, video_id],
        )
        .await?;
    Ok(rows.next().await?.is_some())
}

async fn remove_reaction(
    tx: &Transaction,
    reaction: Reaction,
    user_id: i64,
    video_id: i64,
) -> Result<()> {
    tx.execute(
        &format!(
            "DELETE FROM {} WHERE user_id = ?1 AND video_id = ?2",
            reaction.table()
        ),
        params![user_id, video_id],
    )
    .await?;
    tx.execute(
        &format!(
            "UPDATE videos SET {counter} = MAX({counter} - 1, 0) WHERE id = ?1",
            counter = reaction.counter()
        ),
        params![video_id],
    )
    .await?;
    Ok(())
}

fn row_to_user(row: &Row) -> Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        profile_image: row.get(3)?,
        banner_image: row.get(4)?,
        bio: row.get(5)?,
    })
}

fn row_to_video(row: &Row) -> Result<VideoRow> {
    Ok(VideoRow {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        channel: row.get(3)?,
        filename: row.get(4)?,
        thumbnail: row.get(5)?,
        views: row.get(6)?,
        likes: row.get(7)?,
        dislikes: row.get(8)?,
        duration: row.get(9)?,
        upload_time: row.get(10)?,
    })
}

fn row_to_channel_info(row: &Row) -> Result<ChannelInfo> {
    Ok(ChannelInfo {
        id: row.get(0)?,
        username: row.get(1)?,
        subscriber_count: row.get(2)?,
    })
}

fn row_to_comment(row: &Row) -> Result<CommentRow> {
    Ok(CommentRow {
        id: row.get(0)?,
        video_id: row.get(1)?,
        user_id: row.get(2)?,
        username: row.get(3)?,
        content: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn create_store() -> Result<(tempfile::TempDir, Store)> {
        let dir = tempdir()?;
        let store = Store::open(&dir.path().join("db/videos.db")).await?;
        Ok((dir, store))
    }

    fn sample_video(channel: &str, stamp: &str) -> NewVideo {
        NewVideo {
            title: format!("clip by {channel}"),
            description: "a description".into(),
            channel: channel.into(),
            filename: "20260829_120000_clip.mp4".into(),
            thumbnail: Some("20260829_120000_thumb.jpg".into()),
            duration: "3:21".into(),
            upload_time: stamp.into(),
        }
    }

    async fn seed_user(store: &Store, name: &str) -> i64 {
        store.create_user(name, "$argon2id$fake").await.unwrap()
    }

    #[tokio::test]
    async fn user_creation_and_lookup() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let id = store.create_user("alice", "hash-a").await?;

        let by_name = store.user_by_username("alice").await?.expect("found");
        assert_eq!(by_name.id, id);
        assert_eq!(by_name.password_hash, "hash-a");
        assert!(by_name.profile_image.is_none());

        assert!(store.user_by_username("nobody").await?.is_none());
        assert!(store.user_by_id(id + 100).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_usernames_are_rejected_by_the_schema() -> Result<()> {
        let (_dir, store) = create_store().await?;
        store.create_user("alice", "h1").await?;
        assert!(store.create_user("alice", "h2").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn record_view_increments_by_exactly_one() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let id = store
            .insert_video(&sample_video("alice", "2026-08-29T12:00:00+09:00"))
            .await?;

        for expected in 1..=3 {
            let video = store.record_view(id).await?.expect("video exists");
            assert_eq!(video.views, expected);
        }
        assert!(store.record_view(id + 999).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn listing_orders_newest_first_and_filters_substrings() -> Result<()> {
        let (_dir, store) = create_store().await?;
        store
            .insert_video(&sample_video("alice", "2026-08-01T09:00:00+09:00"))
            .await?;
        let newer = store
            .insert_video(&sample_video("bob", "2026-08-20T09:00:00+09:00"))
            .await?;

        let all = store.list_videos(None).await?;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, newer, "newest upload first");

        // Substring match applies to title, description and channel alike.
        let by_channel = store.list_videos(Some("BOB")).await?;
        assert_eq!(by_channel.len(), 1);
        assert_eq!(by_channel[0].channel, "bob");

        let by_description = store.list_videos(Some("a descr")).await?;
        assert_eq!(by_description.len(), 2);

        assert!(store.list_videos(Some("zzz")).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn partial_text_update_leaves_absent_fields_alone() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let id = store
            .insert_video(&sample_video("alice", "2026-08-29T12:00:00+09:00"))
            .await?;

        store.update_video_text(id, Some("new title"), None, Some("9:59")).await?;
        let video = store.video_by_id(id).await?.unwrap();
        assert_eq!(video.title, "new title");
        assert_eq!(video.description, "a description");
        assert_eq!(video.duration, "9:59");
        Ok(())
    }

    #[tokio::test]
    async fn like_twice_returns_to_neutral_with_original_counters() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let user = seed_user(&store, "alice").await;
        let video = store
            .insert_video(&sample_video("bob", "2026-08-29T12:00:00+09:00"))
            .await?;

        let first = store.toggle_like(user, video).await?.unwrap();
        assert_eq!(first, ReactionCounts { likes: 1, dislikes: 0, active: true });

        let second = store.toggle_like(user, video).await?.unwrap();
        assert_eq!(second, ReactionCounts { likes: 0, dislikes: 0, active: false });
        Ok(())
    }

    #[tokio::test]
    async fn switching_reaction_clears_the_other_side() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let user = seed_user(&store, "alice").await;
        let video = store
            .insert_video(&sample_video("bob", "2026-08-29T12:00:00+09:00"))
            .await?;

        store.toggle_like(user, video).await?.unwrap();
        let swapped = store.toggle_dislike(user, video).await?.unwrap();
        assert_eq!(swapped, ReactionCounts { likes: 0, dislikes: 1, active: true });

        let back = store.toggle_like(user, video).await?.unwrap();
        assert_eq!(back, ReactionCounts { likes: 1, dislikes: 0, active: true });
        Ok(())
    }

    #[tokio::test]
    async fn reactions_on_missing_videos_return_none() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let user = seed_user(&store, "alice").await;
        assert!(store.toggle_like(user, 12345).await?.is_none());
        assert!(store.toggle_dislike(user, 12345).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn independent_users_keep_independent_reactions() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let a = seed_user(&store, "alice").await;
        let b = seed_user(&store, "bob").await;
        let video = store
            .insert_video(&sample_video("carol", "2026-08-29T12:00:00+09:00"))
            .await?;

        store.toggle_like(a, video).await?.unwrap();
        let counts = store.toggle_dislike(b, video).await?.unwrap();
        assert_eq!(counts.likes, 1);
        assert_eq!(counts.dislikes, 1);
        Ok(())
    }

    #[tokio::test]
    async fn subscription_toggle_and_counts() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let a = seed_user(&store, "alice").await;
        let b = seed_user(&store, "bob").await;

        assert!(store.toggle_subscription(a, "carol").await?);
        assert!(store.toggle_subscription(b, "carol").await?);
        assert_eq!(store.subscriber_count("carol").await?, 2);
        assert!(store.is_subscribed(a, "carol").await?);

        // Toggling again removes the edge.
        assert!(!store.toggle_subscription(a, "carol").await?);
        assert_eq!(store.subscriber_count("carol").await?, 1);
        assert!(!store.is_subscribed(a, "carol").await?);

        assert_eq!(store.subscriptions_for(b).await?, vec!["carol".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn comments_list_newest_first() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let user = seed_user(&store, "alice").await;
        let video = store
            .insert_video(&sample_video("bob", "2026-08-29T12:00:00+09:00"))
            .await?;

        store
            .insert_comment(video, user, "alice", "first", "2026-08-29T12:01:00+09:00")
            .await?;
        let latest = store
            .insert_comment(video, user, "alice", "second", "2026-08-29T12:02:00+09:00")
            .await?;

        let comments = store.comments_for_video(video).await?;
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].id, latest.id);
        assert_eq!(comments[0].content, "second");
        Ok(())
    }

    #[tokio::test]
    async fn comment_update_and_delete() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let user = seed_user(&store, "alice").await;
        let video = store
            .insert_video(&sample_video("bob", "2026-08-29T12:00:00+09:00"))
            .await?;
        let comment = store
            .insert_comment(video, user, "alice", "typo", "2026-08-29T12:01:00+09:00")
            .await?;

        store.update_comment_content(comment.id, "fixed").await?;
        let fetched = store.comment_by_id(comment.id).await?.unwrap();
        assert_eq!(fetched.content, "fixed");

        store.delete_comment(comment.id).await?;
        assert!(store.comment_by_id(comment.id).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn deleting_a_video_cascades_to_comments_and_reactions() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let user = seed_user(&store, "alice").await;
        let video = store
            .insert_video(&sample_video("bob", "2026-08-29T12:00:00+09:00"))
            .await?;
        store.toggle_like(user, video).await?.unwrap();
        let comment = store
            .insert_comment(video, user, "alice", "hi", "2026-08-29T12:01:00+09:00")
            .await?;

        store.delete_video(video).await?;
        assert!(store.video_by_id(video).await?.is_none());
        assert!(store.comment_by_id(comment.id).await?.is_none());
        // Re-inserting a video under the same id space must start clean.
        assert!(store.comments_for_video(video).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn account_deletion_cascades_rows() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let alice = seed_user(&store, "alice").await;
        let bob = seed_user(&store, "bob").await;

        let own_video = store
            .insert_video(&sample_video("alice", "2026-08-29T12:00:00+09:00"))
            .await?;
        let other_video = store
            .insert_video(&sample_video("bob", "2026-08-29T12:00:00+09:00"))
            .await?;

        store.toggle_subscription(alice, "bob").await?;
        store.toggle_like(alice, other_video).await?.unwrap();
        store
            .insert_comment(other_video, alice, "alice", "bye", "2026-08-29T12:01:00+09:00")
            .await?;

        store.delete_user_cascade(alice, "alice").await?;

        assert!(store.user_by_username("alice").await?.is_none());
        assert!(store.video_by_id(own_video).await?.is_none());
        // Cascade cleared alice's rows against bob's content.
        assert!(store.comments_for_video(other_video).await?.is_empty());
        assert_eq!(store.subscriber_count("bob").await?, 0);
        // Bob's own video survives. FK cascade removes alice's like row but
        // leaves the denormalized counter as-is.
        assert!(store.video_by_id(other_video).await?.is_some());
        let survivor = store.video_by_id(other_video).await?.unwrap();
        assert_eq!(survivor.likes, 1);
        Ok(())
    }

    #[tokio::test]
    async fn user_search_and_recent_listing() -> Result<()> {
        let (_dir, store) = create_store().await?;
        for name in ["alpha", "beta", "alphabet"] {
            seed_user(&store, name).await;
        }
        let follower = seed_user(&store, "follower").await;
        store.toggle_subscription(follower, "alpha").await?;

        let hits = store.search_users("alpha").await?;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].username, "alpha");
        assert_eq!(hits[0].subscriber_count, 1);
        assert_eq!(hits[1].username, "alphabet");
        assert_eq!(hits[1].subscriber_count, 0);

        let alpha = store.user_by_username("alpha").await?.unwrap();
        assert_eq!(hits[0].id, alpha.id, "search rows carry the user id");

        let recent = store.recent_users(2).await?;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].username, "follower", "newest signup first");
        Ok(())
    }
}
