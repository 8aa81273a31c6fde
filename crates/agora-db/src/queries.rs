use agora_types::DEFAULT_PROFILE_PICTURE;
use agora_types::pagination::Page;
use chrono::Utc;
use rusqlite::{Connection, Row, params};

use crate::error::unique_violation;
use crate::models::{FeedRow, PostRow, UserRow, UserSummaryRow};
use crate::{Database, Result};

const USER_COLUMNS: &str = "id, username, email, password, profile_picture";

const POST_COLUMNS: &str = "id, author_id, content, created_at, parent_id, root_id";

// LEFT JOIN keeps posts whose author has been deleted.
const FEED_SELECT: &str = "SELECT p.id, p.author_id, p.content, p.created_at, p.parent_id, p.root_id,
            u.username, u.profile_picture
     FROM posts p
     LEFT JOIN users u ON p.author_id = u.id";

impl Database {
    // -- Users --

    /// Inserts a user and returns its id. A taken username or email surfaces
    /// as `DbError::Conflict` straight from the UNIQUE constraint.
    pub fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
        profile_picture: Option<&str>,
    ) -> Result<i64> {
        let picture = profile_picture.unwrap_or(DEFAULT_PROFILE_PICTURE);
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO users (username, email, password, profile_picture) VALUES (?1, ?2, ?3, ?4)",
                params![username, email, password_hash, picture],
            )
            .map_err(unique_violation)?;
            Ok(tx.last_insert_rowid())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", &username))
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", &id))
    }

    pub fn is_username_taken(&self, username: &str) -> Result<bool> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1)",
                [username],
                |row| row.get(0),
            )?)
        })
    }

    pub fn is_email_taken(&self, email: &str) -> Result<bool> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1)",
                [email],
                |row| row.get(0),
            )?)
        })
    }

    /// Replaces the password hash if `verify_old` accepts the stored one.
    /// Returns `false` (nothing written) for an unknown user, a rejected old
    /// password, or a hash that changed while `verify_old` ran.
    ///
    /// `verify_old` runs without the connection lock; the update only applies
    /// if the stored hash is still the one that was verified.
    pub fn change_password<F>(&self, username: &str, verify_old: F, new_hash: &str) -> Result<bool>
    where
        F: FnOnce(&str) -> bool,
    {
        let stored: Option<String> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT password FROM users WHERE username = ?1",
                [username],
                |row| row.get(0),
            )
            .optional()
        })?;

        let Some(stored) = stored else {
            return Ok(false);
        };
        if !verify_old(&stored) {
            return Ok(false);
        }

        self.with_tx(|tx| {
            let changed = tx.execute(
                "UPDATE users SET password = ?1 WHERE username = ?2 AND password = ?3",
                params![new_hash, username, stored],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn update_profile_picture(&self, username: &str, path: &str) -> Result<bool> {
        self.with_tx(|tx| {
            let changed = tx.execute(
                "UPDATE users SET profile_picture = ?1 WHERE username = ?2",
                params![path, username],
            )?;
            Ok(changed > 0)
        })
    }

    /// Deletes the user row only. Their posts stay behind.
    pub fn delete_user(&self, username: &str) -> Result<bool> {
        self.with_tx(|tx| {
            let changed = tx.execute("DELETE FROM users WHERE username = ?1", [username])?;
            Ok(changed > 0)
        })
    }

    /// Every user without the password column.
    pub fn list_users(&self) -> Result<Vec<UserSummaryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, email, profile_picture FROM users ORDER BY id",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(UserSummaryRow {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        email: row.get(2)?,
                        profile_picture: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Every user including password hashes. Internal tooling only.
    pub fn dump_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))?;
            let rows = stmt
                .query_map([], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Posts --

    /// Without `root_id` this starts a new thread and `parent_id` is ignored.
    /// With one it is a reply whose parent defaults to the root.
    pub fn create_post(
        &self,
        author_id: i64,
        content: &str,
        parent_id: Option<i64>,
        root_id: Option<i64>,
    ) -> Result<PostRow> {
        let created_at = Utc::now().timestamp();
        let (parent_id, root_id) = match root_id {
            None => (None, None),
            Some(root) => (Some(parent_id.unwrap_or(root)), Some(root)),
        };

        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO posts (author_id, content, created_at, parent_id, root_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![author_id, content, created_at, parent_id, root_id],
            )?;
            Ok(PostRow {
                id: tx.last_insert_rowid(),
                author_id,
                content: content.to_string(),
                created_at,
                parent_id,
                root_id,
            })
        })
    }

    pub fn get_post(&self, id: i64) -> Result<Option<PostRow>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {POST_COLUMNS} FROM posts WHERE id = ?1"),
                    [id],
                    post_from_row,
                )
                .optional()?)
        })
    }

    pub fn get_feed_post(&self, id: i64) -> Result<Option<FeedRow>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(&format!("{FEED_SELECT} WHERE p.id = ?1"), [id], feed_from_row)
                .optional()?)
        })
    }

    /// Deletes one post. Replies pointing at it are left in place.
    pub fn delete_post(&self, id: i64) -> Result<bool> {
        self.with_tx(|tx| {
            let changed = tx.execute("DELETE FROM posts WHERE id = ?1", [id])?;
            Ok(changed > 0)
        })
    }

    /// Thread starters, newest first.
    pub fn list_root_posts(&self, page: Page) -> Result<Vec<FeedRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{FEED_SELECT}
                 WHERE p.root_id IS NULL
                 ORDER BY p.created_at DESC, p.id DESC
                 LIMIT ?1 OFFSET ?2"
            ))?;
            let rows = stmt
                .query_map(
                    params![page.limit() as i64, page.offset() as i64],
                    feed_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_root_posts(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let n: i64 =
                conn.query_row("SELECT COUNT(*) FROM posts WHERE root_id IS NULL", [], |r| {
                    r.get(0)
                })?;
            Ok(n as u64)
        })
    }

    /// Every reply in the thread rooted at `root_id`, at any depth, oldest
    /// first. `parent_id` on each row tells callers how to nest them.
    pub fn list_replies(&self, root_id: i64, page: Page) -> Result<Vec<FeedRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{FEED_SELECT}
                 WHERE p.root_id = ?1
                 ORDER BY p.created_at ASC, p.id ASC
                 LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt
                .query_map(
                    params![root_id, page.limit() as i64, page.offset() as i64],
                    feed_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_replies(&self, root_id: i64) -> Result<u64> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM posts WHERE root_id = ?1",
                [root_id],
                |r| r.get(0),
            )?;
            Ok(n as u64)
        })
    }
}

fn query_user(
    conn: &Connection,
    column: &str,
    value: &dyn rusqlite::ToSql,
) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1"
    ))?;
    let row = stmt.query_row([value], user_from_row).optional()?;
    Ok(row)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        profile_picture: row.get(4)?,
    })
}

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<PostRow> {
    Ok(PostRow {
        id: row.get(0)?,
        author_id: row.get(1)?,
        content: row.get(2)?,
        created_at: row.get(3)?,
        parent_id: row.get(4)?,
        root_id: row.get(5)?,
    })
}

fn feed_from_row(row: &Row<'_>) -> rusqlite::Result<FeedRow> {
    Ok(FeedRow {
        post: post_from_row(row)?,
        author_username: row.get(6)?,
        author_picture: row.get(7)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DbError, UniqueField};

    fn db_with_alice() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let id = db.create_user("alice", "a@x.com", "hash-p", None).unwrap();
        (db, id)
    }

    #[test]
    fn create_and_fetch_user() {
        let (db, id) = db_with_alice();

        let user = db.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.email, "a@x.com");
        assert_eq!(user.password, "hash-p");
        assert_eq!(user.profile_picture.as_deref(), Some(DEFAULT_PROFILE_PICTURE));

        assert_eq!(db.get_user_by_id(id).unwrap().unwrap().username, "alice");
        assert!(db.get_user_by_username("bob").unwrap().is_none());
    }

    #[test]
    fn taken_predicates_flip_after_signup() {
        let db = Database::open_in_memory().unwrap();
        assert!(!db.is_username_taken("alice").unwrap());
        assert!(!db.is_email_taken("a@x.com").unwrap());

        db.create_user("alice", "a@x.com", "h", None).unwrap();
        assert!(db.is_username_taken("alice").unwrap());
        assert!(db.is_email_taken("a@x.com").unwrap());
    }

    #[test]
    fn duplicate_username_or_email_is_a_conflict() {
        let (db, _) = db_with_alice();

        match db.create_user("alice", "other@x.com", "h", None) {
            Err(DbError::Conflict(field)) => assert_eq!(field, UniqueField::Username),
            other => panic!("expected username conflict, got {:?}", other.map(|_| ())),
        }
        match db.create_user("bob", "a@x.com", "h", None) {
            Err(DbError::Conflict(field)) => assert_eq!(field, UniqueField::Email),
            other => panic!("expected email conflict, got {:?}", other.map(|_| ())),
        }
        assert_eq!(db.dump_users().unwrap().len(), 1);
    }

    #[test]
    fn change_password_requires_old_one() {
        let (db, _) = db_with_alice();

        let changed = db
            .change_password("alice", |stored| stored == "wrong", "hash-new")
            .unwrap();
        assert!(!changed);
        assert_eq!(db.get_user_by_username("alice").unwrap().unwrap().password, "hash-p");

        let changed = db
            .change_password("alice", |stored| stored == "hash-p", "hash-new")
            .unwrap();
        assert!(changed);
        assert_eq!(db.get_user_by_username("alice").unwrap().unwrap().password, "hash-new");

        assert!(!db.change_password("nobody", |_| true, "x").unwrap());
    }

    #[test]
    fn change_password_verifier_runs_unlocked() {
        let (db, _) = db_with_alice();

        // Other requests can use the database while the old password is checked.
        let changed = db
            .change_password(
                "alice",
                |stored| db.is_username_taken("alice").unwrap() && stored == "hash-p",
                "hash-new",
            )
            .unwrap();
        assert!(changed);
    }

    #[test]
    fn change_password_loses_to_a_concurrent_change() {
        let (db, _) = db_with_alice();

        let changed = db
            .change_password(
                "alice",
                |stored| {
                    assert!(db.change_password("alice", |_| true, "hash-other").unwrap());
                    stored == "hash-p"
                },
                "hash-new",
            )
            .unwrap();
        assert!(!changed);
        assert_eq!(db.get_user_by_username("alice").unwrap().unwrap().password, "hash-other");
    }

    #[test]
    fn update_picture_and_delete() {
        let (db, _) = db_with_alice();

        assert!(db.update_profile_picture("alice", "images/abc.png").unwrap());
        assert_eq!(
            db.get_user_by_username("alice").unwrap().unwrap().profile_picture.as_deref(),
            Some("images/abc.png")
        );
        assert!(!db.update_profile_picture("bob", "images/abc.png").unwrap());

        assert!(db.delete_user("alice").unwrap());
        assert!(!db.delete_user("alice").unwrap());
        assert!(db.get_user_by_username("alice").unwrap().is_none());
    }

    #[test]
    fn list_users_omits_nothing_but_passwords() {
        let (db, _) = db_with_alice();
        db.create_user("bob", "b@x.com", "h2", Some("images/b.png")).unwrap();

        let users = db.list_users().unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[1].username, "bob");
        assert_eq!(users[1].profile_picture.as_deref(), Some("images/b.png"));

        let dumped = db.dump_users().unwrap();
        assert_eq!(dumped[1].password, "h2");
    }

    #[test]
    fn root_post_has_no_references() {
        let (db, author) = db_with_alice();

        let post = db.create_post(author, "hi", None, None).unwrap();
        assert_eq!(post.parent_id, None);
        assert_eq!(post.root_id, None);
        assert_eq!(db.get_post(post.id).unwrap().unwrap(), post);

        // parent without root still starts a thread
        let post = db.create_post(author, "hi again", Some(1), None).unwrap();
        assert_eq!(post.parent_id, None);
        assert_eq!(post.root_id, None);
    }

    #[test]
    fn reply_parent_defaults_to_root() {
        let (db, author) = db_with_alice();

        let reply = db.create_post(author, "re", None, Some(5)).unwrap();
        assert_eq!(reply.root_id, Some(5));
        assert_eq!(reply.parent_id, Some(5));

        let nested = db.create_post(author, "re re", Some(reply.id), Some(5)).unwrap();
        assert_eq!(nested.root_id, Some(5));
        assert_eq!(nested.parent_id, Some(reply.id));
        assert_eq!(nested.thread_root(), 5);
    }

    #[test]
    fn root_listing_paginates_newest_first() {
        let (db, author) = db_with_alice();
        let ids: Vec<i64> = (0..15)
            .map(|i| db.create_post(author, &format!("post {i}"), None, None).unwrap().id)
            .collect();
        db.create_post(author, "a reply", None, Some(ids[0])).unwrap();

        assert_eq!(db.count_root_posts().unwrap(), 15);

        let first = db.list_root_posts(Page::new(1, 10)).unwrap();
        assert_eq!(first.len(), 10);
        let first_ids: Vec<i64> = first.iter().map(|r| r.post.id).collect();
        let expected: Vec<i64> = ids.iter().rev().take(10).copied().collect();
        assert_eq!(first_ids, expected);
        assert_eq!(first[0].author_username.as_deref(), Some("alice"));

        let second = db.list_root_posts(Page::new(2, 10)).unwrap();
        assert_eq!(second.len(), 5);
        assert_eq!(second.last().unwrap().post.id, ids[0]);

        assert!(db.list_root_posts(Page::new(3, 10)).unwrap().is_empty());
    }

    #[test]
    fn replies_are_a_flat_thread_oldest_first() {
        let (db, author) = db_with_alice();
        let root = db.create_post(author, "root", None, None).unwrap();
        let other = db.create_post(author, "other thread", None, None).unwrap();

        let r1 = db.create_post(author, "r1", None, Some(root.id)).unwrap();
        let r2 = db.create_post(author, "r2", Some(r1.id), Some(root.id)).unwrap();
        let r3 = db.create_post(author, "r3", None, Some(root.id)).unwrap();
        db.create_post(author, "elsewhere", None, Some(other.id)).unwrap();

        let replies = db.list_replies(root.id, Page::default()).unwrap();
        let ids: Vec<i64> = replies.iter().map(|r| r.post.id).collect();
        assert_eq!(ids, vec![r1.id, r2.id, r3.id]);
        assert_eq!(replies[1].post.parent_id, Some(r1.id));
        assert_eq!(db.count_replies(root.id).unwrap(), 3);

        let page = db.list_replies(root.id, Page::new(2, 2)).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].post.id, r3.id);
    }

    #[test]
    fn deleting_a_user_keeps_their_posts() {
        let (db, author) = db_with_alice();
        let post = db.create_post(author, "still here", None, None).unwrap();

        db.delete_user("alice").unwrap();

        assert_eq!(db.get_post(post.id).unwrap().unwrap().content, "still here");
        let feed = db.list_root_posts(Page::default()).unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].author_username, None);
        assert_eq!(feed[0].author_picture, None);
    }

    #[test]
    fn deleting_a_root_leaves_replies() {
        let (db, author) = db_with_alice();
        let root = db.create_post(author, "root", None, None).unwrap();
        let reply = db.create_post(author, "reply", None, Some(root.id)).unwrap();

        assert!(db.delete_post(root.id).unwrap());
        assert!(!db.delete_post(root.id).unwrap());

        assert!(db.get_post(root.id).unwrap().is_none());
        assert_eq!(db.get_post(reply.id).unwrap().unwrap().root_id, Some(root.id));
        assert_eq!(db.list_replies(root.id, Page::default()).unwrap().len(), 1);
    }

    #[test]
    fn feed_post_converts_to_view() {
        use agora_types::models::PostView;

        let (db, author) = db_with_alice();
        let post = db.create_post(author, "hello", None, None).unwrap();

        let view: PostView = db.get_feed_post(post.id).unwrap().unwrap().into();
        assert_eq!(view.author_username.as_deref(), Some("alice"));
        assert_eq!(view.author_picture, "/static/error.png");
        assert_eq!(view.created_at.timestamp(), post.created_at);
        assert!(view.is_root());
    }
}
