use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    /// The write would break a relationship invariant.
    #[error("invalid: {0}")] Invalid(&'static str),
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

pub const CROSS_POST_REPLY: &str = "A reply must belong to the same post as its parent comment";

#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Fails with `Conflict` when the username or email is taken.
    async fn create_user(&self, new: NewUser) -> RepoResult<User>;
    async fn get_user(&self, id: Id) -> RepoResult<User>;
    async fn find_user_by_email(&self, email: &str) -> RepoResult<User>;
    async fn find_user_by_verify_key(&self, key: &str) -> RepoResult<User>;
    /// Only matches when `password_reset_expires` is later than `now`.
    async fn find_user_by_reset_token(&self, digest: &str, now: DateTime<Utc>) -> RepoResult<User>;
    /// Writes every mutable field of `user` back.
    async fn save_user(&self, user: &User) -> RepoResult<User>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    /// Fails with `NotFound` when the author or the parent comment does not exist,
    /// and with `Invalid` when the parent belongs to another post.
    async fn create_comment(&self, new: NewComment) -> RepoResult<Comment>;
    async fn get_comment(&self, id: Id) -> RepoResult<Comment>;
    /// All comments of a post, oldest first, replies included.
    async fn list_comments(&self, post: Id) -> RepoResult<Vec<Comment>>;
    /// Removes the comment and its whole reply subtree.
    async fn delete_comment(&self, id: Id) -> RepoResult<()>;
}

pub trait Repo: UserRepo + CommentRepo {}

impl<T> Repo for T where T: UserRepo + CommentRepo {}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::collections::{HashMap, HashSet};
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

    const SNAPSHOT_FILE: &str = "state.json";

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        users: HashMap<Id, User>,
        comments: HashMap<Id, Comment>,
        next_id: Id,
    }

    impl State {
        fn next_id(&mut self) -> Id {
            self.next_id += 1;
            self.next_id
        }

        fn identity_taken(&self, username: &str, email: &str, except: Option<Id>) -> bool {
            self.users.values().any(|u| {
                Some(u.id) != except && (u.username == username || u.email == email)
            })
        }

        fn find_user(&self, pred: impl Fn(&User) -> bool) -> RepoResult<User> {
            self.users.values().find(|u| pred(u)).cloned().ok_or(RepoError::NotFound)
        }
    }

    /// HashMap-backed repository, optionally snapshotted to a JSON file after every write.
    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Option<Arc<PathBuf>>,
    }

    impl InMemRepo {
        /// Snapshot kept as `state.json` inside `data_dir`.
        pub fn new(data_dir: &Path) -> Self {
            Self::with_snapshot(data_dir.join(SNAPSHOT_FILE))
        }

        pub fn with_snapshot(path: PathBuf) -> Self {
            let state = Self::load_state_from(&path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Some(Arc::new(path)),
            }
        }

        /// Never touches the filesystem.
        pub fn ephemeral() -> Self {
            Self { state: Arc::new(RwLock::new(State::default())), snapshot_path: None }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        log::info!("loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        log::warn!("failed to parse snapshot '{}': {e}; starting empty", path.display());
                        State::default()
                    }
                },
                Err(e) => {
                    log::info!("no snapshot at '{}' ({e}); starting empty", path.display());
                    State::default()
                }
            }
        }

        fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
            self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
            self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        // Call with no guard held.
        fn persist(&self) {
            let Some(path) = self.snapshot_path.as_ref() else { return };
            let bytes = match self.read().map(|s| serde_json::to_vec_pretty(&*s)) {
                Ok(Ok(bytes)) => bytes,
                Ok(Err(e)) => {
                    log::error!("failed to serialize snapshot: {e}");
                    return;
                }
                Err(e) => {
                    log::error!("failed to read state for snapshot: {e}");
                    return;
                }
            };
            if let Some(dir) = path.parent() {
                let _ = std::fs::create_dir_all(dir);
            }
            if let Err(e) = std::fs::write(path.as_path(), bytes) {
                log::error!("failed to write snapshot '{}': {e}", path.display());
            }
        }
    }

    #[async_trait]
    impl UserRepo for InMemRepo {
        async fn create_user(&self, new: NewUser) -> RepoResult<User> {
            let mut s = self.write()?;
            if s.identity_taken(&new.username, &new.email, None) {
                return Err(RepoError::Conflict);
            }
            let id = s.next_id();
            let user = User {
                id,
                username: new.username,
                email: new.email,
                password_hash: new.password_hash,
                role: new.role,
                verified: false,
                email_verify_key: new.email_verify_key,
                password_reset_token: None,
                password_reset_expires: None,
                password_changed_at: None,
                created_at: Utc::now(),
            };
            s.users.insert(id, user.clone());
            drop(s);
            self.persist();
            Ok(user)
        }

        async fn get_user(&self, id: Id) -> RepoResult<User> {
            self.read()?.users.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn find_user_by_email(&self, email: &str) -> RepoResult<User> {
            self.read()?.find_user(|u| u.email == email)
        }

        async fn find_user_by_verify_key(&self, key: &str) -> RepoResult<User> {
            self.read()?.find_user(|u| u.email_verify_key.as_deref() == Some(key))
        }

        async fn find_user_by_reset_token(&self, digest: &str, now: DateTime<Utc>) -> RepoResult<User> {
            self.read()?.find_user(|u| {
                u.password_reset_token.as_deref() == Some(digest)
                    && u.password_reset_expires.is_some_and(|exp| exp > now)
            })
        }

        async fn save_user(&self, user: &User) -> RepoResult<User> {
            let mut s = self.write()?;
            if !s.users.contains_key(&user.id) {
                return Err(RepoError::NotFound);
            }
            if s.identity_taken(&user.username, &user.email, Some(user.id)) {
                return Err(RepoError::Conflict);
            }
            s.users.insert(user.id, user.clone());
            drop(s);
            self.persist();
            Ok(user.clone())
        }
    }

    #[async_trait]
    impl CommentRepo for InMemRepo {
        async fn create_comment(&self, new: NewComment) -> RepoResult<Comment> {
            let mut s = self.write()?;
            if !s.users.contains_key(&new.user) {
                return Err(RepoError::NotFound);
            }
            if let Some(parent) = new.parent_comment {
                match s.comments.get(&parent) {
                    None => return Err(RepoError::NotFound),
                    Some(p) if p.post != new.post => return Err(RepoError::Invalid(CROSS_POST_REPLY)),
                    Some(_) => {}
                }
            }
            let id = s.next_id();
            let comment = Comment {
                id,
                text: new.text,
                post: new.post,
                user: new.user,
                parent_comment: new.parent_comment,
                commented_at: Utc::now(),
            };
            s.comments.insert(id, comment.clone());
            drop(s);
            self.persist();
            Ok(comment)
        }

        async fn get_comment(&self, id: Id) -> RepoResult<Comment> {
            self.read()?.comments.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn list_comments(&self, post: Id) -> RepoResult<Vec<Comment>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.comments.values().filter(|c| c.post == post).cloned().collect();
            v.sort_by(|a, b| a.commented_at.cmp(&b.commented_at).then(a.id.cmp(&b.id)));
            Ok(v)
        }

        async fn delete_comment(&self, id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            if !s.comments.contains_key(&id) {
                return Err(RepoError::NotFound);
            }
            // collect the whole subtree
            let mut doomed: HashSet<Id> = HashSet::from([id]);
            let mut frontier = vec![id];
            while let Some(parent) = frontier.pop() {
                for c in s.comments.values() {
                    if c.parent_comment == Some(parent) && doomed.insert(c.id) {
                        frontier.push(c.id);
                    }
                }
            }
            s.comments.retain(|cid, _| !doomed.contains(cid));
            drop(s);
            self.persist();
            Ok(())
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::{Pool, Postgres};

    const USER_COLUMNS: &str = "id, username, email, password_hash, role, verified, email_verify_key, \
        password_reset_token, password_reset_expires, password_changed_at, created_at";
    const COMMENT_COLUMNS: &str = "id, text, post_id, user_id, parent_comment, commented_at";

    #[derive(sqlx::FromRow)]
    struct UserRow {
        id: Id,
        username: String,
        email: String,
        password_hash: String,
        role: String,
        verified: bool,
        email_verify_key: Option<String>,
        password_reset_token: Option<String>,
        password_reset_expires: Option<DateTime<Utc>>,
        password_changed_at: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
    }

    impl TryFrom<UserRow> for User {
        type Error = RepoError;

        fn try_from(r: UserRow) -> Result<Self, Self::Error> {
            Ok(User {
                id: r.id,
                username: r.username,
                email: r.email,
                password_hash: r.password_hash,
                role: r.role.parse().map_err(RepoError::Internal)?,
                verified: r.verified,
                email_verify_key: r.email_verify_key,
                password_reset_token: r.password_reset_token,
                password_reset_expires: r.password_reset_expires,
                password_changed_at: r.password_changed_at,
                created_at: r.created_at,
            })
        }
    }

    fn map_err(e: sqlx::Error) -> RepoError {
        match &e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => RepoError::Conflict,
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => RepoError::NotFound,
            _ => RepoError::Internal(e.to_string()),
        }
    }

    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

        async fn user_where(&self, clause: &str, bind: &str) -> RepoResult<User> {
            let row = sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE {clause}"))
                .bind(bind)
                .fetch_one(&self.pool).await.map_err(map_err)?;
            row.try_into()
        }
    }

    #[async_trait]
    impl UserRepo for PgRepo {
        async fn create_user(&self, new: NewUser) -> RepoResult<User> {
            let row = sqlx::query_as::<_, UserRow>(&format!(
                "INSERT INTO users (username, email, password_hash, role, email_verify_key) \
                 VALUES ($1,$2,$3,$4,$5) RETURNING {USER_COLUMNS}"
            ))
                .bind(&new.username)
                .bind(&new.email)
                .bind(&new.password_hash)
                .bind(new.role.as_str())
                .bind(new.email_verify_key.as_ref())
                .fetch_one(&self.pool).await.map_err(map_err)?;
            row.try_into()
        }

        async fn get_user(&self, id: Id) -> RepoResult<User> {
            let row = sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(id)
                .fetch_one(&self.pool).await.map_err(map_err)?;
            row.try_into()
        }

        async fn find_user_by_email(&self, email: &str) -> RepoResult<User> {
            self.user_where("email = $1", email).await
        }

        async fn find_user_by_verify_key(&self, key: &str) -> RepoResult<User> {
            self.user_where("email_verify_key = $1", key).await
        }

        async fn find_user_by_reset_token(&self, digest: &str, now: DateTime<Utc>) -> RepoResult<User> {
            let row = sqlx::query_as::<_, UserRow>(&format!(
                "SELECT {USER_COLUMNS} FROM users WHERE password_reset_token = $1 AND password_reset_expires > $2"
            ))
                .bind(digest)
                .bind(now)
                .fetch_one(&self.pool).await.map_err(map_err)?;
            row.try_into()
        }

        async fn save_user(&self, user: &User) -> RepoResult<User> {
            let row = sqlx::query_as::<_, UserRow>(&format!(
                "UPDATE users SET username = $2, email = $3, password_hash = $4, role = $5, verified = $6, \
                 email_verify_key = $7, password_reset_token = $8, password_reset_expires = $9, \
                 password_changed_at = $10 WHERE id = $1 RETURNING {USER_COLUMNS}"
            ))
                .bind(user.id)
                .bind(&user.username)
                .bind(&user.email)
                .bind(&user.password_hash)
                .bind(user.role.as_str())
                .bind(user.verified)
                .bind(user.email_verify_key.as_ref())
                .bind(user.password_reset_token.as_ref())
                .bind(user.password_reset_expires)
                .bind(user.password_changed_at)
                .fetch_one(&self.pool).await.map_err(map_err)?;
            row.try_into()
        }
    }

    #[async_trait]
    impl CommentRepo for PgRepo {
        async fn create_comment(&self, new: NewComment) -> RepoResult<Comment> {
            if let Some(parent) = new.parent_comment {
                let parent_post: Id = sqlx::query_scalar("SELECT post_id FROM comments WHERE id = $1")
                    .bind(parent)
                    .fetch_one(&self.pool).await.map_err(map_err)?;
                if parent_post != new.post {
                    return Err(RepoError::Invalid(CROSS_POST_REPLY));
                }
            }
            // backed by the composite FK on (parent_comment, post_id)
            sqlx::query_as::<_, Comment>(&format!(
                "INSERT INTO comments (text, post_id, user_id, parent_comment) VALUES ($1,$2,$3,$4) \
                 RETURNING {COMMENT_COLUMNS}"
            ))
                .bind(&new.text)
                .bind(new.post)
                .bind(new.user)
                .bind(new.parent_comment)
                .fetch_one(&self.pool).await.map_err(map_err)
        }

        async fn get_comment(&self, id: Id) -> RepoResult<Comment> {
            sqlx::query_as::<_, Comment>(&format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = $1"))
                .bind(id)
                .fetch_one(&self.pool).await.map_err(map_err)
        }

        async fn list_comments(&self, post: Id) -> RepoResult<Vec<Comment>> {
            sqlx::query_as::<_, Comment>(&format!(
                "SELECT {COMMENT_COLUMNS} FROM comments WHERE post_id = $1 ORDER BY commented_at ASC, id ASC"
            ))
                .bind(post)
                .fetch_all(&self.pool).await.map_err(map_err)
        }

        async fn delete_comment(&self, id: Id) -> RepoResult<()> {
            // replies go with it through ON DELETE CASCADE
            let res = sqlx::query("DELETE FROM comments WHERE id = $1")
                .bind(id)
                .execute(&self.pool).await.map_err(map_err)?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }
    }
}
