use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("unavailable: {0}")] Unavailable(String),
}

impl From<crate::db::DbError> for RepoError {
    fn from(e: crate::db::DbError) -> Self {
        RepoError::Unavailable(e.to_string())
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

/// A record stored whole in its own collection.
pub trait Document: Serialize + DeserializeOwned + Clone + Send + Sync + Unpin + 'static {
    const COLLECTION: &'static str;

    fn id(&self) -> Id;
    fn created_at(&self) -> DateTime<Utc>;

    /// Value that must be unique across the collection, if any.
    fn unique_key(&self) -> Option<String> {
        None
    }
}

impl Document for ContactMessage {
    const COLLECTION: &'static str = "contact_messages";
    fn id(&self) -> Id { self.id }
    fn created_at(&self) -> DateTime<Utc> { self.created_at }
}

impl Document for NewsletterSubscription {
    const COLLECTION: &'static str = "newsletter_subscriptions";
    fn id(&self) -> Id { self.id }
    fn created_at(&self) -> DateTime<Utc> { self.subscribed_at }
    fn unique_key(&self) -> Option<String> { Some(self.email.clone()) }
}

impl Document for BlogPost {
    const COLLECTION: &'static str = "blog_posts";
    fn id(&self) -> Id { self.id }
    fn created_at(&self) -> DateTime<Utc> { self.created_at }
    fn unique_key(&self) -> Option<String> { Some(self.slug.clone()) }
}

impl Document for Sheet {
    const COLLECTION: &'static str = "sheets";
    fn id(&self) -> Id { self.id }
    fn created_at(&self) -> DateTime<Utc> { self.created_at }
}

impl Document for User {
    const COLLECTION: &'static str = "users";
    fn id(&self) -> Id { self.id }
    fn created_at(&self) -> DateTime<Utc> { self.created_at }
    fn unique_key(&self) -> Option<String> { Some(self.email.clone()) }
}

/// One collection. Every call touches exactly that collection.
#[async_trait]
pub trait DocumentStore<D: Document>: Send + Sync {
    /// Fails with `Conflict` when the unique key is already taken.
    async fn insert(&self, doc: D) -> RepoResult<D>;
    async fn get(&self, id: Id) -> RepoResult<D>;
    async fn find_by_key(&self, key: &str) -> RepoResult<D>;
    /// Newest first.
    async fn list(&self) -> RepoResult<Vec<D>>;
    async fn replace(&self, doc: D) -> RepoResult<D>;
    async fn delete(&self, id: Id) -> RepoResult<()>;
    async fn count(&self) -> RepoResult<usize>;
}

pub trait Repo: Send + Sync {
    fn posts(&self) -> &dyn DocumentStore<BlogPost>;
    fn sheets(&self) -> &dyn DocumentStore<Sheet>;
    fn contacts(&self) -> &dyn DocumentStore<ContactMessage>;
    fn subscriptions(&self) -> &dyn DocumentStore<NewsletterSubscription>;
    fn users(&self) -> &dyn DocumentStore<User>;
}

impl<T> Repo for T
where
    T: DocumentStore<BlogPost>
        + DocumentStore<Sheet>
        + DocumentStore<ContactMessage>
        + DocumentStore<NewsletterSubscription>
        + DocumentStore<User>,
{
    fn posts(&self) -> &dyn DocumentStore<BlogPost> { self }
    fn sheets(&self) -> &dyn DocumentStore<Sheet> { self }
    fn contacts(&self) -> &dyn DocumentStore<ContactMessage> { self }
    fn subscriptions(&self) -> &dyn DocumentStore<NewsletterSubscription> { self }
    fn users(&self) -> &dyn DocumentStore<User> { self }
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use serde::Deserialize;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, RwLock};

    const SNAPSHOT_PATH: &str = "data/state.json";

    #[derive(Default, Serialize, Deserialize)]
    pub struct State {
        #[serde(default)]
        posts: HashMap<Id, BlogPost>,
        #[serde(default)]
        sheets: HashMap<Id, Sheet>,
        #[serde(default)]
        contacts: HashMap<Id, ContactMessage>,
        #[serde(default)]
        subscriptions: HashMap<Id, NewsletterSubscription>,
        #[serde(default)]
        users: HashMap<Id, User>,
    }

    /// Where a document type lives inside [`State`].
    pub trait Table: Document {
        fn table(s: &State) -> &HashMap<Id, Self>;
        fn table_mut(s: &mut State) -> &mut HashMap<Id, Self>;
    }

    macro_rules! table {
        ($ty:ty, $field:ident) => {
            impl Table for $ty {
                fn table(s: &State) -> &HashMap<Id, Self> { &s.$field }
                fn table_mut(s: &mut State) -> &mut HashMap<Id, Self> { &mut s.$field }
            }
        };
    }

    table!(BlogPost, posts);
    table!(Sheet, sheets);
    table!(ContactMessage, contacts);
    table!(NewsletterSubscription, subscriptions);
    table!(User, users);

    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Option<Arc<PathBuf>>,
    }

    impl InMemRepo {
        fn snapshot_path() -> PathBuf {
            match std::env::var("GRIDSHARE_DATA_DIR") {
                Ok(dir) => PathBuf::from(dir).join("state.json"),
                Err(_) => PathBuf::from(SNAPSHOT_PATH),
            }
        }

        /// A snapshot that will not parse is moved aside, never overwritten.
        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        tracing::info!("loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        let aside = path.with_extension(format!("json.corrupt-{}", Utc::now().timestamp()));
                        match std::fs::rename(path, &aside) {
                            Ok(()) => tracing::error!(
                                "failed to parse snapshot '{}': {e}, kept as '{}', starting empty",
                                path.display(),
                                aside.display()
                            ),
                            Err(mv) => tracing::error!(
                                "failed to parse snapshot '{}': {e}, and could not move it aside: {mv}",
                                path.display()
                            ),
                        }
                        State::default()
                    }
                },
                Err(e) => {
                    tracing::info!("no snapshot at '{}': {e}, starting empty", path.display());
                    State::default()
                }
            }
        }

        /// Write the whole state to a temp file and rename it over the
        /// snapshot. Callers hold the write lock, so snapshots never interleave.
        fn persist(&self, state: &State) -> RepoResult<()> {
            let Some(path) = self.snapshot_path.as_deref() else { return Ok(()) };
            let fail = |what: &str, e: &dyn std::fmt::Display| {
                tracing::warn!("failed to {what} snapshot '{}': {e}", path.display());
                RepoError::Unavailable(format!("snapshot {what} failed"))
            };
            let bytes = serde_json::to_vec_pretty(state).map_err(|e| fail("encode", &e))?;
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir).map_err(|e| fail("create dir for", &e))?;
            }
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, bytes).map_err(|e| fail("write", &e))?;
            std::fs::rename(&tmp, path.as_path()).map_err(|e| fail("rename", &e))
        }

        /// Snapshot-backed store, loading any previous snapshot.
        pub fn new() -> Self {
            let snapshot_path = Self::snapshot_path();
            let state = Self::load_state_from(&snapshot_path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Some(Arc::new(snapshot_path)),
            }
        }

        /// Purely in-memory; nothing is read from or written to disk.
        pub fn ephemeral() -> Self {
            Self { state: Arc::new(RwLock::new(State::default())), snapshot_path: None }
        }

        fn read(&self) -> RepoResult<std::sync::RwLockReadGuard<'_, State>> {
            self.state.read().map_err(|_| RepoError::Unavailable("state lock poisoned".into()))
        }

        fn write(&self) -> RepoResult<std::sync::RwLockWriteGuard<'_, State>> {
            self.state.write().map_err(|_| RepoError::Unavailable("state lock poisoned".into()))
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self { Self::new() }
    }

    fn key_taken<D: Table>(s: &State, key: &Option<String>, except: Option<Id>) -> bool {
        match key {
            Some(k) => D::table(s)
                .values()
                .any(|d| d.unique_key().as_ref() == Some(k) && Some(d.id()) != except),
            None => false,
        }
    }

    #[async_trait]
    impl<D: Table> DocumentStore<D> for InMemRepo {
        async fn insert(&self, doc: D) -> RepoResult<D> {
            let mut s = self.write()?;
            // uniqueness is checked under the write lock, so racing inserts
            // of the same key cannot both succeed
            if key_taken::<D>(&s, &doc.unique_key(), None) {
                return Err(RepoError::Conflict);
            }
            D::table_mut(&mut s).insert(doc.id(), doc.clone());
            // a write that cannot reach the snapshot is undone
            if let Err(e) = self.persist(&s) {
                D::table_mut(&mut s).remove(&doc.id());
                return Err(e);
            }
            Ok(doc)
        }

        async fn get(&self, id: Id) -> RepoResult<D> {
            let s = self.read()?;
            D::table(&s).get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn find_by_key(&self, key: &str) -> RepoResult<D> {
            let s = self.read()?;
            D::table(&s)
                .values()
                .find(|d| d.unique_key().as_deref() == Some(key))
                .cloned()
                .ok_or(RepoError::NotFound)
        }

        async fn list(&self) -> RepoResult<Vec<D>> {
            let s = self.read()?;
            let mut v: Vec<D> = D::table(&s).values().cloned().collect();
            v.sort_by(|a, b| b.created_at().cmp(&a.created_at())); // latest first
            Ok(v)
        }

        async fn replace(&self, doc: D) -> RepoResult<D> {
            let mut s = self.write()?;
            if !D::table(&s).contains_key(&doc.id()) {
                return Err(RepoError::NotFound);
            }
            if key_taken::<D>(&s, &doc.unique_key(), Some(doc.id())) {
                return Err(RepoError::Conflict);
            }
            let previous = D::table_mut(&mut s).insert(doc.id(), doc.clone());
            if let Err(e) = self.persist(&s) {
                if let Some(prev) = previous {
                    D::table_mut(&mut s).insert(prev.id(), prev);
                }
                return Err(e);
            }
            Ok(doc)
        }

        async fn delete(&self, id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            let removed = D::table_mut(&mut s).remove(&id).ok_or(RepoError::NotFound)?;
            if let Err(e) = self.persist(&s) {
                D::table_mut(&mut s).insert(id, removed);
                return Err(e);
            }
            Ok(())
        }

        async fn count(&self) -> RepoResult<usize> {
            let s = self.read()?;
            Ok(D::table(&s).len())
        }
    }
}

// Postgres implementation (feature = "postgres-store"): one JSONB document
// table per collection, `unique_key` backed by a UNIQUE index.
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use crate::db::{ConnectionManager, PgConnector};
    use sqlx::types::Json;
    use sqlx::{Pool, Postgres};
    use std::sync::Arc;

    const UNIQUE_VIOLATION: &str = "23505";

    #[derive(Clone)]
    pub struct PgRepo {
        db: Arc<ConnectionManager<PgConnector>>,
    }

    impl PgRepo {
        pub fn new(db: Arc<ConnectionManager<PgConnector>>) -> Self { Self { db } }

        async fn pool(&self) -> RepoResult<Pool<Postgres>> {
            Ok(self.db.acquire().await?)
        }

        /// Connection-level failures clear the cached pool so the next call
        /// reconnects.
        fn classify(&self, e: sqlx::Error) -> RepoError {
            match &e {
                sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => RepoError::Conflict,
                sqlx::Error::RowNotFound => RepoError::NotFound,
                sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
                    self.db.invalidate();
                    RepoError::Unavailable(e.to_string())
                }
                _ => RepoError::Unavailable(e.to_string()),
            }
        }
    }

    #[async_trait]
    impl<D: Document> DocumentStore<D> for PgRepo {
        async fn insert(&self, doc: D) -> RepoResult<D> {
            let pool = self.pool().await?;
            let sql = format!(
                "INSERT INTO {} (id, unique_key, created_at, body) VALUES ($1, $2, $3, $4)",
                D::COLLECTION
            );
            sqlx::query(&sql)
                .bind(doc.id())
                .bind(doc.unique_key())
                .bind(doc.created_at())
                .bind(Json(&doc))
                .execute(&pool)
                .await
                .map_err(|e| self.classify(e))?;
            Ok(doc)
        }

        async fn get(&self, id: Id) -> RepoResult<D> {
            let pool = self.pool().await?;
            let sql = format!("SELECT body FROM {} WHERE id = $1", D::COLLECTION);
            let (Json(doc),) = sqlx::query_as::<_, (Json<D>,)>(&sql)
                .bind(id)
                .fetch_one(&pool)
                .await
                .map_err(|e| self.classify(e))?;
            Ok(doc)
        }

        async fn find_by_key(&self, key: &str) -> RepoResult<D> {
            let pool = self.pool().await?;
            let sql = format!("SELECT body FROM {} WHERE unique_key = $1", D::COLLECTION);
            let (Json(doc),) = sqlx::query_as::<_, (Json<D>,)>(&sql)
                .bind(key)
                .fetch_one(&pool)
                .await
                .map_err(|e| self.classify(e))?;
            Ok(doc)
        }

        async fn list(&self) -> RepoResult<Vec<D>> {
            let pool = self.pool().await?;
            let sql = format!("SELECT body FROM {} ORDER BY created_at DESC", D::COLLECTION);
            let rows = sqlx::query_as::<_, (Json<D>,)>(&sql)
                .fetch_all(&pool)
                .await
                .map_err(|e| self.classify(e))?;
            Ok(rows.into_iter().map(|(Json(doc),)| doc).collect())
        }

        async fn replace(&self, doc: D) -> RepoResult<D> {
            let pool = self.pool().await?;
            let sql = format!("UPDATE {} SET unique_key = $2, body = $3 WHERE id = $1", D::COLLECTION);
            let done = sqlx::query(&sql)
                .bind(doc.id())
                .bind(doc.unique_key())
                .bind(Json(&doc))
                .execute(&pool)
                .await
                .map_err(|e| self.classify(e))?;
            if done.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(doc)
        }

        async fn delete(&self, id: Id) -> RepoResult<()> {
            let pool = self.pool().await?;
            let sql = format!("DELETE FROM {} WHERE id = $1", D::COLLECTION);
            let done = sqlx::query(&sql)
                .bind(id)
                .execute(&pool)
                .await
                .map_err(|e| self.classify(e))?;
            if done.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }

        async fn count(&self) -> RepoResult<usize> {
            let pool = self.pool().await?;
            let sql = format!("SELECT COUNT(*) FROM {}", D::COLLECTION);
            let (n,) = sqlx::query_as::<_, (i64,)>(&sql)
                .fetch_one(&pool)
                .await
                .map_err(|e| self.classify(e))?;
            Ok(n as usize)
        }
    }
}
