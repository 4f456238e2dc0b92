use std::{sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use super::repo_types::{NewUser, PageRequest, User, UserFilter, UserPatch};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("user not found")]
    NotFound,
    #[error("email already registered")]
    DuplicateEmail,
    #[error("one-time code no longer valid")]
    StaleOtp,
    #[error("storage deadline exceeded")]
    Timeout,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence over user records.
///
/// Email lookups are exact: callers normalize to lowercase first. Uniqueness of
/// the email is enforced by the store itself, so `create` reports
/// `DuplicateEmail` even when two signups race past a service-level check.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, user: NewUser) -> StoreResult<User>;
    async fn find_by_id(&self, id: Uuid) -> StoreResult<User>;
    async fn find_by_email(&self, email: &str) -> StoreResult<User>;
    /// Patches carrying an expected code land only while the stored code still
    /// matches and is unexpired; otherwise `StaleOtp` and nothing changes.
    async fn update(&self, id: Uuid, patch: UserPatch) -> StoreResult<User>;
    async fn delete(&self, id: Uuid) -> StoreResult<()>;
    async fn count(&self, filter: &UserFilter) -> StoreResult<u64>;
    /// Newest first.
    async fn list(&self, page: PageRequest, filter: &UserFilter) -> StoreResult<Vec<User>>;
}

const USER_COLUMNS: &str = "id, first_name, last_name, email, password_hash, is_admin, \
     is_verified, otp, otp_expires_at, last_login_at, created_at, updated_at";

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub async fn connect(url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .context("connect to database")?;
        Ok(Self { db })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.db)
            .await
            .context("run migrations")
    }
}

fn backend(e: sqlx::Error, what: &'static str) -> StoreError {
    match e {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::DuplicateEmail,
        other => StoreError::Backend(anyhow::Error::new(other).context(what)),
    }
}

/// Escapes `%`, `_` and `\` so the search term is matched literally by ILIKE.
fn like_pattern(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    out.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &UserFilter) {
    qb.push(" WHERE TRUE");
    if let Some(search) = &filter.search {
        let pattern = like_pattern(search);
        qb.push(" AND (first_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR last_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR email ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(from) = filter.created_from {
        qb.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(before) = filter.created_before {
        qb.push(" AND created_at < ").push_bind(before);
    }
    if let Some(is_admin) = filter.is_admin {
        qb.push(" AND is_admin = ").push_bind(is_admin);
    }
    if let Some(is_verified) = filter.is_verified {
        qb.push(" AND is_verified = ").push_bind(is_verified);
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, user: NewUser) -> StoreResult<User> {
        let (otp, otp_expires_at) = user.otp.unzip();
        let sql = format!(
            r#"
            INSERT INTO users (id, first_name, last_name, email, password_hash,
                               is_admin, is_verified, otp, otp_expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {USER_COLUMNS}
            "#
        );
        let created = sqlx::query_as::<_, User>(&sql)
            .bind(Uuid::new_v4())
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.is_admin)
            .bind(user.is_verified)
            .bind(otp)
            .bind(otp_expires_at)
            .fetch_one(&self.db)
            .await
            .map_err(|e| backend(e, "insert user"))?;
        debug!(user_id = %created.id, "user row inserted");
        Ok(created)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<User> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_one(&self.db)
            .await
            .map_err(|e| backend(e, "find user by id"))
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<User> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_one(&self.db)
            .await
            .map_err(|e| backend(e, "find user by email"))
    }

    async fn update(&self, id: Uuid, patch: UserPatch) -> StoreResult<User> {
        let now = OffsetDateTime::now_utc();
        let expected_otp = patch.expected_otp().map(str::to_owned);
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE users SET updated_at = ");
        qb.push_bind(now);
        match patch {
            UserPatch::Profile {
                first_name,
                last_name,
                is_admin,
            } => {
                qb.push(", first_name = ").push_bind(first_name);
                qb.push(", last_name = ").push_bind(last_name);
                qb.push(", is_admin = ").push_bind(is_admin);
            }
            UserPatch::Otp { code, expires_at } => {
                qb.push(", otp = ").push_bind(code);
                qb.push(", otp_expires_at = ").push_bind(expires_at);
            }
            UserPatch::Verified { .. } => {
                qb.push(", is_verified = TRUE, otp = NULL, otp_expires_at = NULL");
            }
            UserPatch::PasswordReset { password_hash, .. } => {
                qb.push(", password_hash = ").push_bind(password_hash);
                qb.push(", is_verified = TRUE, otp = NULL, otp_expires_at = NULL");
            }
            UserPatch::PasswordChange { password_hash } => {
                qb.push(", password_hash = ").push_bind(password_hash);
            }
            UserPatch::LastLogin(at) => {
                qb.push(", last_login_at = ").push_bind(at);
            }
        }
        qb.push(" WHERE id = ").push_bind(id);
        let conditional = expected_otp.is_some();
        if let Some(code) = expected_otp {
            qb.push(" AND otp = ").push_bind(code);
            qb.push(" AND otp_expires_at >= ").push_bind(now);
        }
        qb.push(format!(" RETURNING {USER_COLUMNS}"));

        qb.build_query_as::<User>()
            .fetch_one(&self.db)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound if conditional => StoreError::StaleOtp,
                e => backend(e, "update user"),
            })
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(|e| backend(e, "delete user"))?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn count(&self, filter: &UserFilter) -> StoreResult<u64> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users");
        push_filter(&mut qb, filter);
        let (count,) = qb
            .build_query_as::<(i64,)>()
            .fetch_one(&self.db)
            .await
            .map_err(|e| backend(e, "count users"))?;
        Ok(count.max(0) as u64)
    }

    async fn list(&self, page: PageRequest, filter: &UserFilter) -> StoreResult<Vec<User>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {USER_COLUMNS} FROM users"));
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(page.limit() as i64)
            .push(" OFFSET ")
            .push_bind(page.offset() as i64);
        qb.build_query_as::<User>()
            .fetch_all(&self.db)
            .await
            .map_err(|e| backend(e, "list users"))
    }
}

/// Runs every operation of the wrapped store under a fixed deadline.
#[derive(Clone)]
pub struct TimedUserStore {
    inner: Arc<dyn UserStore>,
    deadline: Duration,
}

impl TimedUserStore {
    pub fn new(inner: Arc<dyn UserStore>, deadline: Duration) -> Self {
        Self { inner, deadline }
    }

    async fn run<T>(
        &self,
        op: &'static str,
        fut: impl std::future::Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        match timeout(self.deadline, fut).await {
            Ok(res) => res,
            Err(_) => {
                warn!(op, deadline_ms = self.deadline.as_millis() as u64, "store deadline exceeded");
                Err(StoreError::Timeout)
            }
        }
    }
}

#[async_trait]
impl UserStore for TimedUserStore {
    async fn create(&self, user: NewUser) -> StoreResult<User> {
        self.run("create", self.inner.create(user)).await
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<User> {
        self.run("find_by_id", self.inner.find_by_id(id)).await
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<User> {
        self.run("find_by_email", self.inner.find_by_email(email)).await
    }

    async fn update(&self, id: Uuid, patch: UserPatch) -> StoreResult<User> {
        self.run("update", self.inner.update(id, patch)).await
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        self.run("delete", self.inner.delete(id)).await
    }

    async fn count(&self, filter: &UserFilter) -> StoreResult<u64> {
        self.run("count", self.inner.count(filter)).await
    }

    async fn list(&self, page: PageRequest, filter: &UserFilter) -> StoreResult<Vec<User>> {
        self.run("list", self.inner.list(page, filter)).await
    }
}
