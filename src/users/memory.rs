use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::repo::{StoreError, StoreResult, UserStore};
use super::repo_types::{NewUser, PageRequest, User, UserFilter, UserPatch};

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    // lowercased email -> id
    emails: HashMap<String, Uuid>,
}

/// In-process store selected by `DATABASE_URL=memory://`. Enforces the same
/// case-insensitive email uniqueness as the Postgres index.
#[derive(Default)]
pub struct MemoryUserStore {
    inner: RwLock<Inner>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn filtered<'a>(inner: &'a Inner, filter: &'a UserFilter) -> impl Iterator<Item = &'a User> {
        inner.users.values().filter(move |u| filter.matches(u))
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, user: NewUser) -> StoreResult<User> {
        let mut inner = self.inner.write().await;
        let key = user.email.to_lowercase();
        if inner.emails.contains_key(&key) {
            return Err(StoreError::DuplicateEmail);
        }

        let (otp, otp_expires_at) = user.otp.unzip();
        let created = User {
            id: Uuid::new_v4(),
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
            password_hash: user.password_hash,
            is_admin: user.is_admin,
            is_verified: user.is_verified,
            otp,
            otp_expires_at,
            last_login_at: None,
            created_at: OffsetDateTime::now_utc(),
            updated_at: None,
        };
        inner.emails.insert(key, created.id);
        inner.users.insert(created.id, created.clone());
        debug!(user_id = %created.id, "user stored in memory");
        Ok(created)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<User> {
        let inner = self.inner.read().await;
        inner.users.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<User> {
        let inner = self.inner.read().await;
        inner
            .emails
            .get(email)
            .and_then(|id| inner.users.get(id))
            .filter(|u| u.email == email)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update(&self, id: Uuid, patch: UserPatch) -> StoreResult<User> {
        let mut inner = self.inner.write().await;
        let user = inner.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        let now = OffsetDateTime::now_utc();
        if !patch.holds_for(user, now) {
            return Err(StoreError::StaleOtp);
        }
        patch.apply(user, now);
        Ok(user.clone())
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let removed = inner.users.remove(&id).ok_or(StoreError::NotFound)?;
        inner.emails.remove(&removed.email.to_lowercase());
        Ok(())
    }

    async fn count(&self, filter: &UserFilter) -> StoreResult<u64> {
        let inner = self.inner.read().await;
        Ok(Self::filtered(&inner, filter).count() as u64)
    }

    async fn list(&self, page: PageRequest, filter: &UserFilter) -> StoreResult<Vec<User>> {
        let inner = self.inner.read().await;
        let mut users: Vec<&User> = Self::filtered(&inner, filter).collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(users
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
impl MemoryUserStore {
    /// Overrides `created_at`, which the store otherwise assigns.
    pub async fn set_created_at(&self, id: Uuid, at: OffsetDateTime) {
        if let Some(u) = self.inner.write().await.users.get_mut(&id) {
            u.created_at = at;
        }
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            first_name: "Grace".into(),
            last_name: "Hopper".into(),
            email: email.into(),
            password_hash: "hash".into(),
            is_admin: false,
            is_verified: true,
            otp: None,
        }
    }

    #[tokio::test]
    async fn create_rejects_case_insensitive_duplicates() {
        let store = MemoryUserStore::new();
        store.create(new_user("grace@navy.mil")).await.unwrap();
        let err = store.create(new_user("GRACE@navy.mil")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));
    }

    #[tokio::test]
    async fn email_lookup_is_exact() {
        let store = MemoryUserStore::new();
        let created = store.create(new_user("grace@navy.mil")).await.unwrap();
        store.create(new_user("ada@navy.mil")).await.unwrap();
        let found = store.find_by_email("grace@navy.mil").await.unwrap();
        assert_eq!(found.id, created.id);
        assert!(matches!(
            store.find_by_email("Grace@navy.mil").await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn delete_frees_the_email() {
        let store = MemoryUserStore::new();
        let u = store.create(new_user("grace@navy.mil")).await.unwrap();
        store.delete(u.id).await.unwrap();
        assert!(matches!(store.delete(u.id).await, Err(StoreError::NotFound)));
        store.create(new_user("grace@navy.mil")).await.unwrap();
    }

    #[tokio::test]
    async fn update_of_missing_user_is_not_found() {
        let store = MemoryUserStore::new();
        let err = store
            .update(
                Uuid::new_v4(),
                UserPatch::Verified {
                    otp: "123456".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    async fn with_pending_code(store: &MemoryUserStore, code: &str) -> User {
        let mut user = new_user("grace@navy.mil");
        user.is_verified = false;
        user.otp = Some((code.into(), OffsetDateTime::now_utc() + Duration::minutes(5)));
        store.create(user).await.unwrap()
    }

    #[tokio::test]
    async fn a_code_is_consumed_once() {
        let store = MemoryUserStore::new();
        let u = with_pending_code(&store, "424242").await;
        let patch = UserPatch::Verified {
            otp: "424242".into(),
        };

        let verified = store.update(u.id, patch.clone()).await.unwrap();
        assert!(verified.is_verified && verified.otp.is_none());
        assert!(matches!(
            store.update(u.id, patch).await,
            Err(StoreError::StaleOtp)
        ));
    }

    #[tokio::test]
    async fn reset_with_a_replaced_code_changes_nothing() {
        let store = MemoryUserStore::new();
        let u = with_pending_code(&store, "111111").await;
        store
            .update(
                u.id,
                UserPatch::Otp {
                    code: "222222".into(),
                    expires_at: OffsetDateTime::now_utc() + Duration::minutes(5),
                },
            )
            .await
            .unwrap();

        let stale = UserPatch::PasswordReset {
            password_hash: "new-hash".into(),
            otp: "111111".into(),
        };
        assert!(matches!(
            store.update(u.id, stale).await,
            Err(StoreError::StaleOtp)
        ));
        let current = store.find_by_id(u.id).await.unwrap();
        assert_eq!(current.password_hash, "hash");
        assert_eq!(current.otp.as_deref(), Some("222222"));
    }

    #[tokio::test]
    async fn second_page_holds_items_eleven_to_twenty_newest_first() {
        let store = MemoryUserStore::new();
        let base = OffsetDateTime::now_utc() - Duration::days(30);
        for i in 0..25 {
            let u = store.create(new_user(&format!("u{i}@x.io"))).await.unwrap();
            store.set_created_at(u.id, base + Duration::minutes(i)).await;
        }

        let filter = UserFilter::default();
        let page = store.list(PageRequest::new(Some(2), Some(10)), &filter).await.unwrap();
        let emails: Vec<_> = page.iter().map(|u| u.email.as_str()).collect();
        let expected: Vec<String> = (5..15).rev().map(|i| format!("u{i}@x.io")).collect();
        assert_eq!(emails, expected);
        assert_eq!(store.count(&filter).await.unwrap(), 25);
    }
}
