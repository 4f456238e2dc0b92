use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use super::{
    repo::UserStore,
    repo_types::{Page, PageRequest, User, UserFilter, UserPatch},
};
use crate::{auth::services::required, error::AppError};

#[derive(Debug, Clone)]
pub struct UpdateUserInput {
    pub first_name: String,
    pub last_name: String,
    pub is_admin: bool,
}

/// Admin-facing account management.
#[derive(Clone)]
pub struct UserAdminService {
    store: Arc<dyn UserStore>,
}

impl UserAdminService {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    /// Count and page are read with the same filter.
    pub async fn list_users(
        &self,
        request: PageRequest,
        filter: UserFilter,
    ) -> Result<Page<User>, AppError> {
        let total = self.store.count(&filter).await?;
        let items = self.store.list(request, &filter).await?;
        debug!(total, page = request.page, page_size = request.page_size, "users listed");
        Ok(Page::new(items, request, total))
    }

    pub async fn get_user(&self, id: Uuid) -> Result<User, AppError> {
        Ok(self.store.find_by_id(id).await?)
    }

    pub async fn update_user(&self, id: Uuid, input: UpdateUserInput) -> Result<User, AppError> {
        let patch = UserPatch::Profile {
            first_name: required(&input.first_name, "First name")?,
            last_name: required(&input.last_name, "Last name")?,
            is_admin: input.is_admin,
        };
        let user = self.store.update(id, patch).await?;
        info!(user_id = %user.id, is_admin = user.is_admin, "user updated");
        Ok(user)
    }

    pub async fn delete_user(&self, id: Uuid) -> Result<(), AppError> {
        self.store.delete(id).await?;
        info!(user_id = %id, "user deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use time::{macros::date, Duration, OffsetDateTime};

    use super::*;
    use crate::users::{memory::MemoryUserStore, repo_types::NewUser};

    fn new_user(i: usize) -> NewUser {
        NewUser {
            first_name: format!("First{i}"),
            last_name: format!("Last{i}"),
            email: format!("user{i}@example.com"),
            password_hash: "hash".into(),
            is_admin: i % 5 == 0,
            is_verified: i % 2 == 0,
            otp: None,
        }
    }

    async fn seeded(n: usize) -> (UserAdminService, Arc<MemoryUserStore>, Vec<User>) {
        let store = Arc::new(MemoryUserStore::new());
        let base = OffsetDateTime::now_utc() - Duration::days(60);
        let mut users = Vec::new();
        for i in 0..n {
            let user = store.create(new_user(i)).await.unwrap();
            let at = base + Duration::days(i as i64);
            store.set_created_at(user.id, at).await;
            users.push(store.find_by_id(user.id).await.unwrap());
        }
        (UserAdminService::new(store.clone()), store, users)
    }

    #[tokio::test]
    async fn list_reports_total_pages() {
        let (svc, _, users) = seeded(25).await;
        let page = svc
            .list_users(PageRequest::new(Some(2), Some(10)), UserFilter::default())
            .await
            .unwrap();

        assert_eq!(page.total, 25);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.items.len(), 10);
        // Newest first: the 11th newest is users[14].
        assert_eq!(page.items[0].id, users[14].id);
        assert_eq!(page.items[9].id, users[5].id);
    }

    #[tokio::test]
    async fn list_applies_filters_to_items_and_count() {
        let (svc, _, _) = seeded(20).await;
        let filter = UserFilter {
            is_admin: Some(true),
            ..Default::default()
        };
        let page = svc
            .list_users(PageRequest::default(), filter)
            .await
            .unwrap();
        assert_eq!(page.total, 4);
        assert!(page.items.iter().all(|u| u.is_admin));

        let filter = UserFilter {
            search: Some("LAST1".into()),
            is_verified: Some(false),
            ..Default::default()
        };
        let page = svc.list_users(PageRequest::default(), filter).await.unwrap();
        // Last1, Last11, Last13, Last15, Last17, Last19
        assert_eq!(page.total, 6);
    }

    #[tokio::test]
    async fn list_end_date_covers_the_whole_day() {
        let (svc, store, users) = seeded(3).await;
        let day = date!(2024 - 03 - 10);
        store
            .set_created_at(users[0].id, day.with_hms(23, 59, 0).unwrap().assume_utc())
            .await;

        let filter = UserFilter::default().with_created_range(Some(day), Some(day));
        let page = svc.list_users(PageRequest::default(), filter).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].id, users[0].id);
    }

    #[tokio::test]
    async fn update_stamps_and_missing_targets_fail() {
        let (svc, _, users) = seeded(1).await;
        let updated = svc
            .update_user(
                users[0].id,
                UpdateUserInput {
                    first_name: " Grace ".into(),
                    last_name: "Hopper".into(),
                    is_admin: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.first_name, "Grace");
        assert!(updated.is_admin);
        assert!(updated.updated_at.is_some());

        let missing = svc
            .update_user(
                Uuid::new_v4(),
                UpdateUserInput {
                    first_name: "A".into(),
                    last_name: "B".into(),
                    is_admin: false,
                },
            )
            .await;
        assert!(matches!(missing, Err(AppError::UserNotFound)));

        let blank = svc
            .update_user(
                users[0].id,
                UpdateUserInput {
                    first_name: "".into(),
                    last_name: "B".into(),
                    is_admin: false,
                },
            )
            .await;
        assert!(matches!(blank, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let (svc, _, users) = seeded(2).await;
        svc.delete_user(users[0].id).await.unwrap();
        assert!(matches!(svc.get_user(users[0].id).await, Err(AppError::UserNotFound)));
        assert!(matches!(svc.delete_user(users[0].id).await, Err(AppError::UserNotFound)));
        assert!(svc.get_user(users[1].id).await.is_ok());
    }
}
