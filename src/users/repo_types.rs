use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String, // stored lowercased
    pub password_hash: String, // Argon2 PHC string, empty for federated accounts
    pub is_admin: bool,
    pub is_verified: bool,
    pub otp: Option<String>,
    pub otp_expires_at: Option<OffsetDateTime>,
    pub last_login_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: Option<OffsetDateTime>,
}

impl User {
    pub fn has_local_password(&self) -> bool {
        !self.password_hash.is_empty()
    }
}

/// Fields supplied when inserting a user. Id and `created_at` are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub is_verified: bool,
    pub otp: Option<(String, OffsetDateTime)>,
}

/// Typed partial update. Each variant lists exactly the columns one operation may touch;
/// the store stamps `updated_at` for all of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserPatch {
    /// Admin edit.
    Profile {
        first_name: String,
        last_name: String,
        is_admin: bool,
    },
    /// New verification/reset code.
    Otp {
        code: String,
        expires_at: OffsetDateTime,
    },
    /// Marks the account verified and clears the code. Only lands while
    /// `otp` still holds the stored, unexpired code.
    Verified { otp: String },
    /// New hash, account verified, code cleared. Same code condition as `Verified`.
    PasswordReset { password_hash: String, otp: String },
    /// New hash only.
    PasswordChange { password_hash: String },
    LastLogin(OffsetDateTime),
}

impl UserPatch {
    /// Code that must still be stored and unexpired for the patch to apply.
    pub fn expected_otp(&self) -> Option<&str> {
        match self {
            UserPatch::Verified { otp } | UserPatch::PasswordReset { otp, .. } => Some(otp),
            _ => None,
        }
    }

    /// True when `user` still holds the code this patch consumes, valid at `now`.
    /// Patches without a code condition always hold.
    pub fn holds_for(&self, user: &User, now: OffsetDateTime) -> bool {
        match self.expected_otp() {
            Some(code) => {
                user.otp.as_deref() == Some(code)
                    && user.otp_expires_at.is_some_and(|exp| now <= exp)
            }
            None => true,
        }
    }

    /// Applies the patch to an in-memory record.
    pub fn apply(self, user: &mut User, now: OffsetDateTime) {
        match self {
            UserPatch::Profile {
                first_name,
                last_name,
                is_admin,
            } => {
                user.first_name = first_name;
                user.last_name = last_name;
                user.is_admin = is_admin;
            }
            UserPatch::Otp { code, expires_at } => {
                user.otp = Some(code);
                user.otp_expires_at = Some(expires_at);
            }
            UserPatch::Verified { .. } => {
                user.is_verified = true;
                user.otp = None;
                user.otp_expires_at = None;
            }
            UserPatch::PasswordReset { password_hash, .. } => {
                user.password_hash = password_hash;
                user.is_verified = true;
                user.otp = None;
                user.otp_expires_at = None;
            }
            UserPatch::PasswordChange { password_hash } => user.password_hash = password_hash,
            UserPatch::LastLogin(at) => user.last_login_at = Some(at),
        }
        user.updated_at = Some(now);
    }
}

/// Listing predicate. All fields are optional and combine with AND;
/// `search` matches first name, last name or email (case-insensitive substring).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserFilter {
    pub search: Option<String>,
    pub created_from: Option<OffsetDateTime>,
    /// Exclusive upper bound.
    pub created_before: Option<OffsetDateTime>,
    pub is_admin: Option<bool>,
    pub is_verified: Option<bool>,
}

impl UserFilter {
    pub fn matches(&self, user: &User) -> bool {
        if let Some(needle) = &self.search {
            let needle = needle.to_lowercase();
            let hit = [&user.first_name, &user.last_name, &user.email]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        if self.created_from.is_some_and(|from| user.created_at < from) {
            return false;
        }
        if self.created_before.is_some_and(|before| user.created_at >= before) {
            return false;
        }
        if self.is_admin.is_some_and(|v| user.is_admin != v) {
            return false;
        }
        if self.is_verified.is_some_and(|v| user.is_verified != v) {
            return false;
        }
        true
    }

    /// Inclusive calendar-day range: `until` covers the whole day. The last
    /// representable day has no successor and leaves the upper bound open.
    pub fn with_created_range(
        mut self,
        from: Option<time::Date>,
        until: Option<time::Date>,
    ) -> Self {
        self.created_from = from.map(|d| d.midnight().assume_utc());
        self.created_before = until
            .and_then(time::Date::next_day)
            .map(|d| d.midnight().assume_utc());
        self
    }
}

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// 1-based page with a page size clamped to `1..=MAX_PAGE_SIZE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    pub fn new(page: Option<i64>, page_size: Option<i64>) -> Self {
        let page = page.unwrap_or(1).clamp(1, u32::MAX as i64) as u32;
        let page_size = page_size
            .unwrap_or(DEFAULT_PAGE_SIZE as i64)
            .clamp(1, MAX_PAGE_SIZE as i64) as u32;
        Self { page, page_size }
    }

    pub fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.page_size as u64
    }

    pub fn limit(&self) -> u64 {
        self.page_size as u64
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, request: PageRequest, total: u64) -> Self {
        Self {
            items,
            page: request.page,
            page_size: request.page_size,
            total,
            total_pages: total.div_ceil(request.page_size as u64),
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            page_size: self.page_size,
            total: self.total,
            total_pages: self.total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use time::{
        macros::{date, datetime},
        Duration,
    };

    use super::*;

    fn user(first: &str, last: &str, email: &str, created_at: OffsetDateTime) -> User {
        User {
            id: Uuid::new_v4(),
            first_name: first.into(),
            last_name: last.into(),
            email: email.into(),
            password_hash: "hash".into(),
            is_admin: false,
            is_verified: true,
            otp: None,
            otp_expires_at: None,
            last_login_at: None,
            created_at,
            updated_at: None,
        }
    }

    #[test]
    fn page_request_clamps_and_defaults() {
        assert_eq!(PageRequest::new(None, None), PageRequest { page: 1, page_size: 10 });
        assert_eq!(PageRequest::new(Some(0), Some(0)), PageRequest { page: 1, page_size: 1 });
        assert_eq!(PageRequest::new(Some(-3), Some(500)).page_size, 100);
        assert_eq!(PageRequest::new(Some(2), Some(10)).offset(), 10);
    }

    #[test]
    fn total_pages_rounds_up() {
        let p = Page::new(Vec::<u8>::new(), PageRequest::new(Some(1), Some(10)), 21);
        assert_eq!(p.total_pages, 3);
        let p = Page::new(Vec::<u8>::new(), PageRequest::new(Some(1), Some(10)), 20);
        assert_eq!(p.total_pages, 2);
        let p = Page::new(Vec::<u8>::new(), PageRequest::default(), 0);
        assert_eq!(p.total_pages, 0);
    }

    #[test]
    fn search_is_case_insensitive_across_name_and_email() {
        let u = user("Ada", "Lovelace", "ada@engine.io", datetime!(2024-03-01 10:00 UTC));
        let by = |s: &str| UserFilter {
            search: Some(s.into()),
            ..Default::default()
        };
        assert!(by("ADA").matches(&u));
        assert!(by("lovel").matches(&u));
        assert!(by("ENGINE.IO").matches(&u));
        assert!(!by("babbage").matches(&u));
    }

    #[test]
    fn end_date_includes_the_whole_day() {
        let filter = UserFilter::default()
            .with_created_range(Some(date!(2024-03-01)), Some(date!(2024-03-01)));
        assert!(filter.matches(&user("a", "b", "c@d.io", datetime!(2024-03-01 00:00 UTC))));
        assert!(filter.matches(&user("a", "b", "c@d.io", datetime!(2024-03-01 23:59 UTC))));
        assert!(!filter.matches(&user("a", "b", "c@d.io", datetime!(2024-03-02 00:00 UTC))));
        assert!(!filter.matches(&user("a", "b", "c@d.io", datetime!(2024-02-29 23:59 UTC))));
    }

    #[test]
    fn boolean_flags_combine_with_and() {
        let mut admin = user("a", "b", "a@b.io", datetime!(2024-01-01 00:00 UTC));
        admin.is_admin = true;
        admin.is_verified = false;
        let filter = UserFilter {
            is_admin: Some(true),
            is_verified: Some(true),
            ..Default::default()
        };
        assert!(!filter.matches(&admin));
        admin.is_verified = true;
        assert!(filter.matches(&admin));
    }

    #[test]
    fn verified_patch_clears_the_otp_pair() {
        let now = datetime!(2024-05-05 12:00 UTC);
        let mut u = user("a", "b", "a@b.io", now);
        u.is_verified = false;
        UserPatch::Otp {
            code: "012345".into(),
            expires_at: now + Duration::minutes(5),
        }
        .apply(&mut u, now);
        assert_eq!(u.otp.as_deref(), Some("012345"));

        let patch = UserPatch::Verified {
            otp: "012345".into(),
        };
        assert!(patch.holds_for(&u, now));
        patch.clone().apply(&mut u, now);
        assert!(u.is_verified);
        assert!(u.otp.is_none() && u.otp_expires_at.is_none());
        assert_eq!(u.updated_at, Some(now));
        assert!(!patch.holds_for(&u, now));
    }

    #[test]
    fn code_condition_rejects_other_or_expired_codes() {
        let now = datetime!(2024-05-05 12:00 UTC);
        let mut u = user("a", "b", "a@b.io", now);
        u.otp = Some("111111".into());
        u.otp_expires_at = Some(now + Duration::minutes(5));

        let reset = |otp: &str| UserPatch::PasswordReset {
            password_hash: "h".into(),
            otp: otp.into(),
        };
        assert!(reset("111111").holds_for(&u, now + Duration::minutes(5)));
        assert!(!reset("111111").holds_for(&u, now + Duration::minutes(6)));
        assert!(!reset("222222").holds_for(&u, now));
        assert!(UserPatch::LastLogin(now).holds_for(&u, now));
    }
}
