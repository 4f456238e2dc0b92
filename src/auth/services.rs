use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{info, warn};

use super::{
    google::ExternalProfile,
    jwt::{JwtKeys, TokenPair},
    otp::{Otp, OtpGenerator},
    password::{Hasher, Verification},
};
use crate::{
    error::AppError,
    users::{
        repo::{StoreError, UserStore},
        repo_types::{NewUser, User, UserPatch},
    },
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Trims and lowercases an email, rejecting anything that does not look like one.
pub(crate) fn normalize_email(raw: &str) -> Result<String, AppError> {
    let email = raw.trim().to_lowercase();
    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(AppError::Validation("Invalid email address".into()));
    }
    Ok(email)
}

pub(crate) fn required(value: &str, field: &str) -> Result<String, AppError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::Validation(format!("{field} is required")));
    }
    Ok(value.to_string())
}

#[derive(Debug, Clone)]
pub struct SignUpInput {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone)]
pub struct ResetPasswordInput {
    pub email: String,
    pub otp: String,
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(Debug, Clone)]
pub struct ChangePasswordInput {
    pub old_password: String,
    pub new_password: String,
    pub confirm_new_password: String,
}

/// An authenticated user together with a freshly issued token pair.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: User,
    pub tokens: TokenPair,
}

/// A code that was stored on the account and still has to reach its owner.
#[derive(Debug, Clone)]
pub struct OtpIssued {
    pub email: String,
    pub code: String,
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct FederatedLogin {
    pub session: Session,
    pub created: bool,
}

/// Account workflows: signup, verification, login and password management.
#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn UserStore>,
    keys: JwtKeys,
    hasher: Hasher,
    otp: OtpGenerator,
}

impl AccountService {
    pub fn new(store: Arc<dyn UserStore>, keys: JwtKeys, hasher: Hasher, otp: OtpGenerator) -> Self {
        Self {
            store,
            keys,
            hasher,
            otp,
        }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        match self.store.find_by_email(email).await {
            Ok(user) => Ok(Some(user)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Fast-path duplicate check for a friendlier error. The store's unique
    /// constraint remains the real enforcement point.
    async fn ensure_email_free(&self, email: &str) -> Result<(), AppError> {
        if self.find_by_email(email).await?.is_some() {
            warn!(email = %email, "email already registered");
            return Err(AppError::DuplicateEmail);
        }
        Ok(())
    }

    async fn prepare_new_user(&self, input: SignUpInput) -> Result<NewUser, AppError> {
        let first_name = required(&input.first_name, "First name")?;
        let last_name = required(&input.last_name, "Last name")?;
        let email = normalize_email(&input.email)?;
        self.hasher.check_length(&input.password)?;
        self.ensure_email_free(&email).await?;

        Ok(NewUser {
            first_name,
            last_name,
            email,
            password_hash: self.hasher.hash(&input.password)?,
            is_admin: input.is_admin,
            is_verified: false,
            otp: None,
        })
    }

    fn open_session(&self, user: User) -> Result<Session, AppError> {
        let tokens = self.keys.issue_pair(&user.email, user.id, user.is_admin)?;
        Ok(Session { user, tokens })
    }

    /// Direct signup: the account is verified immediately and tokens are issued.
    pub async fn sign_up(&self, input: SignUpInput) -> Result<Session, AppError> {
        let mut new_user = self.prepare_new_user(input).await?;
        new_user.is_verified = true;

        let user = self.store.create(new_user).await?;
        info!(user_id = %user.id, email = %user.email, "user signed up");
        self.open_session(user)
    }

    /// OTP-gated signup: the account stays unverified until the code is confirmed.
    pub async fn sign_up_with_otp(&self, input: SignUpInput) -> Result<OtpIssued, AppError> {
        let mut new_user = self.prepare_new_user(input).await?;
        let otp = self.otp.generate();
        new_user.otp = Some((otp.code.clone(), otp.expires_at));

        let user = self.store.create(new_user).await?;
        info!(user_id = %user.id, email = %user.email, "user registered, awaiting verification");
        Ok(self.announce(user.email, otp.code, otp.expires_at))
    }

    fn announce(&self, email: String, code: String, expires_at: OffsetDateTime) -> OtpIssued {
        // No delivery channel: the log line is the delivery.
        info!(
            email = %email,
            otp = %code,
            valid_minutes = self.otp.ttl().whole_minutes(),
            "otp issued"
        );
        OtpIssued {
            email,
            code,
            expires_at,
        }
    }

    fn check_otp(user: &User, otp: &str, now: OffsetDateTime) -> Result<(), AppError> {
        let stored = match (&user.otp, user.otp_expires_at) {
            (Some(code), Some(expires_at)) if code == otp.trim() => Otp {
                code: code.clone(),
                expires_at,
            },
            _ => {
                warn!(user_id = %user.id, "invalid otp presented");
                return Err(AppError::InvalidOtp);
            }
        };
        if stored.is_expired_at(now) {
            warn!(user_id = %user.id, "expired otp presented");
            return Err(AppError::OtpExpired);
        }
        Ok(())
    }

    pub async fn verify_account(&self, email: &str, otp: &str) -> Result<User, AppError> {
        let email = normalize_email(email)?;
        let user = self
            .find_by_email(&email)
            .await?
            .ok_or(AppError::UserNotFound)?;
        Self::check_otp(&user, otp, OffsetDateTime::now_utc())?;

        let patch = UserPatch::Verified {
            otp: otp.trim().to_owned(),
        };
        let user = self.store.update(user.id, patch).await?;
        info!(user_id = %user.id, "account verified");
        Ok(user)
    }

    /// Issues a fresh code unconditionally. Used both for verification and for
    /// starting a password reset.
    pub async fn resend_otp(&self, email: &str) -> Result<OtpIssued, AppError> {
        let email = normalize_email(email)?;
        let user = self
            .find_by_email(&email)
            .await?
            .ok_or(AppError::UserNotFound)?;

        let otp = self.otp.generate();
        let user = self
            .store
            .update(
                user.id,
                UserPatch::Otp {
                    code: otp.code.clone(),
                    expires_at: otp.expires_at,
                },
            )
            .await?;
        Ok(self.announce(user.email, otp.code, otp.expires_at))
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Session, AppError> {
        let email = normalize_email(email)?;
        let Some(user) = self.find_by_email(&email).await? else {
            warn!(email = %email, "login unknown email");
            return Err(AppError::InvalidCredentials);
        };

        if !user.is_verified {
            warn!(user_id = %user.id, "login before verification");
            return Err(AppError::AccountUnverified);
        }

        if let Verification::Invalid(reason) = self.hasher.verify(password, &user.password_hash) {
            warn!(user_id = %user.id, reason, "login invalid password");
            return Err(AppError::InvalidCredentials);
        }

        let user = self
            .store
            .update(user.id, UserPatch::LastLogin(OffsetDateTime::now_utc()))
            .await?;
        info!(user_id = %user.id, email = %user.email, "user logged in");
        self.open_session(user)
    }

    fn check_new_password(&self, new_password: &str, confirm: &str) -> Result<String, AppError> {
        self.hasher.check_length(new_password)?;
        if new_password != confirm {
            return Err(AppError::PasswordMismatch);
        }
        self.hasher.hash(new_password)
    }

    pub async fn reset_password(&self, input: ResetPasswordInput) -> Result<User, AppError> {
        let email = normalize_email(&input.email)?;
        let user = self
            .find_by_email(&email)
            .await?
            .ok_or(AppError::UserNotFound)?;
        Self::check_otp(&user, &input.otp, OffsetDateTime::now_utc())?;

        let password_hash = self.check_new_password(&input.new_password, &input.confirm_password)?;
        let user = self
            .store
            .update(
                user.id,
                UserPatch::PasswordReset {
                    password_hash,
                    otp: input.otp.trim().to_owned(),
                },
            )
            .await?;
        info!(user_id = %user.id, "password reset");
        Ok(user)
    }

    /// Changes the password of the authenticated account identified by `email`.
    pub async fn change_password(
        &self,
        email: &str,
        input: ChangePasswordInput,
    ) -> Result<User, AppError> {
        let user = self
            .find_by_email(email)
            .await?
            .ok_or(AppError::UserNotFound)?;

        if !user.has_local_password() {
            warn!(user_id = %user.id, "change password on federated account");
            return Err(AppError::InvalidCredentials);
        }
        if !self
            .hasher
            .verify(&input.old_password, &user.password_hash)
            .is_valid()
        {
            warn!(user_id = %user.id, "change password with wrong old password");
            return Err(AppError::InvalidCredentials);
        }

        let password_hash =
            self.check_new_password(&input.new_password, &input.confirm_new_password)?;
        let user = self
            .store
            .update(user.id, UserPatch::PasswordChange { password_hash })
            .await?;
        info!(user_id = %user.id, "password changed");
        Ok(user)
    }

    /// Logs in the owner of an externally verified email, creating a
    /// passwordless, pre-verified account on first sight.
    pub async fn federated_login_or_create(
        &self,
        profile: ExternalProfile,
    ) -> Result<FederatedLogin, AppError> {
        let email = normalize_email(&profile.email)?;

        let existing = match self.find_by_email(&email).await? {
            Some(user) => Some(user),
            None => {
                let new_user = NewUser {
                    first_name: required(&profile.first_name, "First name")?,
                    last_name: required(&profile.last_name, "Last name")?,
                    email: email.clone(),
                    password_hash: String::new(),
                    is_admin: false,
                    is_verified: true,
                    otp: None,
                };
                match self.store.create(new_user).await {
                    Ok(user) => {
                        info!(user_id = %user.id, email = %user.email, "federated account created");
                        return Ok(FederatedLogin {
                            session: self.open_session(user)?,
                            created: true,
                        });
                    }
                    // Lost a race with a concurrent first login.
                    Err(StoreError::DuplicateEmail) => self.find_by_email(&email).await?,
                    Err(e) => return Err(e.into()),
                }
            }
        };

        let user = existing.ok_or(AppError::UserNotFound)?;
        let user = self
            .store
            .update(user.id, UserPatch::LastLogin(OffsetDateTime::now_utc()))
            .await?;
        info!(user_id = %user.id, email = %user.email, "federated login");
        Ok(FederatedLogin {
            session: self.open_session(user)?,
            created: false,
        })
    }
}
