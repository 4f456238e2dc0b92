use std::sync::Arc;

use axum::extract::FromRef;
use tracing::info;

use crate::{
    auth::{
        google::{GoogleProvider, IdentityProvider},
        jwt::JwtKeys,
        otp::OtpGenerator,
        password::Hasher,
        services::AccountService,
    },
    config::AppConfig,
    users::{
        memory::MemoryUserStore,
        repo::{PgUserStore, TimedUserStore, UserStore},
        services::UserAdminService,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub keys: JwtKeys,
    pub accounts: AccountService,
    pub users: UserAdminService,
    pub identity: Arc<dyn IdentityProvider>,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        state.keys.clone()
    }
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let store: Arc<dyn UserStore> = if config.uses_memory_store() {
            info!("using in-memory user store");
            Arc::new(MemoryUserStore::new())
        } else {
            let pg = PgUserStore::connect(&config.database_url, config.database_max_connections)
                .await?;
            pg.migrate().await?;
            Arc::new(pg)
        };
        let store = Arc::new(TimedUserStore::new(store, config.request_timeout()));

        let identity = Arc::new(GoogleProvider::new(config.google_userinfo_url.clone()));
        Ok(Self::from_parts(config, store, identity))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        store: Arc<dyn UserStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let keys = JwtKeys::from_config(&config.jwt);
        let accounts = AccountService::new(
            store.clone(),
            keys.clone(),
            Hasher::new(config.password_min_length),
            OtpGenerator::new(time::Duration::minutes(config.otp_ttl_minutes)),
        );
        Self {
            config,
            keys,
            accounts,
            users: UserAdminService::new(store),
            identity,
        }
    }
}

#[cfg(test)]
impl AppState {
    /// State over a fresh in-memory store. The identity provider accepts only
    /// the access token `"good-google-token"`.
    pub fn fake() -> (Self, Arc<MemoryUserStore>) {
        use async_trait::async_trait;

        use crate::{auth::google::ExternalProfile, error::AppError};

        struct FakeIdentity;
        #[async_trait]
        impl IdentityProvider for FakeIdentity {
            fn name(&self) -> &str {
                "fake"
            }

            async fn fetch_profile(&self, token: &str) -> Result<ExternalProfile, AppError> {
                if token != "good-google-token" {
                    return Err(AppError::ExternalIdentity("unknown token".into()));
                }
                Ok(ExternalProfile {
                    email: "Grace@Gmail.com".into(),
                    first_name: "Grace".into(),
                    last_name: "Hopper".into(),
                })
            }
        }

        let config = Arc::new(
            AppConfig::from_lookup(|key| match key {
                "DATABASE_URL" => Some(crate::config::MEMORY_DATABASE_URL.into()),
                "JWT_SECRET" => Some("test-secret".into()),
                "JWT_ISSUER" => Some("test-issuer".into()),
                "JWT_AUDIENCE" => Some("test-aud".into()),
                _ => None,
            })
            .expect("fake config"),
        );
        let store = Arc::new(MemoryUserStore::new());
        let state = Self::from_parts(config, store.clone(), Arc::new(FakeIdentity));
        (state, store)
    }
}
