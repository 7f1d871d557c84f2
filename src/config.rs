use std::net::SocketAddr;
use std::str::FromStr;
use std::{env, fmt};

use crate::error::AppError;
use crate::services::oauth2::registration::RealmRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    pub fn from_env() -> Self {
        match env::var("APP_ENV")
            .unwrap_or_else(|_| "development".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing configuration: {}", key),
            ConfigError::Invalid(key) => write!(f, "invalid configuration: {}", key),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for AppError {
    fn from(_: ConfigError) -> Self {
        AppError::Internal
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub addr: SocketAddr,
    pub app_env: AppEnv,
    /// Public base URL of this broker; used as token/metadata issuer.
    pub issuer: String,
    /// Realms and their registration policy, `name:policy[,..]`.
    pub realms: RealmRegistry,
    /// Postgres for accounts/subjects when set; in-memory stores otherwise.
    pub database_url: Option<String>,
    /// Exact-match CORS origin allowlist, used in production only.
    pub cors_allowed_origins: Vec<String>,
    // Registration access tokens are signed with this Ed25519 keypair.
    pub registration_jwt_private_key_pem: String,
    pub registration_jwt_public_key_pem: String,
    // Token lifetimes (seconds)
    pub login_ttl_seconds: i64,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let port: u16 = env::var("AAC_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(4000);
        let addr: SocketAddr = SocketAddr::from_str(&format!("0.0.0.0:{}", port))
            .map_err(|_| ConfigError::Invalid("AAC_PORT"))?;

        let app_env = AppEnv::from_env();

        let issuer = env::var("AAC_ISSUER").map_err(|_| ConfigError::Missing("AAC_ISSUER"))?;

        let realms_spec =
            env::var("AAC_REALMS").unwrap_or_else(|_| "system:authenticated".to_string());
        let realms =
            RealmRegistry::parse(&realms_spec).map_err(|_| ConfigError::Invalid("AAC_REALMS"))?;

        let database_url = env::var("DATABASE_URL").ok();

        let cors_allowed_origins: Vec<String> = env::var("CORS_ALLOWED_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let registration_jwt_private_key_pem = env::var("REGISTRATION_JWT_PRIVATE_KEY_PEM")
            .map_err(|_| ConfigError::Missing("REGISTRATION_JWT_PRIVATE_KEY_PEM"))?
            .replace("\\n", "\n");
        let registration_jwt_public_key_pem = env::var("REGISTRATION_JWT_PUBLIC_KEY_PEM")
            .map_err(|_| ConfigError::Missing("REGISTRATION_JWT_PUBLIC_KEY_PEM"))?
            .replace("\\n", "\n");

        let login_ttl_seconds = env::var("LOGIN_TTL_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(28_800); // 8 hours
        let access_token_ttl_seconds = env::var("ACCESS_TOKEN_TTL_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(600); // 10 min
        let refresh_token_ttl_seconds = env::var("REFRESH_TOKEN_TTL_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(2_592_000); // 30 days

        Ok(Config {
            addr,
            app_env,
            issuer,
            realms,
            database_url,
            cors_allowed_origins,
            registration_jwt_private_key_pem,
            registration_jwt_public_key_pem,
            login_ttl_seconds,
            access_token_ttl_seconds,
            refresh_token_ttl_seconds,
        })
    }
}
