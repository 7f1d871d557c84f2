use axum::{Router, routing::get};
use std::{panic, process, sync::Arc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api;
use crate::config::Config;
use crate::error::AppError;
use crate::middleware;
use crate::repos::account_store::{AccountStore, MemoryAccountStore, PgAccountStore};
use crate::repos::subject_store::{MemorySubjectStore, PgSubjectStore, SubjectStore};
use crate::services::authn::manager::AuthenticationManager;
use crate::services::authn::provider::{
    AssertionValidator, IdentityProvider, IdentityProviderRegistry, InternalPasswordValidator,
    ProviderConfig, seed_internal_user,
};
use crate::services::authn::session::SessionStore;
use crate::services::identity::principal::Authority;
use crate::services::oauth2::client_store::ClientStore;
use crate::services::oauth2::introspection::IntrospectionService;
use crate::services::oauth2::jwt::{JwtIssuer, JwtVerifier};
use crate::services::oauth2::registration::{REGISTRATION_AUDIENCE, RegistrationService};
use crate::services::oauth2::revocation::RevocationService;
use crate::services::oauth2::token_store::{MemoryTokenStore, TokenStore};
use crate::services::oauth2::tokens::TokenService;
use crate::state::AppState;

fn init_tracing() {
    // Prefer RUST_LOG if set; otherwise use a sensible default.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn init_panic_hook(abort_on_panic: bool) {
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        // Surface panics via tracing so they are never lost to a hidden stderr.
        tracing::error!(?info, "panic");

        // Development fails fast; production keeps serving and logs.
        if abort_on_panic {
            process::abort();
        } else {
            default_hook(info);
        }
    }))
}

pub async fn run() -> Result<(), AppError> {
    init_tracing();
    let config = Config::from_env()?;

    let abort_on_panic = !config.app_env.is_production();
    init_panic_hook(abort_on_panic);

    tracing::info!(
        "starting broker in {:?} mode on {}",
        config.app_env,
        config.addr
    );

    let state = build_state(&config).await?;
    let app = build_router(state, &config);
    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .map_err(|_| AppError::Internal)?;
    axum::serve(listener, app)
        .await
        .map_err(|_| AppError::Internal)?;

    Ok(())
}

async fn build_state(config: &Config) -> Result<AppState, AppError> {
    // Durable account/subject storage when Postgres is configured; memory
    // stores otherwise (dev, tests).
    let (accounts, subjects): (Arc<dyn AccountStore>, Arc<dyn SubjectStore>) =
        match &config.database_url {
            Some(url) => {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await
                    .map_err(|e| {
                        tracing::error!(error = %e, "failed to connect to database");
                        AppError::Internal
                    })?;
                (
                    Arc::new(PgAccountStore::new(pool.clone())),
                    Arc::new(PgSubjectStore::new(pool)),
                )
            }
            None => {
                tracing::warn!("DATABASE_URL not set; using in-memory account/subject stores");
                (MemoryAccountStore::new(), MemorySubjectStore::new())
            }
        };

    // One provider per authority per realm, named "{realm}-{authority}".
    let mut registry = IdentityProviderRegistry::new();
    for realm in config.realms.realms() {
        registry.register(IdentityProvider::new(
            ProviderConfig::for_authority(Authority::Internal, &format!("{realm}-password"), realm),
            Arc::new(InternalPasswordValidator::new(
                accounts.clone(),
                config.login_ttl_seconds,
            )),
            accounts.clone(),
            subjects.clone(),
        ));
        for authority in [Authority::Saml, Authority::Spid, Authority::Oidc] {
            registry.register(IdentityProvider::new(
                ProviderConfig::for_authority(authority, &format!("{realm}-{authority}"), realm),
                Arc::new(AssertionValidator),
                accounts.clone(),
                subjects.clone(),
            ));
        }
    }

    tracing::info!(
        providers = registry.providers().count(),
        "identity provider registry built"
    );

    if !config.app_env.is_production() {
        for realm in config.realms.realms() {
            let provider_id = format!("{realm}-password");
            seed_internal_user(&accounts, &provider_id, realm, "dev", "dev", None)
                .await
                .map_err(|_| AppError::Internal)?;
        }
        tracing::warn!("seeded development user 'dev'/'dev' in every realm");
    }

    let signer = JwtIssuer::new(
        &config.registration_jwt_private_key_pem,
        config.issuer.clone(),
    )?;
    let verifier = JwtVerifier::new(
        &config.registration_jwt_public_key_pem,
        &config.issuer,
        REGISTRATION_AUDIENCE,
    )?;

    let clients = ClientStore::new();
    let token_store: Arc<dyn TokenStore> = MemoryTokenStore::new();

    Ok(AppState {
        issuer: config.issuer.clone(),
        realms: config.realms.clone(),
        manager: Arc::new(AuthenticationManager::new(Arc::new(registry))),
        sessions: SessionStore::new(),
        clients: clients.clone(),
        token_store: token_store.clone(),
        tokens: TokenService::new(
            token_store.clone(),
            config.access_token_ttl_seconds,
            config.refresh_token_ttl_seconds,
        ),
        introspection: IntrospectionService::new(token_store.clone(), config.issuer.clone()),
        revocation: RevocationService::new(token_store),
        registration: RegistrationService::new(clients, config.realms.clone(), signer, verifier),
    })
}

fn build_router(state: AppState, config: &Config) -> Router {
    async fn health() -> &'static str {
        "ok"
    }

    let router = Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api::v1::routes(state.clone()));

    // Session resolution/pruning runs inside the stateful router; transport
    // middleware wraps the finished service.
    let router = middleware::expiry::apply(router, state.clone()).with_state(state);
    let router = middleware::security_headers::apply(router);
    let router = middleware::cors::apply(router, config);
    middleware::http::apply(router)
}
