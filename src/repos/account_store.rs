use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::repos::error::{RepoError, RepoResult};
use crate::services::identity::identity::Account;

/// Account persistence, keyed by the provider-scoped `(provider_id, user_id)`
/// pair. Absence is `Ok(None)` — a missing account is the normal "new login"
/// case, not a failure.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_user_id(&self, provider_id: &str, user_id: &str)
    -> RepoResult<Option<Account>>;

    async fn find_by_uuid(&self, provider_id: &str, uuid: &str) -> RepoResult<Option<Account>>;

    /// Realm-scoped attribute match used for cross-provider account linking.
    /// Matches on `email` / `username` / one of the snapshot attributes.
    async fn find_by_attribute(
        &self,
        realm: &str,
        name: &str,
        value: &str,
    ) -> RepoResult<Vec<Account>>;

    async fn upsert(&self, account: Account) -> RepoResult<Account>;

    async fn delete(&self, provider_id: &str, user_id: &str) -> RepoResult<u64>;
}

/// In-memory account store for tests, local development, and deployments
/// without a configured database. Single-process consistency only.
#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    // (provider_id, user_id) -> Account
    inner: RwLock<HashMap<(String, String), Account>>,
}

impl MemoryAccountStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

fn attribute_matches(account: &Account, name: &str, value: &str) -> bool {
    match name {
        "email" => account.email.as_deref() == Some(value),
        "username" => account.username.as_deref() == Some(value),
        _ => account.attributes.get(name).map(String::as_str) == Some(value),
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn find_by_user_id(
        &self,
        provider_id: &str,
        user_id: &str,
    ) -> RepoResult<Option<Account>> {
        let map = self.inner.read().await;
        Ok(map
            .get(&(provider_id.to_string(), user_id.to_string()))
            .cloned())
    }

    async fn find_by_uuid(&self, provider_id: &str, uuid: &str) -> RepoResult<Option<Account>> {
        let map = self.inner.read().await;
        Ok(map
            .values()
            .find(|a| a.provider_id == provider_id && a.uuid == uuid)
            .cloned())
    }

    async fn find_by_attribute(
        &self,
        realm: &str,
        name: &str,
        value: &str,
    ) -> RepoResult<Vec<Account>> {
        let map = self.inner.read().await;
        Ok(map
            .values()
            .filter(|a| a.realm == realm && attribute_matches(a, name, value))
            .cloned()
            .collect())
    }

    async fn upsert(&self, account: Account) -> RepoResult<Account> {
        let mut map = self.inner.write().await;
        map.insert(
            (account.provider_id.clone(), account.user_id.clone()),
            account.clone(),
        );
        Ok(account)
    }

    async fn delete(&self, provider_id: &str, user_id: &str) -> RepoResult<u64> {
        let mut map = self.inner.write().await;
        Ok(map
            .remove(&(provider_id.to_string(), user_id.to_string()))
            .map(|_| 1)
            .unwrap_or(0))
    }
}

/// Postgres-backed account store.
///
/// Expected schema:
///   accounts (
///     uuid text, provider_id text, user_id text, subject_id text,
///     realm text, username text null, email text null,
///     email_verified boolean, attributes text,
///     created_at timestamptz, updated_at timestamptz,
///     primary key (provider_id, user_id)
///   )
///
/// `attributes` holds the JSON-serialized snapshot map.
#[derive(Clone, Debug)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    uuid: String,
    provider_id: String,
    user_id: String,
    subject_id: String,
    realm: String,
    username: Option<String>,
    email: Option<String>,
    email_verified: bool,
    attributes: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AccountRow {
    fn into_account(self) -> RepoResult<Account> {
        let attributes: HashMap<String, String> = serde_json::from_str(&self.attributes)
            .map_err(|_| RepoError::Corrupt("accounts.attributes"))?;
        Ok(Account {
            uuid: self.uuid,
            provider_id: self.provider_id,
            user_id: self.user_id,
            subject_id: self.subject_id,
            realm: self.realm,
            username: self.username,
            email: self.email,
            email_verified: self.email_verified,
            attributes,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const ACCOUNT_COLUMNS: &str = r#"
    uuid,
    provider_id,
    user_id,
    subject_id,
    realm,
    username,
    email,
    email_verified,
    attributes,
    created_at,
    updated_at
"#;

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn find_by_user_id(
        &self,
        provider_id: &str,
        user_id: &str,
    ) -> RepoResult<Option<Account>> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE provider_id = $1 AND user_id = $2"
        );
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(provider_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(AccountRow::into_account).transpose()
    }

    async fn find_by_uuid(&self, provider_id: &str, uuid: &str) -> RepoResult<Option<Account>> {
        let sql =
            format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE provider_id = $1 AND uuid = $2");
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(provider_id)
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;

        row.map(AccountRow::into_account).transpose()
    }

    async fn find_by_attribute(
        &self,
        realm: &str,
        name: &str,
        value: &str,
    ) -> RepoResult<Vec<Account>> {
        // email/username live in dedicated columns; everything else is matched
        // in memory against the snapshot map to keep the SQL surface small.
        let rows = match name {
            "email" => {
                let sql = format!(
                    "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE realm = $1 AND email = $2"
                );
                sqlx::query_as::<_, AccountRow>(&sql)
                    .bind(realm)
                    .bind(value)
                    .fetch_all(&self.pool)
                    .await?
            }
            "username" => {
                let sql = format!(
                    "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE realm = $1 AND username = $2"
                );
                sqlx::query_as::<_, AccountRow>(&sql)
                    .bind(realm)
                    .bind(value)
                    .fetch_all(&self.pool)
                    .await?
            }
            _ => {
                let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE realm = $1");
                sqlx::query_as::<_, AccountRow>(&sql)
                    .bind(realm)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut accounts = Vec::new();
        for row in rows {
            let account = row.into_account()?;
            if attribute_matches(&account, name, value) {
                accounts.push(account);
            }
        }
        Ok(accounts)
    }

    async fn upsert(&self, account: Account) -> RepoResult<Account> {
        let attributes = serde_json::to_string(&account.attributes)
            .map_err(|_| RepoError::Corrupt("accounts.attributes"))?;

        sqlx::query(
            r#"
            INSERT INTO accounts (
                uuid, provider_id, user_id, subject_id, realm,
                username, email, email_verified, attributes, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (provider_id, user_id) DO UPDATE
            SET subject_id = EXCLUDED.subject_id,
                username = EXCLUDED.username,
                email = EXCLUDED.email,
                email_verified = EXCLUDED.email_verified,
                attributes = EXCLUDED.attributes,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&account.uuid)
        .bind(&account.provider_id)
        .bind(&account.user_id)
        .bind(&account.subject_id)
        .bind(&account.realm)
        .bind(&account.username)
        .bind(&account.email)
        .bind(account.email_verified)
        .bind(&attributes)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(account)
    }

    async fn delete(&self, provider_id: &str, user_id: &str) -> RepoResult<u64> {
        let done = sqlx::query("DELETE FROM accounts WHERE provider_id = $1 AND user_id = $2")
            .bind(provider_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(done.rows_affected())
    }
}
