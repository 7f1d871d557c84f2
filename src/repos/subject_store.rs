use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::repos::error::{RepoError, RepoResult};
use crate::services::identity::subject::{Subject, SubjectKind};

/// Durable subject persistence. Subjects are written once (when identity
/// conversion first sees a real-world user in a realm) and read on every
/// subsequent login.
#[async_trait]
pub trait SubjectStore: Send + Sync {
    async fn find(&self, subject_id: &str) -> RepoResult<Option<Subject>>;

    async fn insert(&self, subject: Subject) -> RepoResult<Subject>;

    async fn delete(&self, subject_id: &str) -> RepoResult<u64>;
}

#[derive(Debug, Default)]
pub struct MemorySubjectStore {
    inner: RwLock<HashMap<String, Subject>>,
}

impl MemorySubjectStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl SubjectStore for MemorySubjectStore {
    async fn find(&self, subject_id: &str) -> RepoResult<Option<Subject>> {
        Ok(self.inner.read().await.get(subject_id).cloned())
    }

    async fn insert(&self, subject: Subject) -> RepoResult<Subject> {
        self.inner
            .write()
            .await
            .insert(subject.subject_id.clone(), subject.clone());
        Ok(subject)
    }

    async fn delete(&self, subject_id: &str) -> RepoResult<u64> {
        Ok(self
            .inner
            .write()
            .await
            .remove(subject_id)
            .map(|_| 1)
            .unwrap_or(0))
    }
}

/// Postgres-backed subject store.
///
/// Expected schema:
///   subjects (
///     subject_id text primary key, realm text,
///     name text null, kind text
///   )
#[derive(Clone, Debug)]
pub struct PgSubjectStore {
    pool: PgPool,
}

impl PgSubjectStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SubjectRow {
    subject_id: String,
    realm: String,
    name: Option<String>,
    kind: String,
}

impl SubjectRow {
    fn into_subject(self) -> RepoResult<Subject> {
        let kind =
            SubjectKind::from_str(&self.kind).map_err(|_| RepoError::Corrupt("subjects.kind"))?;
        Ok(Subject {
            subject_id: self.subject_id,
            realm: self.realm,
            name: self.name,
            kind,
        })
    }
}

#[async_trait]
impl SubjectStore for PgSubjectStore {
    async fn find(&self, subject_id: &str) -> RepoResult<Option<Subject>> {
        let row = sqlx::query_as::<_, SubjectRow>(
            r#"
            SELECT subject_id, realm, name, kind
            FROM subjects
            WHERE subject_id = $1
            "#,
        )
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SubjectRow::into_subject).transpose()
    }

    async fn insert(&self, subject: Subject) -> RepoResult<Subject> {
        sqlx::query(
            r#"
            INSERT INTO subjects (subject_id, realm, name, kind)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (subject_id) DO NOTHING
            "#,
        )
        .bind(&subject.subject_id)
        .bind(&subject.realm)
        .bind(&subject.name)
        .bind(subject.kind.as_str())
        .execute(&self.pool)
        .await?;

        Ok(subject)
    }

    async fn delete(&self, subject_id: &str) -> RepoResult<u64> {
        let done = sqlx::query("DELETE FROM subjects WHERE subject_id = $1")
            .bind(subject_id)
            .execute(&self.pool)
            .await?;

        Ok(done.rows_affected())
    }
}
