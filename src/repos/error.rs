use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("db error")]
    Db(#[from] sqlx::Error),

    #[error("corrupt record: {0}")]
    Corrupt(&'static str),
}

pub type RepoResult<T> = Result<T, RepoError>;
