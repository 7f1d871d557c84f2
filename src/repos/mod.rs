pub mod account_store;
pub mod error;
pub mod subject_store;
