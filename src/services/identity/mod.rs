pub mod attributes;
pub mod identity;
pub mod principal;
pub mod subject;
