pub mod client_store;
pub mod introspection;
pub mod jwt;
pub mod metadata;
pub mod registration;
pub mod revocation;
pub mod token_store;
pub mod tokens;
