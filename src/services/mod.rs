pub mod authn;
pub mod identity;
pub mod oauth2;
