pub mod login;
pub mod oauth2;
pub mod registration;
