pub mod manager;
pub mod provider;
pub mod resolver;
pub mod session;
pub mod token;
