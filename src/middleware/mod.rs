pub mod cors;
pub mod expiry;
pub mod http;
pub mod security_headers;
