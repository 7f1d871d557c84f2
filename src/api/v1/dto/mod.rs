pub mod introspect_request;
pub mod login_request;
pub mod session_response;
pub mod token_request;
pub mod token_response;
