//! Session lifecycle: the manager contract and its HTTP implementation.

mod auth;
pub mod manager;
pub mod options;

pub use manager::{HttpSession, HttpSessionManager, SessionError, SessionManager};
pub use options::{BasicCredentials, SessionOptions};
