//! Wallet authentication: challenge/response login, privileged trust
//! sessions, and the PIN fallback.

pub mod address;
pub mod audit;
pub mod chain;
pub mod clock;
pub mod error;
pub mod message;
pub mod middleware;
pub mod orchestrator;
pub mod pin;
pub mod session;
pub mod verify;

pub use address::Address;
pub use error::AuthError;
pub use middleware::{check_rate_limit, AppState, AuthSession, PrivilegedSession};
pub use orchestrator::{AuthSettings, Authenticator, SweepReport};
pub use session::{generate_challenge_nonce, generate_session_token};
pub use verify::SignatureVerifier;
