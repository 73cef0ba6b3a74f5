//! Agent-to-agent security: identity lifecycle, capability-gated session
//! establishment over ECDH/HKDF, signed and optionally AES-GCM-encrypted
//! messaging, continuous verification, and root key rotation.

pub mod error;
pub mod identity;
pub mod manager;
pub mod message;
pub mod rate_limit;
pub mod session;
pub mod types;
pub mod verification;

pub use error::SecurityError;
pub use identity::IdentityManager;
pub use manager::{SecurityConfig, SecurityManager};
pub use message::MessageExchange;
pub use rate_limit::{CircuitBreaker, RateLimiter};
pub use session::SessionManager;
pub use types::{
    AgentIdentity, Capability, Certificate, MessageAnomaly, ReceiveOutcome, SecureMessage, Session,
    SecurityTrustLevel,
};
pub use verification::verify_agent;
