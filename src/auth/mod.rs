//! Authentication and session security
//!
//! Rate limiting, audit logging, token issuance and rotation, the
//! authorization guard, and device-session management.

pub mod api;
pub mod errors;
pub mod events;
pub mod middleware;
pub mod models;
pub mod rate_limit;
pub mod sessions;
pub mod store;
pub mod token;

pub use api::AppState;
pub use errors::AuthApiError;
pub use events::SecurityEventLogger;
pub use models::{Claims, Role, SecurityEvent, SecurityEventType, User};
pub use rate_limit::{MemoryRateLimitBackend, RateLimiter};
pub use sessions::SessionManager;
pub use store::AuthStore;
pub use token::{AlwaysRotate, NeverRotate, ProbabilityRotation, RotationPolicy, TokenService};
