//! Authentication and authorization for choir: password hashing, signed
//! token envelopes, the role/permission hierarchy, the user store, and the
//! service that ties them together.

pub mod password;
pub mod roles;
pub mod service;
pub mod store;
pub mod token;

pub use password::PasswordHasher;
pub use roles::{Permission, Role};
pub use service::{AuthService, LoginOutcome, PublicProfile};
pub use store::{UserRecord, UserStore};
pub use token::{TokenClaims, TokenManager, TokenType};
