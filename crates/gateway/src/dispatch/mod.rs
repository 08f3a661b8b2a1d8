//! The dispatch core.
//!
//! A dispatch attempt moves through `Received → Authorized → Quota-checked
//! → Locked(session) → Context-built → Invoked → Committed → Released`.
//! Failures before `Committed` leave no observable side effect on the
//! memory tiers; the quota charge decision happens at `Invoked`.

pub mod cancel;
pub mod quota;
pub mod rate_limit;
pub mod retry;
pub mod session_lock;
pub mod session_map;
pub mod turn;

pub use cancel::{CancelMap, CancelToken};
pub use quota::{QuotaInfo, QuotaTracker};
pub use rate_limit::{RateLimiter, RouteClass};
pub use retry::RetryPolicy;
pub use session_lock::SessionLockMap;
pub use session_map::SessionMap;
pub use turn::{dispatch_chat, dispatch_chat_stream, Caller, ChatOutcome, StreamFragment};
