//! Admin authentication: server-side sessions behind a cookie, and a limiter for
//! repeated login failures.

pub mod middleware;
pub mod session;

pub use middleware::{secure_compare, session_middleware, session_token, AuthFailureLimiter};
pub use session::SessionStore;
