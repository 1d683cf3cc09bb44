//! API constants

/// API path prefix, relative to the configured base path.
pub const API_BASE: &str = "/api";

/// Name of the admin session cookie.
pub const SESSION_COOKIE: &str = "imgopt_session";

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Failed logins tolerated from one client inside the window before it is blocked.
pub const MAX_LOGIN_FAILURES: u32 = 10;
pub const LOGIN_FAILURE_WINDOW_SECS: u64 = 900;

/// Room for multipart framing on top of the maximum upload size.
pub const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;
