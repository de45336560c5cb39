//! Cookie Store (C4): Netscape cookie-file parsing plus a shared,
//! challenge-solver-writable jar.

pub mod cookie_store;
pub mod cookies;

pub use cookie_store::CookieStore;
pub use cookies::{CookieError, CookieLine, load_cookies_into_jar, parse_netscape_cookies};
