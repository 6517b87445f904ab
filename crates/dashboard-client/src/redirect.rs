use std::fmt;

use tracing::warn;

/// Sends the operator back to the login screen once the session is gone.
///
/// Called after the token store has been cleared, with the configured login
/// path (`/auth` by default).
pub trait LoginRedirect: Send + Sync + fmt::Debug {
    fn redirect_to_login(&self, login_path: &str);
}

/// Default redirect for headless use: records the event and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRedirect;

impl LoginRedirect for TracingRedirect {
    fn redirect_to_login(&self, login_path: &str) {
        warn!(login_path, "session ended; sign in again to continue");
    }
}
