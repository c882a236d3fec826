//! Optional capabilities plugged into the command loop.
//!
//! Extensions are consulted in registration order. Each one may append lines
//! to the EHLO reply and may claim a command before the built-in dispatcher
//! sees it; the first extension that claims a command handles it alone.

mod starttls;

use async_trait::async_trait;

use crate::error::SessionError;
use crate::session::Session;

pub use starttls::StartTls;

#[async_trait]
pub trait Extension: Send + Sync {
    /// Returns the EHLO capability lines after this extension's additions.
    fn extend_ehlo(&self, _session: &Session, lines: Vec<String>) -> Vec<String> {
        lines
    }

    /// Offered every non-empty command line, split on whitespace.
    ///
    /// Returning `Ok(true)` means the command was fully handled, replies
    /// included. `Ok(false)` passes it on.
    async fn intercept(
        &self,
        _session: &mut Session,
        _words: &[&str],
    ) -> Result<bool, SessionError> {
        Ok(false)
    }
}
