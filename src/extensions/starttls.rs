use async_trait::async_trait;
use tokio_rustls::TlsAcceptor;

use super::Extension;
use crate::error::SessionError;
use crate::response::{ReplyCode, Response};
use crate::session::Session;

/// RFC 3207 STARTTLS: upgrades the session's transport in place.
pub struct StartTls {
    acceptor: TlsAcceptor,
}

impl StartTls {
    pub fn new(acceptor: TlsAcceptor) -> Self {
        Self { acceptor }
    }
}

#[async_trait]
impl Extension for StartTls {
    fn extend_ehlo(&self, session: &Session, mut lines: Vec<String>) -> Vec<String> {
        if !session.is_secure() {
            lines.push("STARTTLS".to_string());
        }
        lines
    }

    async fn intercept(
        &self,
        session: &mut Session,
        words: &[&str],
    ) -> Result<bool, SessionError> {
        if !words.first().is_some_and(|w| w.eq_ignore_ascii_case("STARTTLS")) {
            return Ok(false);
        }

        if session.declared_host().is_none() {
            session
                .reply(Response::new(ReplyCode::BadSequence, "EHLO/HELO first."))
                .await?;
            return Ok(true);
        }
        if session.is_secure() {
            session
                .reply(Response::new(ReplyCode::BadSequence, "TLS already active."))
                .await?;
            return Ok(true);
        }

        session
            .reply(Response::new(
                ReplyCode::ServiceReady,
                "Ready to start TLS, you go first.",
            ))
            .await?;
        session.upgrade(&self.acceptor).await?;
        Ok(true)
    }
}
