//! SMTP replies and their wire format

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("a reply needs at least one text line")]
    Empty,
}

/// The subset of RFC 5321 reply codes this server emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyCode {
    /// Banner, HELP, STARTTLS go-ahead
    ServiceReady,
    /// QUIT
    Closing,
    /// HELO/EHLO, MAIL, RCPT, end of DATA
    Ok,
    /// DATA go-ahead
    StartInput,
    Unimplemented,
    BadSequence,
    /// Reply sent right before the server drops the connection
    TransactionFailed,
}

impl ReplyCode {
    pub fn as_u16(self) -> u16 {
        match self {
            ReplyCode::ServiceReady => 220,
            ReplyCode::Closing => 221,
            ReplyCode::Ok => 250,
            ReplyCode::StartInput => 354,
            ReplyCode::Unimplemented => 502,
            ReplyCode::BadSequence => 503,
            ReplyCode::TransactionFailed => 554,
        }
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// One reply: a code and one or more text lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: ReplyCode,
    pub lines: Vec<String>,
}

impl Response {
    pub fn new(code: ReplyCode, text: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![text.into()],
        }
    }

    pub fn multiline(code: ReplyCode, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    pub fn ok() -> Self {
        Self::new(ReplyCode::Ok, "OK")
    }

    /// Wire bytes for this reply, see [`render`].
    pub fn render(&self) -> Result<String, FormatError> {
        render(self.code, &self.lines)
    }
}

/// Renders `code` and `lines` as a reply block.
///
/// Every line but the last is written as `<code>-<text>`, the last one as
/// `<code> <text>`, each terminated by CRLF.
pub fn render<S: AsRef<str>>(code: ReplyCode, lines: &[S]) -> Result<String, FormatError> {
    let (last, rest) = lines.split_last().ok_or(FormatError::Empty)?;

    let mut out = String::new();
    for line in rest {
        out.push_str(&format!("{}-{}\r\n", code, line.as_ref()));
    }
    out.push_str(&format!("{} {}\r\n", code, last.as_ref()));
    Ok(out)
}
