//! # mailslot
//!
//! A minimal SMTP submission endpoint. It runs the HELO/EHLO, MAIL, RCPT,
//! DATA dialogue for one envelope at a time, can upgrade the connection with
//! STARTTLS, and writes every accepted message body to
//! `<unix-millis>_<random-id>.mail` in a configured directory.
//!
//! It does not relay, resolve MX records, authenticate or retry anything.

pub mod config;
pub mod error;
pub mod extensions;
pub mod logging;
pub mod maildir;
pub mod message;
pub mod response;
pub mod server;
pub mod session;
pub mod tls;

pub use config::{Opt, Settings};
pub use error::SessionError;
pub use extensions::{Extension, StartTls};
pub use maildir::MailDir;
pub use message::Message;
pub use response::{render, FormatError, ReplyCode, Response};
pub use server::Server;
pub use session::{BoxedStream, Flow, Greeting, Mode, Session, Stream};
pub use tls::TlsMaterial;
