//! Per-connection SMTP state machine

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SessionError;
use crate::logging::sanitize;
use crate::message::Message;
use crate::response::{ReplyCode, Response};
use crate::Settings;

const SERVER_NAME: &str = "mailslot";
const HELP_TEXT: &str = "https://tools.ietf.org/html/rfc5321";
/// Longest accepted line, terminator included.
const MAX_LINE_LENGTH: u64 = 8 * 1024;

/// Byte channel a session talks over: a TCP socket, a TLS stream wrapping
/// one, or an in-memory pipe.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

pub type BoxedStream = Box<dyn Stream>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Greeting {
    Unset,
    /// HELO
    Basic,
    /// EHLO
    Extended,
}

/// Which line framing is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Command,
    DataCapture,
}

/// What the read loop does after a line was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

pub struct Session {
    id: String,
    peer: Option<SocketAddr>,
    settings: Arc<Settings>,
    stream: Option<BufReader<BoxedStream>>,
    declared_host: Option<String>,
    greeting: Greeting,
    mode: Mode,
    secure: bool,
    message: Message,
}

impl Session {
    pub fn new(stream: BoxedStream, peer: Option<SocketAddr>, settings: Arc<Settings>) -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(10);

        Self {
            id,
            peer,
            settings,
            stream: Some(BufReader::new(stream)),
            declared_host: None,
            greeting: Greeting::Unset,
            mode: Mode::Command,
            secure: false,
            message: Message::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn declared_host(&self) -> Option<&str> {
        self.declared_host.as_deref()
    }

    pub fn greeting(&self) -> Greeting {
        self.greeting
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Sends the banner, then processes lines until the client quits, the
    /// connection drops, or a protocol violation closes it.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        info!(session = %self.id, peer = ?self.peer, "connected");

        let result = self.serve().await;
        self.close().await;

        match &result {
            Ok(()) => info!(session = %self.id, "disconnected"),
            Err(e) => warn!(session = %self.id, error = %e, "session aborted"),
        }
        result
    }

    async fn serve(&mut self) -> Result<(), SessionError> {
        let banner = format!("{} ESMTP {}", self.settings.host, SERVER_NAME);
        self.reply(Response::new(ReplyCode::ServiceReady, banner)).await?;

        let mut buf = Vec::new();
        loop {
            buf.clear();
            let stream = self.stream.as_mut().ok_or(SessionError::Closed)?;
            let mut limited = (&mut *stream).take(MAX_LINE_LENGTH);
            if limited.read_until(b'\n', &mut buf).await? == 0 {
                if self.mode == Mode::DataCapture {
                    debug!(
                        session = %self.id,
                        lines = self.message.line_count(),
                        "connection dropped during DATA, message discarded"
                    );
                }
                return Ok(());
            }

            if buf.len() as u64 == MAX_LINE_LENGTH && buf.last() != Some(&b'\n') {
                self.fail("Line too long, closing connection.").await?;
                return Ok(());
            }

            let line = decode_line(&buf);
            if self.process_line(&line).await? == Flow::Close {
                return Ok(());
            }
        }
    }

    /// Handles one line with its terminator already stripped.
    pub async fn process_line(&mut self, line: &str) -> Result<Flow, SessionError> {
        match self.mode {
            Mode::DataCapture => self.process_data_line(line).await,
            Mode::Command => self.process_command(line).await,
        }
    }

    async fn process_command(&mut self, line: &str) -> Result<Flow, SessionError> {
        let words: Vec<&str> = line.split_whitespace().collect();
        // Whitespace-only lines count as empty and are skipped too.
        let Some(first) = words.first() else {
            return Ok(Flow::Continue);
        };
        debug!(session = %self.id, "< {}", sanitize(line));

        let settings = self.settings.clone();
        for extension in &settings.extensions {
            if extension.intercept(self, &words).await? {
                return Ok(if self.is_closed() {
                    Flow::Close
                } else {
                    Flow::Continue
                });
            }
        }

        match first.to_uppercase().as_str() {
            "HELO" => self.handle_helo(&words, Greeting::Basic).await,
            "EHLO" => self.handle_helo(&words, Greeting::Extended).await,
            "MAIL" => self.handle_mail(&words).await,
            "RCPT" => self.handle_rcpt(&words).await,
            "DATA" => self.handle_data().await,
            "QUIT" => self.handle_quit().await,
            "HELP" => {
                self.reply(Response::new(ReplyCode::ServiceReady, HELP_TEXT)).await?;
                Ok(Flow::Continue)
            }
            _ => {
                self.reply(Response::new(
                    ReplyCode::Unimplemented,
                    "Unrecognized command.",
                ))
                .await?;
                Ok(Flow::Continue)
            }
        }
    }

    async fn handle_helo(
        &mut self,
        words: &[&str],
        greeting: Greeting,
    ) -> Result<Flow, SessionError> {
        if words.len() != 2 {
            return self.fail("Invalid HELO/EHLO argument, closing connection.").await;
        }

        self.declared_host = Some(words[1].to_string());
        self.greeting = greeting;
        debug!(session = %self.id, host = %sanitize(words[1]), "greeted");

        let host = &self.settings.host;
        let response = match greeting {
            Greeting::Extended => {
                let first = match self.peer {
                    Some(peer) => format!("{} at your service, [{}]", host, peer.ip()),
                    None => format!("{} at your service", host),
                };
                let this: &Session = self;
                let lines = this
                    .settings
                    .extensions
                    .iter()
                    .fold(vec![first], |lines, ext| ext.extend_ehlo(this, lines));
                Response::multiline(ReplyCode::Ok, lines)
            }
            _ => Response::new(ReplyCode::Ok, format!("{} at your service", host)),
        };
        self.reply(response).await?;
        Ok(Flow::Continue)
    }

    async fn handle_mail(&mut self, words: &[&str]) -> Result<Flow, SessionError> {
        let Some(sender) = words.get(1).and_then(|arg| parse_path(*arg, "FROM")) else {
            return self.fail("Invalid MAIL argument, closing connection.").await;
        };
        debug!(session = %self.id, sender = %sanitize(sender), "sender accepted");
        self.message.set_sender(sender.to_string());
        self.reply(Response::ok()).await?;
        Ok(Flow::Continue)
    }

    async fn handle_rcpt(&mut self, words: &[&str]) -> Result<Flow, SessionError> {
        let Some(recipient) = words.get(1).and_then(|arg| parse_path(*arg, "TO")) else {
            return self.fail("Invalid RCPT argument, closing connection.").await;
        };
        debug!(session = %self.id, recipient = %sanitize(recipient), "recipient accepted");
        self.message.set_recipient(recipient.to_string());
        self.reply(Response::ok()).await?;
        Ok(Flow::Continue)
    }

    async fn handle_data(&mut self) -> Result<Flow, SessionError> {
        if !self.message.has_envelope() {
            self.reply(Response::new(ReplyCode::BadSequence, "MAIL and RCPT first.")).await?;
            return Ok(Flow::Continue);
        }
        self.mode = Mode::DataCapture;
        self.reply(Response::new(
            ReplyCode::StartInput,
            "Go ahead, end with <CRLF>.<CRLF>",
        ))
        .await?;
        Ok(Flow::Continue)
    }

    async fn handle_quit(&mut self) -> Result<Flow, SessionError> {
        self.reply(Response::new(ReplyCode::Closing, "Goodbye!")).await?;
        self.close().await;
        Ok(Flow::Close)
    }

    async fn process_data_line(&mut self, line: &str) -> Result<Flow, SessionError> {
        if line != "." {
            self.message.append_body_line(line.to_string());
            return Ok(Flow::Continue);
        }

        self.mode = Mode::Command;
        let message = std::mem::take(&mut self.message);
        match self.settings.maildir.store(&message).await {
            Ok(path) => {
                let file = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                info!(
                    session = %self.id,
                    file = %file,
                    from = %sanitize(message.sender().unwrap_or_default()),
                    to = %sanitize(message.recipient().unwrap_or_default()),
                    "accepted e-mail"
                );
                self.reply(Response::ok()).await?;
                Ok(Flow::Continue)
            }
            Err(source) => {
                // The message is lost; the client is told so and dropped.
                if let Err(e) = self
                    .reply(Response::new(
                        ReplyCode::TransactionFailed,
                        "Could not store message, closing connection.",
                    ))
                    .await
                {
                    debug!(session = %self.id, error = %e, "failed to report storage error");
                }
                self.close().await;
                Err(SessionError::Persist {
                    dir: self.settings.maildir.root().to_path_buf(),
                    source,
                })
            }
        }
    }

    /// Protocol violation: 554, then the connection is closed.
    async fn fail(&mut self, text: &str) -> Result<Flow, SessionError> {
        warn!(session = %self.id, "{}", text);
        self.reply(Response::new(ReplyCode::TransactionFailed, text)).await?;
        self.close().await;
        Ok(Flow::Close)
    }

    /// Renders `response` and flushes it to the client.
    pub async fn reply(&mut self, response: Response) -> Result<(), SessionError> {
        let packet = response.render()?;
        for line in &response.lines {
            debug!(session = %self.id, "> {} {}", response.code, line);
        }

        let stream = self.stream.as_mut().ok_or(SessionError::Closed)?;
        stream.write_all(packet.as_bytes()).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Swaps the plaintext transport for a server-side TLS stream in place.
    ///
    /// Bytes already buffered from the old transport are dropped; the
    /// client must wait for the go-ahead before starting the handshake.
    /// On handshake failure the transport is gone and the session is closed.
    pub async fn upgrade(&mut self, acceptor: &TlsAcceptor) -> Result<(), SessionError> {
        let reader = self.stream.take().ok_or(SessionError::Closed)?;
        let pending = reader.buffer().len();
        if pending > 0 {
            debug!(session = %self.id, bytes = pending, "discarding plaintext sent before handshake");
        }

        debug!(session = %self.id, "starting TLS handshake");
        let tls = acceptor
            .accept(reader.into_inner())
            .await
            .map_err(SessionError::Handshake)?;

        let stream: BoxedStream = Box::new(tls);
        self.stream = Some(BufReader::new(stream));
        self.secure = true;
        info!(session = %self.id, "TLS session established");
        Ok(())
    }

    /// Shuts the transport down; later replies fail with `Closed`.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!(session = %self.id, error = %e, "shutdown failed");
            }
        }
    }
}

/// Strips the line terminator (LF or CRLF), replacing invalid UTF-8.
fn decode_line(buf: &[u8]) -> String {
    let line = buf.strip_suffix(b"\n").unwrap_or(buf);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

/// Parses `FROM:<addr>` / `TO:<addr>` and returns `addr` verbatim.
fn parse_path<'a>(arg: &'a str, keyword: &str) -> Option<&'a str> {
    let pieces: Vec<&str> = arg.split(':').collect();
    if pieces.len() != 2 || pieces[0] != keyword {
        return None;
    }
    pieces[1].strip_prefix('<')?.strip_suffix('>')
}

#[cfg(test)]
pub(crate) mod tests {
    use std::path::Path;

    use tokio::io::{BufReader, DuplexStream, ReadHalf, WriteHalf};
    use tokio::task::JoinHandle;

    use super::*;
    use crate::extensions::Extension;
    use crate::maildir::MailDir;

    pub(crate) struct Client {
        reader: BufReader<ReadHalf<DuplexStream>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl Client {
        pub(crate) async fn send(&mut self, line: &str) {
            self.writer
                .write_all(format!("{line}\r\n").as_bytes())
                .await
                .unwrap();
            self.writer.flush().await.unwrap();
        }

        pub(crate) async fn read_line(&mut self) -> Option<String> {
            let mut line = String::new();
            match self.reader.read_line(&mut line).await {
                Ok(0) | Err(_) => None,
                Ok(_) => Some(line.trim_end_matches("\r\n").to_string()),
            }
        }

        /// Reads one complete reply block.
        pub(crate) async fn read_reply(&mut self) -> Vec<String> {
            let mut lines = Vec::new();
            while let Some(line) = self.read_line().await {
                let last = line.as_bytes().get(3) != Some(&b'-');
                lines.push(line);
                if last {
                    break;
                }
            }
            lines
        }

        pub(crate) async fn command(&mut self, line: &str) -> Vec<String> {
            self.send(line).await;
            self.read_reply().await
        }
    }

    pub(crate) fn settings(maildir: &Path, extensions: Vec<Box<dyn Extension>>) -> Arc<Settings> {
        Arc::new(Settings {
            host: "mx.test".to_string(),
            maildir: MailDir::open(maildir).unwrap(),
            extensions,
        })
    }

    pub(crate) async fn start(
        settings: Arc<Settings>,
    ) -> (Client, JoinHandle<(Session, Result<(), SessionError>)>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let mut session = Session::new(Box::new(server), None, settings);
        let handle = tokio::spawn(async move {
            let result = session.run().await;
            (session, result)
        });

        let (read, write) = tokio::io::split(client);
        let mut client = Client {
            reader: BufReader::new(read),
            writer: write,
        };
        let banner = client.read_reply().await;
        assert_eq!(banner, vec!["220 mx.test ESMTP mailslot"]);
        (client, handle)
    }

    struct Capability(&'static str);

    #[async_trait::async_trait]
    impl Extension for Capability {
        fn extend_ehlo(&self, _session: &Session, mut lines: Vec<String>) -> Vec<String> {
            lines.push(self.0.to_string());
            lines
        }
    }

    /// Claims `PING` and answers it itself.
    struct Ping;

    #[async_trait::async_trait]
    impl Extension for Ping {
        async fn intercept(
            &self,
            session: &mut Session,
            words: &[&str],
        ) -> Result<bool, SessionError> {
            if !words[0].eq_ignore_ascii_case("PING") {
                return Ok(false);
            }
            session.reply(Response::new(ReplyCode::Ok, "PONG")).await?;
            Ok(true)
        }
    }

    fn stored_files(dir: &Path) -> Vec<std::path::PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect()
    }

    #[test]
    fn test_parse_path() {
        assert_eq!(parse_path("FROM:<a@b.c>", "FROM"), Some("a@b.c"));
        assert_eq!(parse_path("TO:<>", "TO"), Some(""));
        assert_eq!(parse_path("TO:< spaced >", "TO"), Some(" spaced "));
        assert_eq!(parse_path("from:<a@b.c>", "FROM"), None);
        assert_eq!(parse_path("FROM<a@b.c>", "FROM"), None);
        assert_eq!(parse_path("FROM:a@b.c", "FROM"), None);
        assert_eq!(parse_path("FROM:<a@b.c", "FROM"), None);
        assert_eq!(parse_path("FROM:<", "FROM"), None);
        assert_eq!(parse_path("FROM:<a:b>", "FROM"), None);
        assert_eq!(parse_path("TO:<a@b.c>", "FROM"), None);
    }

    #[test]
    fn test_decode_line() {
        assert_eq!(decode_line(b"HELO x\r\n"), "HELO x");
        assert_eq!(decode_line(b"HELO x\n"), "HELO x");
        assert_eq!(decode_line(b"no terminator"), "no terminator");
        assert_eq!(decode_line(b"  \r\n"), "  ");
        assert_eq!(decode_line(b"\xff\r\n"), "\u{fffd}");
    }

    #[tokio::test]
    async fn test_helo_sets_declared_host() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut client, handle) = start(settings(tmp.path(), vec![])).await;

        assert_eq!(
            client.command("HELO client.test").await,
            vec!["250 mx.test at your service"]
        );
        assert_eq!(client.command("QUIT").await, vec!["221 Goodbye!"]);
        assert!(client.read_line().await.is_none());

        let (session, result) = handle.await.unwrap();
        result.unwrap();
        assert_eq!(session.declared_host(), Some("client.test"));
        assert_eq!(session.greeting(), Greeting::Basic);
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_ehlo_collects_capabilities_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let extensions: Vec<Box<dyn Extension>> = vec![
            Box::new(Capability("PIPELINING")),
            Box::new(Ping),
            Box::new(Capability("8BITMIME")),
        ];
        let (mut client, handle) = start(settings(tmp.path(), extensions)).await;

        let reply = client.command("ehlo client.test").await;
        assert_eq!(
            reply,
            vec![
                "250-mx.test at your service",
                "250-PIPELINING",
                "250 8BITMIME",
            ]
        );
        client.command("QUIT").await;

        let (session, _) = handle.await.unwrap();
        assert_eq!(session.greeting(), Greeting::Extended);
    }

    #[tokio::test]
    async fn test_helo_without_argument_closes() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut client, handle) = start(settings(tmp.path(), vec![])).await;

        let reply = client.command("HELO").await;
        assert_eq!(reply.len(), 1);
        assert!(reply[0].starts_with("554 "));
        assert!(client.read_line().await.is_none());

        let (session, result) = handle.await.unwrap();
        result.unwrap();
        assert!(session.declared_host().is_none());
    }

    #[tokio::test]
    async fn test_ehlo_with_two_arguments_closes() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut client, _handle) = start(settings(tmp.path(), vec![])).await;

        let reply = client.command("EHLO a.test b.test").await;
        assert!(reply[0].starts_with("554 "));
        assert!(client.read_line().await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_mail_closes() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut client, handle) = start(settings(tmp.path(), vec![])).await;

        client.command("HELO client.test").await;
        let reply = client.command("MAIL FROM<bad>").await;
        assert!(reply[0].starts_with("554 "));
        assert!(client.read_line().await.is_none());

        let (session, _) = handle.await.unwrap();
        assert!(session.message().sender().is_none());
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_mail_without_argument_closes() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut client, _handle) = start(settings(tmp.path(), vec![])).await;

        assert!(client.command("MAIL").await[0].starts_with("554 "));
        assert!(client.read_line().await.is_none());
    }

    #[tokio::test]
    async fn test_rcpt_keyword_is_case_sensitive() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut client, _handle) = start(settings(tmp.path(), vec![])).await;

        assert!(client.command("RCPT to:<bob@example.com>").await[0].starts_with("554 "));
        assert!(client.read_line().await.is_none());
    }

    #[tokio::test]
    async fn test_envelope_is_stored_verbatim() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut client, handle) = start(settings(tmp.path(), vec![])).await;

        assert_eq!(
            client.command("mail FROM:<Alice+tag@Example.COM>").await,
            vec!["250 OK"]
        );
        assert_eq!(
            client.command("RCPT TO:<bob@example.com>").await,
            vec!["250 OK"]
        );
        client.command("QUIT").await;

        let (session, _) = handle.await.unwrap();
        assert_eq!(session.message().sender(), Some("Alice+tag@Example.COM"));
        assert_eq!(session.message().recipient(), Some("bob@example.com"));
    }

    #[tokio::test]
    async fn test_full_transaction_persists_body() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut client, handle) = start(settings(tmp.path(), vec![])).await;

        client.command("HELO client.test").await;
        client.command("MAIL FROM:<alice@example.com>").await;
        client.command("RCPT TO:<bob@example.com>").await;
        let reply = client.command("DATA").await;
        assert!(reply[0].starts_with("354 "));

        client.send("a").await;
        client.send("").await;
        client.send("b").await;
        assert_eq!(client.command(".").await, vec!["250 OK"]);
        assert_eq!(client.command("QUIT").await, vec!["221 Goodbye!"]);

        let (session, result) = handle.await.unwrap();
        result.unwrap();
        assert_eq!(session.mode(), Mode::Command);
        assert_eq!(session.message(), &Message::new());

        let files = stored_files(tmp.path());
        assert_eq!(files.len(), 1);
        assert!(files[0].to_string_lossy().ends_with(".mail"));
        assert_eq!(std::fs::read_to_string(&files[0]).unwrap(), "a\r\n\r\nb");
    }

    #[tokio::test]
    async fn test_commands_are_body_during_data() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut client, _handle) = start(settings(tmp.path(), vec![])).await;

        client.command("MAIL FROM:<alice@example.com>").await;
        client.command("RCPT TO:<bob@example.com>").await;
        client.command("DATA").await;
        client.send("QUIT").await;
        client.send("  indented").await;
        client.send("..").await;
        assert_eq!(client.command(".").await, vec!["250 OK"]);
        client.command("QUIT").await;

        let files = stored_files(tmp.path());
        assert_eq!(
            std::fs::read_to_string(&files[0]).unwrap(),
            "QUIT\r\n  indented\r\n.."
        );
    }

    #[tokio::test]
    async fn test_data_before_envelope_is_bad_sequence() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut client, handle) = start(settings(tmp.path(), vec![])).await;

        assert!(client.command("DATA").await[0].starts_with("503 "));
        client.command("MAIL FROM:<alice@example.com>").await;
        assert!(client.command("DATA").await[0].starts_with("503 "));
        assert_eq!(client.command("QUIT").await, vec!["221 Goodbye!"]);

        let (session, _) = handle.await.unwrap();
        assert_eq!(session.mode(), Mode::Command);
    }

    #[tokio::test]
    async fn test_help_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut client, _handle) = start(settings(tmp.path(), vec![])).await;

        let first = client.command("HELP").await;
        let second = client.command("help").await;
        assert_eq!(first, second);
        assert_eq!(first, vec![format!("220 {HELP_TEXT}")]);
    }

    #[tokio::test]
    async fn test_unknown_command_keeps_connection() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut client, _handle) = start(settings(tmp.path(), vec![])).await;

        assert_eq!(
            client.command("FOO").await,
            vec!["502 Unrecognized command."]
        );
        client.command("HELO client.test").await;
        assert_eq!(
            client.command("FOO bar").await,
            vec!["502 Unrecognized command."]
        );
        assert_eq!(client.command("QUIT").await, vec!["221 Goodbye!"]);
    }

    #[tokio::test]
    async fn test_empty_and_whitespace_only_lines_are_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut client, _handle) = start(settings(tmp.path(), vec![])).await;

        client.send("").await;
        client.send("   ").await;
        assert_eq!(client.command("QUIT").await, vec!["221 Goodbye!"]);
    }

    #[tokio::test]
    async fn test_overlong_line_closes() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut client, handle) = start(settings(tmp.path(), vec![])).await;

        let garbage = "x".repeat(MAX_LINE_LENGTH as usize + 100);
        client.writer.write_all(garbage.as_bytes()).await.unwrap();
        client.writer.flush().await.unwrap();

        assert_eq!(
            client.read_reply().await,
            vec!["554 Line too long, closing connection."]
        );
        assert!(client.read_line().await.is_none());

        let (session, result) = handle.await.unwrap();
        result.unwrap();
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_line_just_under_limit_is_accepted() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut client, _handle) = start(settings(tmp.path(), vec![])).await;

        let long = format!("FOO {}", "x".repeat(MAX_LINE_LENGTH as usize - 10));
        assert_eq!(client.command(&long).await, vec!["502 Unrecognized command."]);
        assert_eq!(client.command("QUIT").await, vec!["221 Goodbye!"]);
    }

    #[tokio::test]
    async fn test_extension_claims_before_dispatcher() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut client, _handle) = start(settings(tmp.path(), vec![Box::new(Ping)])).await;

        assert_eq!(client.command("ping").await, vec!["250 PONG"]);
        assert_eq!(client.command("QUIT").await, vec!["221 Goodbye!"]);
    }

    #[tokio::test]
    async fn test_persist_failure_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("mail");
        let (mut client, handle) = start(settings(&root, vec![])).await;
        std::fs::remove_dir(&root).unwrap();

        client.command("MAIL FROM:<alice@example.com>").await;
        client.command("RCPT TO:<bob@example.com>").await;
        client.command("DATA").await;
        client.send("body").await;
        assert!(client.command(".").await[0].starts_with("554 "));
        assert!(client.read_line().await.is_none());

        let (_, result) = handle.await.unwrap();
        assert!(matches!(result, Err(SessionError::Persist { .. })));
    }

    #[tokio::test]
    async fn test_persist_failure_reported_after_client_left() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("mail");
        let (mut client, handle) = start(settings(&root, vec![])).await;
        std::fs::remove_dir(&root).unwrap();

        client.command("MAIL FROM:<alice@example.com>").await;
        client.command("RCPT TO:<bob@example.com>").await;
        client.command("DATA").await;
        client.send("body").await;
        client.send(".").await;
        drop(client);

        // the failed 554 write must not mask the storage error
        let (session, result) = handle.await.unwrap();
        assert!(matches!(result, Err(SessionError::Persist { .. })));
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_disconnect_during_data_ends_quietly() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut client, handle) = start(settings(tmp.path(), vec![])).await;

        client.command("MAIL FROM:<alice@example.com>").await;
        client.command("RCPT TO:<bob@example.com>").await;
        client.command("DATA").await;
        client.send("partial").await;
        drop(client);

        let (session, result) = handle.await.unwrap();
        result.unwrap();
        assert_eq!(session.mode(), Mode::DataCapture);
        assert!(stored_files(tmp.path()).is_empty());
    }
}
