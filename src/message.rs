/// Envelope and body of the message currently being received.
///
/// Addresses are stored exactly as the client sent them; syntax checks
/// happen in the command dispatcher.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Message {
    sender: Option<String>,
    recipient: Option<String>,
    body_lines: Vec<String>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sender(&mut self, sender: String) {
        self.sender = Some(sender);
    }

    pub fn set_recipient(&mut self, recipient: String) {
        self.recipient = Some(recipient);
    }

    pub fn append_body_line(&mut self, line: String) {
        self.body_lines.push(line);
    }

    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    pub fn recipient(&self) -> Option<&str> {
        self.recipient.as_deref()
    }

    pub fn line_count(&self) -> usize {
        self.body_lines.len()
    }

    /// True once both MAIL and RCPT were accepted.
    pub fn has_envelope(&self) -> bool {
        self.sender.is_some() && self.recipient.is_some()
    }

    /// Body lines joined with CRLF, without a trailing terminator.
    pub fn body(&self) -> String {
        self.body_lines.join("\r\n")
    }
}
