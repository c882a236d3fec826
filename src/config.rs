use std::path::PathBuf;

use anyhow::{Context, Result};
use structopt::StructOpt;
use tracing::{info, warn};

use crate::extensions::{Extension, StartTls};
use crate::maildir::MailDir;
use crate::tls::TlsMaterial;

#[derive(Debug, StructOpt, Clone)]
#[structopt(
    name = "mailslot",
    about = "A minimal SMTP submission endpoint that drops accepted mail into a directory"
)]
pub struct Opt {
    /// Listening ports (can be specified multiple times)
    #[structopt(short = "p", long = "port", default_value = "25", number_of_values = 1)]
    pub ports: Vec<u16>,

    /// Listening address
    #[structopt(short = "a", long = "address", default_value = "0.0.0.0")]
    pub address: String,

    /// Host name announced in the banner and HELO/EHLO replies
    #[structopt(long = "host", default_value = "localhost")]
    pub host: String,

    /// Directory receiving accepted messages
    #[structopt(long = "maildir", default_value = "./mail", parse(from_os_str))]
    pub maildir: PathBuf,

    /// TLS certificate chain (PEM)
    #[structopt(long = "tls-cert", parse(from_os_str))]
    pub tls_cert: Option<PathBuf>,

    /// TLS private key (PEM, PKCS#8)
    #[structopt(long = "tls-key", parse(from_os_str))]
    pub tls_key: Option<PathBuf>,

    /// Offer STARTTLS (needs --tls-cert and --tls-key)
    #[structopt(long = "starttls")]
    pub starttls: bool,

    /// Ask clients to use TLS. Reported at startup, not enforced.
    #[structopt(long = "force-tls")]
    pub force_tls: bool,

    /// Log file path
    #[structopt(long = "logs", parse(from_os_str))]
    pub log_file: Option<PathBuf>,

    /// Verbose mode - log every command and reply
    #[structopt(short = "v", long = "verbose")]
    pub verbose: bool,
}

/// Everything a session needs from the configuration.
pub struct Settings {
    pub host: String,
    pub maildir: MailDir,
    pub extensions: Vec<Box<dyn Extension>>,
}

impl Opt {
    pub fn tls_material(&self) -> Result<Option<TlsMaterial>> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Ok(Some(TlsMaterial::load(cert, key)?)),
            (None, None) => Ok(None),
            _ => Err(anyhow::anyhow!(
                "--tls-cert and --tls-key must be given together"
            )),
        }
    }

    pub fn settings(&self) -> Result<Settings> {
        let maildir = MailDir::open(&self.maildir)
            .with_context(|| format!("Failed to create mail directory: {:?}", self.maildir))?;

        let mut extensions: Vec<Box<dyn Extension>> = Vec::new();
        if self.starttls {
            let material = self
                .tls_material()?
                .ok_or_else(|| anyhow::anyhow!("--starttls needs --tls-cert and --tls-key"))?;
            extensions.push(Box::new(StartTls::new(material.acceptor()?)));
            info!("STARTTLS enabled");
        } else if self.tls_cert.is_some() {
            warn!("TLS material given but --starttls not set, STARTTLS not offered");
        }

        if self.force_tls {
            warn!("--force-tls is set but not enforced, plaintext MAIL/DATA stay allowed");
        }

        Ok(Settings {
            host: self.host.clone(),
            maildir,
            extensions,
        })
    }
}
