use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use uuid::Uuid;

use crate::message::Message;

/// Directory receiving one `.mail` file per accepted message.
#[derive(Debug, Clone)]
pub struct MailDir {
    root: PathBuf,
}

impl MailDir {
    /// Opens `root`, creating it when missing.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes the message body to a freshly named file and returns its path.
    pub async fn store(&self, message: &Message) -> io::Result<PathBuf> {
        let path = self.root.join(unique_name());
        tokio::fs::write(&path, message.body()).await?;
        Ok(path)
    }
}

/// `<unix-millis>_<random-id>.mail`
fn unique_name() -> String {
    format!(
        "{}_{}.mail",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple()
    )
}
