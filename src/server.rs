use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::session::Session;
use crate::Settings;

/// Accepts connections and runs one independent session task per client.
#[derive(Clone)]
pub struct Server {
    settings: Arc<Settings>,
}

impl Server {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }

    /// Binds every port on `address` and serves them until one listener fails.
    pub async fn run(&self, address: &str, ports: &[u16]) -> Result<()> {
        let mut handles = vec![];

        for &port in ports {
            let addr = format!("{}:{}", address, port);
            let listener = TcpListener::bind(&addr)
                .await
                .with_context(|| format!("Failed to bind to {}", addr))?;
            info!(address = %addr, "listening");

            let this = self.clone();
            handles.push(tokio::spawn(async move { this.serve(listener).await }));
        }

        for handle in handles {
            handle.await??;
        }
        Ok(())
    }

    /// Accept loop for an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let settings = self.settings.clone();
                    tokio::spawn(async move {
                        let mut session = Session::new(Box::new(stream), Some(peer), settings);
                        if let Err(e) = session.run().await {
                            debug!(session = %session.id(), error = %e, "session ended with error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "accept failed");
                }
            }
        }
    }
}
