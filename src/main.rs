use anyhow::Result;
use structopt::StructOpt;
use tracing::{error, info};

use mailslot::{logging, Opt, Server};

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::from_args();
    logging::init(opt.log_file.as_deref(), opt.verbose)?;

    info!(version = env!("CARGO_PKG_VERSION"), pid = std::process::id(), "starting mailslot");

    let settings = match opt.settings() {
        Ok(settings) => settings,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    };

    info!(
        host = %settings.host,
        maildir = ?settings.maildir.root(),
        ports = ?opt.ports,
        extensions = settings.extensions.len(),
        "waiting for connections"
    );

    Server::new(settings).run(&opt.address, &opt.ports).await
}
