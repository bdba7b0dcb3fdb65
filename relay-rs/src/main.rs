use anyhow::Context;
use clap::builder::FalseyValueParser;
use clap::{ArgAction, Parser};
use relay_rs::config::{ConfigStore, LogLevel, REFRESH_INTERVAL};
use relay_rs::logging;
use relay_rs::relay::{Proxy, Relay, Target};
use relay_rs::security::AuthStore;
use relay_rs::smtp::client::local_hostname;
use relay_rs::smtp::{SmtpServer, SmtpTarget};
use relay_rs::storage::FileSaver;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "relay-rs")]
#[command(about = "Authenticated SMTP relay with hot-reloadable filtering", long_about = None)]
struct Args {
    /// Configuration file, re-read whenever it changes
    #[arg(short, long, env = "CONFIG_PATH", default_value = "/etc/relay-rs/config.toml")]
    config: PathBuf,

    /// Log level, takes precedence over logLevel in the file
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<LogLevel>,

    /// Print the effective configuration as JSON (secrets redacted) and exit
    ///
    /// Any value other than false/no/off/0 enables it.
    #[arg(long, env = "DUMP_CONFIG", action = ArgAction::SetTrue, value_parser = FalseyValueParser::new())]
    dump_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let store = ConfigStore::open(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?
        .with_level_override(args.log_level);
    let config = store.load();

    if args.dump_config {
        println!("{}", config.to_json_pretty()?);
        return Ok(());
    }

    let level = logging::init(store.log_level(), config.server.log_file_path.as_deref())?;
    let store = Arc::new(store.with_level_handle(level));

    info!("Starting relay-rs");
    info!("  Configuration: {}", args.config.display());
    info!("  Listening on: {}", config.server.listen_addr());
    info!("  Upstream: {} ({:?})", config.proxy.addr(), config.proxy.tls);
    info!("  Filters: {}", config.filters.to.len());

    let target: Arc<dyn Target> = Arc::new(SmtpTarget::new(store.clone()));
    let mut proxy = Proxy::new(store.clone(), target);

    if config.server.data_path.as_os_str().is_empty() {
        info!("  Message persistence disabled");
    } else {
        let saver = FileSaver::open(&config.server.data_path).await?;
        proxy = proxy.with_saver(Arc::new(saver));
    }

    let relay: Arc<dyn Relay> = Arc::new(proxy);
    let auth = Arc::new(AuthStore::new(store.clone()));

    let server = SmtpServer::bind(
        config.server.listen_addr(),
        store.clone(),
        auth,
        relay,
        local_hostname(),
    )
    .await?;

    let refresher = store.clone().spawn_refresher(REFRESH_INTERVAL);

    let outcome = tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    };

    refresher.abort();

    if let Err(e) = &outcome {
        error!("SMTP server error: {}", e);
    }
    Ok(outcome?)
}
