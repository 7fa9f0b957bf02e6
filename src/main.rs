use clap::Parser;
use mysql_replay::{Config, Error, Replicator, Result};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "mysql-replay")]
#[command(about = "MySQL binlog to MySQL replicator", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "config.yaml")]
    config: PathBuf,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    info!("Starting mysql-replay");
    info!("Loading configuration from {:?}", args.config);

    let config = match Config::from_file(&args.config) {
        Ok(cfg) => {
            info!("Configuration loaded successfully");
            cfg
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(Error::Config(e));
        }
    };

    info!(
        source_host = %config.source_mysql_settings.host,
        source_port = %config.source_mysql_settings.port,
        source_server_id = %config.source_server_id,
        binlog_file = %config.binlog_file,
        binlog_pos = %config.binlog_pos,
        target_host = %config.target_mysql_settings.host,
        target_port = %config.target_mysql_settings.port,
        "Configuration summary"
    );

    let mut replicator = Replicator::new(config);
    if let Err(e) = replicator.run().await {
        error!("Replication failed: {}", e);
        return Err(e);
    }

    Ok(())
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("mysql_replay=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("mysql_replay=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
