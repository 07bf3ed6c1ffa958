use clap::Parser;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use broker_load_test::cli::{run_compare, run_generate_config, Cli};
use broker_load_test::client::ws_client_factory;
use broker_load_test::config::{self, Config};
use broker_load_test::console::StdinGate;
use broker_load_test::error::BrokerLoadTestError;
use broker_load_test::orchestrator::ConnectionTest;

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "broker_load_test=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let result = match cli {
        Cli::Run {
            config: config_path,
            persist_connections,
            show_stats,
        } => run_connection_test(&config_path, persist_connections, show_stats),
        Cli::GenerateConfig {
            agents,
            controllers,
            prefix,
            broker,
            output,
        } => run_generate_config(agents, controllers, &prefix, &broker, &output),
        Cli::Compare { current, previous } => run_compare(&current, &previous),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run_connection_test(
    config_path: &Path,
    persist_connections: bool,
    show_stats: bool,
) -> Result<(), BrokerLoadTestError> {
    let mut cfg = config::load_from_file(config_path)?;
    apply_overrides(&mut cfg, persist_connections, show_stats);

    let mut test = ConnectionTest::new(cfg, ws_client_factory(), Box::new(StdinGate))?;
    test.setup_signal_handler()?;
    test.execute()?;
    Ok(())
}

/// Force config flags on when the matching command line switch is given.
/// A switch that is absent leaves the configured value untouched.
fn apply_overrides(config: &mut Config, persist_connections: bool, show_stats: bool) {
    if persist_connections {
        config.persist_connections = true;
    }
    if show_stats {
        config.show_stats = true;
    }
}
