// src/main.rs - Simulated auxiliary actuator host
use std::path::PathBuf;

use clap::Parser;
use tokio::sync::{mpsc, oneshot};
use tokio::task::LocalSet;

use krusty_aux::config;
use krusty_aux::hardware::ShutdownSignal;
use krusty_aux::host::HostEvent;
use krusty_aux::simulator::SimRig;

#[derive(Debug, Parser)]
#[command(name = "krusty-aux", version, about = "Auxiliary stepper and servo flap host")]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "aux.toml")]
    config: PathBuf,

    /// Run the range autotune of this flap at startup
    #[arg(long, value_name = "FLAP")]
    autotune: Vec<String>,

    /// Console command to run after startup, e.g. "FLAP_SET FLAP=vent VALUE=0.5"
    #[arg(long = "command", value_name = "LINE")]
    commands: Vec<String>,

    /// Seconds to run the simulated machine
    #[arg(long, default_value_t = 5.0)]
    duration: f64,

    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).init();

    tracing::info!("Starting krusty-aux {}", env!("CARGO_PKG_VERSION"));
    let mut config = config::load_config(&cli.config).map_err(|e| {
        tracing::error!("Failed to load config from '{}': {}", cli.config.display(), e);
        e
    })?;
    for name in &cli.autotune {
        match config.flaps.get_mut(name) {
            Some(flap) => flap.perform_range_tune = true,
            None => return Err(format!("Unknown flap '{}'", name).into()),
        }
    }

    let shutdown = ShutdownSignal::new();
    let rig = SimRig::build(&config, shutdown.clone());
    let (events_tx, events_rx) = mpsc::channel::<HostEvent>(16);

    // The host and its samplers hold non-Send state.
    let local = LocalSet::new();
    let commands = cli.commands.clone();
    let duration = cli.duration;
    local.spawn_local(async move {
        for line in commands {
            let (respond_to, response) = oneshot::channel();
            if events_tx.send(HostEvent::Command { line: line.clone(), respond_to }).await.is_err() {
                return;
            }
            match response.await {
                Ok(Ok(text)) if !text.is_empty() => tracing::info!("{}", text),
                Ok(Ok(_)) => {}
                Ok(Err(err)) => tracing::warn!("{}: {}", line, err),
                Err(_) => return,
            }
        }
        tokio::time::sleep(tokio::time::Duration::from_secs_f64(duration.max(0.0))).await;
        let _ = events_tx.send(HostEvent::Stop).await;
    });
    let status = local.run_until(rig.run(events_rx)).await;

    println!("{}", serde_json::to_string_pretty(&status)?);
    if let Some(reason) = shutdown.reason() {
        tracing::error!("Shut down: {}", reason.message);
        std::process::exit(1);
    }
    Ok(())
}
