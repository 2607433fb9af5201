//! EV Trip Logbook - Backend
//!
//! Records electric-vehicle journeys, analyses energy efficiency and serves
//! predictions. Build with the `web` feature (default) to run the REST API.

#[cfg(feature = "web")]
fn run_web() -> anyhow::Result<()> {
    use anyhow::Context;
    use ev_trip_logbook_lib::config::AppConfig;
    use ev_trip_logbook_lib::server;

    let config = AppConfig::from_env().context("Failed to load configuration")?;
    log::info!("Data directory: {:?}", config.data_dir);
    log::info!("Models directory: {:?}", config.models_dir);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?
        .block_on(server::start_server(config))
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    #[cfg(feature = "web")]
    {
        if let Err(e) = run_web() {
            log::error!("Server failed: {:#}", e);
            std::process::exit(1);
        }
    }

    #[cfg(not(feature = "web"))]
    {
        eprintln!("Error: No server feature enabled. Build with --features web");
        std::process::exit(1);
    }
}
