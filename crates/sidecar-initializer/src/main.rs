use anyhow::Result;
use clap::Parser;
use sidecar_initializer::app::ApplicationBuilder;
use sidecar_initializer::config::Cli;
use sidecar_initializer::config::InitializerSettings;
use utils::logging;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();
    let _guard = logging::init();

    tracing::info!("Starting the Kubernetes initializer {}", &**version::VERSION);
    tracing::info!("Initializer name set to: {}", cli.initializer_name);

    let settings = InitializerSettings::from(&cli);
    let app = match ApplicationBuilder::new(settings).build().await {
        Ok(app) => app,
        Err(e) => {
            tracing::error!("Failed to start initializer: {e}");
            return Err(e);
        }
    };

    app.run().await?;
    tracing::info!("Shutdown complete, exiting");

    Ok(())
}
