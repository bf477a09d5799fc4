use clap::Parser;
use durable_flow::app::{handle_fatal_error, initialize_app, AppConfig};
use durable_flow::cli::{execute_command, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let verbose = cli.verbose;
    let config = AppConfig::new(verbose).with_config_path(cli.config.clone());

    let result = match initialize_app(&config).await {
        Ok(runtime) => {
            let result = execute_command(&runtime, cli.command).await;
            runtime.shutdown().await;
            result
        }
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        handle_fatal_error(e, verbose);
    }
}
