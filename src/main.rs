use anyhow::Result;
use std::path::PathBuf;
use std::{env, process};
use tbscan::config::{Settings, CONFIG_ENV};
use tbscan::predictor::Predictor;
use tbscan::server;
use tbscan::util::init_tracing;
use tracing::info;

const USAGE: &str = "usage: ./tbscan [config file]";

/// The config file comes from the first argument, or from `TBSCAN_CONFIG`
fn get_args() -> Option<PathBuf> {
    let args: Vec<String> = env::args().collect();
    match args.len() {
        1 => env::var_os(CONFIG_ENV).map(PathBuf::from),
        2 if args[1] == "-h" || args[1] == "--help" => {
            println!("{USAGE}");
            process::exit(0);
        }
        2 => Some(PathBuf::from(&args[1])),
        _ => {
            println!("{USAGE}");
            process::exit(1);
        }
    }
}

#[actix_web::main]
async fn main() -> Result<()> {
    init_tracing();

    let config_file = get_args();
    let settings = Settings::load(config_file.as_deref())?;
    info!("loaded settings {settings:?}");

    // A model that fails to load is fatal
    let predictor = Predictor::from_settings(&settings)?;

    server::run(settings, predictor).await?;
    Ok(())
}
