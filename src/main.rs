use exam_scheduler::config::Config;
use exam_scheduler::server::{self, AppState};
use exam_scheduler::store::Store;
use log::{error, info};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut store = Store::new();
    if let Some(path) = &config.catalog_path {
        info!("Loading catalog from {}", path.display());
        if let Err(e) = store.load_file(path) {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    }

    if let Err(e) = server::run_server(AppState::new(store, config)).await {
        error!("server error: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
