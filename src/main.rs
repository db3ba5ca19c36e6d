// src/main.rs
mod app;

use app::{App, AppError};
use viewport_host::RendererConfig;
use viewport_host::config::backend_from_env;
use viewport_host::logging::{LoggingConfig, init_logging};

fn main() -> Result<(), AppError> {
    init_logging(LoggingConfig::default());

    App::run(backend_from_env(), RendererConfig::from_env())
}
