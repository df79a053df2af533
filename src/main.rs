/*!
Here we go!
*/
use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    Router,
    routing::{get, get_service, post},
};
use simplelog::{ColorChoice, TerminalMode, TermLogger};
use tower_http::services::fs::ServeDir;

use gradebook::{config, inter, view};

const DEFAULT_CONFIG_FILE: &str = "config.toml";

async fn catchall_error_handler(e: std::io::Error) -> impl IntoResponse {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Unhandled internal error: {}", &e)
    )
}

async fn run() -> Result<(), String> {
    let config_path = std::env::args().nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_owned());

    let mut cfg = match config::Cfg::from_file(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            log::warn!("{}; using default configuration.", &e);
            config::Cfg::default()
        },
    };
    cfg.apply_env()?;
    log::info!("Configuration:\n{:#?}", &cfg);

    let glob = config::load_configuration(&cfg).await?;
    let glob = Arc::new(glob);

    inter::init(&cfg.templates_dir)?;

    let serve_static = get_service(ServeDir::new(&cfg.static_dir))
        .handle_error(catchall_error_handler);

    let app = Router::new()
        .route(view::FRONT_PAGE, get(inter::front_page))
        .route(view::LOGIN, post(inter::login))
        .route(view::SIGN_UP, post(inter::sign_up))
        .route(view::API, post(inter::api))
        .route(view::TEACHER, post(inter::teacher::api))
        .route(view::STUDENT, post(inter::student::api))
        .nest("/static", serve_static)
        .layer(Extension(glob.clone()))
        .layer(middleware::from_fn(inter::request_identity));

    log::info!("Listening on {}", &glob.addr);

    axum::Server::bind(&glob.addr)
        .serve(app.into_make_service())
        .await
        .map_err(|e| format!("Server error: {}", &e))
}

#[tokio::main]
async fn main() {
    let log_cfg = simplelog::ConfigBuilder::new()
        .add_filter_allow_str("gradebook")
        .build();
    if let Err(e) = TermLogger::init(
        gradebook::log_level_from_env(),
        log_cfg,
        TerminalMode::Stdout,
        ColorChoice::Auto
    ) {
        eprintln!("Unable to start logging: {}", &e);
    }
    log::info!("Logging started.");

    if let Err(e) = run().await {
        log::error!("{}", &e);
        std::process::exit(1);
    }
}
