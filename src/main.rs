use std::{sync::Arc, time::Duration};

use lead_widget::{
    host::{router, spawn_sweeper, HostState},
    html::Markup,
    settings::Settings,
    HttpBackend,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("lead_widget=info,tower_http=info")),
        )
        .init();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            error!(error = %err, "invalid settings");
            std::process::exit(1);
        }
    };

    let backend = HttpBackend::new(&settings.api_base_url).expect("failed to build HTTP client");
    let markup = Markup::new().expect("widget templates failed to parse");
    let port = settings.port;
    info!(
        api = %settings.api_base_url,
        storage = %settings.storage_dir.display(),
        "widget host configured"
    );

    let state = Arc::new(HostState::new(settings, backend, markup));
    spawn_sweeper(state.clone(), Duration::from_secs(60));
    let app = router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind TCP listener");

    info!("widget host running at http://localhost:{port}");
    axum::serve(listener, app)
        .await
        .expect("server runtime failure");
}
