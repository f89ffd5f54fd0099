use kadacare_auth::{
    auth::TokenService, create_db_pool, create_router, init_tracing, shutdown_telemetry,
    AppState, Config,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    if std::env::args().nth(1).as_deref() == Some("generate-key") {
        let (private_key, public_key) = TokenService::generate_key_pair();
        println!("JWT_PRIVATE_KEY={private_key}");
        println!("# public key: {public_key}");
        return;
    }

    let config = Config::from_env();

    init_tracing(&config);

    info!(
        service = "kadacare-auth",
        version = env!("CARGO_PKG_VERSION"),
        environment = ?config.server.environment,
        api_prefix = %config.server.api_prefix,
        "Starting server"
    );

    for issue in config.validate_for_production() {
        warn!(issue = %issue, "Configuration warning");
    }

    info!(
        database_url = %config.database.url.split('@').next_back().unwrap_or("***"),
        max_connections = config.database.max_connections,
        "Connecting to database"
    );

    let db_pool = create_db_pool(&config);

    info!("Database connection pool created");

    let state = AppState::new(db_pool, &config).unwrap_or_else(|e| {
        error!(error = %e, "Failed to initialise token service");
        std::process::exit(1);
    });
    let app = create_router(state, &config);

    let http_addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .unwrap_or_else(|e| {
            error!(error = %e, address = %http_addr, "Failed to bind HTTP server");
            std::process::exit(1);
        });

    info!(
        http_address = %http_addr,
        docs_url = %format!("http://{}/swagger-ui", http_addr),
        "HTTP server ready"
    );

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
        info!("Shutdown signal received");
    };

    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await
    {
        error!(error = %e, "HTTP server error");
    }

    shutdown_telemetry();

    info!("Server shutdown complete");
}
