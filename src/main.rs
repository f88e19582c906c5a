use std::process;
use std::sync::Arc;

use axum::Router;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio::net::TcpListener;
use tower_http::{compression::CompressionLayer, limit::RequestBodyLimitLayer, validate_request::ValidateRequestHeaderLayer};
use tracing_subscriber::{fmt::{writer::BoxMakeWriter, Layer}, layer::SubscriberExt, EnvFilter, Registry};

use config::AppConfig;
use db::{campaign::PgCampaignStore, ledger::PgLedgerStore};
use geo::GeoResolver;
use platform::graph::GraphClient;
use provisioning::CampaignProvisioner;
use routes::auth::AuthService;
use wallet::WalletService;

mod config;
mod db;
mod geo;
mod platform;
mod provisioning;
mod routes;
mod wallet;

#[tokio::main]
async fn main() {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            process::exit(1);
        }
    };

    // add tracing layer
    let file_appender = tracing_appender::rolling::never(".", &config.log_file);
    let (file_writer, _file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, _stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    // json lines go to the log file, human readable lines to stdout
    let file_layer = Layer::new().json().with_writer(BoxMakeWriter::new(move || file_writer.clone()));
    let stdout_layer = Layer::new().with_writer(BoxMakeWriter::new(move || stdout_writer.clone()));

    let subscriber = Registry::default()
        .with(EnvFilter::from_default_env())
        .with(file_layer)
        .with(stdout_layer);

    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Unable to set global subscriber: {err}");
        process::exit(1);
    }

    let database_pool = match process_database(&config.database_url, config.max_connection_pooling).await {
        Ok(db) => {
            tracing::info!("Connected to database");
            db
        },
        Err(err) => {
            tracing::error!("Failed to connect to database: {}", err);
            process::exit(1);
        }
    };

    let listener = match TcpListener::bind(("0.0.0.0", config.port)).await {
        Ok(listener) => {
            tracing::info!("Listening on port: {}", config.port);
            listener
        }
        Err(err) => {
            tracing::error!("Failed to bind to port: {}", err);
            process::exit(1);
        }
    };

    let router = match process_begin(&config, database_pool) {
        Ok(router) => {
            tracing::info!("Routes constructed successfully");
            router
        }
        Err(err) => {
            tracing::error!("Failed to construct routes: {}", err);
            process::exit(1);
        }
    };

    //start the http service
    let http_service = axum::serve(listener, router);
    if let Err(err) = http_service.await {
        tracing::error!("Failed to start server: {}", err);
        process::exit(1);
    }
}

fn process_begin(config: &AppConfig, db_pool: PgPool) -> Result<Router, String> {
    let head_route = Router::new();

    let graph = Arc::new(
        GraphClient::new(config.platform.clone())
            .map_err(|err| format!("Failed to build ad platform client: {err}"))?,
    );
    let geo = Arc::new(GeoResolver::new(graph.clone(), config.home_country.clone()));
    tracing::info!(
        api_version = %config.platform.api_version,
        home_country = %geo.home_country(),
        "Ad platform client ready"
    );

    let wallet = Arc::new(WalletService::new(Arc::new(PgLedgerStore::new(db_pool.clone()))));
    let provisioner = Arc::new(CampaignProvisioner::new(
        wallet.clone(),
        graph,
        geo,
        Arc::new(PgCampaignStore::new(db_pool)),
    ));

    let service = Arc::new(AuthService::new(config.jwt_secret.clone()));

    let wallet_routes = routes::wallet::wallet_routes(service.clone(), wallet)
        .route_layer(ValidateRequestHeaderLayer::custom(routes::utils::require_authorization))
        .route_layer(CompressionLayer::new().gzip(true));
    let campaign_routes = routes::campaigns::campaign_routes(service, provisioner)
        .route_layer(ValidateRequestHeaderLayer::custom(routes::utils::require_authorization));

    let router = head_route
        .nest("/v1", wallet_routes)
        .nest("/v1", campaign_routes)
        .route_layer(RequestBodyLimitLayer::new(1024 * 1024 * 10)); // creative images travel inline

    Ok(router)
}

async fn process_database(url: &str, max_conn_pool: u32) -> Result<PgPool, String> {
    // create a connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(max_conn_pool)
        .connect(url)
        .await
        .map_err(|err| format!("Failed to connect to database: {}", err))?;

    // a failed run is assumed to mean the schema is already in place
    if let Err(err) = sqlx::migrate!("./migrations").run(&db_pool).await {
        tracing::warn!("Failed to run migrations, continuing with existing schema: {err}");
    } else {
        tracing::info!("Migrations run successfully");
    }

    Ok(db_pool)
}
