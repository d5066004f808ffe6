use std::{process, sync::Arc};

use scriptorium::{
    application::{
        blog::site,
        error::AppError,
        repos::Store,
        session::SessionFactory,
    },
    cache::CacheConfig,
    config,
    infra::{
        db::PostgresStore,
        error::InfraError,
        http::{self, HttpState},
        memory::MemoryStore,
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Init(_) => run_init(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let (store, db) = init_store(&settings).await?;
    let sessions = SessionFactory::new(store, CacheConfig::from(&settings.cache));
    initialize_site(&sessions, &settings).await?;
    serve_http(&settings, HttpState { sessions, db }).await
}

async fn run_init(settings: config::Settings) -> Result<(), AppError> {
    let (store, _) = init_store(&settings).await?;
    let sessions = SessionFactory::new(store, CacheConfig::from(&settings.cache));
    initialize_site(&sessions, &settings).await
}

async fn initialize_site(
    sessions: &SessionFactory,
    settings: &config::Settings,
) -> Result<(), AppError> {
    let session = sessions.open();
    let result = site::init_site(&session, &settings.site).await;
    session.close();
    if result? {
        info!(target = "scriptorium::init", "site initialized");
    } else {
        info!(target = "scriptorium::init", "site already initialized");
    }
    Ok(())
}

async fn init_store(
    settings: &config::Settings,
) -> Result<(Arc<dyn Store>, Option<PostgresStore>), AppError> {
    let Some(database_url) = settings.database.url.as_ref() else {
        warn!(
            target = "scriptorium::init",
            "database url is not configured; using the in-memory store"
        );
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        return Ok((store, None));
    };

    let pool = PostgresStore::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    PostgresStore::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    let db = PostgresStore::new(pool);
    let store: Arc<dyn Store> = Arc::new(db.clone());
    Ok((store, Some(db)))
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "scriptorium::http",
        addr = %settings.server.addr,
        "listening"
    );

    axum::serve(listener, router.into_make_service())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}
