use std::{process, sync::Arc};

use newsdesk::{
    application::{
        articles::{ArticleService, ArticleServiceConfig},
        error::AppError,
        origin::OriginStore,
        saves::SaveService,
        warmer::{CacheWarmer, WarmSelection, WarmerConfig, spawn_warm_schedule},
    },
    cache::{
        CacheConfig, CacheManager, CacheRuntime, DistributedTier, IdempotencyConfig,
        IdempotentWriteCoordinator, MemoryTier, RedisTier, SharedClock, SystemClock,
    },
    config,
    infra::{
        db::PostgresOrigin,
        error::InfraError,
        http::{self, HttpState},
        memory::MemoryOrigin,
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
        config::Command::Warm(args) => run_warm(settings, args).await,
    }
}

struct ApplicationContext {
    manager: CacheManager,
    origin: Arc<dyn OriginStore>,
    articles: ArticleService,
    saves: SaveService,
    warmer: Arc<CacheWarmer>,
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let app = build_application_context(&settings).await?;

    let mut runtime = CacheRuntime::new(app.manager.clone());
    runtime.start_sweeper(settings.cache.sweep_interval);
    if let Some(interval) = settings.warmer.interval {
        runtime.attach(
            "warm-schedule",
            spawn_warm_schedule(app.warmer.clone(), interval),
        );
    }

    let state = HttpState {
        articles: app.articles,
        saves: app.saves,
        warmer: app.warmer,
        origin: app.origin,
        tier: app.manager.tier().clone(),
    };
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "newsdesk::serve",
        addr = %settings.server.addr,
        "listening"
    );

    let served = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")));

    if tokio::time::timeout(settings.server.graceful_shutdown, runtime.shutdown())
        .await
        .is_err()
    {
        warn!(
            target = "newsdesk::serve",
            "background tasks did not stop within the shutdown timeout"
        );
    }

    served
}

async fn run_warm(settings: config::Settings, args: config::WarmArgs) -> Result<(), AppError> {
    let app = build_application_context(&settings).await?;

    let selection = if args.ids.is_empty() {
        WarmSelection::Top { limit: args.limit }
    } else {
        WarmSelection::Explicit(args.ids)
    };

    let summary = app.warmer.warm(selection).await;
    app.manager.shutdown();

    let output = serde_json::to_string_pretty(&summary)
        .map_err(|err| AppError::unexpected(format!("failed to encode summary: {err}")))?;
    println!("{output}");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(
            target = "newsdesk::serve",
            error = %err,
            "failed to listen for shutdown signal"
        );
        std::future::pending::<()>().await;
    }
    info!(target = "newsdesk::serve", "shutdown signal received");
}

async fn build_application_context(
    settings: &config::Settings,
) -> Result<ApplicationContext, AppError> {
    let clock: SharedClock = Arc::new(SystemClock);
    let origin = init_origin(settings).await?;
    let tier = init_distributed_tier(settings, &clock).await?;

    let manager = CacheManager::new(&CacheConfig::from(&settings.cache), tier, clock.clone())?;
    let coordinator = IdempotentWriteCoordinator::new(
        manager.tier().clone(),
        IdempotencyConfig::from(&settings.idempotency),
        clock.clone(),
    );

    let articles = ArticleService::new(
        manager.clone(),
        origin.clone(),
        ArticleServiceConfig::from(&settings.articles),
    );
    let saves = SaveService::new(origin.clone(), coordinator, articles.clone());
    let warmer = Arc::new(CacheWarmer::new(
        articles.clone(),
        origin.clone(),
        WarmerConfig::from(&settings.warmer),
        clock,
    ));

    Ok(ApplicationContext {
        manager,
        origin,
        articles,
        saves,
        warmer,
    })
}

async fn init_origin(settings: &config::Settings) -> Result<Arc<dyn OriginStore>, AppError> {
    let Some(database_url) = settings.database.url.as_ref() else {
        warn!(
            target = "newsdesk::serve",
            "database url is not configured; serving seeded in-memory content"
        );
        return Ok(Arc::new(MemoryOrigin::seeded()));
    };

    let pool = PostgresOrigin::connect(
        database_url,
        settings.database.max_connections.get(),
        settings.database.acquire_timeout,
        settings.database.statement_timeout,
    )
    .await
    .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresOrigin::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(Arc::new(PostgresOrigin::new(
        pool,
        settings.database.statement_timeout,
    )))
}

async fn init_distributed_tier(
    settings: &config::Settings,
    clock: &SharedClock,
) -> Result<Arc<dyn DistributedTier>, AppError> {
    let Some(redis_url) = settings.redis.url.as_ref() else {
        warn!(
            target = "newsdesk::serve",
            "redis url is not configured; using an in-process distributed tier"
        );
        return Ok(Arc::new(MemoryTier::new(clock.clone())));
    };

    let tier = RedisTier::connect(
        redis_url,
        settings.redis.pool_size.get(),
        settings.redis.timeout,
    )
    .map_err(|err| AppError::from(InfraError::distributed_cache(err.to_string())))?;

    // An unreachable tier at startup is tolerated; reads and writes degrade per call.
    if let Err(err) = tier.ping().await {
        warn!(
            target = "newsdesk::serve",
            error = %err,
            "distributed cache did not answer the startup ping"
        );
    }

    Ok(Arc::new(tier))
}
