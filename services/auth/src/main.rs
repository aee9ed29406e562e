use anyhow::Result;
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use auth_service::{
    AppState,
    audit::TracingAuditLog,
    config::{AppConfig, NotificationMode, StorageBackend},
    jwt::JwtService,
    metrics::Metrics,
    notification::{HttpNotifier, LogNotifier, MeteredNotifier, Notifier, RetryingNotifier},
    password::Argon2Hasher,
    repositories::{
        InMemoryResetTokenRepository, InMemoryRoleRepository, InMemoryUserRepository,
        PgResetTokenRepository, PgRoleRepository, PgUserRepository,
    },
    retry::RetryPolicy,
    routes,
    service::{CredentialService, ServiceSettings, Stores},
    session::{InMemorySessionRegistry, RedisSessionRegistry},
    validation::PasswordPolicy,
};
use common::{
    StoreError,
    cache::{RedisConfig, RedisPool},
    database,
};

async fn build_stores(config: &AppConfig) -> Result<Stores> {
    match config.storage {
        StorageBackend::Postgres => {
            let db_config = database::DatabaseConfig::from_env()?;
            let pool = database::init_pool(&db_config).await?;

            if database::health_check(&pool).await? {
                info!("Database connection successful");
            } else {
                anyhow::bail!("Failed to connect to database");
            }

            if config.run_migrations {
                sqlx::migrate!("./migrations")
                    .run(&pool)
                    .await
                    .map_err(|e| StoreError::Migration(e.to_string()))?;
                info!("Database migrations applied");
            }

            let redis_config = RedisConfig::from_env()?;
            let redis_pool = RedisPool::new(&redis_config).await?;

            Ok(Stores {
                users: Arc::new(PgUserRepository::new(pool.clone())),
                roles: Arc::new(PgRoleRepository::new(pool.clone())),
                reset_tokens: Arc::new(PgResetTokenRepository::new(pool)),
                sessions: Arc::new(RedisSessionRegistry::new(redis_pool)),
            })
        }
        StorageBackend::Memory => {
            info!("Using in-memory storage; state is lost on restart");
            let users = Arc::new(InMemoryUserRepository::new());
            Ok(Stores {
                users: users.clone(),
                roles: Arc::new(InMemoryRoleRepository::new()),
                reset_tokens: Arc::new(InMemoryResetTokenRepository::new(users)),
                sessions: Arc::new(InMemorySessionRegistry::new()),
            })
        }
    }
}

fn build_notifier(config: &AppConfig, metrics: Arc<Metrics>) -> Result<Arc<dyn Notifier>> {
    let notification = &config.notification;
    let delivery: Arc<dyn Notifier> = match &notification.mode {
        NotificationMode::Log => Arc::new(LogNotifier),
        NotificationMode::Http { url } => Arc::new(HttpNotifier::new(
            url,
            notification.timeout,
            config.password.reset_token_ttl_minutes,
        )?),
    };

    let retrying = RetryingNotifier::new(delivery, RetryPolicy::default(), notification.timeout * 3);
    Ok(Arc::new(MeteredNotifier::new(Arc::new(retrying), metrics)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!("Starting credential service");

    let config = AppConfig::from_env()?;
    info!("Loaded configuration: {:?}", config);

    let stores = build_stores(&config).await?;
    let metrics = Arc::new(Metrics::new());
    let notifier = build_notifier(&config, metrics.clone())?;
    let hasher = Arc::new(Argon2Hasher::new(&config.hasher)?);

    let settings = ServiceSettings {
        policy: PasswordPolicy::with_min_length(config.password.min_length),
        reset_token_ttl: chrono::Duration::minutes(config.password.reset_token_ttl_minutes),
        max_bot_token: config.max.bot_token.clone(),
        max_default_role: config.max.default_role,
    };

    let service = CredentialService::new(
        stores,
        JwtService::new(config.jwt.clone()),
        hasher,
        notifier,
        Arc::new(TracingAuditLog),
        metrics,
        settings,
    );

    let state = AppState { service };
    let public = routes::create_router(state.clone());
    let internal = routes::create_internal_router(state);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("Credential service listening on {}", config.bind_addr);
    let internal_listener = TcpListener::bind(&config.internal_bind_addr).await?;
    info!("Administration API listening on {}", config.internal_bind_addr);

    tokio::try_join!(
        axum::serve(listener, public).into_future(),
        axum::serve(internal_listener, internal).into_future(),
    )?;

    Ok(())
}
