use hydra_reconciler::AppResources;
use hydra_reconciler::api::start_webserver;
use hydra_reconciler::config::load_config_or_panic;
use hydra_reconciler::reconcile::schedule::spawn_schedule;
use sea_orm::Database;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn initialize_tracing() {
    let default_directives = "hydra_reconciler=info,sea_orm=info,reqwest=warn";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = fmt::layer().with_target(true).with_level(true);

    registry.with(layer).init();
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;

    initialize_tracing();

    let config = Arc::new(load_config_or_panic());

    let db = Arc::new(Database::connect(&config.database_url).await?);

    let resources = AppResources { db, config };
    let state = resources.sync_state()?;

    tracing::info!(
        name = "main.config.loaded",
        target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
        hydra = %resources.config.hydra.admin_url,
        scopes_path = %resources.config.hydra.scopes_path,
        max_in_flight = resources.config.reconcile.max_in_flight,
        schedule_secs = resources.config.reconcile.schedule_interval_secs,
        message = "Reconciler configuration loaded"
    );

    if let Some(every) = resources.config.reconcile.schedule_interval() {
        spawn_schedule(state.coordinator.clone(), every);
    }

    start_webserver(state, &resources.config.listen_addr).await?;
    Ok(())
}
