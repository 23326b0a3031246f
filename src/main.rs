//! ESB Networks smart meter forwarder
//!
//! Signs in to the ESB Networks customer portal on behalf of each configured meter,
//! downloads the half-hourly interval usage CSV and imports it as hourly long-term
//! statistics into Home Assistant (or an InfluxDB 2 bucket).
//!
//! # Architecture
//!
//! One update task runs per meter. Each cycle:
//! - fetches usage through the login guard (and the optional development cache)
//! - buckets the readings into hours and continues the running sum from the store
//! - sleeps for the update interval (24 hours by default)
//!
//! Finished or crashed tasks are restarted by the supervising loop, which exits on
//! SIGTERM/SIGINT.

mod config;
mod coordinator;
mod entries;
mod error;
mod esb;
mod login_guard;
mod model;
mod source;
mod statistics;
mod store;


use crate::config::{EsbConfig, LoginGuardSettings, StoreBackend};
use crate::coordinator::UpdateCoordinator;
use crate::entries::MeterEntry;
use crate::login_guard::{LoginGuard, LoginGuardConfig};
use crate::source::{meter_cache_path, CachedSource, GuardedSource, UsageSource};
use crate::statistics::StatisticsImporter;
use crate::store::{HomeAssistantStore, InfluxStore, StatisticsStore};
use std::sync::Arc;
use tokio::signal::ctrl_c;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Duration;

#[tokio::main]
async fn main() {
    let app_config = config::load_app_config().expect("Failed to load AppConfig");
    tracing_subscriber::fmt()
        .with_max_level(app_config.log_level())
        .init();
    let tz = app_config.time_zone().expect("Invalid TZ");

    let coordinator_config =
        config::load_coordinator_config().expect("Failed to load CoordinatorConfig");
    let guard_settings =
        config::load_login_guard_config().expect("Failed to load LoginGuardSettings");
    let esb_config = config::load_esb_config().expect("Failed to load EsbConfig");
    let registry = entries::build_registry(
        config::load_account_config().expect("Failed to load AccountConfig"),
    )
    .expect("Failed to load meter entries");
    tracing::info!(meters = registry.len(), "Loaded meter entries");

    let store_config = config::load_store_config().expect("Failed to load StoreConfig");
    let store = build_store(&store_config.backend).expect("Failed to configure statistics store");
    let importer = Arc::new(StatisticsImporter::new(store, tz));

    let coordinators: Vec<Arc<UpdateCoordinator>> = registry
        .into_entries()
        .into_iter()
        .map(|entry| {
            tracing::info!(title = %entry.title(), "Configured meter");
            let mprn = entry.unique_id().to_string();
            Arc::new(UpdateCoordinator::new(
                mprn,
                build_source(entry, &esb_config, &guard_settings),
                Arc::clone(&importer),
                Duration::from_secs(coordinator_config.update_interval_sec),
                coordinator_config.task_timeout_seconds,
            ))
        })
        .collect();

    let mut tasks: Vec<JoinHandle<()>> = coordinators
        .iter()
        .map(|coordinator| spawn_update_task(Arc::clone(coordinator)))
        .collect();

    let mut sig_term = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
    tracing::info!("Running... Press Ctrl-C or send SIGTERM to terminate.");
    loop {
        tokio::select! {
            _ = sig_term.recv() => {
                tracing::info!("Received SIGTERM. Exiting...");
                break;
            }
            _ = ctrl_c() => {
                tracing::info!("Received SIGINT. Exiting...");
                break;
            }
            (index, result) = next_finished(&mut tasks) => {
                let coordinator = &coordinators[index];
                handle_task_result(coordinator.mprn(), result);
                tasks[index] = spawn_update_task(Arc::clone(coordinator));
            }
        }
    }
}

fn build_store(backend: &StoreBackend) -> anyhow::Result<Arc<dyn StatisticsStore>> {
    Ok(match backend {
        StoreBackend::HomeAssistant => {
            let hass_config = config::load_hass_config()?;
            tracing::info!(url = %hass_config.url, "Importing statistics into Home Assistant");
            Arc::new(HomeAssistantStore::new(hass_config))
        }
        StoreBackend::Influxdb => {
            let influx_config = config::load_influx_config()?;
            tracing::info!(
                url = %influx_config.url,
                bucket = %influx_config.bucket,
                "Writing statistics to InfluxDB"
            );
            Arc::new(InfluxStore::new(influx_config))
        }
    })
}

/// Wraps the portal client of one meter in the cache and login guard decorators.
///
/// Each meter caches to its own file derived from `ESB_CACHE_FILE`.
fn build_source(
    entry: MeterEntry,
    esb_config: &EsbConfig,
    guard_settings: &LoginGuardSettings,
) -> Arc<dyn UsageSource> {
    let mprn = entry.unique_id().to_string();
    let mut source: Arc<dyn UsageSource> = Arc::new(esb::Client::new(entry, esb_config.clone()));

    if let Some(path) = &esb_config.cache_file {
        source = Arc::new(CachedSource::new(
            source,
            meter_cache_path(path, &mprn),
            esb_config.use_cache,
        ));
    }

    let guard = LoginGuard::new(mprn, LoginGuardConfig::from(guard_settings));
    Arc::new(GuardedSource::new(source, guard))
}

fn spawn_update_task(coordinator: Arc<UpdateCoordinator>) -> JoinHandle<()> {
    tokio::spawn(async move { coordinator.run_cycle().await })
}

/// Waits for the first task to finish and returns its index with its result.
async fn next_finished(tasks: &mut [JoinHandle<()>]) -> (usize, Result<(), JoinError>) {
    let (result, index, _) = futures::future::select_all(tasks.iter_mut()).await;
    (index, result)
}

/// Logs how a meter's update task ended before it is restarted.
fn handle_task_result(mprn: &str, result: Result<(), JoinError>) {
    match result {
        Ok(_) => {
            tracing::debug!(mprn, "Update task completed.");
        }
        Err(e) => {
            tracing::error!(mprn, "Update task failed: {:?}", e);
        }
    }
}
