// ============================================================================
// outbox - queue processes
// ============================================================================
//
// One binary, one process mode per subcommand:
//
//   producer   append demo payloads at random sub-second intervals
//   consumer   competing consumers running the demo handler (+ reclaimer)
//   reclaimer  periodic expired-lease sweep
//   pruner     periodic removal of fully acknowledged messages
//   demo       everything above in one process
//
// Backend and tuning come from the environment (see outbox-config). SIGTERM
// and Ctrl-C stop claiming at once; abandoned leases expire on their own.
// Losing the store for longer than the retry budget exits non-zero.
//
// ============================================================================

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use outbox::demo::{self, DemoHandler, DEFAULT_FAILURE_RATE};
use outbox::{
    ClaimableStore, ComponentName, Config, Consumer, MessageHandler, Producer, Pruner, QueueResult,
    Reclaimer,
};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "outbox")]
#[command(about = "Durable competing-consumer message queue", long_about = None)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Append demo messages until stopped
    Producer,

    /// Run competing consumers with the demo handler
    Consumer {
        /// Component to consume for (default: every configured component)
        #[arg(short, long)]
        component: Option<String>,

        /// Consumer tasks per component
        #[arg(short, long, default_value = "1")]
        workers: usize,

        /// Probability that the demo handler fails a message
        #[arg(short, long, default_value_t = DEFAULT_FAILURE_RATE)]
        failure_rate: f64,

        /// Do not run a lease reclaimer in this process
        #[arg(long)]
        no_reclaimer: bool,
    },

    /// Return expired leases to the unclaimed pool
    Reclaimer,

    /// Delete messages every component has acknowledged
    Pruner,

    /// Producer, consumers, reclaimer and pruner in one process
    Demo {
        #[arg(short, long, default_value = "2")]
        workers: usize,

        #[arg(short, long, default_value_t = DEFAULT_FAILURE_RATE)]
        failure_rate: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.rust_log.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(backend = ?config.backend, components = ?config.queue.components, "=== Outbox starting ===");

    let store = outbox::connect(&config)
        .await
        .context("Failed to open queue store")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let mut tasks: JoinSet<QueueResult<()>> = JoinSet::new();

    match cli.mode {
        Mode::Producer => spawn_producer(&mut tasks, &store, &config, shutdown_rx.clone()),
        Mode::Consumer {
            component,
            workers,
            failure_rate,
            no_reclaimer,
        } => {
            let components = match component {
                Some(name) => {
                    let component = ComponentName::new(name)?;
                    store.register_component(&component).await?;
                    vec![component]
                }
                None => configured_components(&config)?,
            };
            let handler: Arc<dyn MessageHandler> = Arc::new(DemoHandler::new(failure_rate));
            for component in components {
                spawn_consumers(&mut tasks, &store, &handler, component, workers, &config, &shutdown_rx);
            }
            if !no_reclaimer {
                spawn_reclaimer(&mut tasks, &store, &config, shutdown_rx.clone());
            }
        }
        Mode::Reclaimer => spawn_reclaimer(&mut tasks, &store, &config, shutdown_rx.clone()),
        Mode::Pruner => spawn_pruner(&mut tasks, &store, &config, shutdown_rx.clone()),
        Mode::Demo {
            workers,
            failure_rate,
        } => {
            let handler: Arc<dyn MessageHandler> = Arc::new(DemoHandler::new(failure_rate));
            for component in configured_components(&config)? {
                spawn_consumers(&mut tasks, &store, &handler, component, workers, &config, &shutdown_rx);
            }
            spawn_producer(&mut tasks, &store, &config, shutdown_rx.clone());
            spawn_reclaimer(&mut tasks, &store, &config, shutdown_rx.clone());
            spawn_pruner(&mut tasks, &store, &config, shutdown_rx.clone());
        }
    }

    let mut failure = None;
    while let Some(joined) = tasks.join_next().await {
        let outcome = match joined {
            Ok(result) => result.map_err(anyhow::Error::from),
            Err(e) if e.is_cancelled() => continue,
            Err(e) => Err(anyhow::Error::new(e).context("Queue task panicked")),
        };
        if let Err(e) = outcome {
            error!(error = %e, "Queue task failed, shutting down");
            failure.get_or_insert(e);
            // stop the remaining tasks
            tasks.abort_all();
        }
    }

    match outbox_metrics::gather_metrics() {
        Ok(metrics) => debug!("Final metrics:\n{}", metrics),
        Err(e) => error!(error = %e, "Failed to render metrics"),
    }

    match failure {
        Some(e) => Err(e),
        None => {
            info!("=== Outbox stopped ===");
            Ok(())
        }
    }
}

fn configured_components(config: &Config) -> Result<Vec<ComponentName>> {
    config
        .queue
        .components
        .iter()
        .map(|c| ComponentName::new(c.as_str()).map_err(anyhow::Error::from))
        .collect()
}

fn spawn_producer(
    tasks: &mut JoinSet<QueueResult<()>>,
    store: &Arc<dyn ClaimableStore>,
    config: &Config,
    shutdown: watch::Receiver<bool>,
) {
    let producer = Producer::new(store.clone(), config.queue.prune_every_appends);
    tasks.spawn(async move {
        let produced = demo::run_producer(&producer, shutdown).await?;
        info!(produced = produced, "Producer stopped");
        Ok(())
    });
}

fn spawn_consumers(
    tasks: &mut JoinSet<QueueResult<()>>,
    store: &Arc<dyn ClaimableStore>,
    handler: &Arc<dyn MessageHandler>,
    component: ComponentName,
    workers: usize,
    config: &Config,
    shutdown: &watch::Receiver<bool>,
) {
    for _ in 0..workers.max(1) {
        let consumer = Consumer::new(store.clone(), handler.clone(), component.clone(), &config.queue);
        tasks.spawn(consumer.run(shutdown.clone()));
    }
}

fn spawn_reclaimer(
    tasks: &mut JoinSet<QueueResult<()>>,
    store: &Arc<dyn ClaimableStore>,
    config: &Config,
    shutdown: watch::Receiver<bool>,
) {
    let reclaimer = Reclaimer::new(
        store.clone(),
        config.queue.reclaim_interval(),
        config.queue.reclaim_jitter(),
    );
    tasks.spawn(async move {
        reclaimer.run(shutdown).await;
        Ok(())
    });
}

fn spawn_pruner(
    tasks: &mut JoinSet<QueueResult<()>>,
    store: &Arc<dyn ClaimableStore>,
    config: &Config,
    shutdown: watch::Receiver<bool>,
) {
    let pruner = Pruner::new(store.clone());
    let interval = config.queue.prune_interval();
    tasks.spawn(async move {
        pruner.run(interval, shutdown).await;
        Ok(())
    });
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("SIGTERM received, initiating graceful shutdown...");
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("SIGINT received, initiating graceful shutdown...");
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to register SIGTERM handler, waiting for Ctrl-C only");
                tokio::signal::ctrl_c().await.ok();
                info!("SIGINT received, initiating graceful shutdown...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, initiating graceful shutdown...");
    }
}
