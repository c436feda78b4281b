//! Application wiring, lifecycle and graceful shutdown.
//!
//! [`Application::build`] constructs every collaborator explicitly:
//!
//! 1. event bus (Kafka or in-memory) and record store (memory or `PostgreSQL`)
//! 2. publisher, mutations and queries over them
//! 3. the consumer, connected, subscribed and running
//! 4. the router and a bound TCP listener
//!
//! # Graceful Shutdown
//!
//! When the shutdown signal fires (Ctrl+C or SIGTERM):
//! 1. the HTTP server stops accepting connections and drains in-flight requests
//! 2. the consumer is disconnected; its in-flight message finishes first
//! 3. step 2 is bounded by the configured shutdown timeout

use crate::config::{BusBackend, Config, StoreConfig};
use anyhow::Context;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use todo_events_core::{
    Dispatcher, EventBus, EventConsumer, EventPublisher, InMemoryEventBus, InMemoryRecordStore,
    RecordStore, RetryPolicy, TodoMutations, TodoQueries,
};
use todo_events_postgres::PostgresRecordStore;
use todo_events_redpanda::RedpandaEventBus;
use todo_events_web::{AppState, router};
use tracing::{info, warn};

/// Fully wired application, ready to serve.
pub struct Application {
    listener: tokio::net::TcpListener,
    app: axum::Router,
    consumer: EventConsumer,
    shutdown_timeout: Duration,
}

impl Application {
    /// Build the bus and store described by `config`, then wire everything.
    ///
    /// # Errors
    ///
    /// Fails if the bus cannot be created, the store cannot be reached or
    /// migrated, the consumer cannot connect or subscribe, or the listener
    /// cannot bind.
    pub async fn build(config: &Config) -> anyhow::Result<Self> {
        let bus: Arc<dyn EventBus> = match config.broker.backend {
            BusBackend::Kafka => Arc::new(
                RedpandaEventBus::builder()
                    .brokers(&config.broker.brokers)
                    .consumer_group(&config.broker.consumer_group)
                    .auto_offset_reset(&config.broker.auto_offset_reset)
                    .producer_acks(&config.broker.producer_acks)
                    .timeout(config.broker.producer_timeout)
                    .build()?,
            ),
            BusBackend::Memory => {
                warn!("Using in-memory event bus; events are lost on restart");
                Arc::new(InMemoryEventBus::new())
            },
        };

        let store: Arc<dyn RecordStore> = match &config.store {
            StoreConfig::Memory => {
                warn!("Using in-memory record store; records are lost on restart");
                Arc::new(InMemoryRecordStore::new())
            },
            StoreConfig::Postgres {
                url,
                max_connections,
            } => {
                let store = PostgresRecordStore::connect(url, *max_connections).await?;
                store.migrate().await?;
                Arc::new(store)
            },
        };

        Self::build_with(config, bus, store).await
    }

    /// Wire the application around an existing bus and store.
    ///
    /// # Errors
    ///
    /// Fails if the consumer cannot connect or subscribe, or the listener
    /// cannot bind.
    pub async fn build_with(
        config: &Config,
        bus: Arc<dyn EventBus>,
        store: Arc<dyn RecordStore>,
    ) -> anyhow::Result<Self> {
        let retry = match config.broker.publish_retries {
            0 => RetryPolicy::none(),
            n => RetryPolicy::builder().max_retries(n).build(),
        };
        let publisher = EventPublisher::new(Arc::clone(&bus)).with_retry(retry);
        let mutations = TodoMutations::new(publisher, config.broker.topic.clone());
        let queries = TodoQueries::new(Arc::clone(&store));

        let mut consumer = EventConsumer::new("todo-store", bus, Dispatcher::new(store));
        consumer
            .connect()
            .await
            .context("Event consumer could not connect")?;
        consumer
            .subscribe(&config.broker.topic)
            .await
            .context("Event consumer could not subscribe")?;
        consumer.run()?;

        let state = AppState::new(mutations, queries, consumer.watch_state());
        let app = router(state);

        let listener = tokio::net::TcpListener::bind(config.bind_address())
            .await
            .with_context(|| format!("Failed to bind {}", config.bind_address()))?;

        info!(
            address = %config.bind_address(),
            topic = %config.broker.topic,
            store = %config.store,
            "Application built"
        );

        Ok(Self {
            listener,
            app,
            consumer,
            shutdown_timeout: config.server.shutdown_timeout,
        })
    }

    /// Address the HTTP server is bound to.
    ///
    /// # Errors
    ///
    /// Fails if the socket address cannot be read.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The application's router, sharing state with the running consumer.
    #[must_use]
    pub fn router(&self) -> axum::Router {
        self.app.clone()
    }

    /// Serve until Ctrl+C or SIGTERM, then shut down gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP server fails.
    pub async fn run(self) -> anyhow::Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Serve until `signal` completes, then shut down gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP server fails.
    pub async fn run_until<S>(mut self, signal: S) -> anyhow::Result<()>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        info!(address = ?self.listener.local_addr().ok(), "HTTP server listening for requests");

        let served = axum::serve(self.listener, self.app)
            .with_graceful_shutdown(signal)
            .await;

        info!("HTTP server stopped, initiating graceful shutdown...");

        match tokio::time::timeout(self.shutdown_timeout, self.consumer.disconnect()).await {
            Ok(()) => info!("Consumer stopped gracefully"),
            Err(_) => warn!(
                timeout_secs = self.shutdown_timeout.as_secs(),
                "Consumer shutdown timed out"
            ),
        }

        served.context("HTTP server failed")?;
        info!("Graceful shutdown complete");
        Ok(())
    }
}

/// Wait for Ctrl+C or SIGTERM.
///
/// A signal handler that cannot be installed never fires; the other one
/// still does.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
