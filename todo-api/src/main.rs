//! Todo service binary.
//!
//! ```bash
//! # Kafka on localhost:9092, in-memory store
//! cargo run -p todo-api
//!
//! # Everything in-process
//! EVENT_BUS=memory cargo run -p todo-api
//!
//! # PostgreSQL store
//! STORE_BACKEND=postgres DATABASE_URL=postgres://localhost/todos cargo run -p todo-api
//! ```

use todo_api::{Application, Config, telemetry};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    telemetry::init_tracing(config.telemetry.log_format)?;
    info!("Starting todo service");
    info!(
        bus = ?config.broker.backend,
        brokers = %config.broker.brokers,
        topic = %config.broker.topic,
        store = %config.store,
        "Configuration loaded"
    );

    telemetry::init_metrics(&config.telemetry)?;

    let app = Application::build(&config).await?;
    app.run().await?;

    info!("Todo service stopped");
    Ok(())
}
