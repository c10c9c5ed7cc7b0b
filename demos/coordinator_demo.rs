//! Boots a coordinator, waits for two workers, farms out a handful of
//! jobs, prints the results. Pair with `worker_demo` running twice.

use std::time::Duration;

use taskfarm::{Coordinator, CoordinatorConfig};

#[tokio::main]
async fn main() -> Result<(), taskfarm::Error> {
    env_logger::init();

    let mut coordinator: Coordinator<u64, u64> =
        Coordinator::bind("127.0.0.1:28337", CoordinatorConfig::default()).await?;
    log::info!("coordinator listening on {}", coordinator.local_addr()?);

    coordinator
        .mount(Some(2), Some(Duration::from_secs(30)))
        .await?;

    let jobs: Vec<u64> = (1..=10).collect();
    coordinator.submit(jobs).await?;
    let results = coordinator.await_results().await?;

    log::info!("received {} results: {:?}", results.len(), results);
    coordinator.disconnect().await?;
    Ok(())
}
