//! Connects to a coordinator and squares whatever number it's handed,
//! forever, until the coordinator shuts it down.

use taskfarm::{WorkerConfig, WorkerDriver};

#[tokio::main]
async fn main() -> Result<(), taskfarm::Error> {
    env_logger::init();

    let mut driver: WorkerDriver<u64, u64> =
        WorkerDriver::connect("127.0.0.1:28337", WorkerConfig::default()).await?;

    let mut job = driver.call(None).await?;
    while let Some(value) = job {
        log::info!("computing {value} squared");
        job = driver.call(Some(value * value)).await?;
    }

    driver.exit().await?;
    Ok(())
}
