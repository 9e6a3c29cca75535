pub mod config;
pub mod discovery;

use std::sync::Arc;

use self::config::Config;

/// Lets integration tests start the proxy directly instead of going
/// through `main`.
pub async fn startup(config: Arc<Config>) -> anyhow::Result<()> {
    let engine = discovery::start(config).await?;

    let mut status = Vec::new();
    engine.status(&mut status)?;
    for line in String::from_utf8_lossy(&status).lines() {
        log::info!("{line}");
    }

    // Nothing re-discovers topology or closes listeners on its own;
    // the process stays up until the operator kills it.
    std::future::pending::<()>().await;
    unreachable!()
}
