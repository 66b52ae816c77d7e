use std::time::Duration;

use anyhow::anyhow;
use clap::Args;

use crate::store;
use crate::store::Store;
use crate::views;

#[derive(Args, Debug)]
pub struct HealthcheckArgs {
    /// The timeout to use when reaching the store, in milliseconds
    #[clap(long, env = "PALLETMAP_HEALTH_CHECK_TIMEOUT_MS", default_value_t = 1000)]
    timeout_ms: u64,
}

pub async fn healthcheck_cmd(
    HealthcheckArgs { timeout_ms }: HealthcheckArgs,
    store_config: store::Config,
) -> anyhow::Result<()> {
    let store = Store::new(store_config);
    let checked = views::check_health(&store, Duration::from_millis(timeout_ms)).await;
    store.close().await;
    checked.map_err(|e| anyhow!("healthcheck failed: {e}"))?;

    tracing::info!(store = %store.kind(), "✅ Healthcheck passed");
    Ok(())
}
