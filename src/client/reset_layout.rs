use crate::models::Layout;
use crate::models::layout::LAYOUT_KEY;
use crate::store;
use crate::store::DocumentStore as _;
use crate::store::Store;

/// Overwrites the stored layout with the default document
pub async fn reset_layout_cmd(store_config: store::Config) -> anyhow::Result<()> {
    let store = Store::new(store_config);
    let reset = store.set(LAYOUT_KEY, &Layout::default_document()).await;
    store.close().await;
    reset?;
    tracing::info!(store = %store.kind(), "✅ Layout reset");
    Ok(())
}
