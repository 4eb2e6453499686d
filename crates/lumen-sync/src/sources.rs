//! Content source discovery.
//!
//! The default source is always present. Alternate sources are configured
//! by tenant admins and stored as a JSON list in the `custom-cdn` record.

use lumen_store::{ContentSource, DEFAULT_SOURCE_ID, RecordKind, RecordStore};
use tracing::warn;

use crate::error::SyncError;

/// The default source followed by the tenant's alternate sources.
///
/// A `custom-cdn` record that does not parse is deleted and only the default
/// source is returned. Alternate entries reusing the default id are ignored.
pub async fn load_content_sources(
    store: &dyn RecordStore,
    default_base_url: &str,
) -> Result<Vec<ContentSource>, SyncError> {
    let mut sources = vec![ContentSource::default_source(default_base_url)];

    let Some(record) = store
        .read(RecordKind::CustomCdn, DEFAULT_SOURCE_ID, None)
        .await?
    else {
        return Ok(sources);
    };

    match record.decode::<Vec<ContentSource>>() {
        Ok(custom) => {
            for source in custom {
                if source.is_default() || sources.iter().any(|s| s.id == source.id) {
                    warn!(source_id = %source.id, "ignoring duplicate content source");
                    continue;
                }
                sources.push(source);
            }
        }
        Err(e) => {
            warn!(id = %record.id, error = %e, "malformed custom-cdn record; deleting");
            if let Err(e) = store.delete(RecordKind::CustomCdn, &record.id).await {
                warn!(id = %record.id, error = %e, "failed to delete custom-cdn record");
            }
        }
    }
    Ok(sources)
}
