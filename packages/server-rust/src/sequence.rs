//! Global id generation for entities whose key space spans several partitions.
//!
//! The next id is derived from a scan of every partition, not just the one
//! the new row will land on. Generation and the following insert are not
//! atomic: two concurrent callers can be handed the same id. The partition's
//! primary-key uniqueness turns that race into a `Conflict` on the second
//! insert instead of a silent overwrite.

use fragdb_core::{Entity, GatewayResult, IdFormat};
use futures_util::future::try_join_all;
use tokio_util::sync::CancellationToken;

use crate::registry::TableSites;

/// The smallest id of `format` greater than every id held by any partition of the table.
///
/// # Errors
///
/// Fails if any partition's key scan fails; no partial numbering is attempted.
/// `ValidationFailed` if the counter space of `format` is used up.
pub async fn next_id<E: Entity>(
    sites: &TableSites<E>,
    format: &IdFormat,
    cancel: &CancellationToken,
) -> GatewayResult<String> {
    let scans = sites.iter().map(|site| async move {
        site.store()
            .keys(cancel)
            .await
            .map_err(|err| err.at(site.def()))
    });
    let keys: Vec<String> = try_join_all(scans)
        .await?
        .into_iter()
        .flatten()
        .map(|key| key.to_string())
        .collect();

    let next = format.next_after(keys.iter().map(String::as_str))?;
    tracing::debug!(table = %E::TABLE, scanned = keys.len(), id = %next, "allocated id");
    Ok(next)
}
