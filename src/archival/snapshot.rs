use std::{collections::HashMap, future::Future, sync::Arc};

use crate::db::RowSet;

/// Rows older than a job's cutoff, read once and shared by every step of
/// the job.
pub type Snapshot = Arc<RowSet>;

/// Per-job cache of source reads, keyed by table name.
///
/// A cached `None` means the table had nothing older than the cutoff.
/// Failed reads are not cached, so a later step retries them.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    entries: HashMap<String, Option<Snapshot>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached snapshot for `table`, calling `fetch` on first use.
    pub async fn get_or_fetch<F, Fut, E>(
        &mut self,
        table: &str,
        fetch: F,
    ) -> Result<Option<Snapshot>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RowSet, E>>,
    {
        if let Some(entry) = self.entries.get(table) {
            tracing::debug!(table, "Using cached snapshot");
            return Ok(entry.clone());
        }

        let rows = fetch().await?;
        let entry = (!rows.is_empty()).then(|| Arc::new(rows));
        self.entries.insert(table.to_string(), entry.clone());
        Ok(entry)
    }

    #[cfg(test)]
    fn contains(&self, table: &str) -> bool {
        self.entries.contains_key(table)
    }
}
