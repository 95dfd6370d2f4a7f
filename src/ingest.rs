//! CSV bulk ingestion.
//!
//! Streams a `;`-delimited file whose first column holds the value text,
//! assigns keys sequentially from the configured domain start, and pads
//! every value with trailing spaces to the fixed slot width, so text
//! round-trips through the fixed-width leaf slots unchanged.

use std::path::Path;

use tracing::info;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::tree::Bptree;

/// Loads at most the configured number of keys from `path` into the tree.
/// Returns how many records were inserted.
pub fn load_csv(tree: &mut Bptree, cfg: &StoreConfig, path: &Path) -> Result<u64> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let pad = cfg.tree.value_pad_len;
    let mut loaded = 0u64;
    for record in reader.byte_records() {
        if loaded >= cfg.keys.count {
            break;
        }
        let record = record?;
        let Some(field) = record.get(0) else {
            continue;
        };
        let mut value = field.to_vec();
        value.truncate(pad);
        value.resize(pad, b' ');
        tree.insert(cfg.keys.domain_start + loaded, &value)?;
        loaded += 1;
    }
    info!(loaded, "csv ingestion finished");
    Ok(loaded)
}
