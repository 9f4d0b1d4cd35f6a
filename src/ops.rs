//! Batched vault operations.
//!
//! `add` over several sources runs one transaction per file, so a
//! failing file never aborts the rest of the batch; the caller gets
//! the full picture at the end.

use std::path::PathBuf;

use sietch_api_types::{Error, Result};
use sietch_datastore::{FileManifest, Vault};
use sietch_tools::AbortFlag;

/// Outcome of a batched `add`.
#[derive(Default)]
pub struct BatchReport {
    pub added: Vec<FileManifest>,
    pub failed: Vec<(PathBuf, Error)>,
}

impl BatchReport {
    pub fn all_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Add several `(source, destination)` pairs, one transaction each.
///
/// Cancellation stops the batch at the next file boundary; files added
/// before the cancellation stay committed.
pub fn add_many(
    vault: &Vault,
    files: &[(PathBuf, String)],
    tags: &[String],
    abort: &AbortFlag,
) -> Result<BatchReport> {
    let mut report = BatchReport::default();

    for (source, destination) in files {
        if abort.is_aborted() {
            return Err(Error::Cancelled);
        }

        match vault.add(source, destination, tags, abort) {
            Ok(manifest) => report.added.push(manifest),
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(err) => {
                log::warn!("add of {source:?} failed: {err}");
                report.failed.push((source.clone(), err));
            }
        }
    }

    Ok(report)
}
