//! Journal based multi-file transactions.
//!
//! A mutation stages all of its writes and deletes below
//! `.sietch/txn/<id>/` and publishes them in one commit. The journal
//! state machine is `open` -> `committing` -> `committed`; a crash in
//! `open` rolls back on the next recovery pass, a crash in
//! `committing` is replayed. Replay is safe because staged files keep
//! their ids (renames are idempotent) and deletes tolerate missing
//! targets.
//!
//! Durability discipline: every staged file is fsynced before its
//! journal record is written, the journal itself is replaced
//! atomically and fsynced on every state change, and each publishing
//! rename is followed by an fsync of the target's parent directory.
//! The caller sees a commit succeed only after the `committed` state
//! reached the disk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use sietch_api_types::{Error, Result};
use sietch_tools::fs::{fsync_file, fsync_parent_dir, replace_file};

use crate::layout::VaultLayout;

const JOURNAL_NAME: &str = "journal";
const STAGED_DIR_NAME: &str = "staged";

/// How long committed journals are kept before the recovery pass
/// purges them.
pub const DEFAULT_JOURNAL_RETENTION: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TxnState {
    Open,
    Committing,
    Committed,
    Aborted,
}

/// One staged operation, applied in order on commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum JournalOp {
    Write {
        rel_path: String,
        staged_id: String,
        checksum: u32,
    },
    Delete {
        rel_path: String,
    },
}

/// Caller supplied journal metadata, kept for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TransactionMeta {
    pub command: String,
    pub target: String,
}

impl TransactionMeta {
    pub fn new<C: Into<String>, T: Into<String>>(command: C, target: T) -> Self {
        Self {
            command: command.into(),
            target: target.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Journal {
    id: String,
    started: i64,
    meta: TransactionMeta,
    state: TxnState,
    ops: Vec<JournalOp>,
}

/// Handle for an in-flight transaction.
///
/// Dropping the handle without commit leaves the journal in `open`
/// state; the next recovery pass rolls it back.
pub struct Transaction {
    root: PathBuf,
    dir: PathBuf,
    journal: Journal,
    staged_count: u64,
}

impl Transaction {
    /// Create the journal directory and the `open` journal.
    pub fn begin(layout: &VaultLayout, meta: TransactionMeta) -> Result<Self> {
        let mut raw_id = [0u8; 6];
        sietch_tools::crypt_config::fill_with_random_data(&mut raw_id)?;
        let id = format!("{}-{}", sietch_tools::epoch_i64(), hex::encode(raw_id));

        let dir = layout.txn_dir().join(&id);
        std::fs::create_dir(&dir).map_err(|err| Error::io(&dir, err))?;
        let staged = dir.join(STAGED_DIR_NAME);
        std::fs::create_dir(&staged).map_err(|err| Error::io(&staged, err))?;

        let txn = Self {
            root: layout.root().to_owned(),
            dir,
            journal: Journal {
                id,
                started: sietch_tools::epoch_i64(),
                meta,
                state: TxnState::Open,
                ops: Vec::new(),
            },
            staged_count: 0,
        };

        // write_journal fsyncs the journal and the journal directory;
        // the new directory entry below txn/ needs its own sync
        txn.write_journal()?;
        fsync_parent_dir(&txn.dir)?;

        Ok(txn)
    }

    pub fn id(&self) -> &str {
        &self.journal.id
    }

    /// Atomically replace the journal document and fsync it.
    fn write_journal(&self) -> Result<()> {
        let path = self.dir.join(JOURNAL_NAME);
        let data = serde_json::to_vec_pretty(&self.journal)
            .map_err(|err| Error::format(&path, err))?;
        replace_file(&path, &data, None, true)
    }

    fn check_open(&self) -> Result<()> {
        if self.journal.state != TxnState::Open {
            return Err(Error::TransactionInconsistent {
                id: self.journal.id.clone(),
                detail: "staging into a transaction that is no longer open".into(),
            });
        }
        Ok(())
    }

    /// Stage `data` for `rel_path` (relative to the vault root).
    ///
    /// The bytes are durable in their staged location before the
    /// journal records them.
    pub fn stage_write(&mut self, rel_path: &str, data: &[u8]) -> Result<()> {
        self.check_open()?;

        let staged_id = format!("{:06}", self.staged_count);
        self.staged_count += 1;

        let staged_path = self.dir.join(STAGED_DIR_NAME).join(&staged_id);
        let mut file =
            std::fs::File::create(&staged_path).map_err(|err| Error::io(&staged_path, err))?;
        std::io::Write::write_all(&mut file, data)
            .map_err(|err| Error::io(&staged_path, err))?;
        fsync_file(&file, &staged_path)?;

        self.journal.ops.push(JournalOp::Write {
            rel_path: rel_path.to_string(),
            staged_id,
            checksum: crc32(data),
        });
        self.write_journal()
    }

    /// Stage the removal of `rel_path`; applied after all writes.
    pub fn stage_delete(&mut self, rel_path: &str) -> Result<()> {
        self.check_open()?;

        self.journal.ops.push(JournalOp::Delete {
            rel_path: rel_path.to_string(),
        });
        self.write_journal()
    }

    /// Publish all staged operations.
    ///
    /// After the `committing` state reaches the disk the transaction
    /// will complete even across a crash; an error out of the apply
    /// loop leaves the journal for replay by recovery.
    pub fn commit(mut self) -> Result<()> {
        self.journal.state = TxnState::Committing;
        self.write_journal()?;

        apply_ops(&self.root, &self.dir, &self.journal.ops, false)?;

        self.journal.state = TxnState::Committed;
        self.write_journal()?;

        Ok(())
    }

    /// Throw away all staged state. Best-effort and idempotent; a
    /// leftover directory is collected by the next recovery pass.
    pub fn rollback(self) -> Result<()> {
        if let Err(err) = std::fs::remove_dir_all(&self.dir) {
            if err.kind() != std::io::ErrorKind::NotFound {
                log::warn!("rollback of transaction '{}' failed: {err}", self.journal.id);
            }
        }
        Ok(())
    }
}

fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Re-perform every staged operation. Idempotent: a rename whose
/// staged file is gone but whose target exists already happened.
fn apply_ops(root: &Path, dir: &Path, ops: &[JournalOp], verify_checksum: bool) -> Result<()> {
    for op in ops {
        match op {
            JournalOp::Write {
                rel_path,
                staged_id,
                checksum,
            } => {
                let staged_path = dir.join(STAGED_DIR_NAME).join(staged_id);
                let target = root.join(rel_path);

                if !staged_path.exists() {
                    if target.exists() {
                        // already renamed by an earlier apply pass
                        continue;
                    }
                    return Err(Error::TransactionInconsistent {
                        id: dir
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default(),
                        detail: format!(
                            "staged file '{staged_id}' for '{rel_path}' is missing"
                        ),
                    });
                }

                if verify_checksum {
                    let data = sietch_tools::fs::file_get_contents(&staged_path)?;
                    if crc32(&data) != *checksum {
                        return Err(Error::TransactionInconsistent {
                            id: dir
                                .file_name()
                                .map(|n| n.to_string_lossy().into_owned())
                                .unwrap_or_default(),
                            detail: format!(
                                "staged file '{staged_id}' for '{rel_path}' fails its checksum"
                            ),
                        });
                    }
                }

                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent).map_err(|err| Error::io(parent, err))?;
                }
                std::fs::rename(&staged_path, &target)
                    .map_err(|err| Error::io(&target, err))?;
                fsync_parent_dir(&target)?;
            }
            JournalOp::Delete { rel_path } => {
                let target = root.join(rel_path);
                match std::fs::remove_file(&target) {
                    Ok(()) => {
                        fsync_parent_dir(&target)?;
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => (),
                    Err(err) => {
                        // orphaned files are reclaimed by scan-driven GC
                        log::warn!("unable to remove {target:?} during commit: {err}");
                    }
                }
            }
        }
    }
    Ok(())
}

/// Outcome of a recovery pass.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RecoveryReport {
    pub rolled_back: u64,
    pub replayed: u64,
    pub purged: u64,
}

/// Recover all journals below `.sietch/txn/`.
///
/// Called on vault open and by the explicit `recover` command. Safe to
/// run repeatedly; the second pass finds nothing to do.
pub fn recover_all(layout: &VaultLayout, retention: Duration) -> Result<RecoveryReport> {
    let txn_dir = layout.txn_dir();
    let mut report = RecoveryReport::default();

    let entries = match std::fs::read_dir(&txn_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(report),
        Err(err) => return Err(Error::io(&txn_dir, err)),
    };

    let now = sietch_tools::epoch_i64();

    for entry in entries {
        let entry = entry.map_err(|err| Error::io(&txn_dir, err))?;
        if !entry
            .file_type()
            .map_err(|err| Error::io(entry.path(), err))?
            .is_dir()
        {
            continue;
        }
        let dir = entry.path();
        let id = entry.file_name().to_string_lossy().into_owned();

        let journal_path = dir.join(JOURNAL_NAME);
        let raw = match std::fs::read(&journal_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                // crashed before the journal was written; nothing was
                // published, the directory just goes away
                log::info!("recovery: removing journal-less transaction '{id}'");
                std::fs::remove_dir_all(&dir).map_err(|err| Error::io(&dir, err))?;
                report.rolled_back += 1;
                continue;
            }
            Err(err) => return Err(Error::io(&journal_path, err)),
        };

        let mut journal: Journal = serde_json::from_slice(&raw).map_err(|err| {
            Error::TransactionInconsistent {
                id: id.clone(),
                detail: format!("unreadable journal: {err}"),
            }
        })?;

        match journal.state {
            TxnState::Open | TxnState::Aborted => {
                log::info!(
                    "recovery: rolling back {} transaction '{id}' ({})",
                    if journal.state == TxnState::Open { "open" } else { "aborted" },
                    journal.meta.command,
                );
                std::fs::remove_dir_all(&dir).map_err(|err| Error::io(&dir, err))?;
                report.rolled_back += 1;
            }
            TxnState::Committing => {
                log::info!(
                    "recovery: replaying transaction '{id}' ({})",
                    journal.meta.command
                );
                apply_ops(layout.root(), &dir, &journal.ops, true)?;

                journal.state = TxnState::Committed;
                let data = serde_json::to_vec_pretty(&journal)
                    .map_err(|err| Error::format(&journal_path, err))?;
                replace_file(&journal_path, &data, None, true)?;
                report.replayed += 1;
            }
            TxnState::Committed => {
                if now - journal.started > retention.as_secs() as i64 {
                    std::fs::remove_dir_all(&dir).map_err(|err| Error::io(&dir, err))?;
                    report.purged += 1;
                }
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_layout(name: &str) -> VaultLayout {
        let dir =
            std::env::temp_dir().join(format!("sietch-txn-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        VaultLayout::create(dir).unwrap()
    }

    fn cleanup(layout: &VaultLayout) {
        let _ = std::fs::remove_dir_all(layout.root());
    }

    #[test]
    fn test_commit_publishes_writes_and_deletes() {
        let layout = test_layout("commit");
        std::fs::write(layout.absolute("victim.txt"), b"old").unwrap();

        let mut txn =
            Transaction::begin(&layout, TransactionMeta::new("test", "commit")).unwrap();
        txn.stage_write("a/new.txt", b"hello").unwrap();
        txn.stage_delete("victim.txt").unwrap();
        txn.commit().unwrap();

        assert_eq!(
            std::fs::read(layout.absolute("a/new.txt")).unwrap(),
            b"hello"
        );
        assert!(!layout.absolute("victim.txt").exists());

        cleanup(&layout);
    }

    #[test]
    fn test_open_journal_is_rolled_back() {
        let layout = test_layout("rollback");

        let mut txn =
            Transaction::begin(&layout, TransactionMeta::new("test", "rollback")).unwrap();
        txn.stage_write("never.txt", b"data").unwrap();
        drop(txn); // simulated crash before commit

        let report = recover_all(&layout, DEFAULT_JOURNAL_RETENTION).unwrap();
        assert_eq!(report.rolled_back, 1);
        assert!(!layout.absolute("never.txt").exists());
        assert!(std::fs::read_dir(layout.txn_dir()).unwrap().next().is_none());

        cleanup(&layout);
    }

    #[test]
    fn test_committing_journal_is_replayed() {
        let layout = test_layout("replay");
        std::fs::write(layout.absolute("stale.txt"), b"stale").unwrap();

        // build a fully staged transaction, then flip it to committing
        // without applying anything - as if the process died right
        // after the state change reached the disk
        let mut txn =
            Transaction::begin(&layout, TransactionMeta::new("test", "replay")).unwrap();
        txn.stage_write("fresh.txt", b"fresh").unwrap();
        txn.stage_delete("stale.txt").unwrap();

        let journal_path = txn.dir.join(JOURNAL_NAME);
        txn.journal.state = TxnState::Committing;
        let data = serde_json::to_vec_pretty(&txn.journal).unwrap();
        std::fs::write(&journal_path, data).unwrap();
        drop(txn); // no Drop side effects, the directory stays

        let report = recover_all(&layout, DEFAULT_JOURNAL_RETENTION).unwrap();
        assert_eq!(report.replayed, 1);
        assert_eq!(
            std::fs::read(layout.absolute("fresh.txt")).unwrap(),
            b"fresh"
        );
        assert!(!layout.absolute("stale.txt").exists());

        // idempotent: a second pass changes nothing
        let report = recover_all(&layout, DEFAULT_JOURNAL_RETENTION).unwrap();
        assert_eq!(report.replayed, 0);
        assert_eq!(report.rolled_back, 0);
        assert_eq!(
            std::fs::read(layout.absolute("fresh.txt")).unwrap(),
            b"fresh"
        );

        cleanup(&layout);
    }

    #[test]
    fn test_committed_journal_is_purged_after_retention() {
        let layout = test_layout("purge");

        let mut txn = Transaction::begin(&layout, TransactionMeta::new("test", "purge")).unwrap();
        txn.stage_write("file.txt", b"x").unwrap();
        txn.commit().unwrap();

        // still within retention
        let report = recover_all(&layout, DEFAULT_JOURNAL_RETENTION).unwrap();
        assert_eq!(report.purged, 0);

        // zero retention purges immediately
        let report = recover_all(&layout, Duration::from_secs(0)).unwrap();
        assert_eq!(report.purged, 1);
        assert!(std::fs::read_dir(layout.txn_dir()).unwrap().next().is_none());

        cleanup(&layout);
    }

    #[test]
    fn test_corrupt_journal_is_inconsistent() {
        let layout = test_layout("corrupt");

        let dir = layout.txn_dir().join("12345-abcdef");
        std::fs::create_dir_all(dir.join(STAGED_DIR_NAME)).unwrap();
        std::fs::write(dir.join(JOURNAL_NAME), b"{ not json").unwrap();

        assert!(matches!(
            recover_all(&layout, DEFAULT_JOURNAL_RETENTION),
            Err(Error::TransactionInconsistent { .. })
        ));

        cleanup(&layout);
    }
}
