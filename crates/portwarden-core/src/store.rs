use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::GateError;
use crate::ids::ApprovalId;
use crate::types::ConnectionRequest;

/// A suspended evaluation waiting for a human answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub id: ApprovalId,
    pub request: ConnectionRequest,
    pub reason: String,
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub expires_at: Option<OffsetDateTime>,
    /// Fingerprint of the rule table the decision was taken against.
    pub rules_digest: String,
}

impl PendingApproval {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    pub fn hint(&self) -> String {
        format!("Request: {}. Reason: {}", self.request, self.reason)
    }
}

/// Keyed storage for suspended evaluations.
///
/// Implementations must make `insert` and `take` atomic per key so two
/// resumers can never both receive the same record.
pub trait ApprovalStore: Send + Sync {
    /// Fails with `InvariantViolation` if the id is already in flight.
    fn insert(&self, approval: PendingApproval) -> Result<(), GateError>;
    /// Removes and returns the record, if present.
    fn take(&self, id: &ApprovalId) -> Result<Option<PendingApproval>, GateError>;
    fn get(&self, id: &ApprovalId) -> Result<Option<PendingApproval>, GateError>;
    fn list(&self) -> Result<Vec<PendingApproval>, GateError>;
}

impl<S: ApprovalStore + ?Sized> ApprovalStore for Box<S> {
    fn insert(&self, approval: PendingApproval) -> Result<(), GateError> {
        (**self).insert(approval)
    }

    fn take(&self, id: &ApprovalId) -> Result<Option<PendingApproval>, GateError> {
        (**self).take(id)
    }

    fn get(&self, id: &ApprovalId) -> Result<Option<PendingApproval>, GateError> {
        (**self).get(id)
    }

    fn list(&self) -> Result<Vec<PendingApproval>, GateError> {
        (**self).list()
    }
}

#[derive(Debug, Default)]
pub struct MemoryApprovalStore {
    records: Mutex<HashMap<ApprovalId, PendingApproval>>,
}

impl MemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<ApprovalId, PendingApproval>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ApprovalStore for MemoryApprovalStore {
    fn insert(&self, approval: PendingApproval) -> Result<(), GateError> {
        let mut records = self.records();
        if records.contains_key(&approval.id) {
            return Err(GateError::InvariantViolation(format!(
                "approval {} is already pending",
                approval.id
            )));
        }
        records.insert(approval.id, approval);
        Ok(())
    }

    fn take(&self, id: &ApprovalId) -> Result<Option<PendingApproval>, GateError> {
        Ok(self.records().remove(id))
    }

    fn get(&self, id: &ApprovalId) -> Result<Option<PendingApproval>, GateError> {
        Ok(self.records().get(id).cloned())
    }

    fn list(&self) -> Result<Vec<PendingApproval>, GateError> {
        let mut pending: Vec<_> = self.records().values().cloned().collect();
        pending.sort_by_key(|approval| approval.created_at);
        Ok(pending)
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct PendingFile {
    records: HashMap<ApprovalId, PendingApproval>,
}

/// JSON-file store so suspensions outlive the process that created them.
///
/// Every read-modify-write runs under an exclusive `flock` on a sibling
/// `<file>.lock`, so separate CLI invocations and the daemon can share one
/// file. The file itself is replaced by rename, never truncated in place.
#[derive(Debug)]
pub struct FileApprovalStore {
    path: PathBuf,
    lock: Mutex<()>,
}

/// Held for the duration of one store operation.
struct StoreLock<'a> {
    _thread: MutexGuard<'a, ()>,
    file: File,
}

impl Drop for StoreLock<'_> {
    fn drop(&mut self) {
        // SAFETY: the descriptor belongs to `self.file`, which is still open.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

impl FileApprovalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    fn acquire(&self, operation: libc::c_int) -> Result<StoreLock<'_>, GateError> {
        let thread = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let dir = self.dir();
        fs::create_dir_all(dir).map_err(|err| {
            GateError::Store(format!("create pending dir {}: {err}", dir.display()))
        })?;
        let lock_path = self.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|err| {
                GateError::Store(format!("open pending lock {}: {err}", lock_path.display()))
            })?;
        loop {
            // SAFETY: flock only reads the descriptor of a file we own.
            let rc = unsafe { libc::flock(file.as_raw_fd(), operation) };
            if rc == 0 {
                break;
            }
            let err = std::io::Error::last_os_error();
            if err.kind() != ErrorKind::Interrupted {
                return Err(GateError::Store(format!(
                    "lock pending store {}: {err}",
                    lock_path.display()
                )));
            }
        }
        Ok(StoreLock {
            _thread: thread,
            file,
        })
    }

    fn exclusive(&self) -> Result<StoreLock<'_>, GateError> {
        self.acquire(libc::LOCK_EX)
    }

    fn shared(&self) -> Result<StoreLock<'_>, GateError> {
        self.acquire(libc::LOCK_SH)
    }

    fn load(&self) -> Result<PendingFile, GateError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(PendingFile::default()),
            Err(err) => {
                return Err(GateError::Store(format!(
                    "read pending store {}: {err}",
                    self.path.display()
                )))
            }
        };
        serde_json::from_str(&contents)
            .map_err(|err| GateError::Store(format!("parse pending store JSON: {err}")))
    }

    fn save(&self, file: &PendingFile) -> Result<(), GateError> {
        let contents = serde_json::to_string_pretty(file)
            .map_err(|err| GateError::Store(format!("render pending store JSON: {err}")))?;
        let write_err = |err: std::io::Error| {
            GateError::Store(format!("write pending store {}: {err}", self.path.display()))
        };
        let mut staged = tempfile::NamedTempFile::new_in(self.dir()).map_err(write_err)?;
        staged.write_all(contents.as_bytes()).map_err(write_err)?;
        staged.as_file().sync_all().map_err(write_err)?;
        staged.persist(&self.path).map_err(|err| write_err(err.error))?;
        Ok(())
    }
}

impl ApprovalStore for FileApprovalStore {
    fn insert(&self, approval: PendingApproval) -> Result<(), GateError> {
        let _lock = self.exclusive()?;
        let mut file = self.load()?;
        if file.records.contains_key(&approval.id) {
            return Err(GateError::InvariantViolation(format!(
                "approval {} is already pending",
                approval.id
            )));
        }
        file.records.insert(approval.id, approval);
        self.save(&file)
    }

    fn take(&self, id: &ApprovalId) -> Result<Option<PendingApproval>, GateError> {
        let _lock = self.exclusive()?;
        let mut file = self.load()?;
        let taken = file.records.remove(id);
        if taken.is_some() {
            self.save(&file)?;
        }
        Ok(taken)
    }

    fn get(&self, id: &ApprovalId) -> Result<Option<PendingApproval>, GateError> {
        let _lock = self.shared()?;
        Ok(self.load()?.records.get(id).cloned())
    }

    fn list(&self) -> Result<Vec<PendingApproval>, GateError> {
        let _lock = self.shared()?;
        let mut pending: Vec<_> = self.load()?.records.into_values().collect();
        pending.sort_by_key(|approval| approval.created_at);
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    fn sample(reason: &str) -> PendingApproval {
        PendingApproval {
            id: ApprovalId::new(),
            request: ConnectionRequest::new("app:checkout", "db:billing", 5432),
            reason: reason.to_string(),
            created_at: OffsetDateTime::now_utc(),
            expires_at: None,
            rules_digest: "abc".to_string(),
        }
    }

    #[test]
    fn test_memory_take_consumes_once() {
        let store = MemoryApprovalStore::new();
        let approval = sample("sensitive");
        let id = approval.id;
        store.insert(approval.clone()).unwrap();

        assert_eq!(store.get(&id).unwrap(), Some(approval.clone()));
        assert_eq!(store.take(&id).unwrap(), Some(approval));
        assert_eq!(store.take(&id).unwrap(), None);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_memory_duplicate_insert_is_invariant_violation() {
        let store = MemoryApprovalStore::new();
        let approval = sample("sensitive");
        store.insert(approval.clone()).unwrap();
        let err = store.insert(approval).unwrap_err();
        assert!(matches!(err, GateError::InvariantViolation(_)));
    }

    #[test]
    fn test_memory_concurrent_take_has_single_winner() {
        let store = MemoryApprovalStore::new();
        let approval = sample("sensitive");
        let id = approval.id;
        store.insert(approval).unwrap();

        let winners: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| store.take(&id).unwrap().is_some()))
                .collect();
            handles
                .into_iter()
                .map(|handle| usize::from(handle.join().unwrap()))
                .sum()
        });
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("pending.json");
        let approval = sample("sensitive");
        let id = approval.id;

        FileApprovalStore::new(&path).insert(approval.clone()).unwrap();

        let reopened = FileApprovalStore::new(&path);
        assert_eq!(reopened.list().unwrap().len(), 1);
        assert_eq!(reopened.take(&id).unwrap(), Some(approval));
        assert_eq!(FileApprovalStore::new(&path).take(&id).unwrap(), None);
    }

    #[test]
    fn test_file_store_separate_handles_take_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pending.json");

        for _ in 0..20 {
            let approval = sample("sensitive");
            let id = approval.id;
            FileApprovalStore::new(&path).insert(approval).unwrap();

            let barrier = Barrier::new(6);
            let outcomes: Vec<_> = std::thread::scope(|scope| {
                let handles: Vec<_> = (0..6)
                    .map(|_| {
                        scope.spawn(|| {
                            let store = FileApprovalStore::new(&path);
                            barrier.wait();
                            store.take(&id)
                        })
                    })
                    .collect();
                handles.into_iter().map(|handle| handle.join().unwrap()).collect()
            });

            assert!(outcomes.iter().all(|outcome| outcome.is_ok()));
            let winners = outcomes
                .iter()
                .filter(|outcome| matches!(outcome, Ok(Some(_))))
                .count();
            assert_eq!(winners, 1);
        }
        assert!(FileApprovalStore::new(&path).list().unwrap().is_empty());
    }

    #[test]
    fn test_file_store_separate_handles_keep_every_insert() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pending.json");
        let barrier = Barrier::new(8);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let store = FileApprovalStore::new(&path);
                    let approval = sample("sensitive");
                    barrier.wait();
                    store.insert(approval).unwrap();
                });
            }
        });

        assert_eq!(FileApprovalStore::new(&path).list().unwrap().len(), 8);
        assert!(FileApprovalStore::new(&path).lock_path().exists());
    }

    #[test]
    fn test_file_store_corrupt_file_is_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pending.json");
        fs::write(&path, "not json").unwrap();
        let err = FileApprovalStore::new(&path).list().unwrap_err();
        assert!(matches!(err, GateError::Store(_)));
    }

    #[test]
    fn test_expiry_check() {
        let mut approval = sample("sensitive");
        let now = OffsetDateTime::now_utc();
        assert!(!approval.is_expired(now));
        approval.expires_at = Some(now);
        assert!(approval.is_expired(now));
        assert!(!approval.is_expired(now - time::Duration::seconds(1)));
    }

    #[test]
    fn test_hint_mentions_request_and_reason() {
        let approval = sample("sensitive");
        assert_eq!(
            approval.hint(),
            "Request: app:checkout -> db:billing:5432. Reason: sensitive"
        );
    }
}
