use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread::{self, ThreadId};

use aff4_types::Urn;
use tracing::debug;

use crate::error::{Aff4Error, Aff4Result};

/// Lock flavours, named after the `'r'`/`'w'` modes they guard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockMode {
    Read,
    Write,
}

/// Who a lock is held for.
///
/// Plain [`LockTable::lock`] calls belong to the calling thread. Objects
/// that may be closed on a different thread than the one that opened them
/// take a [`LockOwner::holder`] token instead and release with it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockOwner {
    Thread(ThreadId),
    Holder(u64),
}

impl LockOwner {
    pub fn current_thread() -> Self {
        Self::Thread(thread::current().id())
    }

    /// A fresh token, distinct from every other owner in this process.
    pub fn holder() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self::Holder(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for LockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Thread(id) => write!(f, "thread {id:?}"),
            Self::Holder(n) => write!(f, "holder {n}"),
        }
    }
}

struct Held {
    owner: LockOwner,
    /// The thread that took the lock.
    thread: ThreadId,
    depth: usize,
    file: Option<LockFile>,
}

/// `<path>.lock`, removed when dropped.
struct LockFile {
    path: PathBuf,
    _file: File,
}

impl LockFile {
    fn acquire(path: PathBuf) -> std::io::Result<Option<Self>> {
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                Ok(Some(Self { path, _file: file }))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Named advisory locks, re-entrant per owner.
///
/// A lock is keyed by (URN, mode). The owner may take it again; other
/// owners block until every acquisition has been released. Write
/// locks on `file://` URNs also create `<path>.lock` so that other
/// processes see the volume as busy.
pub struct LockTable {
    held: Mutex<HashMap<(Urn, LockMode), Held>>,
    released: Condvar,
    lock_files: bool,
}

impl LockTable {
    pub fn new(lock_files: bool) -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
            released: Condvar::new(),
            lock_files,
        }
    }

    /// Block until the lock is held by this thread.
    ///
    /// A lock file held by another process cannot be waited on and is
    /// reported as [`Aff4Error::ConcurrentWrite`].
    pub fn lock(&self, urn: &Urn, mode: LockMode) -> Aff4Result<()> {
        self.lock_as(urn, mode, LockOwner::current_thread())
    }

    /// Block until the lock is held by `owner`.
    ///
    /// Waiting on a lock that this same thread took for a different owner
    /// would never return, so that case is [`Aff4Error::ConcurrentWrite`].
    pub fn lock_as(&self, urn: &Urn, mode: LockMode, owner: LockOwner) -> Aff4Result<()> {
        let me = thread::current().id();
        let key = (urn.clone(), mode);
        let mut held = self.held.lock().expect("lock poisoned");
        loop {
            match held.get(&key).map(|h| (h.owner, h.thread)) {
                Some((holder, _)) if holder == owner => break,
                Some((holder, thread)) if thread == me => {
                    return Err(Aff4Error::ConcurrentWrite {
                        volume: urn.clone(),
                        holder: Urn::from(holder.to_string()),
                    });
                }
                Some(_) => held = self.released.wait(held).expect("lock poisoned"),
                None => {
                    let file = self.lock_file(urn, mode)?;
                    held.insert(key, Held { owner, thread: me, depth: 1, file });
                    debug!(urn = %urn, ?mode, %owner, "lock acquired");
                    return Ok(());
                }
            }
        }
        if let Some(h) = held.get_mut(&key) {
            h.depth += 1;
        }
        Ok(())
    }

    /// Take the lock for this thread if it is free or already ours.
    pub fn try_lock(&self, urn: &Urn, mode: LockMode) -> Aff4Result<bool> {
        self.try_lock_as(urn, mode, LockOwner::current_thread())
    }

    pub fn try_lock_as(&self, urn: &Urn, mode: LockMode, owner: LockOwner) -> Aff4Result<bool> {
        let key = (urn.clone(), mode);
        let mut held = self.held.lock().expect("lock poisoned");
        match held.get_mut(&key) {
            Some(h) if h.owner == owner => {
                h.depth += 1;
                return Ok(true);
            }
            Some(_) => return Ok(false),
            None => {}
        }
        match self.lock_file(urn, mode) {
            Ok(file) => {
                let thread = thread::current().id();
                held.insert(key, Held { owner, thread, depth: 1, file });
                Ok(true)
            }
            Err(Aff4Error::ConcurrentWrite { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Release one acquisition made by this thread. Returns `false` if this
    /// thread did not hold the lock.
    pub fn unlock(&self, urn: &Urn, mode: LockMode) -> bool {
        self.unlock_as(urn, mode, LockOwner::current_thread())
    }

    /// Release one acquisition made for `owner`, from any thread. Returns
    /// `false` if `owner` did not hold the lock.
    pub fn unlock_as(&self, urn: &Urn, mode: LockMode, owner: LockOwner) -> bool {
        let key = (urn.clone(), mode);
        let mut held = self.held.lock().expect("lock poisoned");
        let Some(h) = held.get_mut(&key) else {
            return false;
        };
        if h.owner != owner {
            return false;
        }
        h.depth -= 1;
        if h.depth == 0 {
            held.remove(&key);
            debug!(urn = %urn, ?mode, %owner, "lock released");
            self.released.notify_all();
        }
        true
    }

    pub fn is_locked(&self, urn: &Urn, mode: LockMode) -> bool {
        self.held
            .lock()
            .expect("lock poisoned")
            .contains_key(&(urn.clone(), mode))
    }

    fn lock_file(&self, urn: &Urn, mode: LockMode) -> Aff4Result<Option<LockFile>> {
        if !self.lock_files || mode != LockMode::Write {
            return Ok(None);
        }
        let Some(path) = urn.to_path() else {
            return Ok(None);
        };
        let mut lock_path = path.into_os_string();
        lock_path.push(".lock");
        match LockFile::acquire(PathBuf::from(lock_path))? {
            Some(file) => Ok(Some(file)),
            None => Err(Aff4Error::ConcurrentWrite {
                volume: urn.clone(),
                holder: Urn::from("another process"),
            }),
        }
    }
}
