//! Per-file read/write locks.
//!
//! A [`LockTable`] hands out one lock per normalized path, created on first
//! use and dropped from the table once no guard references it. Locks are
//! reentrant per thread: a thread holding a read or write guard may take
//! more guards on the same path, and a thread that is the only reader may
//! upgrade to a write guard.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::marker::PhantomData;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use anyhow::{Context, Result, bail};
use fs2::FileExt;
use parking_lot::{Condvar, Mutex};

/// Chunk size used by [`copy_locked`].
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Default)]
struct LockState {
    readers: HashMap<ThreadId, usize>,
    writer: Option<(ThreadId, usize)>,
}

#[derive(Default)]
struct FileLock {
    state: Mutex<LockState>,
    released: Condvar,
}

impl FileLock {
    fn lock_read(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        loop {
            let blocked = matches!(state.writer, Some((owner, _)) if owner != me);
            if !blocked {
                *state.readers.entry(me).or_insert(0) += 1;
                return;
            }
            self.released.wait(&mut state);
        }
    }

    fn unlock_read(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        match state.readers.get(&me).copied() {
            Some(1) => {
                state.readers.remove(&me);
            }
            Some(count) => {
                state.readers.insert(me, count - 1);
            }
            None => {}
        }
        self.released.notify_all();
    }

    fn lock_write(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        loop {
            let writer = state.writer;
            match writer {
                Some((owner, count)) if owner == me => {
                    state.writer = Some((me, count + 1));
                    return;
                }
                None if state.readers.keys().all(|reader| *reader == me) => {
                    state.writer = Some((me, 1));
                    return;
                }
                _ => {}
            }
            self.released.wait(&mut state);
        }
    }

    fn unlock_write(&self) {
        let mut state = self.state.lock();
        let writer = state.writer;
        state.writer = match writer {
            Some((owner, count)) if count > 1 => Some((owner, count - 1)),
            _ => None,
        };
        self.released.notify_all();
    }
}

/// Shared access to one path. Released on drop.
pub struct ReadGuard {
    lock: Arc<FileLock>,
    // Ownership is tracked per thread, so the guard must stay on it.
    _not_send: PhantomData<*const ()>,
}

impl Drop for ReadGuard {
    fn drop(&mut self) {
        self.lock.unlock_read();
    }
}

/// Exclusive access to one path. Released on drop.
pub struct WriteGuard {
    lock: Arc<FileLock>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        self.lock.unlock_write();
    }
}

/// Lazily populated table of per-path locks.
#[derive(Default)]
pub struct LockTable {
    locks: Mutex<HashMap<PathBuf, Weak<FileLock>>>,
}

impl std::fmt::Debug for LockTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockTable")
            .field("tracked", &self.locks.lock().len())
            .finish()
    }
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until shared access to `path` is granted.
    pub fn read(&self, path: &Path) -> ReadGuard {
        let lock = self.lock_for(path);
        lock.lock_read();
        ReadGuard {
            lock,
            _not_send: PhantomData,
        }
    }

    /// Block until exclusive access to `path` is granted.
    pub fn write(&self, path: &Path) -> WriteGuard {
        let lock = self.lock_for(path);
        lock.lock_write();
        WriteGuard {
            lock,
            _not_send: PhantomData,
        }
    }

    /// Number of paths with at least one live guard.
    pub fn len(&self) -> usize {
        let mut locks = self.locks.lock();
        locks.retain(|_, lock| lock.strong_count() > 0);
        locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_for(&self, path: &Path) -> Arc<FileLock> {
        let key = lock_key(path);
        let mut locks = self.locks.lock();
        if let Some(lock) = locks.get(&key).and_then(Weak::upgrade) {
            return lock;
        }
        locks.retain(|_, lock| lock.strong_count() > 0);
        let lock = Arc::new(FileLock::default());
        locks.insert(key, Arc::downgrade(&lock));
        lock
    }
}

fn lock_key(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    normalize_path(&absolute)
}

/// Normalize a path by processing `.` and `..` components lexically.
/// This does not access the filesystem and does not follow symlinks.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !result.pop() {
                    result.push(component);
                }
            }
            _ => result.push(component),
        }
    }
    result
}

/// Copy `src` over `target` while holding the table's locks on both paths.
///
/// The source is opened before any lock is taken, so a missing source fails
/// without touching the table. `progress` sees every chunk in order.
/// Returns the number of bytes copied.
#[tracing::instrument(skip(locks, progress))]
pub fn copy_locked(
    locks: &LockTable,
    src: &Path,
    target: &Path,
    mut progress: impl FnMut(&[u8]),
) -> Result<u64> {
    let (src_key, target_key) = (lock_key(src), lock_key(target));
    if src_key == target_key {
        bail!("Cannot copy {} onto itself", src.display());
    }

    let mut input =
        File::open(src).with_context(|| format!("Failed to open {}", src.display()))?;

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    // Guards are taken in path order, so copies in opposite directions
    // between the same two files cannot deadlock.
    let (_source_guard, _target_guard) = if src_key < target_key {
        let source = locks.read(src);
        (source, locks.write(target))
    } else {
        let target_guard = locks.write(target);
        (locks.read(src), target_guard)
    };

    let mut output = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(target)
        .with_context(|| format!("Failed to open {}", target.display()))?;

    // fs2 and std both name this method; pin the advisory one.
    FileExt::lock_exclusive(&output)
        .with_context(|| format!("Failed to lock {}", target.display()))?;
    output
        .set_len(0)
        .with_context(|| format!("Failed to truncate {}", target.display()))?;

    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let read = input
            .read(&mut buffer)
            .with_context(|| format!("Failed to read {}", src.display()))?;
        if read == 0 {
            break;
        }
        output
            .write_all(&buffer[..read])
            .with_context(|| format!("Failed to write {}", target.display()))?;
        progress(&buffer[..read]);
        total += read as u64;
    }
    output
        .flush()
        .with_context(|| format!("Failed to flush {}", target.display()))?;
    FileExt::unlock(&output).with_context(|| format!("Failed to unlock {}", target.display()))?;

    log::debug!(
        "Copied {} bytes from {} to {}",
        total,
        src.display(),
        target.display()
    );
    Ok(total)
}
