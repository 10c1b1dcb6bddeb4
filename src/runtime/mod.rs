//! Runtime abstraction for system operations.
//!
//! Update checks and the status record reach the clock, the environment and
//! the filesystem only through [`Runtime`], so their decisions can be tested
//! against a mocked runtime.
//!
//! # Structure
//!
//! - `env` - Environment variables, home directory and wall clock
//! - `fs` - File system operations (read, atomic write, metadata)
//! - `lock` - Per-file read/write locks and locked copies

mod env;
mod fs;
pub mod lock;

use anyhow::Result;
use std::env as std_env;
use std::path::{Path, PathBuf};

pub use lock::{COPY_BUFFER_SIZE, LockTable, ReadGuard, WriteGuard, copy_locked};

#[cfg_attr(test, mockall::automock)]
pub trait Runtime: Send + Sync {
    // Environment
    fn env_var(&self, key: &str) -> Result<String, std_env::VarError>;
    fn home_dir(&self) -> Option<PathBuf>;

    /// Current wall-clock time in milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;

    // File System
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;
    fn read_to_string(&self, path: &Path) -> Result<String>;
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;
    fn create_dir_all(&self, path: &Path) -> Result<()>;
    fn remove_file(&self, path: &Path) -> Result<()>;
    fn exists(&self, path: &Path) -> bool;
    fn is_file(&self, path: &Path) -> bool;

    /// Last modification time of `path` in milliseconds, if it can be read.
    fn modified_millis(&self, path: &Path) -> Option<i64>;
}

pub struct RealRuntime;

impl Runtime for RealRuntime {
    fn env_var(&self, key: &str) -> Result<String, std_env::VarError> {
        self.env_var_impl(key)
    }

    fn home_dir(&self) -> Option<PathBuf> {
        self.home_dir_impl()
    }

    fn now_millis(&self) -> i64 {
        self.now_millis_impl()
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.write_impl(path, contents)
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        self.read_to_string_impl(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        self.rename_impl(from, to)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.create_dir_all_impl(path)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.remove_file_impl(path)
    }

    fn exists(&self, path: &Path) -> bool {
        self.exists_impl(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        self.is_file_impl(path)
    }

    fn modified_millis(&self, path: &Path) -> Option<i64> {
        self.modified_millis_impl(path)
    }
}
