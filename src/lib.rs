//! A POSIX-shaped filesystem whose entire persistent state lives inside one
//! SQLite database file: a `meta_data` row per path and a `value_data` row
//! per fixed-size content block, wrapped in durable transactions and
//! (optionally) SQLCipher page encryption.
//!
//! The public surface is [`Filesystem`]: open one against a database path,
//! then call its `proc_*`-shaped methods directly as a library, or hand it
//! to the `fuse` adapter to mount it as a real kernel filesystem.

mod block;
mod error;
mod meta;
mod ops;
mod path;
mod session;
mod store;
mod txn;
mod types;

#[cfg(feature = "fuse")]
pub mod fuse_adapter;

use lazy_static::lazy_static;
use mut_static::MutStatic;

pub use error::{Result, SqlfsError};
pub use session::{Filesystem, OwnedKeying};
pub use types::{
    AccessMask, Attr, FileType, Identity, OpenFlags, Stat, StatFs, BLOCK_SIZE, MAX_PASSWORD_LENGTH,
    REQUIRED_KEY_LENGTH,
};

lazy_static! {
    /// Remembers the most recently mounted database path, the same role
    /// `MOUNT_POINT` plays in a `fuser`-based CLI: a signal handler
    /// unmounting on `SIGINT` has no other way to find its target.
    pub static ref MOUNT_POINT: MutStatic<String> = MutStatic::new();
    /// Caches the raw key used to open the current mount, so
    /// `rekey_with_cached_key` invoked from the same process doesn't need it
    /// passed again.
    pub static ref CACHED_KEY: MutStatic<[u8; REQUIRED_KEY_LENGTH]> = MutStatic::new();
}

/// Initializes `env_logger` from `RUST_LOG` if it hasn't been already;
/// safe to call more than once (e.g. once per binary entry point and once
/// per test).
pub fn init_logging() {
    let _ = env_logger::try_init();
}

impl Filesystem {
    /// `sqlfs_open`: opens (creating if needed) an unencrypted database.
    pub fn open_plain(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Filesystem::open(path, OwnedKeying::None)
    }

    /// `sqlfs_open_password`.
    pub fn open_with_password(path: impl AsRef<std::path::Path>, password: &str) -> Result<Self> {
        if password.len() > MAX_PASSWORD_LENGTH {
            return Err(SqlfsError::Invalid);
        }
        Filesystem::open(path, OwnedKeying::Password(password.to_string()))
    }

    /// `sqlfs_open_key`. Caches the raw key in `CACHED_KEY` so a later
    /// `rekey_with_cached_key` call on the same process doesn't need it
    /// passed again (spec.md §4.1 "Key lifecycle").
    pub fn open_with_key(path: impl AsRef<std::path::Path>, key: [u8; REQUIRED_KEY_LENGTH]) -> Result<Self> {
        let fs = Filesystem::open(path, OwnedKeying::RawKey(key))?;
        let _ = CACHED_KEY.set(key);
        Ok(fs)
    }

    /// `sqlfs_change_password`/`sqlfs_change_key`: an offline operation —
    /// refused while any thread in this process still holds a live session
    /// against this database (spec.md §4.1).
    pub fn rekey(&self, old: OwnedKeying, new: OwnedKeying) -> Result<()> {
        if self.instance_count() > 0 {
            return Err(SqlfsError::Busy);
        }
        store::rekey(self.path(), old.as_keying(), new.as_keying())
    }

    /// Same as `rekey`, but the old key comes from `CACHED_KEY` (populated by
    /// `open_with_key`) instead of being passed again by the caller. Zeroes
    /// the cache once the rekey succeeds, since the cached key is no longer
    /// valid for this database.
    pub fn rekey_with_cached_key(&self, new: OwnedKeying) -> Result<()> {
        let old = *CACHED_KEY.read().map_err(|_| SqlfsError::Invalid)?;
        self.rekey(OwnedKeying::RawKey(old), new)?;
        if let Ok(mut guard) = CACHED_KEY.write() {
            guard.fill(0);
        }
        Ok(())
    }

    pub fn getattr(&self, identity: Identity, path: &str) -> Result<Stat> {
        self.with_ctx(identity, |ctx| ops::getattr(ctx, path))
    }

    pub fn access(&self, identity: Identity, path: &str, mask: AccessMask) -> Result<()> {
        self.with_ctx(identity, |ctx| ops::access(ctx, path, mask))
    }

    pub fn readlink(&self, identity: Identity, path: &str) -> Result<String> {
        self.with_ctx(identity, |ctx| ops::readlink(ctx, path))
    }

    pub fn readdir(&self, identity: Identity, path: &str) -> Result<Vec<String>> {
        self.with_ctx(identity, |ctx| ops::readdir(ctx, path))
    }

    pub fn mknod(&self, identity: Identity, path: &str, file_type: FileType, mode: u32) -> Result<()> {
        self.with_ctx(identity, |ctx| ops::mknod(ctx, path, file_type, mode))
    }

    pub fn mkdir(&self, identity: Identity, path: &str, mode: u32) -> Result<()> {
        self.with_ctx(identity, |ctx| ops::mkdir(ctx, path, mode))
    }

    pub fn create(&self, identity: Identity, path: &str, mode: u32) -> Result<Stat> {
        self.with_ctx(identity, |ctx| ops::create(ctx, path, mode))
    }

    pub fn unlink(&self, identity: Identity, path: &str) -> Result<()> {
        self.with_ctx(identity, |ctx| ops::unlink(ctx, path))
    }

    pub fn rmdir(&self, identity: Identity, path: &str) -> Result<()> {
        self.with_ctx(identity, |ctx| ops::rmdir(ctx, path))
    }

    pub fn symlink(&self, identity: Identity, target: &str, link_path: &str) -> Result<()> {
        self.with_ctx(identity, |ctx| ops::symlink(ctx, target, link_path))
    }

    pub fn rename(&self, identity: Identity, from: &str, to: &str) -> Result<()> {
        self.with_ctx(identity, |ctx| ops::rename(ctx, from, to))
    }

    pub fn link(&self, identity: Identity, from: &str, to: &str) -> Result<()> {
        self.with_ctx(identity, |ctx| ops::link(ctx, from, to))
    }

    pub fn chmod(&self, identity: Identity, path: &str, mode: u32) -> Result<()> {
        self.with_ctx(identity, |ctx| ops::chmod(ctx, path, mode))
    }

    pub fn chown(&self, identity: Identity, path: &str, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        self.with_ctx(identity, |ctx| ops::chown(ctx, path, uid, gid))
    }

    pub fn truncate(&self, identity: Identity, path: &str, new_size: i64) -> Result<()> {
        self.with_ctx(identity, |ctx| ops::truncate(ctx, path, new_size))
    }

    pub fn utime(&self, identity: Identity, path: &str, atime: i64, mtime: i64) -> Result<()> {
        self.with_ctx(identity, |ctx| ops::utime(ctx, path, atime, mtime))
    }

    pub fn open_file(&self, identity: Identity, path: &str, flags: OpenFlags) -> Result<Stat> {
        self.with_ctx(identity, |ctx| ops::open(ctx, path, flags))
    }

    pub fn read(&self, identity: Identity, path: &str, offset: i64, length: i64) -> Result<Vec<u8>> {
        self.with_ctx(identity, |ctx| ops::read(ctx, path, offset, length))
    }

    pub fn write(&self, identity: Identity, path: &str, data: &[u8], offset: i64, append: bool) -> Result<i64> {
        self.with_ctx(identity, |ctx| ops::write(ctx, path, data, offset, append))
    }

    pub fn statfs(&self, identity: Identity) -> Result<StatFs> {
        self.with_ctx(identity, |ctx| ops::statfs(ctx))
    }

    pub fn release(&self, identity: Identity, path: &str) -> Result<()> {
        self.with_ctx(identity, |ctx| ops::release(ctx, path))
    }

    pub fn fsync(&self, identity: Identity, path: &str) -> Result<()> {
        self.with_ctx(identity, |ctx| ops::fsync(ctx, path))
    }

    pub fn del_tree(&self, identity: Identity, path: &str) -> Result<()> {
        self.with_ctx(identity, |ctx| ops::del_tree(ctx, path))
    }

    pub fn del_tree_with_exclusion(&self, identity: Identity, path: &str, exclude: &str) -> Result<()> {
        self.with_ctx(identity, |ctx| ops::del_tree_with_exclusion(ctx, path, Some(exclude)))
    }
}

