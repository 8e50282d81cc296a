//! On-disk row shapes and the flags callers pass to `proc_*` operations.
//!
//! Mirrors the `key_attr`/`key_value` structs in `original_source/sqlfs.h`,
//! folded into one `Attr` the way `chiro2001-rfs`'s `Ext2INode` carries both
//! the on-disk fields and a `to_attr` stat-conversion method.

use bitflags::bitflags;

pub const BLOCK_SIZE: usize = 8192;
pub const MAX_PASSWORD_LENGTH: usize = 512;
pub const REQUIRED_KEY_LENGTH: usize = 32;
pub const STATEMENT_CACHE_SLOTS: usize = 200;
pub const BUSY_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    RegularFile,
    Directory,
    SymLink,
}

impl FileType {
    /// Row value stored in `meta_data.type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::RegularFile => "blob",
            FileType::Directory => "dir",
            FileType::SymLink => "sym link",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "dir" => FileType::Directory,
            "sym link" => FileType::SymLink,
            _ => FileType::RegularFile,
        }
    }

    /// POSIX file-type bits folded into `mode`, derived from `type` on every
    /// write per spec.md invariant 5.
    pub fn mode_bits(&self) -> u32 {
        match self {
            FileType::RegularFile => libc::S_IFREG,
            FileType::Directory => libc::S_IFDIR,
            FileType::SymLink => libc::S_IFLNK,
        }
    }
}

/// One `meta_data` row, fully materialized.
#[derive(Debug, Clone)]
pub struct Attr {
    pub key: String,
    pub file_type: FileType,
    pub inode: i64,
    pub uid: u32,
    pub gid: u32,
    /// Permission bits only; file-type bits are added by `mode()`.
    pub perm: u32,
    pub size: i64,
    pub block_size: i64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

impl Attr {
    pub fn mode(&self) -> u32 {
        (self.perm & 0o7777) | self.file_type.mode_bits()
    }
}

/// Stat-like structure returned by `getattr`, matching the fields
/// `sqlfs_proc_getattr` fills into `struct stat` (spec.md §4.6).
#[derive(Debug, Clone)]
pub struct Stat {
    pub inode: i64,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: i64,
    pub blksize: u32,
    pub blocks: i64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

impl From<&Attr> for Stat {
    fn from(a: &Attr) -> Self {
        Stat {
            inode: a.inode,
            mode: a.mode(),
            nlink: 1,
            uid: a.uid,
            gid: a.gid,
            size: a.size,
            blksize: 512,
            blocks: a.size / 512,
            atime: a.atime,
            mtime: a.mtime,
            ctime: a.ctime,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatFs {
    pub block_size: u64,
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_avail: u64,
    pub files: u64,
    pub files_free: u64,
    pub name_max: u32,
}

bitflags! {
    /// Mirrors the POSIX `access(2)` mask, spec.md §4.5.
    pub struct AccessMask: i32 {
        const F_OK = 0;
        const X_OK = 1;
        const W_OK = 2;
        const R_OK = 4;
    }
}

bitflags! {
    /// Mirrors the `open(2)`/`openat(2)` flag bits the engine cares about.
    pub struct OpenFlags: i32 {
        const O_RDONLY = 0o0;
        const O_WRONLY = 0o1;
        const O_RDWR   = 0o2;
        const O_CREAT  = 0o100;
        const O_EXCL   = 0o200;
        const O_TRUNC  = 0o1000;
        const O_APPEND = 0o2000;
    }
}

impl OpenFlags {
    pub fn wants_write(&self) -> bool {
        self.intersects(OpenFlags::O_WRONLY | OpenFlags::O_RDWR)
    }
}

/// Acting identity for a permission check — from the FUSE bridge's calling
/// process when a bridge is attached, or from the session's stored identity
/// otherwise (spec.md GLOSSARY "Bridge").
#[derive(Debug, Clone, Copy)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
    pub supplementary_groups: &'static [u32],
}

impl Identity {
    pub const ROOT: Identity = Identity { uid: 0, gid: 0, supplementary_groups: &[] };

    pub fn in_group(&self, gid: u32) -> bool {
        self.gid == gid || self.supplementary_groups.contains(&gid)
    }
}
