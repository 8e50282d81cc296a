//! Thin `fuser::Filesystem` bridge (spec.md calls the kernel-VFS bridge an
//! "external collaborator", out of the engine's own scope). Grounded in
//! `chiro2001-rfs`'s `src/rfs_lib/fuse.rs`: same per-call shape of
//! "translate FUSE's ino-based request into our own lookup, call into the
//! engine, translate the result back into a `Reply*`".
//!
//! `fuser` addresses everything by a 64-bit inode number it expects the
//! filesystem to keep stable for the life of the mount. Conveniently, every
//! `meta_data` row already carries one (assigned monotonically, spec.md
//! invariant 4), and the root directory is guaranteed inode 1 by
//! `Filesystem::open` — exactly what FUSE's `FUSE_ROOT_ID` requires. This
//! adapter just needs a inode-to-path cache so later calls addressing an
//! inode can recover the path the engine's own API still requires.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType as FuseFileType, Filesystem as FuserFilesystem, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use libc::ENOENT;

use crate::{AccessMask, Filesystem, Identity, OpenFlags, Stat};

const TTL: Duration = Duration::from_secs(1);

pub struct FuseAdapter {
    fs: Filesystem,
    inodes: Mutex<HashMap<u64, String>>,
}

impl FuseAdapter {
    pub fn new(fs: Filesystem) -> Self {
        fs.set_bridge_attached(true);
        let mut inodes = HashMap::new();
        inodes.insert(1, "/".to_string());
        Self { fs, inodes: Mutex::new(inodes) }
    }

    fn path_of(&self, ino: u64) -> Option<String> {
        self.inodes.lock().unwrap().get(&ino).cloned()
    }

    fn remember(&self, ino: u64, path: String) {
        self.inodes.lock().unwrap().insert(ino, path);
    }

    fn forget_prefix(&self, prefix: &str) {
        let mut map = self.inodes.lock().unwrap();
        map.retain(|_, p| p != prefix && !p.starts_with(&format!("{}/", prefix)));
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Option<String> {
        let parent_path = self.path_of(parent)?;
        let name = name.to_str()?;
        Some(if parent_path == "/" { format!("/{}", name) } else { format!("{}/{}", parent_path, name) })
    }

    fn identity(&self, req: &Request) -> Identity {
        Identity { uid: req.uid(), gid: req.gid(), supplementary_groups: &[] }
    }
}

fn to_file_attr(stat: &Stat) -> FileAttr {
    let kind = match stat.mode & libc::S_IFMT {
        libc::S_IFDIR => FuseFileType::Directory,
        libc::S_IFLNK => FuseFileType::Symlink,
        _ => FuseFileType::RegularFile,
    };
    FileAttr {
        ino: stat.inode as u64,
        size: stat.size as u64,
        blocks: stat.blocks as u64,
        atime: UNIX_EPOCH + Duration::from_secs(stat.atime.max(0) as u64),
        mtime: UNIX_EPOCH + Duration::from_secs(stat.mtime.max(0) as u64),
        ctime: UNIX_EPOCH + Duration::from_secs(stat.ctime.max(0) as u64),
        crtime: UNIX_EPOCH,
        kind,
        perm: (stat.mode & 0o7777) as u16,
        nlink: stat.nlink,
        uid: stat.uid,
        gid: stat.gid,
        rdev: 0,
        blksize: stat.blksize,
        flags: 0,
    }
}

fn errno(e: &crate::SqlfsError) -> i32 {
    -e.to_errno()
}

impl FuserFilesystem for FuseAdapter {
    fn lookup(&mut self, req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.getattr(self.identity(req), &path) {
            Ok(stat) => {
                self.remember(stat.inode as u64, path);
                reply.entry(&TTL, &to_file_attr(&stat), 0);
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn getattr(&mut self, req: &Request, ino: u64, reply: ReplyAttr) {
        let Some(path) = self.path_of(ino) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.getattr(self.identity(req), &path) {
            Ok(stat) => reply.attr(&TTL, &to_file_attr(&stat)),
            Err(e) => reply.error(errno(&e)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        req: &Request,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(ENOENT);
            return;
        };
        let identity = self.identity(req);
        let result = (|| -> crate::Result<()> {
            if let Some(mode) = mode {
                self.fs.chmod(identity, &path, mode)?;
            }
            if uid.is_some() || gid.is_some() {
                self.fs.chown(identity, &path, uid, gid)?;
            }
            if let Some(size) = size {
                self.fs.truncate(identity, &path, size as i64)?;
            }
            if atime.is_some() || mtime.is_some() {
                let now = || SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64;
                let to_secs = |t: TimeOrNow| match t {
                    TimeOrNow::SpecificTime(t) => t.duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0),
                    TimeOrNow::Now => now(),
                };
                let a = atime.map(to_secs).unwrap_or_else(now);
                let m = mtime.map(to_secs).unwrap_or_else(now);
                self.fs.utime(identity, &path, a, m)?;
            }
            Ok(())
        })();
        match result {
            Ok(()) => match self.fs.getattr(identity, &path) {
                Ok(stat) => reply.attr(&TTL, &to_file_attr(&stat)),
                Err(e) => reply.error(errno(&e)),
            },
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn readlink(&mut self, req: &Request, ino: u64, reply: ReplyData) {
        let Some(path) = self.path_of(ino) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.readlink(self.identity(req), &path) {
            Ok(target) => reply.data(target.as_bytes()),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn mkdir(&mut self, req: &Request, parent: u64, name: &OsStr, mode: u32, _umask: u32, reply: ReplyEntry) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(ENOENT);
            return;
        };
        let identity = self.identity(req);
        match self.fs.mkdir(identity, &path, mode).and_then(|_| self.fs.getattr(identity, &path)) {
            Ok(stat) => {
                self.remember(stat.inode as u64, path);
                reply.entry(&TTL, &to_file_attr(&stat), 0);
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn unlink(&mut self, req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.unlink(self.identity(req), &path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn rmdir(&mut self, req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.rmdir(self.identity(req), &path) {
            Ok(()) => {
                self.forget_prefix(&path);
                reply.ok();
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn symlink(&mut self, req: &Request, parent: u64, link_name: &OsStr, target: &std::path::Path, reply: ReplyEntry) {
        let Some(path) = self.child_path(parent, link_name) else {
            reply.error(ENOENT);
            return;
        };
        let identity = self.identity(req);
        let target = target.to_string_lossy().into_owned();
        match self.fs.symlink(identity, &target, &path).and_then(|_| self.fs.getattr(identity, &path)) {
            Ok(stat) => {
                self.remember(stat.inode as u64, path);
                reply.entry(&TTL, &to_file_attr(&stat), 0);
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn rename(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (Some(from), Some(to)) = (self.child_path(parent, name), self.child_path(newparent, newname)) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.rename(self.identity(req), &from, &to) {
            Ok(()) => {
                self.forget_prefix(&from);
                reply.ok();
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn link(&mut self, req: &Request, ino: u64, newparent: u64, newname: &OsStr, reply: ReplyEntry) {
        let (Some(from), Some(to)) = (self.path_of(ino), self.child_path(newparent, newname)) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.link(self.identity(req), &from, &to) {
            Ok(()) => unreachable!("link always rejected by the engine"),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn open(&mut self, req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(path) = self.path_of(ino) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.open_file(self.identity(req), &path, OpenFlags::from_bits_truncate(flags)) {
            Ok(_) => reply.opened(0, 0),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn create(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(ENOENT);
            return;
        };
        let identity = self.identity(req);
        let open_flags = OpenFlags::from_bits_truncate(flags) | OpenFlags::O_CREAT;
        match self.fs.open_file(identity, &path, open_flags).or_else(|_| self.fs.create(identity, &path, mode)) {
            Ok(stat) => {
                self.remember(stat.inode as u64, path);
                reply.created(&TTL, &to_file_attr(&stat), 0, 0, 0);
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn read(
        &mut self,
        req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.read(self.identity(req), &path, offset, size as i64) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(errno(&e)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(ENOENT);
            return;
        };
        let append = OpenFlags::from_bits_truncate(flags).contains(OpenFlags::O_APPEND);
        match self.fs.write(self.identity(req), &path, data, offset, append) {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn release(
        &mut self,
        req: &Request,
        ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        if let Some(path) = self.path_of(ino) {
            let _ = self.fs.release(self.identity(req), &path);
        }
        reply.ok();
    }

    fn fsync(&mut self, req: &Request, ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        if let Some(path) = self.path_of(ino) {
            let _ = self.fs.fsync(self.identity(req), &path);
        }
        reply.ok();
    }

    fn readdir(&mut self, req: &Request, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let Some(path) = self.path_of(ino) else {
            reply.error(ENOENT);
            return;
        };
        let names = match self.fs.readdir(self.identity(req), &path) {
            Ok(names) => names,
            Err(e) => {
                reply.error(errno(&e));
                return;
            }
        };
        let mut entries = vec![(ino, FuseFileType::Directory, ".".to_string()), (ino, FuseFileType::Directory, "..".to_string())];
        for name in names {
            let child_path = if path == "/" { format!("/{}", name) } else { format!("{}/{}", path, name) };
            let Ok(stat) = self.fs.getattr(self.identity(req), &child_path) else { continue };
            self.remember(stat.inode as u64, child_path);
            let kind = match stat.mode & libc::S_IFMT {
                libc::S_IFDIR => FuseFileType::Directory,
                libc::S_IFLNK => FuseFileType::Symlink,
                _ => FuseFileType::RegularFile,
            };
            entries.push((stat.inode as u64, kind, name));
        }
        for (i, (ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            if reply.add(ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, req: &Request, _ino: u64, reply: ReplyStatfs) {
        match self.fs.statfs(self.identity(req)) {
            Ok(s) => reply.statfs(
                s.blocks,
                s.blocks_free,
                s.blocks_avail,
                s.files,
                s.files_free,
                s.block_size as u32,
                s.name_max,
                s.block_size as u32,
            ),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn access(&mut self, req: &Request, ino: u64, mask: i32, reply: ReplyEmpty) {
        let Some(path) = self.path_of(ino) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.access(self.identity(req), &path, AccessMask::from_bits_truncate(mask)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno(&e)),
        }
    }
}
