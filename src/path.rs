//! Path arithmetic and POSIX permission checks (spec.md §4.5), ported from
//! `sqlfs.c`'s `get_parent_path`/`check_can_access`/`check_parent_access`.
//! The store has no real directory tree to walk — every row is addressed by
//! its full path string — so "walking the ancestors" here means re-deriving
//! each prefix and looking it up directly.

use rusqlite::Connection;

use crate::error::{Result, SqlfsError};
use crate::meta;
use crate::types::{AccessMask, Attr, Identity};

/// `get_parent_path`: strips a trailing slash first, then everything after
/// the last remaining `/`. The parent of any top-level entry (`/foo`) is
/// `/`, never the empty string.
pub fn parent_of(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => trimmed[..idx].to_string(),
        None => "/".to_string(),
    }
}

pub fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// `check_can_access`: root bypasses every check; `F_OK` is satisfied by the
/// caller having found the row at all, so it never inspects `mode`.
pub fn check_access(attr: &Attr, identity: &Identity, mask: AccessMask) -> Result<()> {
    if identity.uid == 0 || mask == AccessMask::F_OK {
        return Ok(());
    }
    let mode = attr.mode();
    let class_bits = if attr.uid == identity.uid {
        (mode >> 6) & 0o7
    } else if identity.in_group(attr.gid) {
        (mode >> 3) & 0o7
    } else {
        mode & 0o7
    };
    let required = mask.bits() as u32;
    if required & !class_bits == 0 {
        Ok(())
    } else {
        Err(SqlfsError::PermissionDenied)
    }
}

/// `check_parent_access`: every ancestor directory from `/` down to (but
/// excluding) `path` itself must grant `X_OK`, mirroring ordinary path
/// resolution. Uses `peek_attr` so a permission probe never counts as an
/// access for `atime` purposes.
pub fn check_parent_access(conn: &Connection, identity: &Identity, path: &str) -> Result<()> {
    let mut ancestor = parent_of(path);
    loop {
        let attr = meta::peek_attr(conn, &ancestor)?;
        check_access(&attr, identity, AccessMask::X_OK)?;
        if ancestor == "/" {
            break;
        }
        ancestor = parent_of(&ancestor);
    }
    Ok(())
}

/// `check_parent_write`: `W_OK|X_OK` on the immediate parent of `path`.
///
/// When no FUSE bridge is attached (library-embedding mode) a missing
/// ancestor chain is created on demand, owned by `identity` with mode
/// `0755` — a convenience for callers driving the engine directly as a
/// library, where there is no shell issuing `mkdir -p` first. A bridge
/// mount never auto-creates: a missing parent there is a real `ENOENT`,
/// same as any other POSIX filesystem.
pub fn check_parent_write(
    conn: &Connection,
    identity: &Identity,
    path: &str,
    next_inode: impl Fn() -> i64,
    bridge_attached: bool,
) -> Result<()> {
    let parent = parent_of(path);
    ensure_parent_chain(conn, identity, &parent, &next_inode, bridge_attached)?;
    let attr = meta::peek_attr(conn, &parent)?;
    check_access(&attr, identity, AccessMask::W_OK | AccessMask::X_OK)
}

/// Checks `mask` against the existing parent of `path` without ever
/// creating it — used by removal/rename paths, where a missing parent is a
/// genuine `ENOENT` regardless of bridge attachment.
pub fn parent_access(conn: &Connection, identity: &Identity, path: &str, mask: AccessMask) -> Result<()> {
    let parent = parent_of(path);
    let attr = meta::peek_attr(conn, &parent)?;
    check_access(&attr, identity, mask)
}

fn ensure_parent_chain(
    conn: &Connection,
    identity: &Identity,
    dir: &str,
    next_inode: &impl Fn() -> i64,
    bridge_attached: bool,
) -> Result<()> {
    if let meta::Existence::Present { .. } = meta::exists(conn, dir)? {
        return Ok(());
    }
    if dir == "/" {
        // The root directory is created at mount time; if it is somehow
        // missing there is nothing sensible to auto-create it as.
        return Err(SqlfsError::NotFound);
    }
    if bridge_attached {
        return Err(SqlfsError::NotFound);
    }
    let parent = parent_of(dir);
    ensure_parent_chain(conn, identity, &parent, next_inode, bridge_attached)?;
    let now = meta::now_secs();
    let attr = Attr {
        key: dir.to_string(),
        file_type: crate::types::FileType::Directory,
        inode: 0,
        uid: identity.uid,
        gid: identity.gid,
        perm: 0o755,
        size: 0,
        block_size: crate::types::BLOCK_SIZE as i64,
        atime: now,
        mtime: now,
        ctime: now,
    };
    meta::set_attr(conn, dir, &attr, next_inode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_of_top_level_is_root() {
        assert_eq!(parent_of("/foo"), "/");
        assert_eq!(parent_of("/foo/"), "/");
    }

    #[test]
    fn parent_of_nested() {
        assert_eq!(parent_of("/foo/bar"), "/foo");
        assert_eq!(parent_of("/foo/bar/baz"), "/foo/bar");
    }

    #[test]
    fn base_name_strips_trailing_slash() {
        assert_eq!(base_name("/foo/bar/"), "bar");
        assert_eq!(base_name("/foo"), "foo");
    }
}
