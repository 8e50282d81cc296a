//! Directory and link operations (spec.md §4.6): creation, removal,
//! renaming, and the operations that have no real counterpart in a
//! flat path-keyed store.

use sqlfs::{FileType, Filesystem, Identity, OpenFlags, SqlfsError};

const ROOT: Identity = Identity::ROOT;

fn open() -> (tempfile::TempDir, Filesystem) {
    let dir = tempfile::tempdir().unwrap();
    let fs = Filesystem::open_plain(dir.path().join("fs.db")).unwrap();
    (dir, fs)
}

#[test]
fn mkdir_twice_is_eexist() {
    let (_dir, fs) = open();
    fs.mkdir(ROOT, "/d", 0o755).unwrap();
    assert!(matches!(fs.mkdir(ROOT, "/d", 0o755), Err(SqlfsError::Exists)));
}

#[test]
fn rmdir_requires_empty() {
    let (_dir, fs) = open();
    fs.mkdir(ROOT, "/d", 0o755).unwrap();
    fs.write(ROOT, "/d/f", b"x", 0, false).unwrap();

    assert!(matches!(fs.rmdir(ROOT, "/d"), Err(SqlfsError::NotEmpty)));
    fs.unlink(ROOT, "/d/f").unwrap();
    fs.rmdir(ROOT, "/d").unwrap();
    assert!(matches!(fs.getattr(ROOT, "/d"), Err(SqlfsError::NotFound)));
}

#[test]
fn unlink_refuses_directories() {
    let (_dir, fs) = open();
    fs.mkdir(ROOT, "/d", 0o755).unwrap();
    assert!(matches!(fs.unlink(ROOT, "/d"), Err(SqlfsError::IsDir)));
}

#[test]
fn rmdir_refuses_regular_files() {
    let (_dir, fs) = open();
    fs.write(ROOT, "/f", b"x", 0, false).unwrap();
    assert!(matches!(fs.rmdir(ROOT, "/f"), Err(SqlfsError::NotDir)));
}

#[test]
fn symlink_roundtrip() {
    let (_dir, fs) = open();
    fs.write(ROOT, "/target", b"hi", 0, false).unwrap();
    fs.symlink(ROOT, "/target", "/link").unwrap();

    let resolved = fs.readlink(ROOT, "/link").unwrap();
    assert_eq!(resolved, "/target");
    let attr = fs.getattr(ROOT, "/link").unwrap();
    assert_eq!(attr.mode & libc::S_IFMT, libc::S_IFLNK);
}

#[test]
fn readlink_on_non_symlink_is_invalid() {
    let (_dir, fs) = open();
    fs.write(ROOT, "/f", b"x", 0, false).unwrap();
    assert!(matches!(fs.readlink(ROOT, "/f"), Err(SqlfsError::Invalid)));
}

/// Renaming a file over an existing directory, and vice versa, is rejected
/// the way `rename(2)` rejects a type mismatch.
#[test]
fn rename_type_mismatch_rejected() {
    let (_dir, fs) = open();
    fs.mkdir(ROOT, "/dir", 0o755).unwrap();
    fs.write(ROOT, "/file", b"x", 0, false).unwrap();

    assert!(matches!(fs.rename(ROOT, "/file", "/dir"), Err(SqlfsError::IsDir)));
    assert!(matches!(fs.rename(ROOT, "/dir", "/file"), Err(SqlfsError::NotDir)));
}

#[test]
fn rename_onto_self_type_overwrites_plain_file() {
    let (_dir, fs) = open();
    fs.write(ROOT, "/a", b"one", 0, false).unwrap();
    fs.write(ROOT, "/b", b"two", 0, false).unwrap();

    fs.rename(ROOT, "/a", "/b").unwrap();
    assert!(matches!(fs.getattr(ROOT, "/a"), Err(SqlfsError::NotFound)));
    assert_eq!(fs.read(ROOT, "/b", 0, 3).unwrap(), b"one");
}

/// Hard links have no representation in a flat, path-keyed store; the
/// engine always refuses them, matching `sqlfs_proc_link`'s `-EACCES`.
#[test]
fn link_is_always_refused() {
    let (_dir, fs) = open();
    fs.write(ROOT, "/a", b"x", 0, false).unwrap();
    assert!(matches!(fs.link(ROOT, "/a", "/b"), Err(SqlfsError::PermissionDenied)));
}

#[test]
fn open_create_excl_on_existing_file_is_eexist() {
    let (_dir, fs) = open();
    fs.write(ROOT, "/f", b"x", 0, false).unwrap();
    let flags = OpenFlags::O_WRONLY | OpenFlags::O_CREAT | OpenFlags::O_EXCL;
    assert!(matches!(fs.open_file(ROOT, "/f", flags), Err(SqlfsError::Exists)));
}

#[test]
fn open_create_excl_on_missing_file_creates_it() {
    let (_dir, fs) = open();
    let flags = OpenFlags::O_WRONLY | OpenFlags::O_CREAT | OpenFlags::O_EXCL;
    let stat = fs.open_file(ROOT, "/f", flags).unwrap();
    assert_eq!(stat.mode & libc::S_IFMT, libc::S_IFREG);
}

#[test]
fn open_without_creat_on_missing_file_is_enoent() {
    let (_dir, fs) = open();
    assert!(matches!(fs.open_file(ROOT, "/missing", OpenFlags::O_RDONLY), Err(SqlfsError::NotFound)));
}

#[test]
fn open_truncate_zeroes_existing_content() {
    let (_dir, fs) = open();
    fs.write(ROOT, "/f", b"hello world", 0, false).unwrap();
    let flags = OpenFlags::O_WRONLY | OpenFlags::O_TRUNC;
    fs.open_file(ROOT, "/f", flags).unwrap();
    assert_eq!(fs.getattr(ROOT, "/f").unwrap().size, 0);
}

/// `mkdir`/`mknod` auto-create missing ancestors in library mode, the
/// convenience `check_parent_write` provides when there's no bridge
/// attached issuing its own `mkdir -p` first.
#[test]
fn mkdir_auto_creates_missing_ancestors() {
    let (_dir, fs) = open();
    fs.mkdir(ROOT, "/a/b/c", 0o755).unwrap();
    assert!(fs.getattr(ROOT, "/a").unwrap().mode & libc::S_IFMT == libc::S_IFDIR);
    assert!(fs.getattr(ROOT, "/a/b").unwrap().mode & libc::S_IFMT == libc::S_IFDIR);
    assert!(fs.getattr(ROOT, "/a/b/c").unwrap().mode & libc::S_IFMT == libc::S_IFDIR);
}

/// Same auto-create convenience applies to `open(O_CREAT)` on a deeply
/// nested path with no existing ancestors.
#[test]
fn open_create_auto_creates_missing_ancestors() {
    let (_dir, fs) = open();
    let flags = OpenFlags::O_WRONLY | OpenFlags::O_CREAT;
    fs.open_file(ROOT, "/x/y/z", flags).unwrap();
    assert_eq!(fs.getattr(ROOT, "/x/y").unwrap().mode & libc::S_IFMT, libc::S_IFDIR);
}

#[test]
fn del_tree_removes_root_and_children() {
    let (_dir, fs) = open();
    fs.mkdir(ROOT, "/d", 0o755).unwrap();
    fs.mkdir(ROOT, "/d/sub", 0o755).unwrap();
    fs.write(ROOT, "/d/sub/f", b"x", 0, false).unwrap();
    fs.write(ROOT, "/d/g", b"y", 0, false).unwrap();

    fs.del_tree(ROOT, "/d").unwrap();
    assert!(matches!(fs.getattr(ROOT, "/d"), Err(SqlfsError::NotFound)));
    assert!(matches!(fs.getattr(ROOT, "/d/sub"), Err(SqlfsError::NotFound)));
    assert!(matches!(fs.getattr(ROOT, "/d/sub/f"), Err(SqlfsError::NotFound)));
}

/// `del_tree_with_exclusion` leaves one path inside the subtree untouched
/// (and, transitively, whatever is needed to still reach it — here just
/// the excluded file itself, since its parent is the root being removed
/// only after the exclusion check fires on each entry).
#[test]
fn del_tree_with_exclusion_spares_one_path() {
    let (_dir, fs) = open();
    fs.mkdir(ROOT, "/d", 0o755).unwrap();
    fs.write(ROOT, "/d/keep", b"k", 0, false).unwrap();
    fs.write(ROOT, "/d/gone", b"g", 0, false).unwrap();

    fs.del_tree_with_exclusion(ROOT, "/d", "/d/keep").unwrap();

    assert_eq!(fs.read(ROOT, "/d/keep", 0, 1).unwrap(), b"k");
    assert!(matches!(fs.getattr(ROOT, "/d/gone"), Err(SqlfsError::NotFound)));
    // something survived the exclusion, so the root itself must remain.
    assert!(fs.getattr(ROOT, "/d").is_ok());
}

/// When the exclusion path names nothing actually in the subtree, nothing
/// is spared — so the root itself is removed too (spec.md §4.6).
#[test]
fn del_tree_with_exclusion_removes_root_when_nothing_is_spared() {
    let (_dir, fs) = open();
    fs.mkdir(ROOT, "/d", 0o755).unwrap();
    fs.write(ROOT, "/d/gone", b"g", 0, false).unwrap();

    fs.del_tree_with_exclusion(ROOT, "/d", "/d/does-not-exist").unwrap();

    assert!(matches!(fs.getattr(ROOT, "/d/gone"), Err(SqlfsError::NotFound)));
    assert!(matches!(fs.getattr(ROOT, "/d"), Err(SqlfsError::NotFound)));
}

/// Creating a node via the public API is limited to the three `FileType`
/// variants the engine represents; there is no device-node variant to
/// construct in the first place, so device nodes are refused at the type
/// level rather than rejected at runtime.
#[test]
fn mknod_covers_only_representable_types() {
    let (_dir, fs) = open();
    fs.mknod(ROOT, "/r", FileType::RegularFile, 0o644).unwrap();
    fs.mknod(ROOT, "/s", FileType::Directory, 0o755).unwrap();
    assert!(fs.getattr(ROOT, "/r").is_ok());
    assert!(fs.getattr(ROOT, "/s").is_ok());
}
