//! The six numbered scenarios from spec.md §8, each its own test so a
//! failure points straight at the scenario number.

use sqlfs::{Filesystem, Identity, OpenFlags};

const ROOT: Identity = Identity::ROOT;

fn db_path(dir: &tempfile::TempDir) -> std::path::PathBuf {
    dir.path().join("fs.db")
}

/// Scenario 1: empty mount grows inodes, and the counter survives a real
/// close-and-reopen because each OS thread opens its own connection from
/// scratch (spec.md §5 "Per-thread state").
#[test]
fn empty_mount_grows_inodes() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);

    let path_a = path.clone();
    std::thread::spawn(move || {
        let fs = Filesystem::open_plain(&path_a).unwrap();
        fs.mkdir(ROOT, "/a", 0o755).unwrap();
        let attr = fs.getattr(ROOT, "/a").unwrap();
        assert_eq!(attr.inode, 2, "root is inode 1, first child must be 2");
    })
    .join()
    .unwrap();

    let path_b = path.clone();
    std::thread::spawn(move || {
        let fs = Filesystem::open_plain(&path_b).unwrap();
        fs.mkdir(ROOT, "/b", 0o755).unwrap();
        let attr = fs.getattr(ROOT, "/b").unwrap();
        assert_eq!(attr.inode, 3);
    })
    .join()
    .unwrap();
}

/// Scenario 2: append ignores the caller's offset.
#[test]
fn append_ignores_offset() {
    let dir = tempfile::tempdir().unwrap();
    let fs = Filesystem::open_plain(db_path(&dir)).unwrap();

    fs.write(ROOT, "/f", b"abc", 0, false).unwrap();
    fs.open_file(ROOT, "/f", OpenFlags::O_WRONLY | OpenFlags::O_APPEND).unwrap();
    fs.write(ROOT, "/f", b"XYZ", 0, true).unwrap();

    let data = fs.read(ROOT, "/f", 0, 6).unwrap();
    assert_eq!(data, b"abcXYZ");
    assert_eq!(fs.getattr(ROOT, "/f").unwrap().size, 6);
}

/// Scenario 3: a write past EOF zero-fills the gap; the return value is
/// the caller's byte count, not byte-count-plus-gap.
#[test]
fn write_with_gap_zero_fills() {
    let dir = tempfile::tempdir().unwrap();
    let fs = Filesystem::open_plain(db_path(&dir)).unwrap();

    let n1 = fs.write(ROOT, "/g", b"hello", 0, false).unwrap();
    assert_eq!(n1, 5);
    let n2 = fs.write(ROOT, "/g", b"world", 1000, false).unwrap();
    assert_eq!(n2, 5);

    assert_eq!(fs.getattr(ROOT, "/g").unwrap().size, 1005);
    let gap = fs.read(ROOT, "/g", 5, 995).unwrap();
    assert_eq!(gap.len(), 995);
    assert!(gap.iter().all(|&b| b == 0));
}

/// Scenario 4: renaming a directory onto an empty directory succeeds and
/// carries its children along.
#[test]
fn rename_over_empty_directory() {
    let dir = tempfile::tempdir().unwrap();
    let fs = Filesystem::open_plain(db_path(&dir)).unwrap();

    fs.mkdir(ROOT, "/src", 0o755).unwrap();
    fs.mkdir(ROOT, "/dst", 0o755).unwrap();
    fs.write(ROOT, "/src/x", b"1", 0, false).unwrap();

    fs.rename(ROOT, "/src", "/dst").unwrap();

    assert!(matches!(fs.getattr(ROOT, "/src"), Err(sqlfs::SqlfsError::NotFound)));
    assert_eq!(fs.read(ROOT, "/dst/x", 0, 1).unwrap(), b"1");
}

/// Scenario 5: renaming onto a non-empty directory is rejected.
#[test]
fn rename_over_nonempty_directory_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let fs = Filesystem::open_plain(db_path(&dir)).unwrap();

    fs.mkdir(ROOT, "/src", 0o755).unwrap();
    fs.mkdir(ROOT, "/dst", 0o755).unwrap();
    fs.write(ROOT, "/dst/y", b"1", 0, false).unwrap();

    let err = fs.rename(ROOT, "/src", "/dst").unwrap_err();
    assert!(matches!(err, sqlfs::SqlfsError::NotEmpty));
}

/// Scenario 6: truncating across a block boundary leaves exactly the
/// surviving blocks behind and trims the tail block's length.
#[test]
fn truncate_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let fs = Filesystem::open_plain(db_path(&dir)).unwrap();

    let bs = sqlfs::BLOCK_SIZE as i64;
    let data = vec![7u8; (bs * 3) as usize];
    fs.write(ROOT, "/t", &data, 0, false).unwrap();

    fs.truncate(ROOT, "/t", bs + 10).unwrap();

    assert_eq!(fs.getattr(ROOT, "/t").unwrap().size, bs + 10);
    let past = fs.read(ROOT, "/t", bs + 10, 100).unwrap();
    assert!(past.is_empty());
    let tail = fs.read(ROOT, "/t", bs, 10).unwrap();
    assert_eq!(tail, vec![7u8; 10]);
}
