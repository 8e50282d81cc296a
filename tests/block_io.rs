//! Round-trip and boundary behavior of the block I/O layer (spec.md §4.4,
//! §8), driven entirely through the public `Filesystem` API since `block`
//! is crate-private.

use sqlfs::{BLOCK_SIZE, Filesystem, Identity};

const ROOT: Identity = Identity::ROOT;

fn open() -> (tempfile::TempDir, Filesystem) {
    let dir = tempfile::tempdir().unwrap();
    let fs = Filesystem::open_plain(dir.path().join("fs.db")).unwrap();
    (dir, fs)
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// `write(p, D, 0, |D|)` then `read(p, 0, |D|) == D`, at every block-boundary
/// length the spec names.
#[test]
fn round_trip_at_every_block_boundary() {
    let bs = BLOCK_SIZE;
    for len in [1, bs - 1, bs, bs + 1, 2 * bs - 1, 2 * bs, 2 * bs + 1, 5 * bs + 37] {
        let (_dir, fs) = open();
        let data = pattern(len);
        fs.write(ROOT, "/f", &data, 0, false).unwrap();
        let back = fs.read(ROOT, "/f", 0, len as i64).unwrap();
        assert_eq!(back, data, "round trip failed at length {len}");
    }
}

/// A write that only touches the middle of an existing block must not
/// clobber the bytes on either side of it within that block.
#[test]
fn partial_block_overlay_preserves_neighbors() {
    let (_dir, fs) = open();
    let bs = BLOCK_SIZE;
    let full = vec![0xAAu8; bs];
    fs.write(ROOT, "/f", &full, 0, false).unwrap();

    fs.write(ROOT, "/f", &[0xBB; 4], 100, false).unwrap();

    let back = fs.read(ROOT, "/f", 0, bs as i64).unwrap();
    assert!(back[..100].iter().all(|&b| b == 0xAA));
    assert!(back[100..104].iter().all(|&b| b == 0xBB));
    assert!(back[104..].iter().all(|&b| b == 0xAA));
}

/// A write that lands across a block boundary, shorter than either block,
/// never shrinks the previously-stored tail of either block.
#[test]
fn write_across_boundary_preserves_tails() {
    let (_dir, fs) = open();
    let bs = BLOCK_SIZE as i64;
    let full = vec![0xCCu8; (bs * 2) as usize];
    fs.write(ROOT, "/f", &full, 0, false).unwrap();

    // Overwrite 4 bytes straddling the boundary.
    fs.write(ROOT, "/f", &[0xDD; 4], bs - 2, false).unwrap();

    let back = fs.read(ROOT, "/f", 0, bs * 2).unwrap();
    assert_eq!(back.len(), (bs * 2) as usize);
    assert!(back[(bs - 2) as usize..(bs + 2) as usize].iter().all(|&b| b == 0xDD));
    assert!(back[..(bs - 2) as usize].iter().all(|&b| b == 0xCC));
    assert!(back[(bs + 2) as usize..].iter().all(|&b| b == 0xCC));
}

/// Reads past EOF return zero bytes, never an error.
#[test]
fn read_past_eof_is_empty_not_error() {
    let (_dir, fs) = open();
    fs.write(ROOT, "/f", b"hi", 0, false).unwrap();
    let data = fs.read(ROOT, "/f", 1000, 50).unwrap();
    assert!(data.is_empty());
    let exact_end = fs.read(ROOT, "/f", 2, 10).unwrap();
    assert!(exact_end.is_empty());
}

/// `truncate(p, n); getattr(p).size == n` for growing, shrinking, and
/// no-op truncation, and truncating to zero clears every block (nothing
/// is left to read back).
#[test]
fn truncate_sets_size_for_any_n() {
    let (_dir, fs) = open();
    let bs = BLOCK_SIZE as i64;
    fs.write(ROOT, "/f", &vec![1u8; (bs * 2) as usize], 0, false).unwrap();

    fs.truncate(ROOT, "/f", bs + 5).unwrap();
    assert_eq!(fs.getattr(ROOT, "/f").unwrap().size, bs + 5);

    // Grow back past the old size: the new tail must read as zero.
    fs.truncate(ROOT, "/f", bs * 3).unwrap();
    assert_eq!(fs.getattr(ROOT, "/f").unwrap().size, bs * 3);
    let grown = fs.read(ROOT, "/f", bs + 5, 100).unwrap();
    assert!(grown.iter().all(|&b| b == 0));

    // No-op truncate to the current size.
    fs.truncate(ROOT, "/f", bs * 3).unwrap();
    assert_eq!(fs.getattr(ROOT, "/f").unwrap().size, bs * 3);

    // Truncate to zero deletes every block.
    fs.truncate(ROOT, "/f", 0).unwrap();
    assert_eq!(fs.getattr(ROOT, "/f").unwrap().size, 0);
    assert!(fs.read(ROOT, "/f", 0, bs * 3).unwrap().is_empty());
}

/// Writing an empty buffer is a no-op on content and size.
#[test]
fn empty_write_is_noop() {
    let (_dir, fs) = open();
    fs.write(ROOT, "/f", b"abc", 0, false).unwrap();
    let n = fs.write(ROOT, "/f", b"", 1, false).unwrap();
    assert_eq!(n, 0);
    assert_eq!(fs.getattr(ROOT, "/f").unwrap().size, 3);
    assert_eq!(fs.read(ROOT, "/f", 0, 3).unwrap(), b"abc");
}
