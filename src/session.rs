//! Thread-local connection discipline (spec.md §5 "Ownership"), replacing
//! the original's `pthread_key_create` destructor with `thread_local!` +
//! `Drop`. Each OS thread gets its own `rusqlite::Connection` to a given
//! database path the first time it touches it; the connection (and its
//! `TxnState`) live for the thread's lifetime and are torn down when the
//! thread exits, exactly like the C original's per-thread key value.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use rusqlite::Connection;

use crate::error::Result;
use crate::meta;
use crate::store::{self, Keying};
use crate::txn::TxnState;
use crate::types::{Attr, FileType, Identity, BLOCK_SIZE};

/// Owned counterpart of `store::Keying`, so a `Filesystem` can reopen a
/// fresh connection per thread without borrowing from the original caller.
#[derive(Clone)]
pub enum OwnedKeying {
    None,
    Password(String),
    RawKey([u8; 32]),
}

impl OwnedKeying {
    pub(crate) fn as_keying(&self) -> Keying<'_> {
        match self {
            OwnedKeying::None => Keying::None,
            OwnedKeying::Password(pw) => Keying::Password(pw),
            OwnedKeying::RawKey(k) => Keying::RawKey(k),
        }
    }
}

struct Session {
    conn: Connection,
    txn: TxnState,
    instance_count: Arc<AtomicUsize>,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.instance_count.fetch_sub(1, Ordering::SeqCst);
    }
}

thread_local! {
    static SESSIONS: RefCell<HashMap<PathBuf, Rc<Session>>> = RefCell::new(HashMap::new());
}

/// The borrowed bundle every `ops::*` call operates on: the current
/// thread's connection and transaction depth, the identity to check
/// permissions against (the FUSE bridge's caller when one is attached, or
/// the filesystem's configured default otherwise), and a handle back to the
/// owning `Filesystem` for inode allocation and the auto-create-ancestors
/// decision (spec.md §9 Open Question on library-embedding convenience).
pub struct Ctx<'a> {
    pub conn: &'a Connection,
    pub txn: &'a TxnState,
    pub identity: Identity,
    pub fs: &'a Filesystem,
    pub bridge_attached: bool,
}

/// One open database. Cheap to clone (every field is an `Arc`/owned value),
/// so a bridge adapter can hand a clone to each worker thread; every clone
/// still shares the same inode counter and live-session count.
#[derive(Clone)]
pub struct Filesystem {
    path: PathBuf,
    keying: OwnedKeying,
    next_inode: Arc<AtomicI64>,
    instance_count: Arc<AtomicUsize>,
    bridge_attached: Arc<AtomicBool>,
}

impl Filesystem {
    /// Opens (creating if necessary) the database at `path`, applying the
    /// fixed pragma sequence, and seeds the inode counter from
    /// `max(inode)` (spec.md invariant 4). The bootstrap connection used
    /// here is not retained; each thread that subsequently calls into the
    /// filesystem opens its own.
    pub fn open(path: impl AsRef<Path>, keying: OwnedKeying) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let bootstrap = store::open(&path, keying.as_keying())?;
        ensure_root(&bootstrap)?;
        let seed = store::max_inode(&bootstrap)?;
        drop(bootstrap);
        Ok(Self {
            path,
            keying,
            next_inode: Arc::new(AtomicI64::new(seed + 1)),
            instance_count: Arc::new(AtomicUsize::new(0)),
            bridge_attached: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn set_bridge_attached(&self, attached: bool) {
        self.bridge_attached.store(attached, Ordering::SeqCst);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Live thread-local sessions across the whole process, used to refuse
    /// an offline `rekey`/`change_password` while anyone still holds the
    /// database open (spec.md §4.1).
    pub fn instance_count(&self) -> usize {
        self.instance_count.load(Ordering::SeqCst)
    }

    pub fn alloc_inode(&self) -> i64 {
        self.next_inode.fetch_add(1, Ordering::SeqCst)
    }

    fn session(&self) -> Result<Rc<Session>> {
        SESSIONS.with(|cell| {
            let mut map = cell.borrow_mut();
            if let Some(existing) = map.get(&self.path) {
                return Ok(Rc::clone(existing));
            }
            let conn = store::open(&self.path, self.keying.as_keying())?;
            self.instance_count.fetch_add(1, Ordering::SeqCst);
            let session = Rc::new(Session {
                conn,
                txn: TxnState::new(),
                instance_count: Arc::clone(&self.instance_count),
            });
            map.insert(self.path.clone(), Rc::clone(&session));
            Ok(session)
        })
    }

    /// Borrows this thread's connection and transaction state for the
    /// duration of `f`, bundled with `identity` into a `Ctx`.
    pub fn with_ctx<R>(&self, identity: Identity, f: impl FnOnce(&Ctx) -> Result<R>) -> Result<R> {
        let session = self.session()?;
        let ctx = Ctx {
            conn: &session.conn,
            txn: &session.txn,
            identity,
            fs: self,
            bridge_attached: self.bridge_attached.load(Ordering::SeqCst),
        };
        f(&ctx)
    }
}

/// Guarantees `/` exists before the inode counter is seeded, so a brand
/// new database always hands the root directory inode 1 — which happens
/// to be exactly the inode number `fuser` requires for `FUSE_ROOT_ID`.
fn ensure_root(conn: &Connection) -> Result<()> {
    if let meta::Existence::Present { .. } = meta::exists(conn, "/")? {
        return Ok(());
    }
    let now = meta::now_secs();
    let attr = Attr {
        key: "/".to_string(),
        file_type: FileType::Directory,
        inode: 0,
        uid: 0,
        gid: 0,
        perm: 0o755,
        size: 0,
        block_size: BLOCK_SIZE as i64,
        atime: now,
        mtime: now,
        ctime: now,
    };
    let seed = store::max_inode(conn)?;
    meta::set_attr(conn, "/", &attr, || seed + 1)
}
