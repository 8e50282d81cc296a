//! Nested transaction manager (spec.md §4.2), ported from `sqlfs.c`'s
//! `begin_transaction`/`commit_transaction`/`break_transaction` trio. Depth
//! is a plain `Cell<u32>` rather than a mutex-guarded counter: each
//! `Session` owns exactly one `Connection` and is never shared across
//! threads (spec.md §5 "Ownership"), so there is nothing to race on.

use std::cell::Cell;

use rusqlite::Connection;

use crate::error::Result;

pub struct TxnState {
    depth: Cell<u32>,
    in_transaction: Cell<bool>,
}

impl TxnState {
    pub fn new() -> Self {
        Self { depth: Cell::new(0), in_transaction: Cell::new(false) }
    }

    /// `BEGIN IMMEDIATE` at depth 0 (reserved lock, readers still allowed);
    /// every deeper call is just a refcount bump onto the same physical
    /// transaction.
    pub fn begin(&self, conn: &Connection) -> Result<()> {
        if self.depth.get() == 0 {
            conn.execute_batch("BEGIN IMMEDIATE;")?;
            self.in_transaction.set(true);
        }
        self.depth.set(self.depth.get() + 1);
        Ok(())
    }

    /// Only the outermost frame's `success` flag is honored: nested frames
    /// always report success upward, so one failing inner step cannot roll
    /// back work already committed to the physical transaction by an
    /// outer caller that hasn't unwound yet.
    pub fn commit(&self, conn: &Connection, success: bool) -> Result<()> {
        let depth = self.depth.get();
        if depth == 1 && self.in_transaction.get() {
            if success {
                conn.execute_batch("COMMIT;")?;
            } else {
                conn.execute_batch("ROLLBACK;")?;
            }
            self.in_transaction.set(false);
        }
        if depth > 0 {
            self.depth.set(depth - 1);
        }
        Ok(())
    }

    /// Escape hatch for callers that aborted a multi-step sequence: rolls
    /// back immediately regardless of depth, and deliberately does NOT
    /// decrement depth (spec.md §4.2).
    pub fn break_transaction(&self, conn: &Connection) -> Result<()> {
        if self.in_transaction.get() {
            conn.execute_batch("ROLLBACK;")?;
            self.in_transaction.set(false);
        }
        Ok(())
    }

    pub fn depth(&self) -> u32 {
        self.depth.get()
    }
}

impl Default for TxnState {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard pairing a `begin()` with a `commit()`. Every `proc_*`
/// operation in `ops.rs` opens one of these as its first act and lets it
/// fall out of scope to close the bracket, the Rust stand-in for the
/// `BEGIN`/`COMPLETE(r)` macro pair in `sqlfs.c`.
pub struct Scope<'a> {
    conn: &'a Connection,
    txn: &'a TxnState,
    success: bool,
}

impl<'a> Scope<'a> {
    pub fn open(conn: &'a Connection, txn: &'a TxnState) -> Result<Self> {
        txn.begin(conn)?;
        Ok(Self { conn, txn, success: false })
    }

    /// Marks the scope as successful; `commit()` will issue `COMMIT` at the
    /// outermost frame instead of `ROLLBACK`.
    pub fn ok(&mut self) {
        self.success = true;
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.txn.commit(self.conn, self.success) {
            log::error!("failed to close transaction scope: {}", e);
        }
    }
}
