//! Block I/O layer (spec.md §4.4), ported from `sqlfs.c`'s `get_value_block`/
//! `set_value_block`/`get_value`/`set_value`/`key_shorten_value`. Content is
//! striped into fixed `BLOCK_SIZE` BLOB rows; a short final row is allowed,
//! and a missing row reads as all zeros.

use std::cmp::{max, min};

use rusqlite::{params, OptionalExtension};

use crate::error::Result;
use crate::meta;
use crate::types::BLOCK_SIZE;

fn get_block(conn: &rusqlite::Connection, key: &str, block_no: i64) -> Result<Vec<u8>> {
    let data: Option<Vec<u8>> = conn
        .query_row(
            "select data_block from value_data where key = ?1 and block_no = ?2",
            params![key, block_no],
            |r| r.get(0),
        )
        .optional()?;
    Ok(data.unwrap_or_default())
}

/// Writing zero-length to a block deletes its `value_data` row
/// (spec.md §4.4, last line).
fn set_block(conn: &rusqlite::Connection, key: &str, block_no: i64, data: &[u8]) -> Result<()> {
    if data.is_empty() {
        conn.execute(
            "delete from value_data where key = ?1 and block_no = ?2",
            params![key, block_no],
        )?;
    } else {
        conn.execute(
            "insert into value_data (key, block_no, data_block) values (?1, ?2, ?3) \
             on conflict(key, block_no) do update set data_block = excluded.data_block",
            params![key, block_no, data],
        )?;
    }
    Ok(())
}

/// `get_value`: `size` is supplied by the caller (already loaded via
/// `meta::get_attr`) so this function never needs its own metadata round
/// trip.
pub fn read(conn: &rusqlite::Connection, key: &str, offset: i64, length: i64, size: i64) -> Result<Vec<u8>> {
    if offset >= size || length <= 0 {
        return Ok(Vec::new());
    }
    let end = min(offset + length, size);
    let bs = BLOCK_SIZE as i64;
    let first = offset / bs;
    let last = (end - 1) / bs;
    let mut out = vec![0u8; (end - offset) as usize];
    for block_no in first..=last {
        let block = get_block(conn, key, block_no)?;
        let block_start = block_no * bs;
        let lo = max(offset, block_start);
        let hi = min(end, block_start + bs);
        let src_lo = (lo - block_start) as usize;
        let src_hi = (hi - block_start) as usize;
        let dst_lo = (lo - offset) as usize;
        let dst_hi = (hi - offset) as usize;
        if src_lo < block.len() {
            let avail_hi = min(src_hi, block.len());
            out[dst_lo..dst_lo + (avail_hi - src_lo)].copy_from_slice(&block[src_lo..avail_hi]);
        }
        // bytes beyond the stored block length (or an entirely missing
        // block) stay zero — `out` was zero-initialized above.
    }
    Ok(out)
}

/// `set_value`: read-modify-write every block touched by `[offset, offset +
/// data.len())`, never shrinking a block's previously-stored tail.
/// Returns the new logical file size (`max(previous size, end)`).
pub fn write(conn: &rusqlite::Connection, key: &str, data: &[u8], offset: i64, old_size: i64) -> Result<i64> {
    let bs = BLOCK_SIZE as i64;
    let begin = offset;
    let end = offset + data.len() as i64;
    if !data.is_empty() {
        let first = begin / bs;
        let last = (end - 1) / bs;
        for block_no in first..=last {
            let block_start = block_no * bs;
            let block_end = block_start + bs;
            let lo = max(begin, block_start);
            let hi = min(end, block_end);
            let src = &data[(lo - begin) as usize..(hi - begin) as usize];
            if lo == block_start && hi == block_end {
                // Fully covered: write straight from the caller's buffer.
                set_block(conn, key, block_no, src)?;
            } else {
                let mut scratch = get_block(conn, key, block_no)?;
                let previous_len = scratch.len();
                scratch.resize(BLOCK_SIZE, 0);
                let dst_lo = (lo - block_start) as usize;
                scratch[dst_lo..dst_lo + src.len()].copy_from_slice(src);
                let new_len = max((hi - block_start) as usize, previous_len);
                set_block(conn, key, block_no, &scratch[..new_len])?;
            }
        }
    }
    let new_size = max(old_size, end);
    conn.execute("update meta_data set size = ?1 where key = ?2", params![new_size, key])?;
    meta::touch_modify(conn, key)?;
    Ok(new_size)
}

/// `key_shorten_value` (shrink path) plus the grow path spec.md §4.4
/// describes as "write zeros over the gap via the Write algorithm".
pub fn truncate(conn: &rusqlite::Connection, key: &str, new_size: i64, old_size: i64) -> Result<()> {
    use std::cmp::Ordering;
    match new_size.cmp(&old_size) {
        Ordering::Less => {
            let bs = BLOCK_SIZE as i64;
            let b = new_size / bs;
            let rem = (new_size % bs) as usize;
            let mut block = get_block(conn, key, b)?;
            block.resize(BLOCK_SIZE, 0);
            set_block(conn, key, b, &block[..rem])?;
            conn.execute(
                "delete from value_data where key = ?1 and block_no > ?2",
                params![key, b],
            )?;
            conn.execute("update meta_data set size = ?1 where key = ?2", params![new_size, key])?;
            meta::touch_modify(conn, key)?;
        }
        Ordering::Greater => {
            let zeros = vec![0u8; (new_size - old_size) as usize];
            write(conn, key, &zeros, old_size, old_size)?;
        }
        Ordering::Equal => {
            meta::touch_modify(conn, key)?;
        }
    }
    Ok(())
}

/// Deletes every stored block for `key`, used by truncate-to-zero and by
/// `remove`/`del_tree`.
pub fn delete_all_blocks(conn: &rusqlite::Connection, key: &str) -> Result<()> {
    conn.execute("delete from value_data where key = ?1", params![key])?;
    Ok(())
}
