//! `sqlfs-mount <db> <mountpoint>`: mounts a database file as a real kernel
//! filesystem via FUSE. Grounded in `chiro2001-rfs`'s `src/main.rs` clap
//! surface and its `SIGINT`-triggers-`fusermount -u` idiom; the fork-to-
//! background/retry-on-busy machinery that original used is dropped here —
//! spec.md's CLI section describes `mount` as a thin foreground shell, not
//! a daemon, so this just blocks in `fuser::mount2` until unmounted.

use std::env::set_var;
use std::io::BufRead;
use std::process::Command;

use clap::{arg, command, ArgAction};
use log::info;
use sqlfs::fuse_adapter::FuseAdapter;
use sqlfs::{Filesystem, MOUNT_POINT};

fn main() {
    let matches = command!()
        .arg(arg!(<db> "Path to the SQLite-backed filesystem database"))
        .arg(arg!(<mountpoint> "Directory to mount the filesystem on"))
        .arg(arg!(-k --encrypted "Prompt for a passphrase on stdin to open a keyed database").action(ArgAction::SetTrue))
        .arg(arg!(-v --verbose "Print more debug information, or set `RUST_LOG=debug`").action(ArgAction::SetTrue))
        .get_matches();

    if matches.get_flag("verbose") {
        set_var("RUST_LOG", "debug");
    }
    sqlfs::init_logging();

    let db = matches.get_one::<String>("db").unwrap();
    let mountpoint = matches.get_one::<String>("mountpoint").unwrap();

    let fs = if matches.get_flag("encrypted") {
        let stdin = std::io::stdin();
        let mut line = String::new();
        if stdin.lock().read_line(&mut line).is_err() {
            eprintln!("sqlfs-mount: failed to read passphrase from stdin");
            std::process::exit(1);
        }
        Filesystem::open_with_password(db, line.trim_end_matches(['\n', '\r']))
    } else {
        Filesystem::open_plain(db)
    };
    let fs = match fs {
        Ok(fs) => fs,
        Err(e) => {
            eprintln!("sqlfs-mount: failed to open {}: {}", db, e);
            std::process::exit(1);
        }
    };

    let _ = MOUNT_POINT.set(mountpoint.clone());
    install_unmount_handler();

    info!("mounting {} on {}", db, mountpoint);
    let adapter = FuseAdapter::new(fs);
    if let Err(e) = fuser::mount2(adapter, mountpoint, &[]) {
        eprintln!("sqlfs-mount: {}", e);
        std::process::exit(1);
    }
}

extern "C" fn handle_sigint(_: i32) {
    if let Ok(mountpoint) = MOUNT_POINT.read() {
        let _ = Command::new("fusermount").args(["-u", mountpoint.as_str()]).status();
    }
    std::process::exit(0);
}

fn install_unmount_handler() {
    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as usize);
    }
}
