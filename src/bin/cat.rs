//! `sqlfs-cat <db> <path>`: prints a file's content to stdout. Exit code 0
//! on success, 1 on any failure (spec.md §6 CLI surface).

use clap::{arg, command};
use sqlfs::{Filesystem, Identity};
use std::io::Write;

fn current_identity() -> Identity {
    Identity { uid: unsafe { libc::getuid() }, gid: unsafe { libc::getgid() }, supplementary_groups: &[] }
}

fn main() {
    sqlfs::init_logging();
    let matches = command!()
        .arg(arg!(<db> "Path to the SQLite-backed filesystem database"))
        .arg(arg!(<path> "Path inside the filesystem to read"))
        .arg(arg!(-p --password <PASSWORD> "Open the database with a passphrase").required(false))
        .get_matches();

    let db = matches.get_one::<String>("db").unwrap();
    let path = matches.get_one::<String>("path").unwrap();

    let fs = match matches.get_one::<String>("password") {
        Some(pw) => Filesystem::open_with_password(db, pw),
        None => Filesystem::open_plain(db),
    };
    let fs = match fs {
        Ok(fs) => fs,
        Err(e) => {
            eprintln!("sqlfs-cat: {}", e);
            std::process::exit(1);
        }
    };

    let identity = current_identity();
    let stat = match fs.getattr(identity, path) {
        Ok(stat) => stat,
        Err(e) => {
            eprintln!("sqlfs-cat: {}", e);
            std::process::exit(1);
        }
    };
    match fs.read(identity, path, 0, stat.size) {
        Ok(data) => {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            if handle.write_all(&data).is_err() {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("sqlfs-cat: {}", e);
            std::process::exit(1);
        }
    }
}
