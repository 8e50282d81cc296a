//! `sqlfs-ls <db> <path>`: lists a directory's entries, one per line. Exit
//! code 0 on success, 1 on any failure (spec.md §6 CLI surface).

use clap::{arg, command};
use sqlfs::{Filesystem, Identity};

fn current_identity() -> Identity {
    Identity { uid: unsafe { libc::getuid() }, gid: unsafe { libc::getgid() }, supplementary_groups: &[] }
}

fn main() {
    sqlfs::init_logging();
    let matches = command!()
        .arg(arg!(<db> "Path to the SQLite-backed filesystem database"))
        .arg(arg!([path] "Directory inside the filesystem to list").default_value("/"))
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
            eprintln!("sqlfs-ls: {}", e);
            std::process::exit(1);
        }
    };

    match fs.readdir(current_identity(), path) {
        Ok(mut names) => {
            names.sort();
            for name in names {
                println!("{}", name);
            }
        }
        Err(e) => {
            eprintln!("sqlfs-ls: {}", e);
            std::process::exit(1);
        }
    }
}
