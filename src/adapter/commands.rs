//! Every command string sent through a [`RemoteExec`](super::exec::RemoteExec)
//! is built here. Paths are always quoted; nothing is interpolated raw.

use uuid::Uuid;

use crate::snapshot::Depth;

/// Separator between listing records. Paths cannot contain NUL.
pub const RECORD_SEPARATOR: u8 = b'\0';

/// Shell pattern matching the in-flight files of both transfer directions.
pub const PARTIAL_PATTERN: &str = ".*remsync-*.part";

/// Whether `file_name` is an in-flight file left by a transfer.
pub fn is_partial(file_name: &str) -> bool {
    file_name.starts_with('.') && file_name.ends_with(".part") && file_name.contains("remsync-")
}

/// Quotes `raw` for a POSIX shell.
pub fn quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}

/// Like [`quote`], but keeps a leading `~` meaning the remote home directory.
pub fn quote_path(path: &str) -> String {
    match path.strip_prefix('~') {
        Some("") => "\"$HOME\"".to_owned(),
        Some(rest) if rest.starts_with('/') => format!("\"$HOME\"{}", quote(rest)),
        _ => quote(path),
    }
}

/// `find` would read a leading `-` as an expression.
fn find_root(root: &str) -> String {
    if root.starts_with('-') {
        quote(&format!("./{root}"))
    } else {
        quote_path(root)
    }
}

/// Emits `<mtime> <size> <relative path>\0` for every regular file under `root`,
/// leaving out files that are still being written by a transfer.
pub fn list_files(root: &str, depth: Depth) -> String {
    let max_depth = match depth {
        Depth::Shallow => " -maxdepth 1",
        Depth::Recursive => "",
    };

    format!(
        r"find {} -mindepth 1{max_depth} -type f ! -name {} -printf '%T@ %s %P\0'",
        find_root(root),
        quote(PARTIAL_PATTERN)
    )
}

/// Writes the full content of `path` to stdout.
pub fn read_file(path: &str) -> String {
    format!("cat -- {}", quote_path(path))
}

/// Prints the SHA-256 digest of `path`.
pub fn checksum(path: &str) -> String {
    format!("sha256sum -- {}", quote_path(path))
}

/// Hidden sibling of `path` used while its new content is in flight.
pub fn temp_sibling(path: &str) -> String {
    let (dir, name) = split_parent(path);
    let tmp = format!(".{name}.remsync-{}.part", Uuid::new_v4().simple());

    match dir {
        Some(dir) => format!("{dir}/{tmp}"),
        None => tmp,
    }
}

fn split_parent(path: &str) -> (Option<&str>, &str) {
    match path.rsplit_once('/') {
        Some(("", name)) => (Some(""), name),
        Some((dir, name)) => (Some(dir), name),
        None => (None, path),
    }
}

/// Reads exactly `size` bytes from stdin into `tmp`, creating its directory.
///
/// Exits non-zero and removes `tmp` if fewer or more bytes arrive than
/// announced.
pub fn write_temp(tmp: &str, size: u64) -> String {
    let tmp_quoted = quote_path(tmp);
    let mkdir = match split_parent(tmp).0 {
        Some("") | None => String::new(),
        Some(dir) => format!("mkdir -p -- {} && ", quote_path(dir)),
    };

    format!(
        "{mkdir}cat > {tmp_quoted} && [ \"$(wc -c < {tmp_quoted} | tr -d ' ')\" = \"{size}\" ] || {{ rm -f -- {tmp_quoted}; exit 1; }}"
    )
}

/// Moves a complete `tmp` over `path`, stamping it with `modified_at` when
/// `touch` supports it.
pub fn publish(tmp: &str, path: &str, modified_at: Option<i64>) -> String {
    let tmp = quote_path(tmp);
    let touch = modified_at
        .map(|ts| format!("{{ touch -m -d @{ts} {tmp} 2>/dev/null || :; }} && "))
        .unwrap_or_default();

    format!("{touch}mv -f -- {tmp} {} || {{ rm -f -- {tmp}; exit 1; }}", quote_path(path))
}

pub fn discard(path: &str) -> String {
    format!("rm -f -- {}", quote_path(path))
}
