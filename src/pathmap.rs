//! URI → filesystem path mapping: percent-decoding, path normalization,
//! and the docroot containment check.
//!
//! Decoding rejects NUL, backslash, CR, LF, and an incomplete trailing
//! `%` escape as hard errors rather than passing them through literally.
//! Normalization collapses repeated `/`, drops `.` segments, and treats
//! a `..` at the root as a hard error instead of clamping. Containment
//! is checked against the resolved real path of both docroot and
//! target, with an exact-or-followed-by-`/` prefix match to avoid a
//! sibling directory whose name merely starts with the docroot's name.

use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Result, ZaverError};

/// Rejects embedded NUL, `\`, CR and LF, and treats a trailing
/// incomplete or non-hex `%` escape as a parse error rather than a
/// literal `%`.
pub fn percent_decode(input: &str) -> Result<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let ch = bytes[i];
        let decoded = if ch == b'%' {
            if i + 2 >= bytes.len() {
                return Err(ZaverError::BadRequest("truncated percent-escape".into()));
            }
            let hi = hex_val(bytes[i + 1]);
            let lo = hex_val(bytes[i + 2]);
            let (hi, lo) = match (hi, lo) {
                (Some(h), Some(l)) => (h, l),
                _ => return Err(ZaverError::BadRequest("invalid percent-escape".into())),
            };
            i += 3;
            (hi << 4) | lo
        } else {
            i += 1;
            ch
        };

        if decoded == 0 || decoded == b'\\' || decoded == b'\r' || decoded == b'\n' {
            return Err(ZaverError::BadRequest("illegal character in URI".into()));
        }
        out.push(decoded);
    }
    String::from_utf8(out).map_err(|_| ZaverError::BadRequest("non-UTF-8 URI".into()))
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Collapses runs of `/`, drops `.` segments, and resolves `..` by
/// popping one segment — failing if `..` is attempted at the root.
/// Requires an absolute path and preserves a trailing `/`.
pub fn normalize_abs_path(path: &str) -> Result<String> {
    if !path.starts_with('/') {
        return Err(ZaverError::BadRequest("URI path must be absolute".into()));
    }
    let trailing_slash = path.len() > 1 && path.ends_with('/');

    let mut stack: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                if stack.pop().is_none() {
                    return Err(ZaverError::Forbidden("path escapes root".into()));
                }
            }
            seg => stack.push(seg),
        }
    }

    let mut out = String::from("/");
    out.push_str(&stack.join("/"));
    if trailing_slash && out != "/" {
        out.push('/');
    }
    Ok(out)
}

/// Appends `/index.html` when the path ends in `/`, or when its final
/// component has no `.` in it — deliberately including the case where
/// that final component names an existing regular file. This is
/// intentional behavior, not a bug to fix.
pub fn apply_index_heuristic(normalized: &str) -> String {
    if normalized.ends_with('/') {
        format!("{normalized}index.html")
    } else {
        let last_segment = normalized.rsplit('/').next().unwrap_or("");
        if last_segment.contains('.') {
            normalized.to_string()
        } else {
            format!("{normalized}/index.html")
        }
    }
}

/// The outcome of mapping a request URI onto a concrete file: the decoded,
/// normalized on-disk path plus the raw (un-decoded) query string, kept
/// separate because CGI's `QUERY_STRING` copies it verbatim.
pub struct MappedPath {
    pub disk_path: PathBuf,
    pub uri_path: String,
    pub query_string: String,
}

/// Splits `uri` into path and query, percent-decodes and normalizes the
/// path, and applies the `/index.html` heuristic unless `apply_index`
/// is false (CGI script resolution maps the bare path with no
/// heuristic).
pub fn map_uri(uri: &str, docroot: &Path, apply_index: bool) -> Result<MappedPath> {
    let (path_part, query_string) = match uri.split_once('?') {
        Some((p, q)) => (p, q.to_string()),
        None => (uri, String::new()),
    };

    let decoded = percent_decode(path_part)?;
    let normalized = normalize_abs_path(&decoded)?;
    let final_path = if apply_index {
        apply_index_heuristic(&normalized)
    } else {
        normalized.clone()
    };

    let disk_path = join_under_docroot(docroot, &final_path);
    check_contained(docroot, &disk_path)?;

    Ok(MappedPath {
        disk_path,
        uri_path: normalized,
        query_string,
    })
}

fn join_under_docroot(docroot: &Path, normalized: &str) -> PathBuf {
    docroot.join(normalized.trim_start_matches('/'))
}

/// Resolves both docroot and target to their real (symlink-free) paths
/// and requires the target to equal docroot or sit strictly beneath it.
/// When the target doesn't exist yet, canonicalization is run against
/// its parent directory instead and the basename re-appended, so a 404
/// for a nonexistent file still gets a containment check rather than
/// silently passing.
fn check_contained(docroot: &Path, target: &Path) -> Result<()> {
    let root_real = std::fs::canonicalize(docroot)
        .map_err(|_| ZaverError::Forbidden("docroot does not resolve".into()))?;

    let target_real = match std::fs::canonicalize(target) {
        Ok(p) => p,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let parent = target.parent().ok_or_else(|| {
                ZaverError::Forbidden("path has no parent directory".into())
            })?;
            let basename = target.file_name().ok_or_else(|| {
                ZaverError::Forbidden("path has no file name".into())
            })?;
            let parent_real = std::fs::canonicalize(parent)
                .map_err(|_| ZaverError::Forbidden("parent directory does not resolve".into()))?;
            parent_real.join(basename)
        }
        Err(_) => return Err(ZaverError::Forbidden("path does not resolve".into())),
    };

    if target_real == root_real {
        return Ok(());
    }
    if target_real.starts_with(&root_real) {
        return Ok(());
    }
    Err(ZaverError::Forbidden("path escapes docroot".into()))
}
