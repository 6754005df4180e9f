// Backend-native key derivation
use crate::storage::{StorageConfig, StorageKind};
use std::path::Component;

/// Lexically clean a slash separated path: collapse repeated separators,
/// drop `.` segments and resolve `..` against earlier segments. A rooted path
/// never climbs above the root. An empty result becomes `.` (or `/`).
pub fn clean(path: &str) -> String {
    let mut cleaned = String::new();
    for component in path_clean::clean(path).components() {
        match component {
            Component::RootDir => cleaned.push('/'),
            other => {
                if !cleaned.is_empty() && !cleaned.ends_with('/') {
                    cleaned.push('/');
                }
                cleaned.push_str(&other.as_os_str().to_string_lossy());
            }
        }
    }
    cleaned
}

/// Join path elements with `/` and clean the result. Empty elements are
/// ignored; joining nothing yields an empty string. A trailing separator on
/// the last element is kept, since it marks a directory.
pub fn join(parts: &[&str]) -> String {
    let non_empty: Vec<&str> = parts.iter().copied().filter(|p| !p.is_empty()).collect();
    let Some(last) = non_empty.last() else {
        return String::new();
    };

    let mut joined = clean(&non_empty.join("/"));
    if last.ends_with('/') && !joined.ends_with('/') && joined != "." {
        joined.push('/');
    }
    joined
}

/// Native key for `key` under the configuration's path prefix.
///
/// The b2 backend mishandles keys that look absolute, so the leading
/// separator is stripped for it; every other kind keeps the joined path.
pub fn native_key(config: &StorageConfig, key: &str) -> String {
    let joined = join(&[&config.path_prefix, key]);
    match config.kind {
        StorageKind::B2 => joined.trim_start_matches('/').to_string(),
        _ => joined,
    }
}
