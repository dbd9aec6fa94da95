use std::path::{Component, Path, PathBuf};

/// Lexically normalizes `path`: drops `.` components, folds `..` into the
/// preceding component and strips Windows verbatim prefixes.
///
/// The file system is never consulted, so this works for files that do not
/// exist yet (unsaved editor buffers, deleted modules).
pub fn normalize_path(path: &Path) -> PathBuf {
    let path = dunce::simplified(path);
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = match out.components().next_back() {
                    Some(Component::Normal(_)) => out.pop(),
                    _ => false,
                };
                if !popped && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Case-insensitive identity string for a path.
///
/// Two paths produce the same key iff they denote the same normalized
/// location, ignoring case and separator style.
pub fn path_key(path: &Path) -> String {
    let normalized = normalize_path(path);
    let mut key = normalized.to_string_lossy().replace('\\', "/");
    while key.len() > 1 && key.ends_with('/') {
        key.pop();
    }
    key.to_lowercase()
}

/// Whether the path key `key` denotes `root` or a location below it.
/// Both arguments must come from [`path_key`].
pub fn key_is_under(key: &str, root: &str) -> bool {
    if root == "/" {
        return key.starts_with('/');
    }
    key == root
        || key
            .strip_prefix(root)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Decodes a `file:` URI into a local path.
///
/// Returns `None` for other schemes or malformed percent escapes.
pub fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    let rest = uri
        .strip_prefix("file://")
        .or_else(|| uri.strip_prefix("file:"))?;
    // `file://host/path` is not supported; an empty authority is the norm.
    let rest = if rest.starts_with('/') {
        rest
    } else {
        rest.find('/').map(|idx| &rest[idx..])?
    };

    let decoded = percent_decode(rest)?;
    let bytes = decoded.as_bytes();
    // `/C:/Users/...` denotes a drive-letter path.
    let is_drive = bytes.len() >= 3
        && bytes[0] == b'/'
        && bytes[1].is_ascii_alphabetic()
        && bytes[2] == b':';
    let local = if is_drive { &decoded[1..] } else { &decoded[..] };
    Some(normalize_path(Path::new(local)))
}

fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while idx < bytes.len() {
        match bytes[idx] {
            b'%' => {
                let hi = hex_value(*bytes.get(idx + 1)?)?;
                let lo = hex_value(*bytes.get(idx + 2)?)?;
                out.push(hi << 4 | lo);
                idx += 3;
            }
            b'?' | b'#' => break,
            b => {
                out.push(b);
                idx += 1;
            }
        }
    }
    String::from_utf8(out).ok()
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_dot_segments() {
        assert_eq!(
            normalize_path(Path::new("/ws/a/./b/../pom.xml")),
            PathBuf::from("/ws/a/pom.xml")
        );
        assert_eq!(
            normalize_path(Path::new("/../x")),
            PathBuf::from("/x"),
            "`..` never escapes the root"
        );
        assert_eq!(normalize_path(Path::new("../x")), PathBuf::from("../x"));
    }

    #[test]
    fn path_keys_ignore_case_and_trailing_separators() {
        assert_eq!(
            path_key(Path::new("/WS/Module/")),
            path_key(Path::new("/ws/module"))
        );
        assert_ne!(path_key(Path::new("/ws/a")), path_key(Path::new("/ws/b")));
    }

    #[test]
    fn containment_respects_component_boundaries() {
        assert!(key_is_under("/ws/a/pom.xml", "/ws/a"));
        assert!(key_is_under("/ws/a", "/ws/a"));
        assert!(!key_is_under("/ws/ab/pom.xml", "/ws/a"));
        assert!(key_is_under("/ws", "/"));
    }

    #[test]
    fn file_uris_decode_to_paths() {
        assert_eq!(
            file_uri_to_path("file:///home/me/my%20project/pom.xml"),
            Some(PathBuf::from("/home/me/my project/pom.xml"))
        );
        assert_eq!(
            file_uri_to_path("file:///C:/ws/pom.xml"),
            Some(PathBuf::from("C:/ws/pom.xml"))
        );
        assert_eq!(file_uri_to_path("untitled:Untitled-1"), None);
        assert_eq!(file_uri_to_path("file:///bad%zz"), None);
    }
}
