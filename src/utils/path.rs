/// Strip leading and trailing separators; the empty string is the root
pub fn trim_path(path: &str) -> &str {
    path.trim_matches('/')
}

/// Canonical absolute form used as property-store key: leading slash,
/// no trailing slash, no empty or `.` segments.
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    format!("/{}", segments.join("/"))
}

/// Split a path into its parent and final segment.
///
/// `"a/b/c.txt"` → `("a/b", "c.txt")`, `"/c.txt"` → `("", "c.txt")`.
pub fn split_path(path: &str) -> (String, String) {
    let trimmed = trim_path(path);
    match trimmed.rfind('/') {
        Some(idx) => (trimmed[..idx].to_string(), trimmed[idx + 1..].to_string()),
        None => (String::new(), trimmed.to_string()),
    }
}

pub fn join_path(parent: &str, name: &str) -> String {
    let parent = trim_path(parent);
    let name = trim_path(name);
    if parent.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        parent.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// True when `path` equals `ancestor` or lives beneath it
pub fn is_same_or_descendant(path: &str, ancestor: &str) -> bool {
    let path = trim_path(path);
    let ancestor = trim_path(ancestor);
    ancestor.is_empty()
        || path == ancestor
        || (path.len() > ancestor.len()
            && path.starts_with(ancestor)
            && path.as_bytes()[ancestor.len()] == b'/')
}

/// Extension of the final segment, if any
pub fn extension(path: &str) -> Option<&str> {
    let name = trim_path(path).rsplit('/').next()?;
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() {
        None
    } else {
        Some(ext)
    }
}

/// Staging files carry a `.part` extension and are never listed
pub fn is_part_file(path: &str) -> bool {
    extension(path) == Some("part")
}
