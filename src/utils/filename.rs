const BLACKLISTED_CHARS: &[char] = &['\\', '/', '<', '>', ':', '"', '|', '?', '*'];

pub const DEFAULT_MAX_NAME_LENGTH: usize = 255;

/// Whether `name` may be used as the final segment of a stored path.
///
/// Rejects empty names, `.`/`..`, names containing separators, reserved
/// or control characters, and names longer than `max_len` bytes.
pub fn is_valid_file_name(name: &str, max_len: usize) -> bool {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        return false;
    }
    if name.len() > max_len {
        return false;
    }
    !name
        .chars()
        .any(|c| BLACKLISTED_CHARS.contains(&c) || c.is_control())
}
