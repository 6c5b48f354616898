pub const DIRECTORY_MIME: &str = "httpd/unix-directory";
pub const DEFAULT_MIME: &str = "application/octet-stream";

/// Types a browser could execute when served inline
const UNSAFE_MIME_TYPES: &[&str] = &[
    "text/html",
    "text/xml",
    "application/xhtml+xml",
    "application/xml",
    "image/svg+xml",
    "application/javascript",
    "text/javascript",
];

/// Mime type for a file name, guessed from its extension
pub fn detect_mime_type(name: &str) -> String {
    mime_guess::from_path(name)
        .first_raw()
        .unwrap_or(DEFAULT_MIME)
        .to_string()
}

/// Downgrade mime types that would let stored content run in a browser
pub fn secure_mime_type(mime: &str) -> String {
    let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    if UNSAFE_MIME_TYPES.contains(&essence.as_str()) {
        "text/plain".to_string()
    } else if essence.is_empty() {
        DEFAULT_MIME.to_string()
    } else {
        mime.to_string()
    }
}
