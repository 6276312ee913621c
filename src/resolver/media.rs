//! Media URL detection helpers shared by the resolver strategies.

use once_cell::sync::Lazy;
use regex::Regex;

/// Container extensions that identify a directly playable stream
pub const MEDIA_EXTENSIONS: &[&str] = &[
    "m3u8", "mpd", "mp4", "mkv", "flv", "avi", "mov", "ts", "webm", "mp3", "m4a", "aac", "flac",
];

/// Long media-looking URLs, matching the common CDN shapes
static SNIFFER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"https?://[^\s'"<>]{12,}\.(?:m3u8|mpd|mp4|mkv|flv|mp3|m4a|aac)(?:\?[^\s'"<>]*)?"#,
    )
    .unwrap()
});

/// `var playUrl = "http://..."` style assignments
static JS_VAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)(?:var|let|const)\s+[a-z0-9_]*(?:url|src|video|play)[a-z0-9_]*\s*=\s*['"](https?://[^'"]+)['"]"#,
    )
    .unwrap()
});

/// `url: "http://..."` / `src=` / `file:` object fields
static OBJECT_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(?:url|src|file)\s*[:=]\s*['"](https?://[^'"]+)['"]"#).unwrap()
});

/// Any quoted absolute URL with a media extension
static QUOTED_MEDIA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"['"](https?://[^'"]+\.(?:m3u8|mpd|mp4|mkv|flv|mp3|m4a|aac)(?:\?[^'"]*)?)['"]"#,
    )
    .unwrap()
});

/// `<iframe src="...">` extraction for the generic site fallthrough
static IFRAME_SRC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<iframe[^>]+src\s*=\s*['"]([^'"]+)['"]"#).unwrap());

/// Whether a URL already points at a playable media container.
///
/// Pages that merely embed another URL (`url=http...`, `v=http...`) and
/// plain html documents are excluded before the extension test.
pub fn is_media_url(url: &str) -> bool {
    if url.contains("url=http") || url.contains("v=http") || url.contains(".html") {
        return false;
    }
    let path = url.split(['?', '#']).next().unwrap_or(url);
    if let Some(ext) = path.rsplit('.').next() {
        if path.contains('/') && MEDIA_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
            return true;
        }
    }
    SNIFFER.is_match(url)
}

/// Whether a Content-Type names a media stream
pub fn is_media_content_type(content_type: &str) -> bool {
    let ct = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase();
    ct.starts_with("video/")
        || ct.starts_with("audio/")
        || ct == "application/vnd.apple.mpegurl"
        || ct == "application/x-mpegurl"
        || ct == "application/dash+xml"
}

/// First inline JS-variable or JSON-field media URL in a page body.
/// Used by the sniff fallback scan.
pub fn find_inline_media_url(text: &str) -> Option<String> {
    for regex in [&*JS_VAR, &*OBJECT_FIELD] {
        for capture in regex.captures_iter(text) {
            let candidate = capture[1].to_string();
            if is_media_url(&candidate) {
                return Some(candidate);
            }
        }
    }
    None
}

/// First media URL by the full ordered pattern list: JS variable
/// assignment, object fields, then any quoted media URL.
pub fn find_page_media_url(text: &str) -> Option<String> {
    if let Some(url) = find_inline_media_url(text) {
        return Some(url);
    }
    QUOTED_MEDIA
        .captures(text)
        .map(|capture| capture[1].to_string())
}

/// First iframe src in a page body
pub fn find_iframe_src(text: &str) -> Option<String> {
    IFRAME_SRC.captures(text).map(|capture| capture[1].to_string())
}

/// MIME type for a file path, defaulting to octet-stream
pub fn mime_for_path(path: &str) -> &'static str {
    let ext = path
        .rsplit('.')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "m3u8" => "application/vnd.apple.mpegurl",
        "mpd" => "application/dash+xml",
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "flv" => "video/x-flv",
        "ts" => "video/mp2t",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "flac" => "audio/flac",
        "html" | "htm" => "text/html",
        "js" => "application/javascript",
        "css" => "text/css",
        "json" => "application/json",
        "txt" => "text/plain",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        _ => "application/octet-stream",
    }
}
