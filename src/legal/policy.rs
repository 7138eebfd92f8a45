use std::sync::LazyLock;

use regex::Regex;

use crate::legal::case::Party;

/// Fallback stored name when sanitization leaves nothing behind.
pub const DEFAULT_STORED_NAME: &str = "file";

static CASE_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9-]+$").expect("case id pattern is valid"));

/// Case IDs name a directory under the uploads root, so only ASCII
/// alphanumerics and dashes are accepted (UUIDs pass as-is).
pub fn is_valid_case_id(case_id: &str) -> bool {
    CASE_ID_PATTERN.is_match(case_id)
}

/// Reduce an uploaded filename to a safe basename.
///
/// Trailing separators are dropped, the last `/` or `\` segment is kept, and
/// every character outside `[a-zA-Z0-9._-]` becomes `_`. An empty result
/// collapses to [`DEFAULT_STORED_NAME`].
///
/// The result may still be `.` or `..`; callers that touch the filesystem
/// must run it through the case-directory containment check.
pub fn sanitize_filename(name: &str) -> String {
    let trimmed = name.trim_end_matches(['/', '\\']);
    let base = trimmed.rsplit(['/', '\\']).next().unwrap_or_default();
    let safe: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe.is_empty() {
        DEFAULT_STORED_NAME.to_string()
    } else {
        safe
    }
}

/// Which side of the courtroom a conversation role speaks for.
///
/// Only the human participant (`user`, any case) argues the defense; every
/// other role, including the voice agent, is treated as the prosecution.
pub fn classify_role(role: &str) -> Party {
    if role.eq_ignore_ascii_case("user") {
        Party::Defense
    } else {
        Party::Prosecutor
    }
}

/// Content type served for a stored file, chosen by extension.
pub fn content_type_for(stored_name: &str) -> &'static str {
    let ext = match stored_name.rsplit_once('.') {
        // A leading dot alone (".pdf") is a hidden file with no extension.
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => return "application/octet-stream",
    };
    match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}
