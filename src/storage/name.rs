//! Stored names: `<32 hex uuid chars><.ext>`.
//!
//! Every name the store hands out has this shape, and every name that comes
//! back from a client must have it too before it is joined onto the store
//! directory.

use std::path::Path;
use uuid::Uuid;

const TOKEN_LEN: usize = 32;
const MAX_EXTENSION_LEN: usize = 16;

/// Build a fresh name, keeping the client's extension lower-cased.
pub fn generate(original_filename: Option<&str>) -> String {
    let token = Uuid::new_v4().simple().to_string();
    match original_filename.and_then(extension) {
        Some(ext) => format!("{token}.{ext}"),
        None => token,
    }
}

/// Lower-cased extension of a client filename, if it is something we can
/// store. Anything outside `[a-z0-9]{1,16}` is dropped.
fn extension(filename: &str) -> Option<String> {
    // Browsers on Windows sometimes send the full client path.
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let ext = Path::new(base).extension()?.to_str()?.to_ascii_lowercase();
    is_valid_extension(&ext).then_some(ext)
}

fn is_valid_extension(ext: &str) -> bool {
    (1..=MAX_EXTENSION_LEN).contains(&ext.len())
        && ext
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

/// True only for names [`generate`] could have produced.
pub fn is_valid(name: &str) -> bool {
    let (token, ext) = match name.split_once('.') {
        Some((token, ext)) => (token, Some(ext)),
        None => (name, None),
    };

    let token_ok = token.len() == TOKEN_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));

    token_ok && ext.is_none_or(is_valid_extension)
}
