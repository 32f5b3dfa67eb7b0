//! Destination key naming for resized derivatives.
//!
//! A derivative of `photos/cat.JPG` tagged `500w` is stored as
//! `photos/cat_500w.JPG`. Any key whose stem already carries `_500w` is a
//! derivative and must never be processed again, otherwise writing into the
//! watched bucket would trigger the pipeline on its own output forever.

use percent_encoding::percent_decode_str;
use std::fmt;

use crate::services::error::SkipReason;

/// Destination key computed for one source object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedKey {
    source_key: String,
    key: String,
    extension: String,
}

impl DerivedKey {
    /// The normalized source key, i.e. the key the object is stored under.
    pub fn source_key(&self) -> &str {
        &self.source_key
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Extension exactly as it appears in the key.
    pub fn extension(&self) -> &str {
        &self.extension
    }
}

impl fmt::Display for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl PartialEq<&str> for DerivedKey {
    fn eq(&self, other: &&str) -> bool {
        self.key == *other
    }
}

/// Undo the form-URL-encoding bucket notifications apply to object keys.
///
/// `+` becomes a space first, then `%XX` escapes are decoded, so an encoded
/// literal plus (`%2B`) survives as `+`. `None` when the escapes do not
/// decode to UTF-8: no object can be stored under such a key.
pub fn normalize_key(raw: &str) -> Option<String> {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .ok()
        .map(|key| key.into_owned())
}

/// Marker embedded in derived keys, e.g. `_500w`.
pub fn size_marker(size_tag: &str) -> String {
    format!("_{}", size_tag)
}

/// Compute the derivative key for `source_key`.
///
/// The guard runs on the stem before the extension is validated, so a
/// derived key always comes back as [`SkipReason::AlreadyProcessed`].
pub fn derive(source_key: &str, size_tag: &str) -> Result<DerivedKey, SkipReason> {
    let Some(normalized) = normalize_key(source_key) else {
        return Err(SkipReason::UnknownType);
    };

    let Some(dot) = normalized.rfind('.') else {
        return Err(SkipReason::UnknownType);
    };

    let stem = &normalized[..dot];
    let extension = &normalized[dot + 1..];

    if stem.contains(&size_marker(size_tag)) {
        return Err(SkipReason::AlreadyProcessed);
    }

    // "photos.v2/cat" has a dot, but it belongs to a directory.
    if extension.is_empty() || extension.contains('/') {
        return Err(SkipReason::UnknownType);
    }

    let key = format!("{}_{}.{}", stem, size_tag, extension);
    let extension = extension.to_string();

    Ok(DerivedKey {
        source_key: normalized,
        key,
        extension,
    })
}
