//! ULID-based identifier generation with prefixes.
//!
//! Identifiers follow the pattern `prefix_ulid`, for example `ses_01hqxyz...`
//! for chat sessions or `img_01hqxyz....png` for generated image files.

use ulid::Ulid;

/// Known identifier prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPrefix {
    Session,
    Image,
    Audio,
    Upload,
}

impl IdPrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdPrefix::Session => "ses",
            IdPrefix::Image => "img",
            IdPrefix::Audio => "aud",
            IdPrefix::Upload => "upl",
        }
    }

    /// Parse a prefix from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ses" => Some(IdPrefix::Session),
            "img" => Some(IdPrefix::Image),
            "aud" => Some(IdPrefix::Audio),
            "upl" => Some(IdPrefix::Upload),
            _ => None,
        }
    }
}

/// Identifier generation and parsing utilities.
pub struct Identifier;

impl Identifier {
    /// Generate a new ascending identifier (newer = larger).
    pub fn ascending(prefix: IdPrefix) -> String {
        Self::with_ulid(prefix, Ulid::new())
    }

    /// Generate an identifier with a specific ULID (for tests).
    pub fn with_ulid(prefix: IdPrefix, ulid: Ulid) -> String {
        format!("{}_{}", prefix.as_str(), ulid.to_string().to_lowercase())
    }

    /// Parse an identifier into its prefix and ULID parts.
    ///
    /// A trailing file extension is ignored, so file names produced by
    /// [`Identifier::file_name`] parse as well.
    pub fn parse(id: &str) -> Option<(IdPrefix, Ulid)> {
        let (prefix, rest) = id.split_once('_')?;
        let prefix = IdPrefix::parse(prefix)?;
        let raw = rest.split_once('.').map(|(stem, _)| stem).unwrap_or(rest);
        let ulid = Ulid::from_string(raw).ok()?;
        Some((prefix, ulid))
    }

    /// Check if an identifier has the expected prefix.
    pub fn has_prefix(id: &str, prefix: IdPrefix) -> bool {
        id.starts_with(prefix.as_str()) && id.chars().nth(prefix.as_str().len()) == Some('_')
    }

    /// Generate a chat session ID.
    pub fn session() -> String {
        Self::ascending(IdPrefix::Session)
    }

    /// Generate a collision-free cache file name such as `img_<ulid>.png`.
    pub fn file_name(prefix: IdPrefix, extension: &str) -> String {
        format!(
            "{}.{}",
            Self::ascending(prefix),
            extension.trim_start_matches('.')
        )
    }
}
