//! Artist/title recovery from file names.
//!
//! Used when the tag reader comes back empty. The patterns are tried in
//! order; the first one whose artist and title groups are both non-empty and
//! free of path separators wins.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

/// Artist/title pair parsed from a file name.
#[derive(Debug, Default, PartialEq)]
pub struct ParsedName {
    pub artist: Option<String>,
    pub title: Option<String>,
}

// Pattern 1: "Artist - Title"
static DASH_SPACED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<artist>[^-]+?)\s+-\s+(?P<title>.+)$").unwrap()
});

// Pattern 2: "01 - Artist - Title" (leading track number, up to three digits)
static TRACK_DASH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{1,3}\s*-\s*(?P<artist>[^-]+?)\s*-\s*(?P<title>.+)$").unwrap()
});

// Pattern 3: "Artist-Title" (no spaces around the dash)
static DASH_TIGHT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<artist>[^-]+)-(?P<title>[^-].*)$").unwrap()
});

// Pattern 4: "Artist_Title"
static UNDERSCORE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<artist>[^_]+)_(?P<title>[^_].*)$").unwrap()
});

/// Parse a file name into artist/title using the pattern cascade.
pub fn parse_name(path: &Path) -> ParsedName {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();

    for re in [&*TRACK_DASH_RE, &*DASH_SPACED_RE, &*DASH_TIGHT_RE, &*UNDERSCORE_RE] {
        if let Some(caps) = re.captures(stem) {
            let artist = caps.name("artist").map(|m| m.as_str().trim());
            let title = caps.name("title").map(|m| m.as_str().trim());
            if let (Some(artist), Some(title)) = (artist, title) {
                if !artist.is_empty()
                    && !title.is_empty()
                    && !has_path_separator(artist)
                    && !has_path_separator(title)
                {
                    return ParsedName {
                        artist: Some(artist.to_string()),
                        title: Some(title.to_string()),
                    };
                }
            }
        }
    }

    ParsedName::default()
}

fn has_path_separator(s: &str) -> bool {
    s.contains('/') || s.contains('\\')
}
