//! Tag reading and artist/title resolution.

use super::filename;
use lofty::file::TaggedFileExt;
use lofty::prelude::*;
use std::path::Path;

/// Tags extracted from audio file metadata.
#[derive(Debug, Default)]
pub struct TagInfo {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub genre: Option<String>,
    pub duration_secs: Option<f64>,
}

/// Fully resolved track metadata; empty fields become "Unknown".
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTags {
    pub artist: String,
    pub title: String,
    pub genre: String,
}

/// Read tags from an audio file. Returns empty tags on failure.
pub fn read_tags(path: &Path) -> TagInfo {
    let tagged_file = match lofty::read_from_path(path) {
        Ok(f) => f,
        Err(e) => {
            log::debug!("Could not read tags from {}: {}", path.display(), e);
            return TagInfo::default();
        }
    };

    let duration_secs = {
        let secs = tagged_file.properties().duration().as_secs_f64();
        if secs > 0.0 { Some(secs) } else { None }
    };

    let tag = tagged_file.primary_tag().or_else(|| tagged_file.first_tag());
    let tag = match tag {
        Some(t) => t,
        None => {
            return TagInfo {
                duration_secs,
                ..TagInfo::default()
            }
        }
    };

    TagInfo {
        artist: non_empty(tag.artist().map(|s| s.to_string())),
        title: non_empty(tag.title().map(|s| s.to_string())),
        genre: non_empty(tag.get_string(&ItemKey::Genre).map(|s| s.to_string())),
        duration_secs,
    }
}

/// Resolve artist/title/genre for a file: tags first, then the filename
/// pattern cascade, then "Unknown".
pub fn resolve(path: &Path) -> ResolvedTags {
    let tags = read_tags(path);
    resolve_from(path, tags)
}

/// Resolution core, separated from I/O so tests can feed synthetic tags.
pub fn resolve_from(path: &Path, tags: TagInfo) -> ResolvedTags {
    let (artist, title) = match (tags.artist, tags.title) {
        (Some(artist), Some(title)) => (artist, title),
        (artist, title) => {
            let parsed = filename::parse_name(path);
            (
                artist.or(parsed.artist).unwrap_or_else(unknown),
                title.or(parsed.title).unwrap_or_else(unknown),
            )
        }
    };

    ResolvedTags {
        artist,
        title,
        genre: tags.genre.unwrap_or_else(unknown),
    }
}

fn unknown() -> String {
    "Unknown".to_string()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_tags_win_over_filename() {
        let tags = TagInfo {
            artist: Some("Tagged Artist".into()),
            title: Some("Tagged Title".into()),
            genre: Some("Techno".into()),
            duration_secs: None,
        };
        let r = resolve_from(&PathBuf::from("Other - Name.mp3"), tags);
        assert_eq!(r.artist, "Tagged Artist");
        assert_eq!(r.title, "Tagged Title");
        assert_eq!(r.genre, "Techno");
    }

    #[test]
    fn test_filename_fallback_when_tags_empty() {
        let r = resolve_from(&PathBuf::from("Underworld - Rez.mp3"), TagInfo::default());
        assert_eq!(r.artist, "Underworld");
        assert_eq!(r.title, "Rez");
        assert_eq!(r.genre, "Unknown");
    }

    #[test]
    fn test_partial_tags_fill_from_filename() {
        let tags = TagInfo {
            artist: None,
            title: Some("Tagged Title".into()),
            genre: None,
            duration_secs: None,
        };
        let r = resolve_from(&PathBuf::from("Underworld - Rez.mp3"), tags);
        assert_eq!(r.artist, "Underworld");
        assert_eq!(r.title, "Tagged Title");
    }

    #[test]
    fn test_unknown_when_nothing_parses() {
        let r = resolve_from(&PathBuf::from("track01.mp3"), TagInfo::default());
        assert_eq!(r.artist, "Unknown");
        assert_eq!(r.title, "Unknown");
        assert_eq!(r.genre, "Unknown");
    }
}
