//! Passthrough tag metadata carried alongside a sample.

/// Embedded tag metadata read by the decoding collaborator.
///
/// The playback engine never interprets these fields; they travel with the
/// sample so callers can display them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleTags {
    /// Track title
    pub title: String,
    /// Performing artist
    pub artist: String,
    /// Album name
    pub album: String,
    /// Genre label
    pub genre: String,
    /// Free-form comment
    pub comment: String,
    /// Release year, if tagged
    pub year: Option<u32>,
    /// Track number, if tagged
    pub track: Option<u32>,
}

impl SampleTags {
    /// Create tags from title and artist.
    pub fn with_title_artist(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            ..Default::default()
        }
    }

    /// True when no field carries a value
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
