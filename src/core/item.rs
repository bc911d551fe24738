use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use unicode_normalization::UnicodeNormalization;

/// Group key used when an input row carries no Code.
pub const UNKNOWN_CODE: &str = "UNKNOWN";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        ItemId(s.to_string())
    }
}

/// Declared media type, normalised once at ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeclaredType {
    Audio,
    Video,
    Karaoke,
    Unknown,
}

impl DeclaredType {
    /// Maps a free-text type label onto the closed set of types.
    ///
    /// Matching is case- and diacritic-insensitive: "Âm thanh" is Audio,
    /// anything mentioning karaoke or lyric is Karaoke, anything mentioning
    /// video or mv is Video.
    pub fn from_label(label: &str) -> Self {
        let folded = fold_label(label);
        if folded == "audio" || folded == "am thanh" {
            DeclaredType::Audio
        } else if folded.contains("karaoke") || folded.contains("lyric") {
            DeclaredType::Karaoke
        } else if folded.contains("video") || folded.contains("mv") {
            DeclaredType::Video
        } else {
            DeclaredType::Unknown
        }
    }

    pub fn is_audio(self) -> bool {
        self == DeclaredType::Audio
    }

    /// Bucket used to split Video/Karaoke items before clustering.
    /// Audio items have no bucket.
    pub fn bucket(self) -> Option<TypeBucket> {
        match self {
            DeclaredType::Audio => None,
            DeclaredType::Video => Some(TypeBucket::Video),
            DeclaredType::Karaoke => Some(TypeBucket::Karaoke),
            DeclaredType::Unknown => Some(TypeBucket::Other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TypeBucket {
    Video,
    Karaoke,
    Other,
}

impl TypeBucket {
    pub fn name(self) -> &'static str {
        match self {
            TypeBucket::Video => "video",
            TypeBucket::Karaoke => "karaoke",
            TypeBucket::Other => "other",
        }
    }
}

/// Lowercase, trim and strip combining marks.
fn fold_label(label: &str) -> String {
    label
        .trim()
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0xFE20..=0xFE2F)
}

/// Parses an 8-digit `YYYYMMDD` upload date.
pub fn parse_upload_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.len() != 8 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y%m%d").ok()
}

/// One input row as it appears in a manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: String,
    #[serde(default)]
    pub source: String,
    #[serde(default, rename = "type")]
    pub declared_type: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub upload_date: String,
    /// Handle of the item's audio asset (key into the audio feature map).
    #[serde(default)]
    pub audio: Option<String>,
    /// Handle of the item's video asset; absent for audio-only items.
    #[serde(default)]
    pub video: Option<String>,
}

/// One processed segment. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub source: String,
    pub declared_type: DeclaredType,
    /// The label as supplied, kept for reporting.
    pub type_label: String,
    pub code: String,
    pub upload_date: String,
    pub audio_handle: Option<String>,
    pub video_handle: Option<String>,
}

impl Item {
    pub fn from_record(record: ItemRecord) -> Self {
        let code = record.code.trim();
        let code = if code.is_empty() {
            UNKNOWN_CODE.to_string()
        } else {
            code.to_string()
        };
        let type_label = record.declared_type.trim().to_string();

        Self {
            id: ItemId(record.id),
            source: record.source,
            declared_type: DeclaredType::from_label(&type_label),
            type_label: if type_label.is_empty() {
                "Unknown".to_string()
            } else {
                type_label
            },
            code,
            upload_date: record.upload_date.trim().to_string(),
            audio_handle: record.audio.filter(|h| !h.is_empty()),
            video_handle: record.video.filter(|h| !h.is_empty()),
        }
    }

    /// Replaces an Unknown declared type with a classifier-derived label.
    pub fn with_detected_type(mut self, label: &str) -> Self {
        if self.declared_type == DeclaredType::Unknown {
            self.declared_type = DeclaredType::from_label(label);
            self.type_label = label.to_string();
        }
        self
    }

    pub fn upload_date(&self) -> Option<NaiveDate> {
        parse_upload_date(&self.upload_date)
    }
}
