//! Job description data model (§3) and the mutable job record owned by the queue (§4.7).

use crate::error::{ClipforgeError, Result};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Low,
    Medium,
    High,
}

impl Default for QualityTier {
    fn default() -> Self {
        QualityTier::Medium
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeMode {
    Fit,
    Fill,
    Stretch,
    Crop,
}

impl Default for ResizeMode {
    fn default() -> Self {
        ResizeMode::Fit
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtitlePosition {
    LeftBottom,
    CenterBottom,
    RightBottom,
    LeftMiddle,
    CenterMiddle,
    RightMiddle,
    LeftTop,
    CenterTop,
    RightTop,
}

impl Default for SubtitlePosition {
    fn default() -> Self {
        SubtitlePosition::CenterBottom
    }
}

impl SubtitlePosition {
    /// ASS alignment code, 1..9 (§4.4).
    pub fn alignment_code(&self) -> u8 {
        match self {
            SubtitlePosition::LeftBottom => 1,
            SubtitlePosition::CenterBottom => 2,
            SubtitlePosition::RightBottom => 3,
            SubtitlePosition::LeftMiddle => 4,
            SubtitlePosition::CenterMiddle => 5,
            SubtitlePosition::RightMiddle => 6,
            SubtitlePosition::LeftTop => 7,
            SubtitlePosition::CenterTop => 8,
            SubtitlePosition::RightTop => 9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleStyle {
    Progressive,
    Classic,
}

impl Default for SubtitleStyle {
    fn default() -> Self {
        SubtitleStyle::Progressive
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtitleSettings {
    pub font_family: String,
    pub font_size: u32,
    pub word_color: String,
    pub line_color: String,
    pub shadow_color: String,
    pub shadow_offset: u32,
    pub outline_color: String,
    pub outline_width: u32,
    pub box_color: String,
    #[serde(default)]
    pub position: SubtitlePosition,
    #[serde(default)]
    pub style: SubtitleStyle,
}

impl Default for SubtitleSettings {
    fn default() -> Self {
        Self {
            font_family: "Arial".to_string(),
            font_size: 42,
            word_color: "#FFFFFF".to_string(),
            line_color: "#FFFFFF".to_string(),
            shadow_color: "#000000".to_string(),
            shadow_offset: 2,
            outline_color: "#000000".to_string(),
            outline_width: 2,
            box_color: "#000000".to_string(),
            position: SubtitlePosition::default(),
            style: SubtitleStyle::default(),
        }
    }
}

/// A single visual/audio element, tagged by kind (§9 design note: avoid one struct with
/// every optional field).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Element {
    Video {
        src: String,
        #[serde(default)]
        x: i32,
        #[serde(default)]
        y: i32,
        #[serde(default)]
        z_index: i32,
        #[serde(default)]
        duration: f64,
        #[serde(default = "default_volume")]
        volume: f64,
        #[serde(default)]
        resize_mode: ResizeMode,
    },
    Audio {
        src: String,
        #[serde(default)]
        duration: f64,
        #[serde(default = "default_volume")]
        volume: f64,
    },
    Image {
        src: String,
        #[serde(default)]
        x: i32,
        #[serde(default)]
        y: i32,
        #[serde(default)]
        z_index: i32,
        #[serde(default)]
        duration: f64,
        #[serde(default)]
        resize_mode: ResizeMode,
    },
    Subtitles {
        #[serde(default)]
        settings: SubtitleSettings,
        #[serde(default)]
        language: Option<String>,
    },
}

fn default_volume() -> f64 {
    1.0
}

impl Element {
    /// Source URL, if this element has one (video/audio/image; subtitles has none).
    pub fn src(&self) -> Option<&str> {
        match self {
            Element::Video { src, .. } => Some(src),
            Element::Audio { src, .. } => Some(src),
            Element::Image { src, .. } => Some(src),
            Element::Subtitles { .. } => None,
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Element::Audio { .. })
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Element::Video { .. })
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Element::Image { .. })
    }

    pub fn is_subtitles(&self) -> bool {
        matches!(self, Element::Subtitles { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,
    #[serde(default)]
    pub background_color: Option<String>,
    #[serde(default)]
    pub elements: Vec<Element>,
}

impl Scene {
    pub fn audio_elements(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter().filter(|e| e.is_audio())
    }

    pub fn image_elements(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter().filter(|e| e.is_image())
    }

    pub fn subtitle_element(&self) -> Option<&Element> {
        self.elements.iter().find(|e| e.is_subtitles())
    }
}

/// Looks up a named resolution (§3: "width/height, or a named resolution") against the common
/// platform presets. Names are case-insensitive.
fn named_resolution(name: &str) -> Option<(u32, u32)> {
    match name.to_ascii_lowercase().as_str() {
        "480p" => Some((854, 480)),
        "720p" | "hd" => Some((1280, 720)),
        "1080p" | "fhd" => Some((1920, 1080)),
        "1440p" | "qhd" => Some((2560, 1440)),
        "4k" | "2160p" | "uhd" => Some((3840, 2160)),
        "square" => Some((1080, 1080)),
        "vertical" | "portrait" | "story" => Some((1080, 1920)),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    /// A named resolution preset (e.g. `"1080p"`, `"vertical"`), used when `width`/`height`
    /// aren't given explicitly. Explicit dimensions take precedence when both are present.
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub quality: QualityTier,
    #[serde(default)]
    pub scenes: Vec<Scene>,
    #[serde(default)]
    pub elements: Vec<Element>,
}

impl Project {
    /// The first global `video` element, per §4.5 step 2.
    pub fn background_video(&self) -> Option<&Element> {
        self.elements.iter().find(|e| e.is_video())
    }

    /// Resolves this project's output dimensions (§3), preferring explicit `width`/`height`
    /// over a named `resolution` preset. `None` means no dimension override was requested (the
    /// encoder keeps the background video's native size). An unrecognized preset name is fatal.
    pub fn resolved_dimensions(&self) -> Result<Option<(u32, u32)>> {
        if let (Some(w), Some(h)) = (self.width, self.height) {
            return Ok(Some((w, h)));
        }
        match &self.resolution {
            Some(name) => named_resolution(name).map(Some).ok_or_else(|| {
                ClipforgeError::InvalidInput(format!("unknown named resolution '{name}'"))
            }),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescription {
    pub projects: Vec<Project>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Mutable record owned exclusively by the job queue (§3, §4.7).
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub description: JobDescription,
    pub artifact_id: Option<String>,
    pub error: Option<String>,
    pub error_code: Option<&'static str>,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
    pub completed_at: Option<SystemTime>,
}

impl JobRecord {
    pub fn new(id: String, description: JobDescription) -> Self {
        let now = SystemTime::now();
        Self {
            id,
            status: JobStatus::Pending,
            progress: 0,
            description,
            artifact_id: None,
            error: None,
            error_code: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}
