//! Generation job categories and their scheduling characteristics.
//!
//! Each category carries its own concurrency cap; the caps are independent,
//! so a saturated text-to-video queue never delays an enhance job.

use serde::{Deserialize, Serialize};

/// The kind of generation job a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Synthesize a video clip from a text prompt.
    TextToVideo,
    /// Animate an uploaded still image into a clip.
    ImageToVideo,
    /// Upscale / enhance an existing video.
    Enhance,
}

impl Category {
    /// Every category, in a stable order.
    pub const ALL: [Category; 3] = [
        Category::TextToVideo,
        Category::ImageToVideo,
        Category::Enhance,
    ];

    /// Stable string form (matches the serde representation).
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::TextToVideo => "text_to_video",
            Category::ImageToVideo => "image_to_video",
            Category::Enhance => "enhance",
        }
    }

    /// Parse the stable string form. Returns `None` for unknown values.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text_to_video" => Some(Category::TextToVideo),
            "image_to_video" => Some(Category::ImageToVideo),
            "enhance" => Some(Category::Enhance),
            _ => None,
        }
    }

    /// Whether submissions in this category carry a source-file reference.
    pub fn requires_source_file(&self) -> bool {
        matches!(self, Category::ImageToVideo | Category::Enhance)
    }

    /// Default concurrency cap applied until the caller overrides it.
    pub fn default_max_concurrent(&self) -> usize {
        match self {
            Category::TextToVideo => 3,
            Category::ImageToVideo => 3,
            Category::Enhance => 1,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
