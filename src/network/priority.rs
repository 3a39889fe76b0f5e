//! Request priorities
//!
//! Maps the small request-facing ordinal onto the engine's priority scale,
//! with resource-type defaults similar to Chromium's resource scheduling.

use serde::Deserialize;

/// Request priority as seen by the application. Config documents give it
/// as its ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Deserialize)]
#[serde(try_from = "u8")]
pub enum RequestPriority {
    /// Prefetch and other work that can wait
    Idle = 0,
    Lowest = 1,
    Low = 2,
    #[default]
    Medium = 3,
    Highest = 4,
}

/// Engine-side priority levels. `Throttled` is never requested by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EnginePriority {
    Throttled = 0,
    Idle = 1,
    Lowest = 2,
    Low = 3,
    Medium = 4,
    Highest = 5,
}

impl RequestPriority {
    /// Engine priority this request priority maps to
    pub fn to_engine(self) -> EnginePriority {
        match self {
            Self::Idle => EnginePriority::Idle,
            Self::Lowest => EnginePriority::Lowest,
            Self::Low => EnginePriority::Low,
            Self::Medium => EnginePriority::Medium,
            Self::Highest => EnginePriority::Highest,
        }
    }

    /// Parse the ordinal form used by [`ContextConfig`](super::context::ContextConfig)
    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(Self::Idle),
            1 => Some(Self::Lowest),
            2 => Some(Self::Low),
            3 => Some(Self::Medium),
            4 => Some(Self::Highest),
            _ => None,
        }
    }
}

impl TryFrom<u8> for RequestPriority {
    type Error = String;

    fn try_from(ordinal: u8) -> Result<Self, Self::Error> {
        Self::from_ordinal(ordinal).ok_or_else(|| format!("invalid request priority {}", ordinal))
    }
}

impl EnginePriority {
    /// Urgency for the HTTP `Priority` header, 0 most urgent
    pub fn urgency(self) -> u8 {
        match self {
            Self::Highest => 0,
            Self::Medium => 3,
            Self::Low => 4,
            Self::Lowest => 5,
            Self::Idle => 6,
            Self::Throttled => 7,
        }
    }
}

/// Resource type used to pick a default priority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    /// Main HTML document
    Document,
    /// CSS stylesheet (render blocking)
    Stylesheet,
    Script,
    Font,
    Image,
    Media,
    /// XMLHttpRequest/Fetch
    Xhr,
    /// Speculative fetch
    Prefetch,
    Other,
}

impl ResourceType {
    /// Get default priority for resource type
    pub fn default_priority(&self) -> RequestPriority {
        match self {
            Self::Document | Self::Stylesheet => RequestPriority::Highest,
            Self::Font | Self::Script | Self::Xhr => RequestPriority::Medium,
            Self::Image | Self::Other => RequestPriority::Low,
            Self::Media => RequestPriority::Lowest,
            Self::Prefetch => RequestPriority::Idle,
        }
    }

    /// Guess the resource type from the URL path extension
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
        let ext = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");

        match ext {
            "html" | "htm" => Self::Document,
            "css" => Self::Stylesheet,
            "js" | "mjs" => Self::Script,
            "woff2" | "woff" | "ttf" | "otf" => Self::Font,
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "svg" => Self::Image,
            "mp4" | "webm" | "mp3" | "ogg" => Self::Media,
            _ => Self::Other,
        }
    }
}
