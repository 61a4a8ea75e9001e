use serde::{Deserialize, Serialize};

use crate::vision::VisionLimits;

/// A point in logical screen coordinates (origin top-left).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Main display geometry. `width`/`height` are logical points; native
/// pixels are logical × `scale_factor` (2.0 on Retina panels).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenGeometry {
    pub width: u32,
    pub height: u32,
    pub scale_factor: f64,
}

impl ScreenGeometry {
    pub fn new(width: u32, height: u32, scale_factor: f64) -> Self {
        Self {
            width,
            height,
            scale_factor,
        }
    }

    pub fn native_width(&self) -> u32 {
        (self.width as f64 * self.scale_factor).round() as u32
    }

    pub fn native_height(&self) -> u32 {
        (self.height as f64 * self.scale_factor).round() as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl std::str::FromStr for ScrollDirection {
    type Err = crate::AutomationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            other => Err(crate::AutomationError::InvalidInput(format!(
                "unknown scroll direction '{}'",
                other
            ))),
        }
    }
}

/// Language of a script handed to `run_host_script`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptLanguage {
    #[default]
    AppleScript,
    JavaScript,
}

#[derive(Debug, Clone, Default)]
pub struct ScreenshotOptions {
    /// Capture only this application's front window
    pub app: Option<String>,
    pub region: Option<Rect>,
    pub limits: VisionLimits,
}

/// A screenshot ready to send to a vision model.
#[derive(Debug, Clone, PartialEq)]
pub struct Screenshot {
    /// Base64-encoded image bytes
    pub data: String,
    pub media_type: String,
    /// Dimensions of the encoded image
    pub width: u32,
    pub height: u32,
    /// Dimensions of the capture before resizing
    pub original_width: u32,
    pub original_height: u32,
    /// Screen area captured, in logical points; `None` for the whole screen
    pub region: Option<Rect>,
}

impl Screenshot {
    pub fn was_resized(&self) -> bool {
        self.width != self.original_width || self.height != self.original_height
    }
}

/// Case-insensitive application name comparison that ignores spaces, so
/// "Goose Studio" matches "GooseStudio" but not "Goose".
pub fn app_names_match(a: &str, b: &str) -> bool {
    let normalize = |s: &str| s.to_lowercase().replace(' ', "");
    normalize(a.trim()) == normalize(b.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_name_matching() {
        let cases = [
            ("Goose Studio", "GooseStudio", true),
            ("google chrome", "Google Chrome", true),
            ("Safari", "Safari", true),
            ("Goose", "GooseStudio", false),
            ("Code", "Visual Studio Code", false),
        ];
        for (a, b, expected) in cases {
            assert_eq!(app_names_match(a, b), expected, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_native_dimensions_follow_scale_factor() {
        let geometry = ScreenGeometry::new(1440, 900, 2.0);
        assert_eq!(geometry.native_width(), 2880);
        assert_eq!(geometry.native_height(), 1800);
    }

    #[test]
    fn test_scroll_direction_parse() {
        assert_eq!("Down".parse::<ScrollDirection>().unwrap(), ScrollDirection::Down);
        assert!("sideways".parse::<ScrollDirection>().is_err());
    }
}
