//! Host automation backend: the primitives the agent uses to perceive and
//! operate the desktop.

pub mod accessibility;
mod error;
pub mod keys;
pub mod mock;
pub mod platform;
pub mod process;
pub mod types;
pub mod vision;

pub use accessibility::{AxElement, AxSnapshot};
pub use error::{is_timeout, AutomationError};
pub use keys::KeyCombo;
pub use mock::{MockController, RecordedCall};
pub use types::*;
pub use vision::{fit_for_vision, VisionLimits};

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Everything the agent can do to the host desktop. Coordinates are logical
/// screen points. Implementations bound each call with their own timeout.
#[async_trait]
pub trait HostAutomation: Send + Sync {
    async fn click(&self, point: Point) -> Result<()>;
    async fn right_click(&self, point: Point) -> Result<()>;
    async fn double_click(&self, point: Point) -> Result<()>;
    async fn move_mouse(&self, point: Point) -> Result<()>;
    async fn drag(&self, from: Point, to: Point) -> Result<()>;
    async fn scroll(&self, direction: ScrollDirection, amount: u32) -> Result<()>;

    /// Synthesize keystrokes for `text`.
    async fn type_text(&self, text: &str) -> Result<()>;
    async fn press_key(&self, combo: &KeyCombo) -> Result<()>;

    /// Bring an application to the front, launching it if needed.
    async fn focus_application(&self, name: &str) -> Result<()>;

    /// Run a script on the host and return its stdout.
    async fn run_host_script(&self, language: ScriptLanguage, source: &str) -> Result<String>;

    async fn capture_screenshot(&self, options: &ScreenshotOptions) -> Result<Screenshot>;

    /// Text currently selected in `app` (or the frontmost app), if any.
    async fn read_selection(&self, app: Option<&str>) -> Result<Option<String>>;

    /// Insert text in one step through the clipboard.
    async fn paste_text(&self, text: &str) -> Result<()>;
    async fn paste_image(&self, bytes: &[u8]) -> Result<()>;

    async fn frontmost_application(&self) -> Result<Option<String>>;
    async fn window_count(&self, app: &str) -> Result<usize>;
    async fn accessibility_snapshot(&self, app: &str) -> Result<AxSnapshot>;
    async fn screen_geometry(&self) -> Result<ScreenGeometry>;
}

/// Hard limits applied to host calls.
#[derive(Debug, Clone, Copy)]
pub struct HostTimeouts {
    pub action: Duration,
    pub script: Duration,
    pub screenshot: Duration,
}

impl Default for HostTimeouts {
    fn default() -> Self {
        Self {
            action: Duration::from_secs(5),
            script: Duration::from_secs(20),
            screenshot: Duration::from_secs(10),
        }
    }
}

/// Controller for the current platform.
pub fn create_controller(timeouts: HostTimeouts) -> Result<Arc<dyn HostAutomation>> {
    #[cfg(target_os = "macos")]
    return Ok(Arc::new(platform::macos::MacOSController::new(timeouts)));

    #[cfg(not(target_os = "macos"))]
    {
        let _ = timeouts;
        Ok(Arc::new(platform::unsupported::UnsupportedController::new(
            std::env::consts::OS,
        )))
    }
}
