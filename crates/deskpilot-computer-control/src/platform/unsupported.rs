use anyhow::Result;
use async_trait::async_trait;

use crate::{
    AutomationError, AxSnapshot, HostAutomation, KeyCombo, Point, ScreenGeometry, Screenshot,
    ScreenshotOptions, ScriptLanguage, ScrollDirection,
};

/// Stand-in for platforms without a host automation backend. Every call
/// fails with [`AutomationError::Unsupported`].
pub struct UnsupportedController {
    platform: String,
}

impl UnsupportedController {
    pub fn new(platform: &str) -> Self {
        tracing::warn!("Host automation is not available on {}", platform);
        Self {
            platform: platform.to_string(),
        }
    }

    fn fail<T>(&self, operation: &str) -> Result<T> {
        Err(AutomationError::Unsupported(format!("{} on {}", operation, self.platform)).into())
    }
}

#[async_trait]
impl HostAutomation for UnsupportedController {
    async fn click(&self, _point: Point) -> Result<()> {
        self.fail("click")
    }

    async fn right_click(&self, _point: Point) -> Result<()> {
        self.fail("right_click")
    }

    async fn double_click(&self, _point: Point) -> Result<()> {
        self.fail("double_click")
    }

    async fn move_mouse(&self, _point: Point) -> Result<()> {
        self.fail("move_mouse")
    }

    async fn drag(&self, _from: Point, _to: Point) -> Result<()> {
        self.fail("drag")
    }

    async fn scroll(&self, _direction: ScrollDirection, _amount: u32) -> Result<()> {
        self.fail("scroll")
    }

    async fn type_text(&self, _text: &str) -> Result<()> {
        self.fail("type_text")
    }

    async fn press_key(&self, _combo: &KeyCombo) -> Result<()> {
        self.fail("press_key")
    }

    async fn focus_application(&self, _name: &str) -> Result<()> {
        self.fail("focus_application")
    }

    async fn run_host_script(&self, _language: ScriptLanguage, _source: &str) -> Result<String> {
        self.fail("run_host_script")
    }

    async fn capture_screenshot(&self, _options: &ScreenshotOptions) -> Result<Screenshot> {
        self.fail("capture_screenshot")
    }

    async fn read_selection(&self, _app: Option<&str>) -> Result<Option<String>> {
        self.fail("read_selection")
    }

    async fn paste_text(&self, _text: &str) -> Result<()> {
        self.fail("paste_text")
    }

    async fn paste_image(&self, _bytes: &[u8]) -> Result<()> {
        self.fail("paste_image")
    }

    async fn frontmost_application(&self) -> Result<Option<String>> {
        self.fail("frontmost_application")
    }

    async fn window_count(&self, _app: &str) -> Result<usize> {
        self.fail("window_count")
    }

    async fn accessibility_snapshot(&self, _app: &str) -> Result<AxSnapshot> {
        self.fail("accessibility_snapshot")
    }

    async fn screen_geometry(&self) -> Result<ScreenGeometry> {
        self.fail("screen_geometry")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_call_reports_unsupported() {
        let controller = UnsupportedController::new("plan9");
        let err = controller.click(Point::new(1, 1)).await.unwrap_err();
        assert!(err.to_string().contains("plan9"));
        assert!(controller.frontmost_application().await.is_err());
    }
}
