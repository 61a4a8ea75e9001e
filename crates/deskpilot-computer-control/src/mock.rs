//! Scriptable in-memory [`HostAutomation`] for tests.
//!
//! Records every call and answers queries from configured state, so agent and
//! sequencer tests can run without a desktop.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::{
    AxSnapshot, HostAutomation, KeyCombo, Point, Rect, ScreenGeometry, Screenshot, ScreenshotOptions,
    ScriptLanguage, ScrollDirection,
};

/// One call made against a [`MockController`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Click(Point),
    RightClick(Point),
    DoubleClick(Point),
    MoveMouse(Point),
    Drag(Point, Point),
    Scroll(ScrollDirection, u32),
    TypeText(String),
    PressKey(String),
    FocusApplication(String),
    RunScript(ScriptLanguage, String),
    CaptureScreenshot(Option<String>),
    ReadSelection(Option<String>),
    PasteText(String),
    PasteImage(usize),
    FrontmostApplication,
    WindowCount(String),
    AccessibilitySnapshot(String),
    ScreenGeometry,
}

impl RecordedCall {
    /// Operation name, as used by [`MockController::fail_on`].
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Click(_) => "click",
            Self::RightClick(_) => "right_click",
            Self::DoubleClick(_) => "double_click",
            Self::MoveMouse(_) => "move_mouse",
            Self::Drag(..) => "drag",
            Self::Scroll(..) => "scroll",
            Self::TypeText(_) => "type_text",
            Self::PressKey(_) => "press_key",
            Self::FocusApplication(_) => "focus_application",
            Self::RunScript(..) => "run_host_script",
            Self::CaptureScreenshot(_) => "capture_screenshot",
            Self::ReadSelection(_) => "read_selection",
            Self::PasteText(_) => "paste_text",
            Self::PasteImage(_) => "paste_image",
            Self::FrontmostApplication => "frontmost_application",
            Self::WindowCount(_) => "window_count",
            Self::AccessibilitySnapshot(_) => "accessibility_snapshot",
            Self::ScreenGeometry => "screen_geometry",
        }
    }

    /// Whether this call changes the desktop rather than reading it.
    pub fn is_action(&self) -> bool {
        !matches!(
            self,
            Self::CaptureScreenshot(_)
                | Self::ReadSelection(_)
                | Self::FrontmostApplication
                | Self::WindowCount(_)
                | Self::AccessibilitySnapshot(_)
                | Self::ScreenGeometry
        )
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct MockController {
    calls: Mutex<Vec<RecordedCall>>,
    frontmost: Mutex<Option<String>>,
    window_counts: Mutex<VecDeque<usize>>,
    snapshots: Mutex<HashMap<String, AxSnapshot>>,
    scripts: Mutex<Vec<(String, std::result::Result<String, String>)>>,
    selection: Mutex<Option<String>>,
    screenshot: Screenshot,
    geometry: ScreenGeometry,
    window_bounds: Option<Rect>,
    failing: Mutex<HashSet<String>>,
    latency: Option<Duration>,
}

impl Default for MockController {
    fn default() -> Self {
        Self::new()
    }
}

impl MockController {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            frontmost: Mutex::new(None),
            window_counts: Mutex::new(VecDeque::from([1])),
            snapshots: Mutex::new(HashMap::new()),
            scripts: Mutex::new(Vec::new()),
            selection: Mutex::new(None),
            screenshot: Screenshot {
                data: "bW9jaw==".to_string(),
                media_type: "image/jpeg".to_string(),
                width: 1456,
                height: 816,
                original_width: 2880,
                original_height: 1620,
                region: None,
            },
            geometry: ScreenGeometry::new(1440, 810, 2.0),
            window_bounds: None,
            failing: Mutex::new(HashSet::new()),
            latency: None,
        }
    }

    pub fn with_frontmost(self, app: &str) -> Self {
        *lock(&self.frontmost) = Some(app.to_string());
        self
    }

    /// Successive `window_count` answers; the last one repeats.
    pub fn with_window_counts(self, counts: Vec<usize>) -> Self {
        *lock(&self.window_counts) = counts.into();
        self
    }

    pub fn with_snapshot(self, snapshot: AxSnapshot) -> Self {
        lock(&self.snapshots).insert(snapshot.app.clone(), snapshot);
        self
    }

    /// Answer scripts containing `needle` with `output`.
    pub fn with_script_response(self, needle: &str, output: &str) -> Self {
        lock(&self.scripts).push((needle.to_string(), Ok(output.to_string())));
        self
    }

    /// Fail scripts containing `needle` with `message`.
    pub fn with_script_error(self, needle: &str, message: &str) -> Self {
        lock(&self.scripts).push((needle.to_string(), Err(message.to_string())));
        self
    }

    pub fn with_selection(self, text: &str) -> Self {
        *lock(&self.selection) = Some(text.to_string());
        self
    }

    pub fn with_screenshot(mut self, screenshot: Screenshot) -> Self {
        self.screenshot = screenshot;
        self
    }

    /// Bounds reported for an application's front window; screenshots
    /// taken with `app` set carry them as their region.
    pub fn with_window_bounds(mut self, bounds: Rect) -> Self {
        self.window_bounds = Some(bounds);
        self
    }

    pub fn with_geometry(mut self, geometry: ScreenGeometry) -> Self {
        self.geometry = geometry;
        self
    }

    /// Delay every call, for timeout and cancellation tests.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make `operation` (see [`RecordedCall::operation`]) fail.
    pub fn fail_on(self, operation: &str) -> Self {
        lock(&self.failing).insert(operation.to_string());
        self
    }

    pub fn set_frontmost(&self, app: Option<&str>) {
        *lock(&self.frontmost) = app.map(str::to_string);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Calls that changed the desktop, in order.
    pub fn actions(&self) -> Vec<RecordedCall> {
        self.calls().into_iter().filter(RecordedCall::is_action).collect()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.operation() == operation)
            .count()
    }

    async fn record(&self, call: RecordedCall) -> Result<()> {
        let operation = call.operation();
        lock(&self.calls).push(call);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if lock(&self.failing).contains(operation) {
            return Err(anyhow!("mock {} failure", operation));
        }
        Ok(())
    }
}

#[async_trait]
impl HostAutomation for MockController {
    async fn click(&self, point: Point) -> Result<()> {
        self.record(RecordedCall::Click(point)).await
    }

    async fn right_click(&self, point: Point) -> Result<()> {
        self.record(RecordedCall::RightClick(point)).await
    }

    async fn double_click(&self, point: Point) -> Result<()> {
        self.record(RecordedCall::DoubleClick(point)).await
    }

    async fn move_mouse(&self, point: Point) -> Result<()> {
        self.record(RecordedCall::MoveMouse(point)).await
    }

    async fn drag(&self, from: Point, to: Point) -> Result<()> {
        self.record(RecordedCall::Drag(from, to)).await
    }

    async fn scroll(&self, direction: ScrollDirection, amount: u32) -> Result<()> {
        self.record(RecordedCall::Scroll(direction, amount)).await
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        self.record(RecordedCall::TypeText(text.to_string())).await
    }

    async fn press_key(&self, combo: &KeyCombo) -> Result<()> {
        self.record(RecordedCall::PressKey(combo.to_string())).await
    }

    async fn focus_application(&self, name: &str) -> Result<()> {
        self.record(RecordedCall::FocusApplication(name.to_string()))
            .await?;
        self.set_frontmost(Some(name));
        Ok(())
    }

    async fn run_host_script(&self, language: ScriptLanguage, source: &str) -> Result<String> {
        self.record(RecordedCall::RunScript(language, source.to_string()))
            .await?;
        let scripts = lock(&self.scripts);
        match scripts.iter().find(|(needle, _)| source.contains(needle.as_str())) {
            Some((_, Ok(output))) => Ok(output.clone()),
            Some((_, Err(message))) => Err(anyhow!("{}", message)),
            None => Ok(String::new()),
        }
    }

    async fn capture_screenshot(&self, options: &ScreenshotOptions) -> Result<Screenshot> {
        self.record(RecordedCall::CaptureScreenshot(options.app.clone()))
            .await?;
        let mut screenshot = self.screenshot.clone();
        let window = options.app.as_ref().and(self.window_bounds);
        if let Some(region) = options.region.or(window) {
            screenshot.region = Some(region);
        }
        Ok(screenshot)
    }

    async fn read_selection(&self, app: Option<&str>) -> Result<Option<String>> {
        self.record(RecordedCall::ReadSelection(app.map(str::to_string)))
            .await?;
        Ok(lock(&self.selection).clone())
    }

    async fn paste_text(&self, text: &str) -> Result<()> {
        self.record(RecordedCall::PasteText(text.to_string())).await
    }

    async fn paste_image(&self, bytes: &[u8]) -> Result<()> {
        self.record(RecordedCall::PasteImage(bytes.len())).await
    }

    async fn frontmost_application(&self) -> Result<Option<String>> {
        self.record(RecordedCall::FrontmostApplication).await?;
        Ok(lock(&self.frontmost).clone())
    }

    async fn window_count(&self, app: &str) -> Result<usize> {
        self.record(RecordedCall::WindowCount(app.to_string()))
            .await?;
        let mut counts = lock(&self.window_counts);
        let count = if counts.len() > 1 {
            counts.pop_front()
        } else {
            counts.front().copied()
        };
        Ok(count.unwrap_or(0))
    }

    async fn accessibility_snapshot(&self, app: &str) -> Result<AxSnapshot> {
        self.record(RecordedCall::AccessibilitySnapshot(app.to_string()))
            .await?;
        Ok(lock(&self.snapshots)
            .get(app)
            .cloned()
            .unwrap_or_else(|| AxSnapshot {
                app: app.to_string(),
                elements: Vec::new(),
            }))
    }

    async fn screen_geometry(&self) -> Result<ScreenGeometry> {
        self.record(RecordedCall::ScreenGeometry).await?;
        Ok(self.geometry)
    }
}
