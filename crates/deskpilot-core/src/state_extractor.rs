//! Tiered acquisition of the focused application's state.
//!
//! Tiers are tried in fixed priority order and each failure falls through
//! quietly to the next one:
//! 1. `browser_script` - probe script injected into the active browser tab
//! 2. `structured_scripting` - the app's scripting dictionary
//! 3. `accessibility_tree` - the app's accessibility tree, if informative
//! 4. `screenshot` - always available; a capture failure ends the run

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use deskpilot_computer_control::{
    app_names_match, process::with_timeout, HostAutomation, ScreenshotOptions, Screenshot,
    ScriptLanguage, VisionLimits,
};
use deskpilot_config::ExtractionConfig;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Marker structured-scripting output starts with when the script failed.
pub const SCRIPT_ERROR_MARKER: &str = "DESKPILOT_ERROR:";

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("screenshot capture failed: {0:#}")]
    Capture(anyhow::Error),
}

/// Snapshot of the focused application, replaced after every tool round.
#[derive(Debug, Clone)]
pub struct AppState {
    pub tier: u8,
    pub method: &'static str,
    pub app: Option<String>,
    pub formatted: String,
    pub raw: Option<Value>,
    pub screenshot: Option<Screenshot>,
    /// Tiers tried, in order, including the one that succeeded
    pub attempted_tiers: Vec<u8>,
}

pub struct StateExtractor {
    host: Arc<dyn HostAutomation>,
    config: ExtractionConfig,
    limits: VisionLimits,
    script_timeout: Duration,
    screenshot_timeout: Duration,
}

struct TierOutput {
    formatted: String,
    raw: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct BrowserProbe {
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    elements: Vec<BrowserElement>,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct BrowserElement {
    #[serde(default)]
    tag: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    href: Option<String>,
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
}

impl StateExtractor {
    pub fn new(
        host: Arc<dyn HostAutomation>,
        config: ExtractionConfig,
        limits: VisionLimits,
        script_timeout: Duration,
        screenshot_timeout: Duration,
    ) -> Self {
        Self {
            host,
            config,
            limits,
            script_timeout,
            screenshot_timeout,
        }
    }

    /// Describe `target_app` (or the frontmost app). `selection_hint` is
    /// text the user had selected and is appended to the description.
    pub async fn extract(
        &self,
        target_app: Option<&str>,
        selection_hint: Option<&str>,
    ) -> Result<AppState, ExtractionError> {
        let app = match target_app {
            Some(app) => Some(app.to_string()),
            None => self.host.frontmost_application().await.unwrap_or_else(|e| {
                debug!("Could not determine frontmost application: {}", e);
                None
            }),
        };

        let mut attempted = Vec::new();
        let mut result: Option<(u8, &'static str, TierOutput)> = None;

        if let Some(ref app) = app {
            if self.is_browser(app) {
                attempted.push(1);
                match self.browser_tier(app).await {
                    Ok(output) => result = Some((1, "browser_script", output)),
                    Err(e) => debug!("Tier 1 rejected for {}: {:#}", app, e),
                }
            }

            if result.is_none() && self.is_scriptable(app) {
                attempted.push(2);
                match self.scripting_tier(app).await {
                    Ok(output) => result = Some((2, "structured_scripting", output)),
                    Err(e) => debug!("Tier 2 rejected for {}: {:#}", app, e),
                }
            }
        }

        if result.is_none() {
            attempted.push(3);
            match self.accessibility_tier(app.as_deref()).await {
                Ok(output) => result = Some((3, "accessibility_tree", output)),
                Err(e) => debug!("Tier 3 rejected: {:#}", e),
            }
        }

        let (tier, method, output, screenshot) = match result {
            Some((tier, method, output)) => (tier, method, output, None),
            None => {
                attempted.push(4);
                let screenshot = self.capture().await.map_err(ExtractionError::Capture)?;
                let output = TierOutput {
                    formatted: format!(
                        "Screenshot of the screen attached ({}x{}).",
                        screenshot.width, screenshot.height
                    ),
                    raw: None,
                };
                (4, "screenshot", output, Some(screenshot))
            }
        };

        debug!("State extracted via tier {} ({}), attempted {:?}", tier, method, attempted);

        let mut formatted = match app {
            Some(ref app) => format!("Application: {}\n{}", app, output.formatted),
            None => output.formatted,
        };
        if let Some(selection) = selection_hint.filter(|s| !s.trim().is_empty()) {
            formatted.push_str("\n\nSelected text:\n");
            formatted.push_str(selection);
        }

        Ok(AppState {
            tier,
            method,
            app,
            formatted: truncate_chars(&formatted, self.config.max_formatted_chars),
            raw: output.raw,
            screenshot,
            attempted_tiers: attempted,
        })
    }

    /// Full-screen capture sized for the vision model.
    pub async fn capture(&self) -> Result<Screenshot> {
        let options = ScreenshotOptions {
            app: None,
            region: None,
            limits: self.limits,
        };
        with_timeout(
            "screenshot",
            self.screenshot_timeout,
            self.host.capture_screenshot(&options),
        )
        .await
    }

    fn is_browser(&self, app: &str) -> bool {
        self.config.browsers.iter().any(|b| app_names_match(b, app))
    }

    fn is_scriptable(&self, app: &str) -> bool {
        self.config.scriptable_apps.iter().any(|a| app_names_match(a, app))
    }

    async fn run_script(&self, language: ScriptLanguage, source: &str) -> Result<String> {
        with_timeout(
            "state script",
            self.script_timeout,
            self.host.run_host_script(language, source),
        )
        .await
    }

    async fn browser_tier(&self, app: &str) -> Result<TierOutput> {
        let out = self
            .run_script(ScriptLanguage::AppleScript, &browser_probe_script(app))
            .await?;
        let raw: Value = serde_json::from_str(out.trim())?;
        let probe: BrowserProbe = serde_json::from_value(raw.clone())?;
        if probe.elements.is_empty() {
            return Err(anyhow!("probe returned no interactive elements"));
        }

        let mut formatted = format!("Page: {} ({})\nInteractive elements:\n", probe.title, probe.url);
        for (i, el) in probe.elements.iter().enumerate() {
            formatted.push_str(&format!(
                "[{}] <{}> \"{}\" @({:.0},{:.0})",
                i + 1,
                el.tag,
                el.text.trim(),
                el.x,
                el.y
            ));
            if let Some(ref href) = el.href {
                formatted.push_str(&format!(" -> {}", href));
            }
            formatted.push('\n');
        }
        if !probe.text.trim().is_empty() {
            formatted.push_str("Page text:\n");
            formatted.push_str(probe.text.trim());
        }

        Ok(TierOutput {
            formatted,
            raw: Some(raw),
        })
    }

    async fn scripting_tier(&self, app: &str) -> Result<TierOutput> {
        let out = self
            .run_script(ScriptLanguage::AppleScript, &scripting_probe_script(app))
            .await?;
        if out.contains(SCRIPT_ERROR_MARKER) {
            return Err(anyhow!("{}", out.trim()));
        }
        if out.trim().is_empty() {
            return Err(anyhow!("scripting dictionary returned nothing"));
        }
        Ok(TierOutput {
            formatted: out.trim().to_string(),
            raw: Some(Value::String(out)),
        })
    }

    async fn accessibility_tier(&self, app: Option<&str>) -> Result<TierOutput> {
        let app = app.ok_or_else(|| anyhow!("no application to inspect"))?;
        let snapshot = with_timeout(
            "accessibility snapshot",
            self.script_timeout,
            self.host.accessibility_snapshot(app),
        )
        .await?;

        if !snapshot.is_useful(self.config.min_ax_elements, self.config.min_ax_text_chars) {
            return Err(anyhow!(
                "accessibility tree too sparse ({} elements, {} chars)",
                snapshot.elements.len(),
                snapshot.total_text_chars()
            ));
        }

        Ok(TierOutput {
            formatted: snapshot.format(),
            raw: serde_json::to_value(&snapshot).ok(),
        })
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}\n... (truncated)", &text[..idx]),
        None => text.to_string(),
    }
}

const PAGE_PROBE_JS: &str = r#"(function(){var els=[].slice.call(document.querySelectorAll('a,button,input,select,textarea,[role=button],[onclick]')).filter(function(e){var r=e.getBoundingClientRect();return r.width>0&&r.height>0;}).slice(0,150).map(function(e){var r=e.getBoundingClientRect();return {tag:e.tagName.toLowerCase(),text:(e.innerText||e.value||e.getAttribute('aria-label')||e.placeholder||'').slice(0,80),href:e.href||null,x:r.left+r.width/2,y:r.top+r.height/2};});return JSON.stringify({url:location.href,title:document.title,elements:els,text:(document.body?document.body.innerText:'').slice(0,4000)});})()"#;

/// AppleScript that runs the page probe in the browser's active tab.
fn browser_probe_script(app: &str) -> String {
    let js = PAGE_PROBE_JS.replace('\\', "\\\\").replace('"', "\\\"");
    if app_names_match(app, "Safari") {
        format!("tell application \"Safari\" to do JavaScript \"{}\" in front document", js)
    } else {
        format!(
            "tell application \"{}\" to execute front window's active tab javascript \"{}\"",
            app, js
        )
    }
}

/// AppleScript summarising the app's front document or selection through
/// its scripting dictionary.
fn scripting_probe_script(app: &str) -> String {
    let body = if app_names_match(app, "Finder") {
        "set out to \"Folder: \" & (POSIX path of (target of front Finder window as alias))\n\
         repeat with f in (selection as alias list)\n\
         set out to out & linefeed & \"Selected: \" & (POSIX path of f)\n\
         end repeat\n\
         return out"
            .to_string()
    } else if app_names_match(app, "Mail") {
        "set out to \"\"\n\
         repeat with m in (selection as list)\n\
         set out to out & \"From: \" & (sender of m) & linefeed & \"Subject: \" & (subject of m) & linefeed & (content of m) & linefeed\n\
         end repeat\n\
         return out"
            .to_string()
    } else {
        "set doc to front document\n\
         set out to \"Document: \" & (name of doc)\n\
         try\n\
         set out to out & linefeed & (text of doc)\n\
         end try\n\
         return out"
            .to_string()
    };

    format!(
        "tell application \"{app}\"\ntry\n{body}\non error errMsg\nreturn \"{marker}\" & errMsg\nend try\nend tell",
        app = app,
        body = body,
        marker = SCRIPT_ERROR_MARKER
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskpilot_computer_control::{AxElement, AxSnapshot, MockController, RecordedCall};

    fn extractor(host: Arc<MockController>) -> StateExtractor {
        StateExtractor::new(
            host,
            ExtractionConfig::default(),
            VisionLimits::default(),
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
    }

    fn rich_snapshot(app: &str) -> AxSnapshot {
        AxSnapshot {
            app: app.to_string(),
            elements: (0..6).map(|i| AxElement::new("AXButton").with_title(&format!("b{}", i))).collect(),
        }
    }

    #[tokio::test]
    async fn test_browser_probe_with_elements_wins_tier_one() {
        let host = Arc::new(MockController::new().with_frontmost("Safari").with_script_response(
            "do JavaScript",
            r#"{"url":"https://example.com","title":"Example","elements":[{"tag":"a","text":"More","x":10,"y":20}]}"#,
        ));
        let state = extractor(host).extract(None, None).await.unwrap();

        assert_eq!(state.tier, 1);
        assert_eq!(state.method, "browser_script");
        assert_eq!(state.attempted_tiers, vec![1]);
        assert!(state.formatted.contains("[1] <a> \"More\""));
        assert!(state.raw.is_some());
    }

    #[tokio::test]
    async fn test_scriptable_app_error_marker_falls_to_accessibility() {
        let host = Arc::new(
            MockController::new()
                .with_frontmost("Notes")
                .with_script_response("front document", "DESKPILOT_ERROR: no document")
                .with_snapshot(rich_snapshot("Notes")),
        );
        let state = extractor(host).extract(None, Some("hello")).await.unwrap();

        assert_eq!(state.tier, 3);
        assert_eq!(state.attempted_tiers, vec![2, 3]);
        assert!(state.formatted.ends_with("Selected text:\nhello"));
    }

    #[tokio::test]
    async fn test_unknown_app_with_sparse_tree_uses_screenshot() {
        let host = Arc::new(MockController::new().with_frontmost("Figma"));
        let state = extractor(host.clone()).extract(None, None).await.unwrap();

        assert_eq!(state.tier, 4);
        assert_eq!(state.method, "screenshot");
        assert_eq!(state.attempted_tiers, vec![3, 4]);
        assert!(state.screenshot.is_some());
        assert_eq!(host.call_count("capture_screenshot"), 1);
    }

    #[tokio::test]
    async fn test_screenshot_failure_is_fatal() {
        let host = Arc::new(MockController::new().fail_on("capture_screenshot"));
        let err = extractor(host).extract(Some("Figma"), None).await.unwrap_err();
        assert!(err.to_string().contains("screenshot capture failed"));
    }

    #[tokio::test]
    async fn test_target_app_skips_frontmost_lookup() {
        let host = Arc::new(MockController::new().with_snapshot(rich_snapshot("Xcode")));
        let state = extractor(host.clone()).extract(Some("Xcode"), None).await.unwrap();
        assert_eq!(state.tier, 3);
        assert!(!host.calls().contains(&RecordedCall::FrontmostApplication));
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abc", 5), "abc");
        assert_eq!(truncate_chars("héllo", 2), "hé\n... (truncated)");
    }

    #[test]
    fn test_probe_scripts_escape_and_mark_errors() {
        let safari = browser_probe_script("Safari");
        assert!(safari.starts_with("tell application \"Safari\" to do JavaScript"));
        assert!(safari.contains("querySelectorAll"));
        let chrome = browser_probe_script("Google Chrome");
        assert!(chrome.contains("active tab javascript"));

        let notes = scripting_probe_script("Notes");
        assert!(notes.contains(SCRIPT_ERROR_MARKER));
        assert!(notes.contains("front document"));
    }
}
