//! macOS backend built on `osascript`, `screencapture` and the pasteboard
//! tools. Mouse and scroll events go through JXA's ObjC bridge to CGEvent so
//! no native bindings are linked.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::keys::{escape_applescript, KeyCombo};
use crate::process::run_command;
use crate::vision::prepare_for_vision;
use crate::{
    AutomationError, AxSnapshot, HostAutomation, HostTimeouts, Point, Rect, ScreenGeometry,
    Screenshot, ScreenshotOptions, ScriptLanguage, ScrollDirection,
};

/// Maximum depth and element count of the accessibility walk.
const AX_MAX_DEPTH: usize = 12;
const AX_MAX_ELEMENTS: usize = 400;

/// Time the target app gets to read the pasteboard before it is restored.
const PASTE_SETTLE: Duration = Duration::from_millis(150);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MouseButton {
    Left,
    Right,
}

pub struct MacOSController {
    timeouts: HostTimeouts,
}

impl MacOSController {
    pub fn new(timeouts: HostTimeouts) -> Self {
        info!("Initialized macOS controller (osascript backend)");
        Self { timeouts }
    }

    async fn osascript(&self, language: ScriptLanguage, source: &str, limit: Duration) -> Result<String> {
        let lang = match language {
            ScriptLanguage::AppleScript => "AppleScript",
            ScriptLanguage::JavaScript => "JavaScript",
        };
        let output = run_command("osascript", &["-l", lang, "-"], Some(source.as_bytes()), limit).await?;
        Ok(output.stdout)
    }

    async fn applescript(&self, source: &str) -> Result<String> {
        self.osascript(ScriptLanguage::AppleScript, source, self.timeouts.action)
            .await
    }

    async fn jxa(&self, source: &str) -> Result<String> {
        self.osascript(ScriptLanguage::JavaScript, source, self.timeouts.action)
            .await
    }

    async fn clipboard_text(&self) -> Result<String> {
        Ok(run_command("pbpaste", &[], None, self.timeouts.action).await?.stdout)
    }

    async fn set_clipboard_text(&self, text: &str) -> Result<()> {
        run_command("pbcopy", &[], Some(text.as_bytes()), self.timeouts.action).await?;
        Ok(())
    }

    async fn press_paste(&self) -> Result<()> {
        let combo = KeyCombo::parse("cmd+v")?;
        self.press_key(&combo).await
    }

    /// Bounds of `app`'s front window, used to crop screenshots.
    async fn front_window_bounds(&self, app: &str) -> Result<Option<Rect>> {
        let out = self.applescript(&window_bounds_script(app)).await?;
        Ok(parse_bounds(&out))
    }
}

#[async_trait]
impl HostAutomation for MacOSController {
    async fn click(&self, point: Point) -> Result<()> {
        debug!("click at ({}, {})", point.x, point.y);
        self.jxa(&mouse_click_script(point, MouseButton::Left, 1)).await?;
        Ok(())
    }

    async fn right_click(&self, point: Point) -> Result<()> {
        self.jxa(&mouse_click_script(point, MouseButton::Right, 1)).await?;
        Ok(())
    }

    async fn double_click(&self, point: Point) -> Result<()> {
        self.jxa(&mouse_click_script(point, MouseButton::Left, 2)).await?;
        Ok(())
    }

    async fn move_mouse(&self, point: Point) -> Result<()> {
        self.jxa(&mouse_move_script(point)).await?;
        Ok(())
    }

    async fn drag(&self, from: Point, to: Point) -> Result<()> {
        self.jxa(&drag_script(from, to)).await?;
        Ok(())
    }

    async fn scroll(&self, direction: ScrollDirection, amount: u32) -> Result<()> {
        self.jxa(&scroll_script(direction, amount)).await?;
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        // Typing is slow, so allow roughly the script budget
        self.osascript(
            ScriptLanguage::AppleScript,
            &type_text_script(text),
            self.timeouts.script,
        )
        .await?;
        Ok(())
    }

    async fn press_key(&self, combo: &KeyCombo) -> Result<()> {
        debug!("press {}", combo);
        self.applescript(&format!(
            "tell application \"System Events\" to {}",
            combo.to_applescript()
        ))
        .await?;
        Ok(())
    }

    async fn focus_application(&self, name: &str) -> Result<()> {
        self.applescript(&format!(
            "tell application \"{}\" to activate",
            escape_applescript(name)
        ))
        .await
        .with_context(|| format!("Failed to focus {}", name))?;
        Ok(())
    }

    async fn run_host_script(&self, language: ScriptLanguage, source: &str) -> Result<String> {
        self.osascript(language, source, self.timeouts.script).await
    }

    async fn capture_screenshot(&self, options: &ScreenshotOptions) -> Result<Screenshot> {
        let region = match (&options.region, &options.app) {
            (Some(region), _) => Some(*region),
            (None, Some(app)) => self.front_window_bounds(app).await.unwrap_or_else(|e| {
                warn!("Could not read window bounds for {}: {}", app, e);
                None
            }),
            (None, None) => None,
        };

        let path = std::env::temp_dir().join(format!("deskpilot-{}.png", uuid::Uuid::new_v4()));
        let path_str = path.to_string_lossy().to_string();
        let region_arg = region.map(|r| format!("{},{},{},{}", r.x, r.y, r.width, r.height));

        let mut args = vec!["-x", "-t", "png"];
        if let Some(ref r) = region_arg {
            args.push("-R");
            args.push(r);
        }
        args.push(&path_str);

        let captured = run_command("screencapture", &args, None, self.timeouts.screenshot).await;
        let bytes = captured.map_err(anyhow::Error::from).and_then(|_| {
            std::fs::read(&path).with_context(|| format!("Failed to read {}", path_str))
        });
        let _ = std::fs::remove_file(&path);

        let mut screenshot = prepare_for_vision(&bytes?, options.limits)?;
        screenshot.region = region;
        debug!(
            "screenshot {}x{} (captured {}x{})",
            screenshot.width, screenshot.height, screenshot.original_width, screenshot.original_height
        );
        Ok(screenshot)
    }

    async fn read_selection(&self, app: Option<&str>) -> Result<Option<String>> {
        let out = self.applescript(&selection_script(app)).await?;
        Ok(if out.trim().is_empty() { None } else { Some(out) })
    }

    async fn paste_text(&self, text: &str) -> Result<()> {
        let saved = self.clipboard_text().await.ok();
        self.set_clipboard_text(text).await?;
        self.press_paste().await?;
        tokio::time::sleep(PASTE_SETTLE).await;
        if let Some(previous) = saved {
            if let Err(e) = self.set_clipboard_text(&previous).await {
                warn!("Failed to restore clipboard: {}", e);
            }
        }
        Ok(())
    }

    async fn paste_image(&self, bytes: &[u8]) -> Result<()> {
        let path = std::env::temp_dir().join(format!("deskpilot-paste-{}.png", uuid::Uuid::new_v4()));
        std::fs::write(&path, bytes)?;
        let result = self
            .applescript(&format!(
                "set the clipboard to (read (POSIX file \"{}\") as «class PNGf»)",
                escape_applescript(&path.to_string_lossy())
            ))
            .await;
        let _ = std::fs::remove_file(&path);
        result?;
        self.press_paste().await
    }

    async fn frontmost_application(&self) -> Result<Option<String>> {
        let out = self
            .applescript(
                "tell application \"System Events\" to get name of first application process whose frontmost is true",
            )
            .await?;
        Ok(if out.is_empty() { None } else { Some(out) })
    }

    async fn window_count(&self, app: &str) -> Result<usize> {
        let out = self
            .applescript(&format!(
                "tell application \"System Events\" to count windows of application process \"{}\"",
                escape_applescript(app)
            ))
            .await?;
        out.trim()
            .parse()
            .map_err(|_| AutomationError::InvalidInput(format!("unexpected window count '{}'", out)).into())
    }

    async fn accessibility_snapshot(&self, app: &str) -> Result<AxSnapshot> {
        let out = self
            .osascript(ScriptLanguage::JavaScript, &ax_walk_script(app), self.timeouts.script)
            .await?;
        let snapshot: AxSnapshot = serde_json::from_str(&out)
            .with_context(|| format!("Malformed accessibility output for {}", app))?;
        debug!("{} accessibility elements for {}", snapshot.elements.len(), app);
        Ok(snapshot)
    }

    async fn screen_geometry(&self) -> Result<ScreenGeometry> {
        let out = self.jxa(SCREEN_GEOMETRY_SCRIPT).await?;
        let geometry: ScreenGeometry =
            serde_json::from_str(&out).context("Malformed screen geometry output")?;
        Ok(geometry)
    }
}

const SCREEN_GEOMETRY_SCRIPT: &str = r#"ObjC.import('AppKit');
var s = $.NSScreen.mainScreen;
var f = s.frame;
JSON.stringify({width: Math.round(f.size.width), height: Math.round(f.size.height), scale_factor: s.backingScaleFactor});"#;

fn js_string(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

fn mouse_click_script(point: Point, button: MouseButton, clicks: u32) -> String {
    let (down, up, cg_button) = match button {
        MouseButton::Left => (1, 2, 0),
        MouseButton::Right => (3, 4, 1),
    };
    let mut script = format!(
        "ObjC.import('CoreGraphics');\nvar p = $.CGPointMake({}, {});\n",
        point.x, point.y
    );
    for n in 1..=clicks {
        script.push_str(&format!(
            "var d = $.CGEventCreateMouseEvent(null, {down}, p, {cg_button}); $.CGEventSetIntegerValueField(d, 1, {n}); $.CGEventPost(0, d);\n\
             var u = $.CGEventCreateMouseEvent(null, {up}, p, {cg_button}); $.CGEventSetIntegerValueField(u, 1, {n}); $.CGEventPost(0, u);\n"
        ));
    }
    script
}

fn mouse_move_script(point: Point) -> String {
    format!(
        "ObjC.import('CoreGraphics');\n$.CGEventPost(0, $.CGEventCreateMouseEvent(null, 5, $.CGPointMake({}, {}), 0));\n",
        point.x, point.y
    )
}

fn drag_script(from: Point, to: Point) -> String {
    format!(
        "ObjC.import('CoreGraphics');\n\
         var a = $.CGPointMake({}, {}); var b = $.CGPointMake({}, {});\n\
         $.CGEventPost(0, $.CGEventCreateMouseEvent(null, 1, a, 0));\n\
         delay(0.05);\n\
         $.CGEventPost(0, $.CGEventCreateMouseEvent(null, 6, b, 0));\n\
         delay(0.05);\n\
         $.CGEventPost(0, $.CGEventCreateMouseEvent(null, 2, b, 0));\n",
        from.x, from.y, to.x, to.y
    )
}

fn scroll_script(direction: ScrollDirection, amount: u32) -> String {
    let amount = amount as i64;
    let (dy, dx) = match direction {
        ScrollDirection::Up => (amount, 0),
        ScrollDirection::Down => (-amount, 0),
        ScrollDirection::Left => (0, amount),
        ScrollDirection::Right => (0, -amount),
    };
    format!(
        "ObjC.import('CoreGraphics');\n$.CGEventPost(0, $.CGEventCreateScrollWheelEvent(null, 1, 2, {}, {}));\n",
        dy, dx
    )
}

/// `keystroke` cannot carry newlines, so each line break becomes Return.
fn type_text_script(text: &str) -> String {
    let mut body = Vec::new();
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            body.push("key code 36".to_string());
        }
        if !line.is_empty() {
            body.push(format!("keystroke \"{}\"", escape_applescript(line)));
        }
    }
    format!(
        "tell application \"System Events\"\n{}\nend tell",
        body.join("\n")
    )
}

fn selection_script(app: Option<&str>) -> String {
    let process = match app {
        Some(name) => format!("application process \"{}\"", escape_applescript(name)),
        None => "first application process whose frontmost is true".to_string(),
    };
    format!(
        "tell application \"System Events\"\n\
         try\n\
         set focusedElement to value of attribute \"AXFocusedUIElement\" of {}\n\
         return value of attribute \"AXSelectedText\" of focusedElement\n\
         on error\n\
         return \"\"\n\
         end try\n\
         end tell",
        process
    )
}

fn window_bounds_script(app: &str) -> String {
    format!(
        "tell application \"System Events\" to tell application process \"{}\"\n\
         set {{x, y}} to position of front window\n\
         set {{w, h}} to size of front window\n\
         return (x as text) & \",\" & (y as text) & \",\" & (w as text) & \",\" & (h as text)\n\
         end tell",
        escape_applescript(app)
    )
}

fn parse_bounds(out: &str) -> Option<Rect> {
    let parts: Vec<i32> = out
        .trim()
        .split(',')
        .map(|p| p.trim().parse::<f64>().ok().map(|v| v.round() as i32))
        .collect::<Option<Vec<_>>>()?;
    match parts.as_slice() {
        [x, y, w, h] if *w > 0 && *h > 0 => Some(Rect {
            x: *x,
            y: *y,
            width: *w,
            height: *h,
        }),
        _ => None,
    }
}

/// JXA walk of the front window's accessibility tree, printed as an
/// [`AxSnapshot`] JSON document.
fn ax_walk_script(app: &str) -> String {
    format!(
        r#"var se = Application('System Events');
var name = {app};
var out = {{app: name, elements: []}};
function attr(el, key) {{ try {{ var v = el.attributes.byName(key).value(); return v === null || v === undefined ? null : String(v); }} catch (e) {{ return null; }} }}
function walk(el, depth) {{
  if (depth > {max_depth} || out.elements.length >= {max_elements}) return;
  var item = {{role: attr(el, 'AXRole') || 'AXUnknown', title: attr(el, 'AXTitle'), value: attr(el, 'AXValue'), label: attr(el, 'AXDescription'), enabled: attr(el, 'AXEnabled') !== 'false', focused: attr(el, 'AXFocused') === 'true', depth: depth}};
  try {{ var p = el.position(); item.position = [p[0], p[1]]; }} catch (e) {{}}
  try {{ var s = el.size(); item.size = [s[0], s[1]]; }} catch (e) {{}}
  out.elements.push(item);
  var kids = [];
  try {{ kids = el.uiElements(); }} catch (e) {{}}
  for (var i = 0; i < kids.length; i++) walk(kids[i], depth + 1);
}}
try {{
  var proc = se.applicationProcesses.byName(name);
  var wins = proc.windows();
  if (wins.length > 0) walk(wins[0], 0);
}} catch (e) {{}}
JSON.stringify(out);"#,
        app = js_string(app),
        max_depth = AX_MAX_DEPTH,
        max_elements = AX_MAX_ELEMENTS,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_click_posts_two_click_pairs() {
        let script = mouse_click_script(Point::new(10, 20), MouseButton::Left, 2);
        assert!(script.contains("$.CGPointMake(10, 20)"));
        assert_eq!(script.matches("CGEventCreateMouseEvent(null, 1,").count(), 2);
        assert!(script.contains("CGEventSetIntegerValueField(u, 1, 2)"));
    }

    #[test]
    fn test_right_click_uses_right_button_events() {
        let script = mouse_click_script(Point::new(0, 0), MouseButton::Right, 1);
        assert!(script.contains("CGEventCreateMouseEvent(null, 3, p, 1)"));
        assert!(script.contains("CGEventCreateMouseEvent(null, 4, p, 1)"));
    }

    #[test]
    fn test_scroll_direction_signs() {
        assert!(scroll_script(ScrollDirection::Down, 3).contains("(null, 1, 2, -3, 0)"));
        assert!(scroll_script(ScrollDirection::Right, 2).contains("(null, 1, 2, 0, -2)"));
    }

    #[test]
    fn test_type_text_splits_lines() {
        let script = type_text_script("hi \"there\"\nbye");
        assert!(script.contains("keystroke \"hi \\\"there\\\"\""));
        assert!(script.contains("key code 36"));
        assert!(script.contains("keystroke \"bye\""));
    }

    #[test]
    fn test_parse_bounds() {
        assert_eq!(
            parse_bounds("10, 25, 800, 600"),
            Some(Rect {
                x: 10,
                y: 25,
                width: 800,
                height: 600
            })
        );
        assert_eq!(parse_bounds("10,25,0,600"), None);
        assert_eq!(parse_bounds("missing value"), None);
    }

    #[test]
    fn test_ax_walk_quotes_app_name() {
        let script = ax_walk_script("Bob's \"App\"");
        assert!(script.contains(r#"var name = "Bob's \"App\"";"#));
    }
}
