//! Runs ordered UI actions with adaptive waits between them.
//!
//! The wait after each action is chosen by [`WaitPolicy::between`] from the
//! action and its successor: a fixed sleep, or polling a cheap predicate until
//! it holds. Poll timeouts are logged and the sequence carries on.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use deskpilot_computer_control::{
    process::with_timeout, HostAutomation, KeyCombo, Screenshot, ScreenshotOptions,
    ScriptLanguage, ScrollDirection, VisionLimits,
};
use deskpilot_config::SequencerConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::coordinates::PointerSpace;

fn default_scroll_amount() -> u32 {
    3
}

fn default_repeat() -> u32 {
    1
}

/// One step of an action sequence, as issued by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionSpec {
    Activate {
        app: String,
    },
    RunScript {
        script: String,
        #[serde(default)]
        language: ScriptLanguage,
    },
    Hotkey {
        keys: String,
    },
    Type {
        text: String,
    },
    Key {
        key: String,
        #[serde(default = "default_repeat")]
        repeat: u32,
    },
    Click {
        x: f64,
        y: f64,
    },
    RightClick {
        x: f64,
        y: f64,
    },
    DoubleClick {
        x: f64,
        y: f64,
    },
    MouseMove {
        x: f64,
        y: f64,
    },
    Scroll {
        direction: ScrollDirection,
        #[serde(default = "default_scroll_amount")]
        amount: u32,
    },
    Drag {
        from_x: f64,
        from_y: f64,
        to_x: f64,
        to_y: f64,
    },
    Wait {
        ms: u64,
    },
    InsertImage {
        path: String,
    },
    Screenshot,
}

impl ActionSpec {
    fn is_pointer_click(&self) -> bool {
        matches!(
            self,
            ActionSpec::Click { .. } | ActionSpec::RightClick { .. } | ActionSpec::DoubleClick { .. }
        )
    }

    fn is_keyboard(&self) -> bool {
        matches!(
            self,
            ActionSpec::Type { .. } | ActionSpec::Key { .. } | ActionSpec::Hotkey { .. }
        )
    }

    /// Short human-readable description for progress reports.
    pub fn describe(&self) -> String {
        match self {
            ActionSpec::Activate { app } => format!("activate {}", app),
            ActionSpec::RunScript { language, .. } => format!("run {:?} script", language),
            ActionSpec::Hotkey { keys } => format!("hotkey {}", keys),
            ActionSpec::Type { text } => format!("type {} chars", text.chars().count()),
            ActionSpec::Key { key, repeat } if *repeat > 1 => format!("key {} x{}", key, repeat),
            ActionSpec::Key { key, .. } => format!("key {}", key),
            ActionSpec::Click { x, y } => format!("click ({}, {})", x, y),
            ActionSpec::RightClick { x, y } => format!("right_click ({}, {})", x, y),
            ActionSpec::DoubleClick { x, y } => format!("double_click ({}, {})", x, y),
            ActionSpec::MouseMove { x, y } => format!("mouse_move ({}, {})", x, y),
            ActionSpec::Scroll { direction, amount } => {
                format!("scroll {:?} {}", direction, amount).to_lowercase()
            }
            ActionSpec::Drag {
                from_x,
                from_y,
                to_x,
                to_y,
            } => format!("drag ({}, {}) -> ({}, {})", from_x, from_y, to_x, to_y),
            ActionSpec::Wait { ms } => format!("wait {}ms", ms),
            ActionSpec::InsertImage { path } => format!("insert image {}", path),
            ActionSpec::Screenshot => "screenshot".to_string(),
        }
    }
}

/// Source of time for waits, so tests can run sequences instantly.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Clock whose `sleep` returns immediately after advancing virtual time.
#[derive(Debug)]
pub struct ManualClock {
    start: Instant,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock().unwrap_or_else(|p| p.into_inner()) += duration;
    }

    /// Every sleep requested so far.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + *self.elapsed.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(duration);
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// Predicates polled between actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitCondition {
    /// The named application is frontmost
    AppFrontmost(String),
    /// The frontmost app's window count is unchanged for `consecutive` polls
    WindowCountStable { consecutive: u32 },
    /// Frontmost app and its window count unchanged across two polls
    UiSettle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitPolicy {
    None,
    Fixed(Duration),
    Poll(WaitCondition),
}

impl WaitPolicy {
    /// Wait to apply after `current` when `next` follows it.
    pub fn between(current: &ActionSpec, next: &ActionSpec, config: &SequencerConfig) -> Self {
        let fixed = Duration::from_millis(config.fixed_delay_ms);

        match current {
            ActionSpec::Activate { app } => WaitPolicy::Poll(WaitCondition::AppFrontmost(app.clone())),
            c if c.is_pointer_click() && next.is_keyboard() => WaitPolicy::Poll(WaitCondition::UiSettle),
            c if c.is_pointer_click() => WaitPolicy::Fixed(fixed),
            ActionSpec::Hotkey { .. } => WaitPolicy::Poll(WaitCondition::WindowCountStable {
                consecutive: config.window_stable_polls.max(2),
            }),
            ActionSpec::Type { text } => {
                let chars = text.chars().count();
                if chars > config.paste_threshold {
                    WaitPolicy::Fixed(fixed)
                } else {
                    let proportional = config.typing_ms_per_char.saturating_mul(chars as u64);
                    WaitPolicy::Fixed(Duration::from_millis(proportional.min(config.typing_wait_cap_ms)))
                }
            }
            ActionSpec::Scroll { .. }
            | ActionSpec::Drag { .. }
            | ActionSpec::Key { .. }
            | ActionSpec::RunScript { .. }
            | ActionSpec::InsertImage { .. } => WaitPolicy::Fixed(fixed),
            ActionSpec::MouseMove { .. } | ActionSpec::Wait { .. } | ActionSpec::Screenshot => {
                WaitPolicy::None
            }
            _ => WaitPolicy::Fixed(fixed),
        }
    }
}

/// How a wait between two actions ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Skipped,
    Slept(Duration),
    Satisfied { condition: WaitCondition, polls: u32 },
    TimedOut { condition: WaitCondition, polls: u32 },
}

#[derive(Debug, Clone, Default)]
pub struct SequenceSummary {
    pub completed: Vec<String>,
    pub waits: Vec<WaitOutcome>,
    pub screenshots: Vec<Screenshot>,
}

impl SequenceSummary {
    pub fn describe(&self) -> String {
        format!(
            "Completed {} action(s): {}",
            self.completed.len(),
            self.completed.join(", ")
        )
    }
}

/// A sequence stopped at `index`; earlier actions are not rolled back.
#[derive(Debug, Error)]
#[error("action {} ({}) failed: {}. Completed before failure: [{}]", .index + 1, .action, .reason, .completed.join(", "))]
pub struct ActionSequenceError {
    pub index: usize,
    pub action: String,
    pub reason: String,
    pub completed: Vec<String>,
}

pub struct ActionSequencer {
    host: Arc<dyn HostAutomation>,
    clock: Arc<dyn Clock>,
    config: SequencerConfig,
    action_timeout: Duration,
    script_timeout: Duration,
    limits: VisionLimits,
}

impl ActionSequencer {
    pub fn new(
        host: Arc<dyn HostAutomation>,
        clock: Arc<dyn Clock>,
        config: SequencerConfig,
        action_timeout: Duration,
        script_timeout: Duration,
        limits: VisionLimits,
    ) -> Self {
        Self {
            host,
            clock,
            config,
            action_timeout,
            script_timeout,
            limits,
        }
    }

    pub async fn run(
        &self,
        actions: &[ActionSpec],
        pointer: &PointerSpace,
    ) -> Result<SequenceSummary, ActionSequenceError> {
        let mut summary = SequenceSummary::default();

        for (index, action) in actions.iter().enumerate() {
            debug!("Action {}/{}: {}", index + 1, actions.len(), action.describe());

            if let Err(e) = self.perform(action, pointer, &mut summary).await {
                return Err(ActionSequenceError {
                    index,
                    action: action.describe(),
                    reason: format!("{:#}", e),
                    completed: summary.completed,
                });
            }
            summary.completed.push(action.describe());

            if let Some(next) = actions.get(index + 1) {
                let outcome = self.wait(WaitPolicy::between(action, next, &self.config)).await;
                summary.waits.push(outcome);
            }
        }

        Ok(summary)
    }

    async fn perform(
        &self,
        action: &ActionSpec,
        pointer: &PointerSpace,
        summary: &mut SequenceSummary,
    ) -> Result<()> {
        let host = &self.host;
        let limit = self.action_timeout;

        match action {
            ActionSpec::Activate { app } => {
                with_timeout("activate", limit, host.focus_application(app)).await
            }
            ActionSpec::RunScript { script, language } => {
                with_timeout(
                    "run_script",
                    self.script_timeout,
                    host.run_host_script(*language, script),
                )
                .await?;
                Ok(())
            }
            ActionSpec::Hotkey { keys } => {
                let combo = KeyCombo::parse(keys)?;
                with_timeout("hotkey", limit, host.press_key(&combo)).await
            }
            ActionSpec::Type { text } => {
                if text.chars().count() > self.config.paste_threshold {
                    with_timeout("paste", limit, host.paste_text(text)).await
                } else {
                    let typing_limit = limit
                        + Duration::from_millis(
                            self.config.typing_ms_per_char * text.chars().count() as u64,
                        );
                    with_timeout("type", typing_limit, host.type_text(text)).await
                }
            }
            ActionSpec::Key { key, repeat } => {
                let combo = KeyCombo::parse(key)?;
                for _ in 0..(*repeat).max(1) {
                    with_timeout("key", limit, host.press_key(&combo)).await?;
                }
                Ok(())
            }
            ActionSpec::Click { x, y } => {
                with_timeout("click", limit, host.click(pointer.point(*x, *y))).await
            }
            ActionSpec::RightClick { x, y } => {
                with_timeout("right_click", limit, host.right_click(pointer.point(*x, *y))).await
            }
            ActionSpec::DoubleClick { x, y } => {
                with_timeout("double_click", limit, host.double_click(pointer.point(*x, *y))).await
            }
            ActionSpec::MouseMove { x, y } => {
                with_timeout("mouse_move", limit, host.move_mouse(pointer.point(*x, *y))).await
            }
            ActionSpec::Scroll { direction, amount } => {
                with_timeout("scroll", limit, host.scroll(*direction, *amount)).await
            }
            ActionSpec::Drag {
                from_x,
                from_y,
                to_x,
                to_y,
            } => {
                let from = pointer.point(*from_x, *from_y);
                let to = pointer.point(*to_x, *to_y);
                with_timeout("drag", limit, host.drag(from, to)).await
            }
            ActionSpec::Wait { ms } => {
                self.clock.sleep(Duration::from_millis(*ms)).await;
                Ok(())
            }
            ActionSpec::InsertImage { path } => {
                let expanded = shellexpand::tilde(path);
                let bytes = std::fs::read(expanded.as_ref())
                    .with_context(|| format!("Failed to read image {}", path))?;
                with_timeout("insert_image", limit, host.paste_image(&bytes)).await
            }
            ActionSpec::Screenshot => {
                let options = ScreenshotOptions {
                    app: None,
                    region: None,
                    limits: self.limits,
                };
                let shot = with_timeout("screenshot", limit, host.capture_screenshot(&options)).await?;
                summary.screenshots.push(shot);
                Ok(())
            }
        }
    }

    async fn wait(&self, policy: WaitPolicy) -> WaitOutcome {
        match policy {
            WaitPolicy::None => WaitOutcome::Skipped,
            WaitPolicy::Fixed(duration) => {
                self.clock.sleep(duration).await;
                WaitOutcome::Slept(duration)
            }
            WaitPolicy::Poll(condition) => self.poll(condition).await,
        }
    }

    async fn poll(&self, condition: WaitCondition) -> WaitOutcome {
        let interval = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let deadline = self.clock.now() + Duration::from_millis(self.config.poll_timeout_ms);
        let mut polls = 0;
        let mut previous: Option<(Option<String>, usize)> = None;
        let mut stable_count = 0;

        loop {
            polls += 1;
            let satisfied = match &condition {
                WaitCondition::AppFrontmost(app) => match self.host.frontmost_application().await {
                    Ok(Some(front)) => deskpilot_computer_control::app_names_match(&front, app),
                    Ok(None) => false,
                    Err(e) => {
                        debug!("frontmost poll failed: {}", e);
                        false
                    }
                },
                WaitCondition::WindowCountStable { consecutive } => match self.sample().await {
                    Ok(sample) => {
                        stable_count = if previous.as_ref() == Some(&sample) {
                            stable_count + 1
                        } else {
                            1
                        };
                        previous = Some(sample);
                        stable_count >= *consecutive
                    }
                    Err(e) => {
                        debug!("window poll failed: {}", e);
                        false
                    }
                },
                WaitCondition::UiSettle => match self.sample().await {
                    Ok(sample) => {
                        let settled = previous.as_ref() == Some(&sample);
                        previous = Some(sample);
                        settled
                    }
                    Err(e) => {
                        debug!("settle poll failed: {}", e);
                        false
                    }
                },
            };

            if satisfied {
                return WaitOutcome::Satisfied { condition, polls };
            }
            if self.clock.now() >= deadline {
                warn!("Wait for {:?} timed out after {} polls; continuing", condition, polls);
                return WaitOutcome::TimedOut { condition, polls };
            }
            self.clock.sleep(interval).await;
        }
    }

    /// Frontmost app and its window count.
    async fn sample(&self) -> Result<(Option<String>, usize)> {
        let front = self.host.frontmost_application().await?;
        let count = match front {
            Some(ref app) => self.host.window_count(app).await?,
            None => return Err(anyhow!("no frontmost application")),
        };
        Ok((front, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinates::CoordinateMapper;
    use deskpilot_computer_control::{MockController, Point, RecordedCall, ScreenGeometry};
    use deskpilot_providers::CoordinateConvention;

    fn pixel_space() -> PointerSpace {
        PointerSpace::new(
            CoordinateMapper::new(ScreenGeometry::new(1920, 1080, 1.0), VisionLimits::default()),
            CoordinateConvention::Pixel,
        )
    }

    fn sequencer(host: Arc<MockController>, clock: Arc<ManualClock>) -> ActionSequencer {
        ActionSequencer::new(
            host,
            clock,
            SequencerConfig::default(),
            Duration::from_secs(1),
            Duration::from_secs(1),
            VisionLimits::default(),
        )
    }

    #[test]
    fn test_action_spec_deserializes_tagged() {
        let actions: Vec<ActionSpec> = serde_json::from_value(serde_json::json!([
            {"action": "activate", "app": "Notes"},
            {"action": "hotkey", "keys": "cmd+n"},
            {"action": "scroll", "direction": "down"},
            {"action": "key", "key": "tab"},
            {"action": "screenshot"}
        ]))
        .unwrap();
        assert_eq!(actions[0], ActionSpec::Activate { app: "Notes".to_string() });
        assert_eq!(
            actions[2],
            ActionSpec::Scroll {
                direction: ScrollDirection::Down,
                amount: 3
            }
        );
        assert_eq!(
            actions[3],
            ActionSpec::Key {
                key: "tab".to_string(),
                repeat: 1
            }
        );
        assert_eq!(actions[4], ActionSpec::Screenshot);
    }

    #[test]
    fn test_wait_policy_table() {
        let config = SequencerConfig::default();
        let click = ActionSpec::Click { x: 1.0, y: 1.0 };
        let typing = ActionSpec::Type { text: "hi".to_string() };
        let scroll = ActionSpec::Scroll {
            direction: ScrollDirection::Down,
            amount: 3,
        };

        assert_eq!(
            WaitPolicy::between(&click, &typing, &config),
            WaitPolicy::Poll(WaitCondition::UiSettle)
        );
        assert_eq!(
            WaitPolicy::between(&click, &scroll, &config),
            WaitPolicy::Fixed(Duration::from_millis(150))
        );
        assert_eq!(
            WaitPolicy::between(&scroll, &click, &config),
            WaitPolicy::Fixed(Duration::from_millis(150))
        );
        assert_eq!(
            WaitPolicy::between(&ActionSpec::Activate { app: "Mail".to_string() }, &click, &config),
            WaitPolicy::Poll(WaitCondition::AppFrontmost("Mail".to_string()))
        );
    }

    #[test]
    fn test_typing_wait_is_proportional_and_capped() {
        let config = SequencerConfig {
            paste_threshold: 1000,
            ..SequencerConfig::default()
        };
        let next = ActionSpec::Key {
            key: "return".to_string(),
            repeat: 1,
        };
        let short = ActionSpec::Type { text: "abcde".to_string() };
        let long = ActionSpec::Type { text: "x".repeat(900) };

        assert_eq!(
            WaitPolicy::between(&short, &next, &config),
            WaitPolicy::Fixed(Duration::from_millis(40))
        );
        assert_eq!(
            WaitPolicy::between(&long, &next, &config),
            WaitPolicy::Fixed(Duration::from_millis(1500))
        );
    }

    #[tokio::test]
    async fn test_click_then_type_polls_for_settle() {
        let host = Arc::new(MockController::new().with_frontmost("TextEdit"));
        let clock = Arc::new(ManualClock::new());
        let summary = sequencer(host.clone(), clock.clone())
            .run(
                &[
                    ActionSpec::Click { x: 100.0, y: 200.0 },
                    ActionSpec::Type { text: "hello".to_string() },
                ],
                &pixel_space(),
            )
            .await
            .unwrap();

        assert_eq!(
            summary.waits,
            vec![WaitOutcome::Satisfied {
                condition: WaitCondition::UiSettle,
                polls: 2
            }]
        );
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(50)]);
        assert_eq!(
            host.actions(),
            vec![
                RecordedCall::Click(Point::new(100, 200)),
                RecordedCall::TypeText("hello".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_long_text_is_pasted() {
        let host = Arc::new(MockController::new());
        let clock = Arc::new(ManualClock::new());
        let text = "a".repeat(100);
        sequencer(host.clone(), clock)
            .run(&[ActionSpec::Type { text: text.clone() }], &pixel_space())
            .await
            .unwrap();
        assert_eq!(host.actions(), vec![RecordedCall::PasteText(text)]);
    }

    #[tokio::test]
    async fn test_activate_waits_for_frontmost() {
        let host = Arc::new(MockController::new().with_frontmost("Finder"));
        let clock = Arc::new(ManualClock::new());
        let summary = sequencer(host.clone(), clock.clone())
            .run(
                &[
                    ActionSpec::Wait { ms: 0 },
                    ActionSpec::Activate { app: "Notes".to_string() },
                    ActionSpec::Screenshot,
                ],
                &pixel_space(),
            )
            .await
            .unwrap();

        assert_eq!(summary.waits[0], WaitOutcome::Skipped);
        assert_eq!(
            summary.waits[1],
            WaitOutcome::Satisfied {
                condition: WaitCondition::AppFrontmost("Notes".to_string()),
                polls: 1
            }
        );
        assert_eq!(summary.screenshots.len(), 1);
    }

    #[tokio::test]
    async fn test_poll_timeout_is_not_fatal() {
        let host = Arc::new(MockController::new().fail_on("frontmost_application"));
        let clock = Arc::new(ManualClock::new());
        let summary = sequencer(host, clock.clone())
            .run(
                &[
                    ActionSpec::Hotkey { keys: "cmd+n".to_string() },
                    ActionSpec::Type { text: "x".to_string() },
                ],
                &pixel_space(),
            )
            .await
            .unwrap();

        assert!(matches!(summary.waits[0], WaitOutcome::TimedOut { .. }));
        assert!(clock.total_slept() >= Duration::from_millis(2000));
        assert_eq!(summary.completed.len(), 2);
    }

    #[tokio::test]
    async fn test_failure_reports_completed_actions() {
        let host = Arc::new(MockController::new().fail_on("scroll"));
        let clock = Arc::new(ManualClock::new());
        let err = sequencer(host.clone(), clock)
            .run(
                &[
                    ActionSpec::MouseMove { x: 5.0, y: 5.0 },
                    ActionSpec::Scroll {
                        direction: ScrollDirection::Up,
                        amount: 2,
                    },
                    ActionSpec::Click { x: 1.0, y: 1.0 },
                ],
                &pixel_space(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.index, 1);
        assert_eq!(err.completed, vec!["mouse_move (5, 5)".to_string()]);
        assert!(err.to_string().starts_with("action 2 (scroll up 2) failed"));
        assert_eq!(host.call_count("click"), 0);
    }

    #[tokio::test]
    async fn test_bad_hotkey_fails_sequence() {
        let host = Arc::new(MockController::new());
        let err = sequencer(host, Arc::new(ManualClock::new()))
            .run(&[ActionSpec::Hotkey { keys: "cmd+".to_string() }], &pixel_space())
            .await
            .unwrap_err();
        assert!(err.reason.contains("no key") || err.reason.contains("invalid"));
    }
}
