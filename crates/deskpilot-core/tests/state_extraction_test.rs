//! Tier fallthrough of the state extractor against host fixtures.

use std::sync::Arc;
use std::time::Duration;

use deskpilot_computer_control::{AxElement, AxSnapshot, MockController, VisionLimits};
use deskpilot_config::ExtractionConfig;
use deskpilot_core::StateExtractor;

fn extractor(host: Arc<MockController>, config: ExtractionConfig) -> StateExtractor {
    StateExtractor::new(
        host,
        config,
        VisionLimits::default(),
        Duration::from_secs(1),
        Duration::from_secs(1),
    )
}

/// Safari page whose element scan finds nothing clickable and whose scripting
/// dictionary has no front document.
#[tokio::test]
async fn test_safari_with_empty_page_walks_every_tier() {
    let host = Arc::new(
        MockController::new()
            .with_frontmost("Safari")
            .with_script_response(
                "do JavaScript",
                r#"{"url":"about:blank","title":"","elements":[],"text":""}"#,
            )
            .with_script_response("set doc to front document", "DESKPILOT_ERROR: no document"),
    );

    let state = extractor(host.clone(), ExtractionConfig::default())
        .extract(None, None)
        .await
        .unwrap();

    assert_eq!(state.attempted_tiers, vec![1, 2, 3, 4]);
    assert_eq!(state.tier, 4);
    assert_eq!(state.method, "screenshot");
    assert_eq!(state.app.as_deref(), Some("Safari"));
    assert_eq!(host.call_count("run_host_script"), 2);
    assert_eq!(host.call_count("accessibility_snapshot"), 1);
    assert_eq!(host.call_count("capture_screenshot"), 1);
}

#[tokio::test]
async fn test_finder_is_described_through_scripting() {
    let host = Arc::new(MockController::new().with_frontmost("Finder").with_script_response(
        "POSIX path",
        "Folder: /Users/sam/Documents/\nSelected: /Users/sam/Documents/report.pdf",
    ));

    let state = extractor(host.clone(), ExtractionConfig::default())
        .extract(None, None)
        .await
        .unwrap();

    assert_eq!(state.tier, 2);
    assert_eq!(state.method, "structured_scripting");
    assert_eq!(state.attempted_tiers, vec![2]);
    assert!(state
        .formatted
        .starts_with("Application: Finder\nFolder: /Users/sam/Documents/"));
    assert!(state.screenshot.is_none());
    assert_eq!(host.call_count("capture_screenshot"), 0);
}

#[tokio::test]
async fn test_accessibility_tree_used_when_informative() {
    let elements = (0..8)
        .map(|i| AxElement::new("AXStaticText").with_title(&format!("Paragraph {} {}", i, "x".repeat(40))))
        .collect();
    let host = Arc::new(MockController::new().with_frontmost("Slack").with_snapshot(AxSnapshot {
        app: "Slack".to_string(),
        elements,
    }));

    let mut config = ExtractionConfig::default();
    config.max_formatted_chars = 100;
    let state = extractor(host, config).extract(None, None).await.unwrap();

    assert_eq!(state.tier, 3);
    assert_eq!(state.attempted_tiers, vec![3]);
    assert!(state.formatted.ends_with("... (truncated)"));
}
