//! External integration tools (mail, calendar, docs...) served by a router.
//!
//! The router owns connection management. All the loop needs is the tool
//! list, a way to invoke a tool, and the `auth_required` marker a router puts
//! in its payload when the user must connect an account first.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use deskpilot_computer_control::process::with_timeout;
use deskpilot_providers::Tool;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::executor::ToolResult;

/// Tools served by an external integration router.
#[async_trait]
pub trait IntegrationRouter: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<Tool>>;
    async fn invoke(&self, name: &str, args: &Value) -> Result<Value>;
}

/// The user must authenticate with `toolkit` before the call can succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequired {
    pub toolkit: String,
    pub redirect_url: Option<String>,
}

const MAX_MARKER_DEPTH: usize = 4;

/// Look for an `auth_required` marker in a router payload.
///
/// Accepts either an object (`"auth_required": {"toolkit": .., "redirect_url": ..}`)
/// or a flag with sibling fields (`"auth_required": true, "toolkit": ..`).
/// Nested `data`/`result` wrappers are searched a few levels deep.
pub fn detect_auth_required(payload: &Value) -> Option<AuthRequired> {
    detect_at(payload, 0)
}

fn detect_at(payload: &Value, depth: usize) -> Option<AuthRequired> {
    let object = payload.as_object()?;

    match object.get("auth_required") {
        Some(Value::Object(marker)) => {
            let toolkit = marker.get("toolkit").and_then(Value::as_str)?;
            return Some(AuthRequired {
                toolkit: toolkit.to_string(),
                redirect_url: marker
                    .get("redirect_url")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }
        Some(Value::Bool(true)) => {
            let toolkit = object
                .get("toolkit")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            return Some(AuthRequired {
                toolkit: toolkit.to_string(),
                redirect_url: object
                    .get("redirect_url")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }
        _ => {}
    }

    if depth >= MAX_MARKER_DEPTH {
        return None;
    }
    ["data", "result", "response"]
        .iter()
        .filter_map(|key| object.get(*key))
        .find_map(|nested| detect_at(nested, depth + 1))
}

/// Invoke an integration tool and turn its payload into a tool result.
/// A router that does not answer within `limit` yields an error result.
pub async fn execute_integration(
    router: &dyn IntegrationRouter,
    name: &str,
    args: &Value,
    limit: Duration,
) -> ToolResult {
    debug!("Invoking integration tool {}", name);

    match with_timeout(name, limit, router.invoke(name, args)).await {
        Ok(payload) => {
            if let Some(auth) = detect_auth_required(&payload) {
                debug!("{} requires authentication with {}", name, auth.toolkit);
                return ToolResult::auth_required(auth);
            }
            let output = match payload {
                Value::String(text) => text,
                other => serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string()),
            };
            ToolResult::ok(output)
        }
        Err(e) => ToolResult::error(format!("{} failed: {:#}", name, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Router whose calls never complete.
    struct StalledRouter;

    #[async_trait]
    impl IntegrationRouter for StalledRouter {
        async fn list_tools(&self) -> Result<Vec<Tool>> {
            Ok(Vec::new())
        }

        async fn invoke(&self, _name: &str, _args: &Value) -> Result<Value> {
            std::future::pending::<()>().await;
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_stalled_router_times_out() {
        let result = execute_integration(
            &StalledRouter,
            "NOTION_SEARCH",
            &json!({"query": "roadmap"}),
            Duration::from_millis(20),
        )
        .await;

        assert!(!result.success);
        let error = result.error.unwrap();
        assert!(error.starts_with("NOTION_SEARCH failed"), "{}", error);
        assert!(error.contains("timed out"), "{}", error);
        assert!(result.auth_required.is_none());
    }

    #[test]
    fn test_detects_object_marker() {
        let payload = json!({
            "successful": false,
            "auth_required": {"toolkit": "gmail", "redirect_url": "https://connect.example/gmail"}
        });
        assert_eq!(
            detect_auth_required(&payload),
            Some(AuthRequired {
                toolkit: "gmail".to_string(),
                redirect_url: Some("https://connect.example/gmail".to_string()),
            })
        );
    }

    #[test]
    fn test_detects_flag_marker_in_nested_data() {
        let payload = json!({"data": {"auth_required": true, "toolkit": "notion"}});
        assert_eq!(
            detect_auth_required(&payload).map(|a| a.toolkit),
            Some("notion".to_string())
        );
    }

    #[test]
    fn test_ignores_ordinary_payloads() {
        assert_eq!(detect_auth_required(&json!({"messages": []})), None);
        assert_eq!(detect_auth_required(&json!({"auth_required": false})), None);
        assert_eq!(detect_auth_required(&json!("plain text")), None);
    }
}
