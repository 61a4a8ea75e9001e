//! Tool definitions for the agent's built-in tools.
//!
//! JSON schemas sent to providers with native tool calling. Coordinates are
//! described without units: the active provider's convention decides how
//! they are read.

use deskpilot_providers::Tool;
use serde_json::{json, Value};

use crate::tools::registry::BuiltinTool;

fn point_schema(extra: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "x": { "type": "number", "description": format!("Horizontal position {}", extra) },
            "y": { "type": "number", "description": format!("Vertical position {}", extra) }
        },
        "required": ["x", "y"]
    })
}

fn tool(name: &str, description: &str, input_schema: Value) -> Tool {
    Tool {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
    }
}

/// Schema for one built-in tool.
pub fn builtin_definition(builtin: BuiltinTool) -> Tool {
    let name = builtin.name();
    match builtin {
        BuiltinTool::Screenshot => tool(
            name,
            "Capture the screen, or one application's front window, and attach the image.",
            json!({
                "type": "object",
                "properties": {
                    "app": { "type": "string", "description": "Application whose window to capture (optional)" }
                }
            }),
        ),
        BuiltinTool::ReadState => tool(
            name,
            "Re-read the state of the target application (page content, document text or UI elements).",
            json!({ "type": "object", "properties": {} }),
        ),
        BuiltinTool::ReadSelection => tool(
            name,
            "Read the text currently selected in an application.",
            json!({
                "type": "object",
                "properties": {
                    "app": { "type": "string", "description": "Application to read from (defaults to the target app)" }
                }
            }),
        ),
        BuiltinTool::Click => tool(name, "Left-click at a screen position.", point_schema("to click")),
        BuiltinTool::RightClick => tool(name, "Right-click at a screen position.", point_schema("to right-click")),
        BuiltinTool::DoubleClick => tool(name, "Double-click at a screen position.", point_schema("to double-click")),
        BuiltinTool::MouseMove => tool(name, "Move the pointer without clicking.", point_schema("to move to")),
        BuiltinTool::Drag => tool(
            name,
            "Press at one position, drag to another and release.",
            json!({
                "type": "object",
                "properties": {
                    "from_x": { "type": "number" },
                    "from_y": { "type": "number" },
                    "to_x": { "type": "number" },
                    "to_y": { "type": "number" }
                },
                "required": ["from_x", "from_y", "to_x", "to_y"]
            }),
        ),
        BuiltinTool::Scroll => tool(
            name,
            "Scroll the view under the pointer.",
            json!({
                "type": "object",
                "properties": {
                    "direction": { "type": "string", "enum": ["up", "down", "left", "right"] },
                    "amount": { "type": "integer", "description": "Scroll steps (default 3)" }
                },
                "required": ["direction"]
            }),
        ),
        BuiltinTool::TypeText => tool(
            name,
            "Type text into the focused field. Long text is pasted in one step.",
            json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            }),
        ),
        BuiltinTool::PressKey => tool(
            name,
            "Press a key or key combination, e.g. 'return', 'tab' or 'cmd+shift+t'.",
            json!({
                "type": "object",
                "properties": {
                    "keys": { "type": "string" },
                    "repeat": { "type": "integer", "description": "Times to press (default 1)" }
                },
                "required": ["keys"]
            }),
        ),
        BuiltinTool::OpenApp => tool(
            name,
            "Bring an application to the front, launching it if needed. It becomes the target app.",
            json!({
                "type": "object",
                "properties": {
                    "app": { "type": "string" }
                },
                "required": ["app"]
            }),
        ),
        BuiltinTool::RunScript => tool(
            name,
            "Run an AppleScript or JavaScript for Automation script and return its output.",
            json!({
                "type": "object",
                "properties": {
                    "script": { "type": "string" },
                    "language": { "type": "string", "enum": ["applescript", "javascript"] }
                },
                "required": ["script"]
            }),
        ),
        BuiltinTool::RunActions => tool(
            name,
            "Run several UI actions in order with automatic waits between them. Stops at the first failure.",
            json!({
                "type": "object",
                "properties": {
                    "actions": {
                        "type": "array",
                        "description": "Each item has an 'action' field: activate, run_script, hotkey, type, key, click, right_click, double_click, mouse_move, scroll, drag, wait, insert_image or screenshot, plus that action's arguments.",
                        "items": { "type": "object" }
                    }
                },
                "required": ["actions"]
            }),
        ),
        BuiltinTool::InsertImage => tool(
            name,
            "Paste an image file into the focused document.",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" }
                },
                "required": ["path"]
            }),
        ),
        BuiltinTool::ReplaceText => tool(
            name,
            "Replace the selected text in the target application. Asks the user every time.",
            json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "Replacement text" }
                },
                "required": ["text"]
            }),
        ),
        BuiltinTool::Remember => tool(
            name,
            "Store a durable fact about the user or their preferences for later runs.",
            json!({
                "type": "object",
                "properties": {
                    "fact": { "type": "string" }
                },
                "required": ["fact"]
            }),
        ),
        BuiltinTool::Recall => tool(
            name,
            "Search remembered facts.",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" }
                },
                "required": ["query"]
            }),
        ),
        BuiltinTool::Wait => tool(
            name,
            "Pause before the next step (at most 10 seconds).",
            json!({
                "type": "object",
                "properties": {
                    "ms": { "type": "integer" }
                },
                "required": ["ms"]
            }),
        ),
        BuiltinTool::FinalAnswer => tool(
            name,
            "Finish the task and give the user your answer.",
            json!({
                "type": "object",
                "properties": {
                    "answer": { "type": "string" }
                },
                "required": ["answer"]
            }),
        ),
    }
}
