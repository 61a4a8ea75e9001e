//! Lookup from tool names to built-in implementations or external
//! integration tools.

use std::collections::{HashMap, HashSet};

use deskpilot_providers::Tool;

use crate::tool_definitions::builtin_definition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinTool {
    Screenshot,
    ReadState,
    ReadSelection,
    Click,
    RightClick,
    DoubleClick,
    MouseMove,
    Drag,
    Scroll,
    TypeText,
    PressKey,
    OpenApp,
    RunScript,
    RunActions,
    InsertImage,
    ReplaceText,
    Remember,
    Recall,
    Wait,
    FinalAnswer,
}

impl BuiltinTool {
    pub const ALL: [BuiltinTool; 20] = [
        BuiltinTool::Screenshot,
        BuiltinTool::ReadState,
        BuiltinTool::ReadSelection,
        BuiltinTool::Click,
        BuiltinTool::RightClick,
        BuiltinTool::DoubleClick,
        BuiltinTool::MouseMove,
        BuiltinTool::Drag,
        BuiltinTool::Scroll,
        BuiltinTool::TypeText,
        BuiltinTool::PressKey,
        BuiltinTool::OpenApp,
        BuiltinTool::RunScript,
        BuiltinTool::RunActions,
        BuiltinTool::InsertImage,
        BuiltinTool::ReplaceText,
        BuiltinTool::Remember,
        BuiltinTool::Recall,
        BuiltinTool::Wait,
        BuiltinTool::FinalAnswer,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BuiltinTool::Screenshot => "screenshot",
            BuiltinTool::ReadState => "read_state",
            BuiltinTool::ReadSelection => "read_selection",
            BuiltinTool::Click => "click",
            BuiltinTool::RightClick => "right_click",
            BuiltinTool::DoubleClick => "double_click",
            BuiltinTool::MouseMove => "mouse_move",
            BuiltinTool::Drag => "drag",
            BuiltinTool::Scroll => "scroll",
            BuiltinTool::TypeText => "type_text",
            BuiltinTool::PressKey => "press_key",
            BuiltinTool::OpenApp => "open_app",
            BuiltinTool::RunScript => "run_script",
            BuiltinTool::RunActions => "run_actions",
            BuiltinTool::InsertImage => "insert_image",
            BuiltinTool::ReplaceText => "replace_text",
            BuiltinTool::Remember => "remember",
            BuiltinTool::Recall => "recall",
            BuiltinTool::Wait => "wait",
            BuiltinTool::FinalAnswer => "final_answer",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }

    /// Tools that operate the desktop and are hidden when computer control
    /// is disabled.
    pub fn is_computer_use(self) -> bool {
        matches!(
            self,
            BuiltinTool::Click
                | BuiltinTool::RightClick
                | BuiltinTool::DoubleClick
                | BuiltinTool::MouseMove
                | BuiltinTool::Drag
                | BuiltinTool::Scroll
                | BuiltinTool::TypeText
                | BuiltinTool::PressKey
                | BuiltinTool::OpenApp
                | BuiltinTool::RunScript
                | BuiltinTool::RunActions
                | BuiltinTool::InsertImage
                | BuiltinTool::ReplaceText
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolKind {
    Builtin(BuiltinTool),
    /// Passed through to the integration router unchanged
    External(String),
}

impl ToolKind {
    pub fn is_external(&self) -> bool {
        matches!(self, ToolKind::External(_))
    }
}

/// The tools offered to the model for one run.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    builtins: Vec<BuiltinTool>,
    external: HashMap<String, Tool>,
}

impl ToolRegistry {
    /// Built-ins minus `disabled` (and minus desktop actions when
    /// `computer_control` is off), plus the router's tools. A built-in name
    /// always wins over an external tool of the same name.
    pub fn new(computer_control: bool, disabled: &[String], external: Vec<Tool>) -> Self {
        let disabled: HashSet<&str> = disabled.iter().map(String::as_str).collect();

        let builtins = BuiltinTool::ALL
            .into_iter()
            .filter(|tool| computer_control || !tool.is_computer_use())
            .filter(|tool| !disabled.contains(tool.name()))
            .collect();

        let external = external
            .into_iter()
            .filter(|tool| BuiltinTool::from_name(&tool.name).is_none())
            .filter(|tool| !disabled.contains(tool.name.as_str()))
            .map(|tool| (tool.name.clone(), tool))
            .collect();

        Self { builtins, external }
    }

    pub fn lookup(&self, name: &str) -> Option<ToolKind> {
        if let Some(tool) = BuiltinTool::from_name(name) {
            return self.builtins.contains(&tool).then_some(ToolKind::Builtin(tool));
        }
        self.external
            .contains_key(name)
            .then(|| ToolKind::External(name.to_string()))
    }

    /// Schemas in a stable order: built-ins first, then external by name.
    pub fn definitions(&self) -> Vec<Tool> {
        let mut tools: Vec<Tool> = self.builtins.iter().map(|t| builtin_definition(*t)).collect();
        let mut external: Vec<&Tool> = self.external.values().collect();
        external.sort_by(|a, b| a.name.cmp(&b.name));
        tools.extend(external.into_iter().cloned());
        tools
    }

    pub fn len(&self) -> usize {
        self.builtins.len() + self.external.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
