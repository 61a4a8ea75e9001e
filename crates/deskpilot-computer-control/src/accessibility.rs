use serde::{Deserialize, Serialize};

/// One element of an application's accessibility tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AxElement {
    pub role: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub focused: bool,
    #[serde(default)]
    pub position: Option<(f64, f64)>,
    #[serde(default)]
    pub size: Option<(f64, f64)>,
    #[serde(default)]
    pub depth: usize,
}

fn default_true() -> bool {
    true
}

impl AxElement {
    pub fn new(role: &str) -> Self {
        Self {
            role: role.to_string(),
            enabled: true,
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn with_value(mut self, value: &str) -> Self {
        self.value = Some(value.to_string());
        self
    }

    /// Characters of human-readable text carried by this element.
    pub fn text_len(&self) -> usize {
        [&self.title, &self.value, &self.label]
            .iter()
            .filter_map(|s| s.as_ref())
            .map(|s| s.trim().chars().count())
            .sum()
    }

    /// One-line description, indented by depth.
    pub fn describe(&self) -> String {
        let mut parts = vec![self.role.clone()];

        if let Some(ref title) = self.title {
            parts.push(format!("\"{}\"", title));
        }
        if let Some(ref label) = self.label {
            parts.push(format!("label=\"{}\"", label));
        }
        if let Some(ref value) = self.value {
            parts.push(format!("value=\"{}\"", value));
        }
        if let (Some((x, y)), Some((w, h))) = (self.position, self.size) {
            parts.push(format!("@({:.0},{:.0} {:.0}x{:.0})", x, y, w, h));
        }
        if self.focused {
            parts.push("[focused]".to_string());
        }
        if !self.enabled {
            parts.push("[disabled]".to_string());
        }

        format!("{}{}", "  ".repeat(self.depth), parts.join(" "))
    }
}

/// Flattened accessibility tree of one application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AxSnapshot {
    pub app: String,
    pub elements: Vec<AxElement>,
}

impl AxSnapshot {
    pub fn total_text_chars(&self) -> usize {
        self.elements.iter().map(AxElement::text_len).sum()
    }

    /// Whether the tree says enough about the app to be worth sending
    /// instead of a screenshot.
    pub fn is_useful(&self, min_elements: usize, min_text_chars: usize) -> bool {
        self.elements.len() >= min_elements || self.total_text_chars() >= min_text_chars
    }

    pub fn format(&self) -> String {
        let mut out = format!("Accessibility tree for {}:\n", self.app);
        for element in &self.elements {
            out.push_str(&element.describe());
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usefulness_by_element_count() {
        let snapshot = AxSnapshot {
            app: "Notes".to_string(),
            elements: vec![AxElement::new("AXButton"); 5],
        };
        assert!(snapshot.is_useful(5, 200));
        assert!(!snapshot.is_useful(6, 200));
    }

    #[test]
    fn test_usefulness_by_text() {
        let snapshot = AxSnapshot {
            app: "Notes".to_string(),
            elements: vec![AxElement::new("AXTextArea").with_value(&"x".repeat(250))],
        };
        assert!(snapshot.is_useful(5, 200));
        assert!(!AxSnapshot::default().is_useful(1, 1));
    }

    #[test]
    fn test_describe_and_deserialize_defaults() {
        let element: AxElement =
            serde_json::from_str(r#"{"role":"AXButton","title":"Send","depth":2}"#).unwrap();
        assert!(element.enabled);
        assert_eq!(element.describe(), "    AXButton \"Send\"");
    }
}
