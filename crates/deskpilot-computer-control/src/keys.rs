//! Key combinations such as `cmd+shift+t` and their macOS key codes.

use serde::{Deserialize, Serialize};

use crate::AutomationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Modifier {
    Command,
    Shift,
    Option,
    Control,
}

impl Modifier {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "cmd" | "command" | "meta" | "super" => Some(Self::Command),
            "shift" => Some(Self::Shift),
            "alt" | "opt" | "option" => Some(Self::Option),
            "ctrl" | "control" => Some(Self::Control),
            _ => None,
        }
    }

    fn applescript(&self) -> &'static str {
        match self {
            Self::Command => "command down",
            Self::Shift => "shift down",
            Self::Option => "option down",
            Self::Control => "control down",
        }
    }
}

/// A key with zero or more modifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCombo {
    pub modifiers: Vec<Modifier>,
    pub key: String,
}

impl KeyCombo {
    /// Parse `cmd+shift+t`, `Return`, `ctrl-a` and similar.
    pub fn parse(combo: &str) -> Result<Self, AutomationError> {
        let lowered = combo.trim().to_lowercase();
        if lowered.is_empty() {
            return Err(AutomationError::InvalidInput("empty key combo".to_string()));
        }

        // A bare "+" or "-" is the key itself
        let tokens: Vec<&str> = if lowered == "+" || lowered == "-" {
            vec![lowered.as_str()]
        } else {
            lowered
                .split(['+', '-'])
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect()
        };

        let Some((key, modifier_tokens)) = tokens.split_last() else {
            return Err(AutomationError::InvalidInput(format!("invalid key combo '{}'", combo)));
        };

        let mut modifiers = Vec::new();
        for token in modifier_tokens {
            match Modifier::parse(token) {
                Some(m) if !modifiers.contains(&m) => modifiers.push(m),
                Some(_) => {}
                None => {
                    return Err(AutomationError::InvalidInput(format!(
                        "unknown modifier '{}' in '{}'",
                        token, combo
                    )))
                }
            }
        }

        if Modifier::parse(key).is_some() {
            return Err(AutomationError::InvalidInput(format!(
                "key combo '{}' has no key",
                combo
            )));
        }

        Ok(Self {
            modifiers,
            key: key.to_string(),
        })
    }

    /// System Events command that presses this combination.
    pub fn to_applescript(&self) -> String {
        let using = if self.modifiers.is_empty() {
            String::new()
        } else {
            format!(
                " using {{{}}}",
                self.modifiers
                    .iter()
                    .map(Modifier::applescript)
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        };

        match key_to_keycode(&self.key) {
            Some(code) => format!("key code {}{}", code, using),
            None => format!("keystroke \"{}\"{}", escape_applescript(&self.key), using),
        }
    }
}

impl std::fmt::Display for KeyCombo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for m in &self.modifiers {
            let name = match m {
                Modifier::Command => "cmd",
                Modifier::Shift => "shift",
                Modifier::Option => "alt",
                Modifier::Control => "ctrl",
            };
            write!(f, "{}+", name)?;
        }
        write!(f, "{}", self.key)
    }
}

/// Escape a string for inclusion in an AppleScript string literal.
pub fn escape_applescript(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// macOS virtual key code for a named key.
/// See: https://eastmanreference.com/complete-list-of-applescript-key-codes
pub fn key_to_keycode(key: &str) -> Option<u16> {
    match key.to_lowercase().as_str() {
        "a" => Some(0x00),
        "s" => Some(0x01),
        "d" => Some(0x02),
        "f" => Some(0x03),
        "h" => Some(0x04),
        "g" => Some(0x05),
        "z" => Some(0x06),
        "x" => Some(0x07),
        "c" => Some(0x08),
        "v" => Some(0x09),
        "b" => Some(0x0B),
        "q" => Some(0x0C),
        "w" => Some(0x0D),
        "e" => Some(0x0E),
        "r" => Some(0x0F),
        "y" => Some(0x10),
        "t" => Some(0x11),
        "1" => Some(0x12),
        "2" => Some(0x13),
        "3" => Some(0x14),
        "4" => Some(0x15),
        "6" => Some(0x16),
        "5" => Some(0x17),
        "=" => Some(0x18),
        "9" => Some(0x19),
        "7" => Some(0x1A),
        "-" => Some(0x1B),
        "8" => Some(0x1C),
        "0" => Some(0x1D),
        "]" => Some(0x1E),
        "o" => Some(0x1F),
        "u" => Some(0x20),
        "[" => Some(0x21),
        "i" => Some(0x22),
        "p" => Some(0x23),
        "return" | "enter" => Some(0x24),
        "l" => Some(0x25),
        "j" => Some(0x26),
        "'" => Some(0x27),
        "k" => Some(0x28),
        ";" => Some(0x29),
        "\\" => Some(0x2A),
        "," => Some(0x2B),
        "/" => Some(0x2C),
        "n" => Some(0x2D),
        "m" => Some(0x2E),
        "." => Some(0x2F),
        "tab" => Some(0x30),
        "space" => Some(0x31),
        "`" => Some(0x32),
        "delete" | "backspace" => Some(0x33),
        "escape" | "esc" => Some(0x35),
        "forwarddelete" => Some(0x75),
        "home" => Some(0x73),
        "end" => Some(0x77),
        "pageup" => Some(0x74),
        "pagedown" => Some(0x79),
        "f1" => Some(0x7A),
        "f2" => Some(0x78),
        "f3" => Some(0x63),
        "f4" => Some(0x76),
        "f5" => Some(0x60),
        "f6" => Some(0x61),
        "f7" => Some(0x62),
        "f8" => Some(0x64),
        "f9" => Some(0x65),
        "f10" => Some(0x6D),
        "f11" => Some(0x67),
        "f12" => Some(0x6F),
        "left" => Some(0x7B),
        "right" => Some(0x7C),
        "down" => Some(0x7D),
        "up" => Some(0x7E),
        _ => None,
    }
}
