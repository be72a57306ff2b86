// MIT License - Copyright (c) 2021 TJForc
// Pico remotes

use std::collections::HashMap;

use crate::error::ConfigError;
use crate::registry::sections::parse_sections;

/// A Pico remote: maps its buttons to scene numbers.
///
/// Buttons refer to scenes by number, so a scene can be reloaded without
/// touching the Picos that trigger it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pico {
    pub device_id: String,
    pub name: Option<String>,
    pub buttons: HashMap<String, String>,
}

impl Pico {
    pub fn new(
        device_id: impl Into<String>,
        name: Option<String>,
        buttons: HashMap<String, String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            name,
            buttons,
        }
    }

    /// Scene number mapped to `button_id`, if any.
    pub fn scene_for(&self, button_id: &str) -> Option<&str> {
        self.buttons.get(button_id).map(String::as_str)
    }
}

/// Parse a Pico file into a complete Pico table.
pub fn parse_picos(origin: &str, text: &str) -> Result<HashMap<String, Pico>, ConfigError> {
    let file = parse_sections(origin, text)?;
    let mut picos = HashMap::new();

    for section in file.sections() {
        let mut buttons = HashMap::new();
        for (button_id, scene_number) in file.numeric_entries(section) {
            if scene_number.is_empty() {
                return Err(ConfigError::InvalidValue {
                    section: section.name.clone(),
                    key: button_id.to_string(),
                    value: String::new(),
                    details: "button needs a scene number".to_string(),
                });
            }
            buttons.insert(button_id.to_string(), scene_number.to_string());
        }
        let name = file
            .get(section, "name")
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        picos.insert(
            section.name.clone(),
            Pico::new(section.name.clone(), name, buttons),
        );
    }

    Ok(picos)
}
