// MIT License - Copyright (c) 2021 TJForc
// Scenes and their output commands

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::constants::{DEFAULT_FADE_TIME, RELOAD_SCENE, RELOAD_SCENE_NAME};
use crate::error::ConfigError;
use crate::registry::sections::{parse_sections, Section, SectionFile};

/// One output level instruction of a scene.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub device_id: String,
    /// Target level, 0-100
    pub level: f64,
    /// Explicit fade time in seconds; the scene default applies when unset
    pub fade_time: Option<f64>,
}

impl Command {
    pub fn new(device_id: impl Into<String>, level: f64, fade_time: Option<f64>) -> Self {
        Self {
            device_id: device_id.into(),
            level,
            fade_time,
        }
    }

    /// Fade time to send for this command when run as part of a scene.
    pub fn effective_fade_time(&self, scene_default: f64) -> f64 {
        self.fade_time.unwrap_or(scene_default)
    }
}

/// A numbered set of output commands activated as a unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub number: String,
    pub name: Option<String>,
    pub default_fade_time: f64,
    pub commands: Vec<Command>,
}

impl Scene {
    pub fn new(
        number: impl Into<String>,
        name: Option<String>,
        default_fade_time: f64,
        commands: Vec<Command>,
    ) -> Self {
        Self {
            number: number.into(),
            name,
            default_fade_time,
            commands,
        }
    }

    /// The reserved scene that reloads the configuration instead of sending commands.
    pub fn reload() -> Self {
        Self::new(
            RELOAD_SCENE,
            Some(RELOAD_SCENE_NAME.to_string()),
            DEFAULT_FADE_TIME,
            Vec::new(),
        )
    }

    pub fn is_reload(&self) -> bool {
        self.number == RELOAD_SCENE
    }

    /// Name for log records: the display name when set, else the number.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.number)
    }
}

/// Parse a scene file into a complete scene table.
///
/// The reserved reload scene is always part of the returned table.
pub fn parse_scenes(
    origin: &str,
    text: &str,
) -> Result<HashMap<String, Arc<Scene>>, ConfigError> {
    let file = parse_sections(origin, text)?;
    let mut scenes = HashMap::new();

    for section in file.sections() {
        if section.name == RELOAD_SCENE {
            warn!("{origin}: section [{RELOAD_SCENE}] is reserved for reloading and is ignored");
            continue;
        }
        let scene = scene_from_section(&file, section)?;
        scenes.insert(scene.number.clone(), Arc::new(scene));
    }

    scenes.insert(RELOAD_SCENE.to_string(), Arc::new(Scene::reload()));
    Ok(scenes)
}

fn scene_from_section(file: &SectionFile, section: &Section) -> Result<Scene, ConfigError> {
    let name = file
        .get(section, "name")
        .filter(|n| !n.is_empty())
        .map(str::to_string);

    let default_fade_time = match file.get(section, "fadetime") {
        Some(value) => parse_fade_time(section, "fadetime", value)?,
        None => DEFAULT_FADE_TIME,
    };

    let commands = file
        .numeric_entries(section)
        .map(|(device_id, value)| parse_command(section, device_id, value))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Scene::new(
        section.name.clone(),
        name,
        default_fade_time,
        commands,
    ))
}

/// Parse `level` or `level, fade` for one device entry.
fn parse_command(section: &Section, device_id: &str, value: &str) -> Result<Command, ConfigError> {
    let (level_str, fade_str) = match value.split_once(',') {
        Some((level, fade)) => (level.trim(), Some(fade.trim())),
        None => (value, None),
    };

    let level = level_str
        .parse::<f64>()
        .ok()
        .filter(|l| (0.0..=100.0).contains(l))
        .ok_or_else(|| invalid(section, device_id, value, "level must be a number from 0 to 100"))?;

    let fade_time = fade_str
        .map(|fade| parse_fade_time(section, device_id, fade))
        .transpose()?;

    Ok(Command::new(device_id, level, fade_time))
}

fn parse_fade_time(section: &Section, key: &str, value: &str) -> Result<f64, ConfigError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite() && *f >= 0.0)
        .ok_or_else(|| invalid(section, key, value, "fade time must be a non-negative number"))
}

fn invalid(section: &Section, key: &str, value: &str, details: &str) -> ConfigError {
    ConfigError::InvalidValue {
        section: section.name.clone(),
        key: key.to_string(),
        value: value.to_string(),
        details: details.to_string(),
    }
}
