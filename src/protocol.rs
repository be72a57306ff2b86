// MIT License - Copyright (c) 2021 TJForc
// Lutron integration protocol

use crate::constants::{
    ACTION_HOLD, ACTION_MULTI_TAP, ACTION_PRESS, ACTION_RELEASE, DEVICE_MARKER,
    OUTPUT_ACTION_SET_LEVEL, SHUTDOWN_PHRASE,
};

/// Lines received from the integration terminal, decoded.
///
/// # Line Format
///
/// The terminal mixes space- and comma-delimited tokens on one line, and
/// prefixes output with the `GNET>` prompt:
///
/// ```text
/// GNET> ~DEVICE,2,1,3
/// ~OUTPUT,10,1,75.00
/// shutting down the integration terminal
/// ```
///
/// A line may carry several device reports. Only device reports with exactly
/// three fields (`device,button,action`) are button events; device reports
/// with other shapes (LED state, scene changes) are ignored along with
/// everything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A button on a keypad or Pico changed state
    Button(ButtonEvent),
    /// The controller is about to close the integration session
    ShutdownNotice,
    /// Prompts, echoes, blank lines and anything else
    Ignored,
}

/// A `~DEVICE,<device>,<button>,<action>` report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonEvent {
    pub device_id: String,
    pub button_id: String,
    pub action: ButtonAction,
}

impl ButtonEvent {
    pub fn is_pressed(&self) -> bool {
        self.action == ButtonAction::Pressed
    }
}

/// Button action codes reported by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonAction {
    /// 3
    Pressed,
    /// 4
    Released,
    /// 5
    Hold,
    /// 6
    MultiTap,
    /// Any other action field, kept verbatim
    Other(String),
}

impl ButtonAction {
    /// Parse the action field of a device report.
    pub fn from_code(s: &str) -> Self {
        match s.parse::<u8>() {
            Ok(ACTION_PRESS) => Self::Pressed,
            Ok(ACTION_RELEASE) => Self::Released,
            Ok(ACTION_HOLD) => Self::Hold,
            Ok(ACTION_MULTI_TAP) => Self::MultiTap,
            _ => Self::Other(s.to_string()),
        }
    }
}

/// Decode one raw line from the integration terminal.
///
/// Returns the first event on the line; see `parse_events` for all of them.
pub fn parse_line(raw: &str) -> Event {
    parse_events(raw)
        .into_iter()
        .next()
        .unwrap_or(Event::Ignored)
}

/// Every event on a raw line, in line order. Empty when the line carries
/// nothing of interest.
pub fn parse_events(raw: &str) -> Vec<Event> {
    // Checked on the whole line: the phrase itself contains spaces.
    if raw.contains(SHUTDOWN_PHRASE) {
        return vec![Event::ShutdownNotice];
    }

    raw.split_whitespace()
        .filter_map(parse_device_report)
        .map(Event::Button)
        .collect()
}

/// Parse a single whitespace-free token such as `~DEVICE,2,1,3`.
fn parse_device_report(token: &str) -> Option<ButtonEvent> {
    if !token.starts_with(DEVICE_MARKER) {
        return None;
    }
    let fields: Vec<&str> = token.split(',').skip(1).collect();
    let [device_id, button_id, action] = fields.as_slice() else {
        return None;
    };
    if device_id.is_empty() || button_id.is_empty() {
        return None;
    }
    Some(ButtonEvent {
        device_id: device_id.to_string(),
        button_id: button_id.to_string(),
        action: ButtonAction::from_code(action),
    })
}

/// Render an `#OUTPUT` set-level command line.
///
/// e.g. `("10", 75.0, 2.0)` → `#OUTPUT,10,1,75,2\n`
pub fn format_output_command(device_id: &str, level: f64, fade_time: f64) -> String {
    format!(
        "#OUTPUT,{},{},{},{}\n",
        device_id, OUTPUT_ACTION_SET_LEVEL, level, fade_time
    )
}
