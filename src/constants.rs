// MIT License - Copyright (c) 2021 TJForc
// Protocol constants

/// Telnet command bytes used during option negotiation.
pub const IAC: u8 = 0xFF; // Interpret As Command
pub const DONT: u8 = 0xFE;
pub const DO: u8 = 0xFD;
pub const WONT: u8 = 0xFC;
pub const WILL: u8 = 0xFB;
pub const SB: u8 = 0xFA; // Subnegotiation begin
pub const SE: u8 = 0xF0; // Subnegotiation end

/// Default telnet port of the integration terminal.
pub const TELNET_PORT: u16 = 23;

/// Prompts sent by the integration terminal during login.
pub const LOGIN_PROMPT: &str = "login: ";
pub const PASSWORD_PROMPT: &str = "password: ";
pub const READY_PROMPT: &str = "GNET> ";

/// Longest partial line buffered from the terminal.
pub const MAX_LINE_LEN: usize = 4096;

/// Marker starting a device report, e.g. `~DEVICE,2,1,3`.
pub const DEVICE_MARKER: &str = "~DEVICE";

/// Sent by the controller before it closes the integration session.
pub const SHUTDOWN_PHRASE: &str = "shutting down the integration terminal";

/// Lutron button action codes carried in `~DEVICE` reports.
pub const ACTION_PRESS: u8 = 3;
pub const ACTION_RELEASE: u8 = 4;
pub const ACTION_HOLD: u8 = 5;
pub const ACTION_MULTI_TAP: u8 = 6;

/// Output action number for "set level" in `#OUTPUT` commands.
pub const OUTPUT_ACTION_SET_LEVEL: u8 = 1;

/// Scene number reserved for "reload configuration".
pub const RELOAD_SCENE: &str = "99";
pub const RELOAD_SCENE_NAME: &str = "Reload";

/// Fade time used when a scene section omits `fadetime`.
pub const DEFAULT_FADE_TIME: f64 = 1.0;

/// homebridge-mqtt topic suffixes, appended to the configured prefix.
pub const TOPIC_ADD: &str = "to/add";
pub const TOPIC_TO_SET: &str = "to/set";
pub const TOPIC_FROM_SET: &str = "from/set";
pub const TOPIC_FROM_ALL: &str = "from/#";

/// homebridge service and characteristic used to expose scenes.
pub const HOMEBRIDGE_SERVICE: &str = "Lightbulb";
pub const HOMEBRIDGE_CHARACTERISTIC: &str = "Brightness";
