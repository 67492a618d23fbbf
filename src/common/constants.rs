//! Shared constants: setting keys, limits and defaults.

/// Numeric user identifier as used by the settings store.
pub type UserId = i32;

/// No user is currently observed.
pub const INVALID_USER_ID: UserId = -1;

/// Restart sentinel selecting every user with a timer record.
pub const ALL_USERS: UserId = -1;

// # Settings store keys

pub const SETTING_DARK_MODE_MODE: &str = "settings.uiappearance.darkmode_mode";
pub const SETTING_DARK_MODE_START_TIME: &str = "settings.uiappearance.darkmode_starttime";
pub const SETTING_DARK_MODE_END_TIME: &str = "settings.uiappearance.darkmode_endtime";

/// Every key the dark mode manager observes, in registration order.
pub const DARK_MODE_SETTING_KEYS: [&str; 3] = [
    SETTING_DARK_MODE_MODE,
    SETTING_DARK_MODE_START_TIME,
    SETTING_DARK_MODE_END_TIME,
];

// # Time-of-day window

pub const MINUTES_PER_HOUR: i32 = 60;
pub const MINUTES_PER_DAY: i32 = 24 * MINUTES_PER_HOUR;

/// Value used for a window bound that was never stored.
pub const UNSET_WINDOW_BOUND: i32 = -1;

// # Alarm worker

/// Upper bound on a single alarm worker wait, so wall-clock jumps are noticed.
pub const ALARM_MAX_WAIT_SECS: u64 = 30;

// # Settings file watching

/// Debounce for settings file change events (editors write in several steps).
pub const SETTINGS_DEBOUNCE_MS: u64 = 250;

// # Persisted system parameters

pub const PERSIST_DARK_MODE_KEY: &str = "persist.ace.darkmode";
pub const PERSIST_FONT_SCALE_KEY: &str = "persist.sys.font_scale_for_user0";
pub const PERSIST_FONT_WEIGHT_SCALE_KEY: &str = "persist.sys.font_wght_scale_for_user0";

pub const LIGHT: &str = "light";
pub const DARK: &str = "dark";
pub const BASE_SCALE: &str = "1";

/// Permission required by every call on the appearance surface.
pub const PERMISSION_UPDATE_CONFIGURATION: &str = "ohos.permission.UPDATE_CONFIGURATION";

// # Daemon configuration defaults

pub const CONFIG_FILE_NAME: &str = "appearanced.toml";
pub const DEFAULT_SETTINGS_FILE_NAME: &str = "settings.toml";
pub const DEFAULT_PARAMETERS_FILE_NAME: &str = "parameters.toml";
pub const DEFAULT_USER_ID: UserId = 0;
pub const DEFAULT_WATCH_SETTINGS: bool = true;
pub const DEFAULT_MONITOR_SYSTEM_EVENTS: bool = true;

// # Exit codes

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
