/// Application name
pub const APP_NAME: &str = "Herald";

/// Default bot display name used in liveness announcements
pub const DEFAULT_BOT_NAME: &str = "HERALD BOT";

/// Default theme glyph prefixed to bot output
pub const DEFAULT_THEME_GLYPH: &str = "•";

/// Server part of an individual user address
pub const USER_SERVER: &str = "s.whatsapp.net";

/// Server part of a group conversation address
pub const GROUP_SERVER: &str = "g.us";

/// Reserved conversation carrying status (story) updates
pub const STATUS_BROADCAST: &str = "status@broadcast";

/// Message ids of the bot's own protocol receipts start with this prefix
pub const RECEIPT_ID_PREFIX: &str = "BAE5";

/// ...and have exactly this length
pub const RECEIPT_ID_LEN: usize = 16;

/// Disconnect status code signalling explicit logout (credentials revoked)
pub const LOGGED_OUT_STATUS: u16 = 401;

/// Durable store flush interval in seconds
pub const STORE_FLUSH_INTERVAL_SECS: u64 = 10;

/// Memory watchdog probe interval in seconds
pub const MEMORY_PROBE_INTERVAL_SECS: u64 = 30;

/// Resident memory limit in MiB before the watchdog exits the process
pub const MEMORY_LIMIT_MB: u64 = 400;

/// Call guard notification cooldown in seconds
pub const CALL_COOLDOWN_SECS: u64 = 60;

/// Delay between rejecting a call and blocking the caller, in milliseconds
pub const CALL_BLOCK_DELAY_MS: u64 = 800;

/// Delay before requesting a linking code, letting the transport settle
pub const PAIRING_DELAY_SECS: u64 = 3;

/// Reconnect backoff: first delay in milliseconds
pub const RECONNECT_BASE_MS: u64 = 2_000;

/// Reconnect backoff ceiling in seconds
pub const RECONNECT_CAP_SECS: u64 = 60;

/// Reconnect backoff jitter, as a fraction of the computed delay
pub const RECONNECT_JITTER: f64 = 0.2;

/// Upper bound on a single connect attempt, in seconds
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Linking codes are shown in groups of this many characters
pub const LINKING_CODE_GROUP: usize = 4;

/// Separator between linking code groups
pub const LINKING_CODE_SEPARATOR: char = '-';

/// Process exit code for fatal configuration / startup failures
pub const EXIT_FATAL_CONFIG: i32 = 1;

/// Process exit code for a memory watchdog trip
pub const EXIT_MEMORY_LIMIT: i32 = 2;

/// Snapshot file name inside the data directory
pub const STORE_SNAPSHOT_FILE: &str = "store.json";

/// Credential vault directory name inside the data directory
pub const SESSION_DIR_NAME: &str = "session";
