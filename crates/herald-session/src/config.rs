//! Session configuration loaded from environment variables.
//!
//! Every setting has a default so the bot starts with zero configuration.
//! Command-line flags are applied on top through [`CliOverrides`], and
//! [`SessionConfig::validate`] rejects combinations that cannot work.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use herald_shared::constants::*;
use herald_shared::ConfigError;
use tracing::warn;

use crate::pairing::PhoneNumber;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Root directory for the store snapshot and the credential vault.
    /// Env: `HERALD_DATA_DIR`
    /// Default: platform data dir (`~/.local/share/herald` on Linux).
    pub data_dir: PathBuf,

    /// Credential vault directory.
    /// Env: `HERALD_SESSION_DIR`
    /// Default: `<data_dir>/session`
    pub session_dir: PathBuf,

    /// Store flush period.
    /// Env: `HERALD_STORE_FLUSH_SECS`
    /// Default: 10 s
    pub flush_interval: Duration,

    /// Resident memory ceiling in MiB.
    /// Env: `HERALD_MEMORY_LIMIT_MB`
    /// Default: 400
    pub memory_limit_mb: u64,

    /// Memory watchdog period.
    /// Env: `HERALD_MEMORY_PROBE_SECS`
    /// Default: 30 s
    pub memory_probe_interval: Duration,

    /// Window during which repeated calls from one peer notify only once.
    /// Env: `HERALD_CALL_COOLDOWN_SECS`
    /// Default: 60 s
    pub call_cooldown: Duration,

    /// Delay between rejecting a call and blocking the caller.
    pub call_block_delay: Duration,

    /// Delay before asking the transport for a linking code.
    pub pairing_delay: Duration,

    /// Upper bound on one connect attempt.
    pub connect_timeout: Duration,

    /// First reconnect delay; doubles per attempt.
    pub reconnect_base: Duration,

    /// Reconnect delay ceiling.
    pub reconnect_cap: Duration,

    /// Owner phone number, used for pairing and owner lookups.
    /// Env: `HERALD_OWNER_NUMBER`
    pub owner_number: Option<String>,

    /// Name used in bot output.
    /// Env: `HERALD_BOT_NAME`
    pub bot_name: String,

    pub theme_glyph: String,

    /// Respond to everyone (`true`) or only to the bot's own messages.
    /// Env: `HERALD_PUBLIC` (true/false)
    /// Default: `true`
    pub public: bool,

    /// Reject and block incoming calls.
    /// Env: `HERALD_ANTICALL` (true/false)
    /// Default: `true`
    pub anticall: bool,

    // -- Set from the command line only --
    /// Pair with a linking code instead of a QR code.
    pub pairing_code: bool,

    /// Use the mobile connection style.
    pub mobile: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let data_dir = ProjectDirs::from("org", "herald", "herald")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("./herald-data"));
        let session_dir = data_dir.join(SESSION_DIR_NAME);

        Self {
            data_dir,
            session_dir,
            flush_interval: Duration::from_secs(STORE_FLUSH_INTERVAL_SECS),
            memory_limit_mb: MEMORY_LIMIT_MB,
            memory_probe_interval: Duration::from_secs(MEMORY_PROBE_INTERVAL_SECS),
            call_cooldown: Duration::from_secs(CALL_COOLDOWN_SECS),
            call_block_delay: Duration::from_millis(CALL_BLOCK_DELAY_MS),
            pairing_delay: Duration::from_secs(PAIRING_DELAY_SECS),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            reconnect_base: Duration::from_millis(RECONNECT_BASE_MS),
            reconnect_cap: Duration::from_secs(RECONNECT_CAP_SECS),
            owner_number: None,
            bot_name: DEFAULT_BOT_NAME.to_string(),
            theme_glyph: DEFAULT_THEME_GLYPH.to_string(),
            public: true,
            anticall: true,
            pairing_code: false,
            mobile: false,
        }
    }
}

/// Command-line settings that take precedence over the environment.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub pairing_code: bool,
    pub mobile: bool,
    pub phone: Option<String>,
    pub data_dir: Option<PathBuf>,
}

impl SessionConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = lookup("HERALD_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
            config.session_dir = config.data_dir.join(SESSION_DIR_NAME);
        }

        if let Some(dir) = lookup("HERALD_SESSION_DIR") {
            config.session_dir = PathBuf::from(dir);
        }

        if let Some(secs) = parse_u64(&lookup, "HERALD_STORE_FLUSH_SECS") {
            config.flush_interval = Duration::from_secs(secs);
        }

        if let Some(mb) = parse_u64(&lookup, "HERALD_MEMORY_LIMIT_MB") {
            config.memory_limit_mb = mb;
        }

        if let Some(secs) = parse_u64(&lookup, "HERALD_MEMORY_PROBE_SECS") {
            config.memory_probe_interval = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_u64(&lookup, "HERALD_CALL_COOLDOWN_SECS") {
            config.call_cooldown = Duration::from_secs(secs);
        }

        if let Some(number) = lookup("HERALD_OWNER_NUMBER") {
            if !number.trim().is_empty() {
                config.owner_number = Some(number);
            }
        }

        if let Some(name) = lookup("HERALD_BOT_NAME") {
            if !name.trim().is_empty() {
                config.bot_name = name;
            }
        }

        if let Some(val) = lookup("HERALD_PUBLIC") {
            config.public = val != "false" && val != "0";
        }

        if let Some(val) = lookup("HERALD_ANTICALL") {
            config.anticall = val != "false" && val != "0";
        }

        config
    }

    pub fn with_overrides(mut self, cli: CliOverrides) -> Self {
        self.pairing_code = cli.pairing_code;
        self.mobile = cli.mobile;
        if cli.phone.is_some() {
            self.owner_number = cli.phone;
        }
        if let Some(dir) = cli.data_dir {
            self.session_dir = dir.join(SESSION_DIR_NAME);
            self.data_dir = dir;
        }
        self
    }

    /// Location of the store snapshot.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(STORE_SNAPSHOT_FILE)
    }

    /// Reject settings that cannot work. Returns the parsed owner number,
    /// if one is configured.
    pub fn validate(&self) -> Result<Option<PhoneNumber>, ConfigError> {
        if self.pairing_code && self.mobile {
            return Err(ConfigError::IncompatibleFlags(
                "--pairing-code cannot be used with --mobile".to_string(),
            ));
        }

        for (key, value) in [
            ("HERALD_STORE_FLUSH_SECS", self.flush_interval),
            ("HERALD_MEMORY_PROBE_SECS", self.memory_probe_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: "0".to_string(),
                });
            }
        }

        let owner = self
            .owner_number
            .as_deref()
            .map(PhoneNumber::parse)
            .transpose()?;

        if self.pairing_code && owner.is_none() {
            return Err(ConfigError::MissingPhoneNumber);
        }

        Ok(owner)
    }
}

fn parse_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(n) => Some(n),
        Err(_) => {
            warn!(key, value = %raw, "Invalid numeric setting, using default");
            None
        }
    }
}
