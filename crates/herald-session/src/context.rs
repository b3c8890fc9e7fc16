use chrono::{DateTime, Local};
use herald_shared::{ConfigError, Jid};

use crate::config::SessionConfig;
use crate::pairing::PhoneNumber;

/// Process-wide settings built once at startup and shared by `Arc`.
#[derive(Debug, Clone)]
pub struct AppContext {
    pub config: SessionConfig,
    pub bot_name: String,
    pub theme_glyph: String,
    pub owner: Option<PhoneNumber>,
}

impl AppContext {
    /// Validate `config` and derive the shared context from it.
    pub fn from_config(config: SessionConfig) -> Result<Self, ConfigError> {
        let owner = config.validate()?;
        Ok(Self {
            bot_name: config.bot_name.clone(),
            theme_glyph: config.theme_glyph.clone(),
            owner,
            config,
        })
    }

    pub fn owner_jid(&self) -> Option<Jid> {
        self.owner.as_ref().map(PhoneNumber::jid)
    }

    /// Message sent to the bot's own chat once a session opens.
    pub fn liveness_text(&self, now: DateTime<Local>) -> String {
        let g = &self.theme_glyph;
        format!(
            "{g} {} connected\n{g} Time: {}\n{g} Status: Online",
            self.bot_name,
            now.format("%Y-%m-%d %H:%M:%S")
        )
    }

    /// Sent back to a conversation whose handler failed.
    pub fn failure_text(&self) -> String {
        format!(
            "{} {} could not process that message. Please try again later.",
            self.theme_glyph, self.bot_name
        )
    }

    /// Sent to a caller after their call was rejected.
    pub fn call_rejected_text(&self) -> String {
        format!(
            "{} {} does not accept calls. You have been blocked automatically.",
            self.theme_glyph, self.bot_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_liveness_text() {
        let ctx = AppContext::from_config(SessionConfig::default()).unwrap();
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap();
        let text = ctx.liveness_text(now);

        assert!(text.starts_with("• HERALD BOT connected"));
        assert!(text.contains("Time: 2024-03-09 14:05:00"));
        assert!(text.ends_with("Status: Online"));
    }

    #[test]
    fn test_owner_from_config() {
        let config = SessionConfig {
            owner_number: Some("+1 555 123 4567".into()),
            ..SessionConfig::default()
        };
        let ctx = AppContext::from_config(config).unwrap();
        assert_eq!(ctx.owner_jid().unwrap().to_string(), "15551234567@s.whatsapp.net");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = SessionConfig {
            owner_number: Some("call me".into()),
            ..SessionConfig::default()
        };
        assert!(AppContext::from_config(config).is_err());
    }
}
