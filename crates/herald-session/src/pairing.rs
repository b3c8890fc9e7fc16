//! Phone-number pairing.
//!
//! Runs only while the session has no registration: validates the owner's
//! number up front, then, once the transport has settled, exchanges it for
//! a linking code the operator types into the phone.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use herald_net::TransportHandle;
use herald_shared::constants::{LINKING_CODE_GROUP, LINKING_CODE_SEPARATOR};
use herald_shared::{ConfigError, Jid};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::PairingError;

const MIN_DIGITS: usize = 8;
const MAX_DIGITS: usize = 15;

/// International phone number, digits only, no leading zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Accepts the usual ways people write numbers (`+1 (555) 123-4567`,
    /// `44.20.7946.0958`); anything containing letters is rejected.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidPhoneNumber {
            input: input.to_string(),
            reason,
        };

        let mut digits = String::with_capacity(input.len());
        for c in input.trim().chars() {
            match c {
                '0'..='9' => digits.push(c),
                '+' | ' ' | '-' | '(' | ')' | '.' => {}
                c if c.is_alphabetic() => return Err(invalid("contains letters".into())),
                c => return Err(invalid(format!("unexpected character `{c}`"))),
            }
        }

        if digits.is_empty() {
            return Err(invalid("no digits".into()));
        }
        if digits.len() < MIN_DIGITS {
            return Err(invalid(format!(
                "{} digits, need at least {MIN_DIGITS}",
                digits.len()
            )));
        }
        if digits.len() > MAX_DIGITS {
            return Err(invalid(format!(
                "{} digits, at most {MAX_DIGITS} allowed",
                digits.len()
            )));
        }
        if digits.starts_with('0') {
            return Err(invalid(
                "must start with the country code, not 0".into(),
            ));
        }

        Ok(Self(digits))
    }

    pub fn digits(&self) -> &str {
        &self.0
    }

    pub fn jid(&self) -> Jid {
        Jid::from_phone(&self.0)
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{}", self.0)
    }
}

/// Split a raw linking code into groups of four: `ABCD1234` → `ABCD-1234`.
///
/// Whitespace and existing separators are dropped first, so formatting an
/// already formatted code is a no-op.
pub fn format_linking_code(raw: &str) -> String {
    let chars: Vec<char> = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != LINKING_CODE_SEPARATOR)
        .collect();

    chars
        .chunks(LINKING_CODE_GROUP)
        .map(|group| group.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(&LINKING_CODE_SEPARATOR.to_string())
}

/// One-shot linking code request for a single session.
#[derive(Debug, Clone)]
pub struct PairingNegotiator {
    phone: PhoneNumber,
    delay: Duration,
}

impl PairingNegotiator {
    pub fn new(phone: PhoneNumber, delay: Duration) -> Self {
        Self { phone, delay }
    }

    pub fn phone(&self) -> &PhoneNumber {
        &self.phone
    }

    /// Wait for the configured delay, then request and format a code.
    pub async fn negotiate(&self, handle: &dyn TransportHandle) -> Result<String, PairingError> {
        tokio::time::sleep(self.delay).await;

        let raw = handle.request_linking_code(self.phone.digits()).await?;
        if raw.trim().is_empty() {
            return Err(PairingError::EmptyCode);
        }
        Ok(format_linking_code(&raw))
    }

    /// Run [`negotiate`](Self::negotiate) in the background. The code is
    /// logged for the operator; failure is logged and not retried.
    pub fn spawn(self, handle: Arc<dyn TransportHandle>) -> JoinHandle<()> {
        tokio::spawn(async move {
            match self.negotiate(handle.as_ref()).await {
                Ok(code) => {
                    info!(phone = %self.phone, code = %code, "Linking code ready, enter it on the phone");
                }
                Err(e) => {
                    error!(phone = %self.phone, error = %e, "Could not obtain a linking code");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_net::{ConnectOptions, Credentials, LoopbackTransport, Transport};

    #[test]
    fn test_accepts_international_numbers() {
        assert_eq!(
            PhoneNumber::parse("+1 (555) 123-4567").unwrap().digits(),
            "15551234567"
        );
        assert_eq!(
            PhoneNumber::parse("44.20.7946.0958").unwrap().digits(),
            "442079460958"
        );
        assert_eq!(
            PhoneNumber::parse("911234567890").unwrap().to_string(),
            "+911234567890"
        );
    }

    #[test]
    fn test_rejects_bad_numbers() {
        for input in ["", "+", "12345ab890", "1234567", "1234567890123456", "0123456789", "123#4567890"] {
            let err = PhoneNumber::parse(input).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidPhoneNumber { .. }),
                "{input:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_rejection_is_fatal_config() {
        let err: herald_shared::HeraldError = PhoneNumber::parse("abc").unwrap_err().into();
        assert_eq!(err.kind(), herald_shared::ErrorKind::FatalConfig);
    }

    #[test]
    fn test_format_linking_code() {
        assert_eq!(format_linking_code("ABCD1234"), "ABCD-1234");
        assert_eq!(format_linking_code("ABCD-1234"), "ABCD-1234");
        assert_eq!(format_linking_code("ABCDEFGHIJ"), "ABCD-EFGH-IJ");
        assert_eq!(format_linking_code("AB"), "AB");
        assert_eq!(format_linking_code(""), "");
    }

    #[tokio::test]
    async fn test_negotiate_requests_code_for_digits() {
        let (transport, controller) = LoopbackTransport::new("100@s.whatsapp.net".parse().unwrap());
        controller.set_linking_code("ZXCV5678");
        let conn = transport
            .connect(&Credentials::empty(), &ConnectOptions::default())
            .await
            .unwrap();

        let negotiator = PairingNegotiator::new(
            PhoneNumber::parse("+1 555 123 4567").unwrap(),
            Duration::from_millis(5),
        );
        let code = negotiator.negotiate(conn.handle.as_ref()).await.unwrap();

        assert_eq!(code, "ZXCV-5678");
        assert_eq!(controller.linking_requests(), vec!["15551234567".to_string()]);
    }

    #[tokio::test]
    async fn test_negotiate_fails_on_closed_session() {
        let (transport, controller) = LoopbackTransport::new("100@s.whatsapp.net".parse().unwrap());
        let conn = transport
            .connect(&Credentials::empty(), &ConnectOptions::default())
            .await
            .unwrap();
        controller.drop_session();

        let negotiator =
            PairingNegotiator::new(PhoneNumber::parse("15551234567").unwrap(), Duration::ZERO);
        let err = negotiator.negotiate(conn.handle.as_ref()).await.unwrap_err();
        assert!(matches!(err, PairingError::Transport(_)));
    }
}
