//! User Channel Message Types
//!
//! Wire format of the `data:` payload of default-event stream frames.
//!
//! ```json
//! {"channel":"user:42","message_id":"m-1","event_type":"card_updated",
//!  "ticker":"NVDA","reason":"llm_complete","ts":"2025-01-06T15:00:00Z"}
//! ```

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::domain::instrument::InstrumentKey;

/// Notification type carried in `event_type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    /// A card for `ticker` changed on the backend.
    CardUpdated,
    /// `ticker` entered the gapper list.
    EnteredGapper,
    /// Anything else, surfaced as an informational message.
    Other(String),
}

impl NotificationKind {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "card_updated" => Self::CardUpdated,
            "entered_gapper" => Self::EnteredGapper,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Decoded user channel notification.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserChannelMessage {
    /// Channel the message was published on.
    #[serde(default)]
    pub channel: Option<String>,
    /// Unique message id, used for replay dedup. Numeric ids are kept as text.
    #[serde(default, deserialize_with = "lenient_id")]
    pub message_id: Option<String>,
    /// Notification type.
    #[serde(default)]
    pub event_type: String,
    /// Instrument the notification is about.
    #[serde(default, deserialize_with = "lenient_ticker")]
    pub ticker: Option<InstrumentKey>,
    /// Backend-supplied reason.
    #[serde(default)]
    pub reason: Option<String>,
    /// Backend timestamp as sent.
    #[serde(default)]
    pub ts: Option<Value>,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserChannelMessage {
    /// Decode frame data.
    ///
    /// # Errors
    ///
    /// Returns the JSON error when `data` is not a message object.
    pub fn decode(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }

    /// Parsed notification type.
    #[must_use]
    pub fn kind(&self) -> NotificationKind {
        NotificationKind::parse(&self.event_type)
    }

    /// Human-readable line for informational notices.
    #[must_use]
    pub fn describe(&self) -> String {
        let subject = self
            .ticker
            .as_ref()
            .map_or_else(String::new, |ticker| format!(" for {}", ticker.cashtag()));
        let event = if self.event_type.is_empty() {
            "update"
        } else {
            self.event_type.as_str()
        };
        match self.reason.as_deref().filter(|r| !r.is_empty()) {
            Some(reason) => format!("Backend {event}{subject}: {reason}"),
            None => format!("Backend {event}{subject}"),
        }
    }
}

/// Invalid or non-string tickers decode as `None` instead of failing the message.
fn lenient_ticker<'de, D>(deserializer: D) -> Result<Option<InstrumentKey>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(Value::as_str)
        .and_then(InstrumentKey::normalize))
}

/// String or number ids; anything else decodes as `None`.
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(id)) => Some(id).filter(|id| !id.is_empty()),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn decodes_card_updated() {
        let message = UserChannelMessage::decode(
            r#"{"channel":"user:1","message_id":"m-1","event_type":"card_updated","ticker":"$nvda","reason":"llm","ts":1736175600,"extra_field":true}"#,
        )
        .unwrap();

        assert_eq!(message.kind(), NotificationKind::CardUpdated);
        assert_eq!(message.ticker.as_ref().map(InstrumentKey::as_str), Some("NVDA"));
        assert_eq!(message.message_id.as_deref(), Some("m-1"));
        assert_eq!(message.extra.get("extra_field"), Some(&Value::Bool(true)));
    }

    #[test]
    fn bad_ticker_does_not_fail_decode() {
        let message =
            UserChannelMessage::decode(r#"{"event_type":"card_updated","ticker":"not valid!"}"#)
                .unwrap();
        assert!(message.ticker.is_none());

        let message = UserChannelMessage::decode(r#"{"event_type":"x","ticker":42}"#).unwrap();
        assert!(message.ticker.is_none());
    }

    #[test_case(r#""m-7""#, Some("m-7") ; "string id")]
    #[test_case("1042", Some("1042") ; "numeric id")]
    #[test_case("null", None ; "null id")]
    #[test_case("[1]", None ; "array id")]
    fn message_id_is_lenient(raw: &str, expected: Option<&str>) {
        let data = format!(r#"{{"event_type":"card_updated","ticker":"NVDA","message_id":{raw}}}"#);
        let message = UserChannelMessage::decode(&data).unwrap();
        assert_eq!(message.message_id.as_deref(), expected);
        assert_eq!(message.kind(), NotificationKind::CardUpdated);
    }

    #[test]
    fn non_object_fails_decode() {
        assert!(UserChannelMessage::decode("[1,2]").is_err());
        assert!(UserChannelMessage::decode("not json").is_err());
    }

    #[test_case("card_updated", NotificationKind::CardUpdated; "card updated")]
    #[test_case("ENTERED_GAPPER", NotificationKind::EnteredGapper; "gapper uppercase")]
    #[test_case("watchlist_synced", NotificationKind::Other("watchlist_synced".into()); "other")]
    fn notification_kinds(raw: &str, expected: NotificationKind) {
        assert_eq!(NotificationKind::parse(raw), expected);
    }

    #[test]
    fn describe_includes_ticker_and_reason() {
        let message = UserChannelMessage::decode(
            r#"{"event_type":"price_alert","ticker":"amd","reason":"crossed vwap"}"#,
        )
        .unwrap();
        assert_eq!(message.describe(), "Backend price_alert for $AMD: crossed vwap");
    }
}
