//! Device topic scheme.
//!
//! ```text
//! <base>/pb/d/<hostname>/<type>
//! ```
//!
//! `<type>` is the message type suffix (`hb`, `status`, `alarm`, `lw`,
//! `login`, `response`, `cmd`).

use crate::error::RouterError;
use fleet_wire::MessageType;

/// Default topic base used by the device firmware
pub const DEFAULT_TOPIC_BASE: &str = "esagtech";

/// A parsed device topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTopic {
    /// Device hostname
    pub hostname: String,
    /// Message type from the last segment
    pub message_type: MessageType,
}

/// Topic layout rooted at a configurable base
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    base: String,
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_BASE)
    }
}

impl TopicScheme {
    /// Create a scheme; surrounding slashes in `base` are ignored
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_matches('/').to_string(),
        }
    }

    /// Topic base
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Topic a device listens on for commands
    pub fn command_topic(&self, hostname: &str) -> String {
        self.device_topic(hostname, MessageType::Command)
    }

    /// Topic for a given device and message type
    pub fn device_topic(&self, hostname: &str, message_type: MessageType) -> String {
        format!("{}/pb/d/{}/{}", self.base, hostname, message_type.suffix())
    }

    /// Wildcard subscriptions for every inbound message type
    pub fn subscriptions(&self) -> Vec<String> {
        MessageType::INBOUND
            .iter()
            .map(|t| self.device_topic("+", *t))
            .collect()
    }

    /// Split a topic into hostname and message type
    ///
    /// The topic must sit under this scheme's base: `<base>/pb/d/<hostname>/<type>`.
    pub fn parse(&self, topic: &str) -> Result<DeviceTopic, RouterError> {
        let invalid = || RouterError::InvalidTopic(topic.to_string());

        let rest = if self.base.is_empty() {
            topic
        } else {
            topic
                .strip_prefix(self.base.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
                .ok_or_else(invalid)?
        };

        let segments: Vec<&str> = rest.split('/').collect();
        let [pb, d, hostname, suffix] = segments.as_slice() else {
            return Err(invalid());
        };
        if *pb != "pb" || *d != "d" {
            return Err(invalid());
        }
        if hostname.is_empty() || *hostname == "+" || *hostname == "#" {
            return Err(invalid());
        }
        let message_type = MessageType::from_suffix(suffix).ok_or_else(invalid)?;

        Ok(DeviceTopic {
            hostname: hostname.to_string(),
            message_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_topic() {
        let scheme = TopicScheme::new("esagtech/");
        assert_eq!(scheme.command_topic("esg-0001"), "esagtech/pb/d/esg-0001/cmd");
    }

    #[test]
    fn test_subscriptions() {
        let subs = TopicScheme::default().subscriptions();
        assert_eq!(subs.len(), 6);
        assert!(subs.contains(&"esagtech/pb/d/+/hb".to_string()));
        assert!(subs.contains(&"esagtech/pb/d/+/login".to_string()));
        assert!(subs.contains(&"esagtech/pb/d/+/response".to_string()));
        assert!(!subs.iter().any(|s| s.ends_with("/cmd")));
    }

    #[test]
    fn test_parse() {
        let scheme = TopicScheme::default();
        let topic = scheme.parse("esagtech/pb/d/esg-0042/alarm").unwrap();
        assert_eq!(topic.hostname, "esg-0042");
        assert_eq!(topic.message_type, MessageType::Alarm);

        let nested = TopicScheme::new("site/a");
        let resp = nested.parse("site/a/pb/d/esg-7/resp").unwrap();
        assert_eq!(resp.message_type, MessageType::Response);
        assert_eq!(resp.hostname, "esg-7");
    }

    #[test]
    fn test_parse_rejects() {
        let scheme = TopicScheme::default();
        for topic in [
            "esagtech/pb/d/esg-1/telemetry",
            "esagtech/json/d/esg-1/hb",
            "pb/d/hb",
            "esagtech/pb/d//hb",
            "",
            "other/pb/d/esg-1/hb",
            "esagtechx/pb/d/esg-1/hb",
            "site/esagtech/pb/d/esg-1/hb",
            "esagtech/extra/pb/d/esg-1/hb",
            "esagtech/pb/d/esg-1/hb/more",
        ] {
            assert!(matches!(scheme.parse(topic), Err(RouterError::InvalidTopic(_))), "{}", topic);
        }
    }

    #[test]
    fn test_parse_follows_configured_base() {
        let scheme = TopicScheme::new("/plant-7/");
        assert_eq!(scheme.parse("plant-7/pb/d/esg-1/hb").unwrap().hostname, "esg-1");
        assert!(scheme.parse("esagtech/pb/d/esg-1/hb").is_err());

        let bare = TopicScheme::new("");
        assert_eq!(bare.parse("pb/d/esg-2/status").unwrap().message_type, MessageType::Status);
        assert!(bare.parse("esagtech/pb/d/esg-2/status").is_err());
    }
}
