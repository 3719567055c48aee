//! Broker topic layout and channel bindings
//!
//! Meshtastic gateways publish on `{root}/{segment}/{channel}/{gateway_id}`,
//! e.g. `msh/2/c/LongFast/!abcd0001`. A [`ChannelBinding`] pairs a device channel
//! with the filter that selects that channel's traffic from every gateway.

use thiserror::Error;

/// Normalize a topic prefix: collapse repeated slashes, drop leading and trailing ones
pub fn normalize_topic(topic: &str) -> String {
    topic
        .split('/')
        .filter(|level| !level.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// MQTT topic filter matching with `+` (one level) and `#` (remaining levels)
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    // Wildcards in the first level never match `$SYS`-style topics
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Check a subscription filter against the MQTT wildcard placement rules
pub fn valid_filter(filter: &str) -> Result<(), TopicError> {
    if filter.is_empty() {
        return Err(TopicError::EmptyFilter);
    }

    let levels: Vec<&str> = filter.split('/').collect();
    for (index, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || index != levels.len() - 1) {
            return Err(TopicError::MisplacedWildcard(filter.to_string()));
        }
        if level.contains('+') && *level != "+" {
            return Err(TopicError::MisplacedWildcard(filter.to_string()));
        }
    }

    Ok(())
}

/// Validate a channel name for use as a single topic level
pub fn validate_channel_name(channel: &str) -> Result<(), TopicError> {
    if channel.is_empty() {
        return Err(TopicError::EmptyChannel);
    }

    for ch in channel.chars() {
        if matches!(ch, '/' | '+' | '#') {
            return Err(TopicError::InvalidChannelChar(ch));
        }
    }

    Ok(())
}

/// Topic errors
#[derive(Debug, Error, PartialEq)]
pub enum TopicError {
    #[error("Topic filter cannot be empty")]
    EmptyFilter,
    #[error("Wildcard in topic filter '{0}' must occupy a whole level ('#' only last)")]
    MisplacedWildcard(String),
    #[error("Channel name cannot be empty")]
    EmptyChannel,
    #[error("Channel name contains invalid character: '{0}'")]
    InvalidChannelChar(char),
}

/// How channel names map into the broker topic namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicLayout {
    root: String,
    segment: String,
}

impl TopicLayout {
    pub fn new(root: &str, segment: &str) -> Self {
        Self {
            root: normalize_topic(root),
            segment: normalize_topic(segment),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Topic prefix for a channel: `{root}/{segment}/{channel}`
    pub fn channel_topic(&self, channel: &str) -> String {
        if self.segment.is_empty() {
            format!("{}/{channel}", self.root)
        } else {
            format!("{}/{}/{channel}", self.root, self.segment)
        }
    }

    /// Subscription filter for a channel, matching every gateway
    pub fn filter_for(&self, channel: &str) -> String {
        format!("{}/+", self.channel_topic(channel))
    }

    /// Reverse mapping: the channel a gateway topic belongs to
    pub fn channel_of<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let prefix = if self.segment.is_empty() {
            format!("{}/", self.root)
        } else {
            format!("{}/{}/", self.root, self.segment)
        };

        let rest = topic.strip_prefix(prefix.as_str())?;
        let (channel, gateway) = rest.split_once('/')?;
        if channel.is_empty() || gateway.is_empty() {
            return None;
        }
        Some(channel)
    }

    pub fn binding(&self, channel: &str) -> ChannelBinding {
        ChannelBinding {
            channel: channel.to_string(),
            topic_filter: self.filter_for(channel),
        }
    }

    pub fn bindings<S: AsRef<str>>(&self, channels: &[S]) -> Vec<ChannelBinding> {
        channels.iter().map(|c| self.binding(c.as_ref())).collect()
    }
}

/// Pairing of one device channel with the broker filter it is proxied through
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelBinding {
    pub channel: String,
    pub topic_filter: String,
}
