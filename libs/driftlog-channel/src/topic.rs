//! Topic filters for subscriptions

use std::collections::BTreeSet;
use std::fmt;

/// Which topics a subscription receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicFilter {
    /// An explicit set of topic names
    Topics(BTreeSet<String>),
    /// Every topic starting with the prefix
    Prefix(String),
}

impl TopicFilter {
    /// Filter matching exactly the given topics
    pub fn topics<I, T>(topics: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self::Topics(topics.into_iter().map(Into::into).collect())
    }

    /// Filter matching every topic under `prefix`
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self::Prefix(prefix.into())
    }

    pub fn matches(&self, topic: &str) -> bool {
        match self {
            Self::Topics(topics) => topics.contains(topic),
            Self::Prefix(prefix) => topic.starts_with(prefix.as_str()),
        }
    }

    /// Whether no topic can ever match
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Topics(topics) if topics.is_empty())
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Topics(topics) => {
                let names: Vec<&str> = topics.iter().map(String::as_str).collect();
                write!(f, "{}", names.join(","))
            }
            Self::Prefix(prefix) => write!(f, "{}*", prefix),
        }
    }
}
