use std::{fmt, fmt::Write, str::FromStr};

use ntex_bytes::ByteString;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TopicError {
    #[error("Topic is empty")]
    Empty,
    #[error("Wildcard must occupy a whole level")]
    InvalidLevel,
    #[error("Multi-level wildcard must be the last level")]
    MultiWildcardNotLast,
    #[error("Topic name must not contain wildcards")]
    WildcardInName,
}

#[derive(Debug, Eq, PartialEq, Clone, Hash)]
pub enum Level {
    Normal(String),
    Metadata(String), // $SYS
    Blank,
    SingleWildcard, // Single level wildcard +
    MultiWildcard,  // Multi-level wildcard #
}

impl Level {
    #[inline]
    pub fn is_metadata(&self) -> bool {
        matches!(self, Level::Metadata(_))
    }

    #[inline]
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Level::SingleWildcard | Level::MultiWildcard)
    }

    /// Match single level of a topic name
    fn match_name_level(&self, level: &str) -> bool {
        match self {
            Level::Normal(s) | Level::Metadata(s) => s == level,
            Level::Blank => level.is_empty(),
            Level::SingleWildcard | Level::MultiWildcard => true,
        }
    }
}

impl FromStr for Level {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, TopicError> {
        match s {
            "+" => Ok(Level::SingleWildcard),
            "#" => Ok(Level::MultiWildcard),
            "" => Ok(Level::Blank),
            _ => {
                if s.contains(['+', '#']) {
                    Err(TopicError::InvalidLevel)
                } else if s.starts_with('$') {
                    Ok(Level::Metadata(String::from(s)))
                } else {
                    Ok(Level::Normal(String::from(s)))
                }
            }
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Normal(s) | Level::Metadata(s) => f.write_str(s.as_str()),
            Level::Blank => Ok(()),
            Level::SingleWildcard => f.write_char('+'),
            Level::MultiWildcard => f.write_char('#'),
        }
    }
}

/// Parsed and validated topic filter
///
/// Keeps the original filter string, registry lookups compare filters
/// byte-for-byte.
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct TopicFilter {
    filter: ByteString,
    levels: Vec<Level>,
}

impl TopicFilter {
    pub fn new(filter: ByteString) -> Result<Self, TopicError> {
        if filter.is_empty() {
            return Err(TopicError::Empty);
        }
        let levels =
            filter.split('/').map(Level::from_str).collect::<Result<Vec<_>, TopicError>>()?;

        if let Some(pos) = levels.iter().position(|l| *l == Level::MultiWildcard) {
            if pos != levels.len() - 1 {
                return Err(TopicError::MultiWildcardNotLast);
            }
        }
        Ok(TopicFilter { filter, levels })
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.filter
    }

    #[inline]
    pub fn filter(&self) -> &ByteString {
        &self.filter
    }

    #[inline]
    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    #[inline]
    pub fn has_wildcards(&self) -> bool {
        self.levels.iter().any(Level::is_wildcard)
    }

    /// Check if topic name matches this filter
    ///
    /// Topic names starting with `$` are not matched by filters
    /// starting with a wildcard.
    pub fn matches(&self, topic: &str) -> bool {
        if topic.starts_with('$') && self.levels.first().map_or(false, Level::is_wildcard) {
            return false;
        }

        let mut names = topic.split('/');
        for level in &self.levels {
            match level {
                // "sport/#" also matches "sport"
                Level::MultiWildcard => return true,
                _ => match names.next() {
                    Some(name) if level.match_name_level(name) => continue,
                    _ => return false,
                },
            }
        }
        names.next().is_none()
    }
}

impl FromStr for TopicFilter {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, TopicError> {
        TopicFilter::new(ByteString::from(String::from(s)))
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.filter)
    }
}

/// Validate topic name used for publishing
pub fn validate_topic_name(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        Err(TopicError::Empty)
    } else if topic.contains(['+', '#']) {
        Err(TopicError::WildcardInName)
    } else {
        Ok(())
    }
}

/// Check topic name against a raw filter string
///
/// Invalid filters never match.
pub fn matches(filter: &str, topic: &str) -> bool {
    filter.parse::<TopicFilter>().map(|f| f.matches(topic)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn test_level() {
        assert_eq!("+".parse::<Level>(), Ok(Level::SingleWildcard));
        assert_eq!("#".parse::<Level>(), Ok(Level::MultiWildcard));
        assert_eq!("".parse::<Level>(), Ok(Level::Blank));
        assert!("$SYS".parse::<Level>().unwrap().is_metadata());
        assert_eq!("sync".parse::<Level>(), Ok(Level::Normal("sync".to_string())));
        assert_eq!("sync+".parse::<Level>(), Err(TopicError::InvalidLevel));
        assert_eq!(Level::MultiWildcard.to_string(), "#");
    }

    #[test]
    fn test_parse_filter() {
        let f: TopicFilter = "filter/+/+".parse().unwrap();
        assert_eq!(
            f.levels(),
            &[Level::Normal("filter".to_string()), Level::SingleWildcard, Level::SingleWildcard]
        );
        assert!(f.has_wildcards());
        assert_eq!(f.to_string(), "filter/+/+");

        assert_eq!("".parse::<TopicFilter>(), Err(TopicError::Empty));
        assert_eq!("filter/#/1".parse::<TopicFilter>(), Err(TopicError::MultiWildcardNotLast));
        assert_eq!("filter#".parse::<TopicFilter>(), Err(TopicError::InvalidLevel));
        assert!(!"filter/sync/1".parse::<TopicFilter>().unwrap().has_wildcards());
    }

    #[test_case("filter/+/+", "filter/sync/1", true ; "single level wildcards")]
    #[test_case("filter/+/+", "filter/async/4", true ; "single level wildcards async")]
    #[test_case("filter/+/+", "filter/sync", false ; "too short for wildcards")]
    #[test_case("filter/+/+", "filter/sync/1/2", false ; "too long for wildcards")]
    #[test_case("filter/#", "filter", true ; "multi level matches parent")]
    #[test_case("filter/#", "filter/sync/1", true ; "multi level matches children")]
    #[test_case("#", "filter/sync/1", true ; "multi level matches everything")]
    #[test_case("filter/sync/1", "filter/sync/1", true ; "exact")]
    #[test_case("filter/sync/1", "filter/sync/2", false ; "exact mismatch")]
    #[test_case("filter/+", "filter/", true ; "blank level")]
    #[test_case("+/+", "/finance", true ; "leading blank level")]
    #[test_case("+", "/finance", false ; "separator is a level")]
    #[test_case("#", "$SYS/broker", false ; "metadata not matched by multi wildcard")]
    #[test_case("+/broker", "$SYS/broker", false ; "metadata not matched by single wildcard")]
    #[test_case("$SYS/#", "$SYS/broker", true ; "metadata explicit")]
    fn test_matches(filter: &str, topic: &str, expected: bool) {
        assert_eq!(matches(filter, topic), expected);
    }

    #[test]
    fn test_invalid_filter_never_matches() {
        assert!(!matches("filter/#/1", "filter/x/1"));
    }

    #[test]
    fn test_topic_name() {
        assert_eq!(validate_topic_name("filter/sync/1"), Ok(()));
        assert_eq!(validate_topic_name(""), Err(TopicError::Empty));
        assert_eq!(validate_topic_name("filter/+"), Err(TopicError::WildcardInName));
    }
}
