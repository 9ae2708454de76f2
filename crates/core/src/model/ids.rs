use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when an identifier cannot be parsed from a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    kind: &'static str,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {} from string", self.kind)
    }
}

impl std::error::Error for ParseIdError {}

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            #[must_use]
            pub fn new(id: u64) -> Self {
                Self(id)
            }

            #[must_use]
            pub fn value(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<u64>().map(Self).map_err(|_| ParseIdError {
                    kind: stringify!($name),
                })
            }
        }
    };
}

numeric_id!(
    /// Question within an exam part's payload.
    QuestionId
);
numeric_id!(
    /// Exam on the remote authority.
    ExamId
);
numeric_id!(
    /// Exam schedule the candidate is sitting; shared by every part of a chain.
    ScheduleId
);
numeric_id!(TopicId);
numeric_id!(QuizId);

/// Opaque key naming one exam part, used as the local store key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExamKey(String);

impl ExamKey {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ExamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExamKey({:?})", self.0)
    }
}

impl fmt::Display for ExamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn parses_ids_from_strings() {
        let id: QuestionId = " 123 ".parse().unwrap();
        assert_eq!(id, QuestionId::new(123));
        assert_eq!(format!("{id:?}"), "QuestionId(123)");
    }

    #[test]
    fn rejects_non_numeric_ids() {
        let err = "not-a-number".parse::<ScheduleId>().unwrap_err();
        assert_eq!(err.to_string(), "failed to parse ScheduleId from string");
    }

    #[test]
    fn exam_key_displays_raw_value() {
        let key = ExamKey::new("exam_7");
        assert_eq!(key.to_string(), "exam_7");
        assert_eq!(key.as_str(), "exam_7");
    }

    #[test]
    fn question_ids_work_as_json_map_keys() {
        let mut map = BTreeMap::new();
        map.insert(QuestionId::new(4), 12_u64);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"4":12}"#);
        let back: BTreeMap<QuestionId, u64> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }
}
