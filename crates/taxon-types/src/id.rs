//! Store-assigned identifiers.
//!
//! Identifiers are plain integers handed out by the store in insertion order.
//! Each entity kind gets its own newtype so a synonym id can never be passed
//! where a skill id is expected.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// The raw integer value.
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl FromStr for $name {
            type Err = TypeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim()
                    .parse::<u64>()
                    .map($name)
                    .map_err(|_| TypeError::InvalidId(s.to_string()))
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                $name(raw)
            }
        }
    };
}

define_id!(
    /// Identifier of a [`SkillNode`](crate::SkillNode). Immutable for the node's lifetime.
    SkillId
);
define_id!(
    /// Identifier of a [`SynonymEdge`](crate::SynonymEdge).
    SynonymId
);
define_id!(
    /// Identifier of a [`RelationEdge`](crate::RelationEdge).
    RelationId
);
define_id!(
    /// Identifier of an externally owned [`CrossReference`](crate::CrossReference) row.
    CrossRefId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_bare_number() {
        assert_eq!(SkillId(42).to_string(), "42");
        assert_eq!(format!("{:?}", SkillId(42)), "SkillId(42)");
    }

    #[test]
    fn parse_trims_whitespace() {
        assert_eq!(" 17 ".parse::<SkillId>().unwrap(), SkillId(17));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            "abc".parse::<CrossRefId>(),
            Err(TypeError::InvalidId(_))
        ));
        assert!("-3".parse::<SkillId>().is_err());
    }

    #[test]
    fn serde_is_transparent() {
        let json = serde_json::to_string(&RelationId(9)).unwrap();
        assert_eq!(json, "9");
        let back: RelationId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RelationId(9));
    }

    #[test]
    fn ordering_follows_raw_value() {
        let mut ids = vec![SkillId(3), SkillId(1), SkillId(2)];
        ids.sort();
        assert_eq!(ids, vec![SkillId(1), SkillId(2), SkillId(3)]);
    }
}
