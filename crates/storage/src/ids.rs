use std::fmt;
use std::str::FromStr;

use snafu::ResultExt;
use uuid::Uuid;

use super::error::{InvalidIdSnafu, StorageError, StorageResult};

// Rows from the first schema hold v4 ids, so parsing accepts any UUID version.
macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident => $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Uuid);

        impl $name {
            /// Time-ordered id for a row inserted now.
            pub fn new_v7() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn parse(raw: &str) -> StorageResult<Self> {
                Uuid::parse_str(raw.trim())
                    .map(Self)
                    .context(InvalidIdSnafu {
                        stage: "parse-row-id",
                        id_type: $label,
                        raw: raw.to_string(),
                    })
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0.hyphenated(), formatter)
            }
        }

        impl FromStr for $name {
            type Err = StorageError;

            fn from_str(raw: &str) -> StorageResult<Self> {
                Self::parse(raw)
            }
        }
    };
}

row_id!(
    /// Primary key of a `conversations` row.
    ConversationId => "conversation"
);
row_id!(
    /// Primary key of a `messages` row.
    MessageId => "message"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_v4_ids_round_trip_through_display() {
        let raw = "3f1c9a56-2b7e-4d8a-9c41-0e5b7d2f6a13";
        let id: ConversationId = raw.parse().expect("parse v4 id");
        assert_eq!(id.to_string(), raw);
    }

    #[test]
    fn malformed_id_names_the_row_kind() {
        let error = ConversationId::parse("not-a-uuid").expect_err("reject malformed id");
        assert!(matches!(
            error,
            StorageError::InvalidId {
                id_type: "conversation",
                ..
            }
        ));
    }
}
