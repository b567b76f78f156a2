//! Typed ID wrappers for compile-time type safety.
//!
//! These types wrap UUIDs so an incident id can never be handed to a query
//! expecting an action id.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sqlx::{encode::IsNull, error::BoxDynError, Database, Decode, Encode, Type};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Macro to generate typed ID wrappers with common trait implementations.
macro_rules! typed_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random ID.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an ID from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0.to_string()
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(&self.0.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Uuid::parse_str(&s)
                    .map(Self)
                    .map_err(serde::de::Error::custom)
            }
        }

        // Stored as TEXT columns.
        impl<'r, DB: Database> Decode<'r, DB> for $name
        where
            String: Decode<'r, DB>,
        {
            fn decode(value: <DB as Database>::ValueRef<'r>) -> Result<Self, BoxDynError> {
                let s = String::decode(value)?;
                Uuid::parse_str(&s).map(Self).map_err(|e| e.into())
            }
        }

        impl<'q, DB: Database> Encode<'q, DB> for $name
        where
            String: Encode<'q, DB>,
        {
            fn encode_by_ref(
                &self,
                buf: &mut <DB as Database>::ArgumentBuffer<'q>,
            ) -> Result<IsNull, BoxDynError> {
                self.0.to_string().encode_by_ref(buf)
            }
        }

        impl<DB: Database> Type<DB> for $name
        where
            String: Type<DB>,
        {
            fn type_info() -> <DB as Database>::TypeInfo {
                String::type_info()
            }

            fn compatible(ty: &<DB as Database>::TypeInfo) -> bool {
                String::compatible(ty)
            }
        }
    };
}

typed_id!(IncidentId, "Unique identifier for an incident.");
typed_id!(ActionId, "Unique identifier for an incident action.");
typed_id!(AuditEventId, "Unique identifier for an audit event.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_id_serializes_as_plain_string() {
        let id = ActionId::new();
        let json = serde_json::to_value(id).expect("serialize id");
        assert_eq!(json, serde_json::Value::String(id.to_string()));

        let back: ActionId = serde_json::from_value(json).expect("deserialize id");
        assert_eq!(back, id);
    }

    #[test]
    fn typed_id_rejects_malformed_strings() {
        assert!("not-a-uuid".parse::<IncidentId>().is_err());
        assert!(serde_json::from_str::<IncidentId>("\"nope\"").is_err());
    }
}
