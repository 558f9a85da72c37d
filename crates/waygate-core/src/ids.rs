//! Branded ID newtypes for type safety.
//!
//! Every entity in the gateway has a distinct ID type implemented as a
//! newtype wrapper around `String`. This prevents accidentally passing a
//! connection ID where a session ID is expected.
//!
//! Session and connection IDs are random UUID v4 — they double as
//! credentials (the session ID rides in a cookie and in the OAuth `state`
//! parameter), so they must be unpredictable. Client IDs are minted by the
//! dynamic client registry with the `mcp_` prefix.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

macro_rules! random_id {
    ($name:ident) => {
        impl $name {
            /// Create a new random ID (UUID v4).
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

branded_id! {
    /// Unique identifier for a server-side session.
    SessionId
}
random_id!(SessionId);

branded_id! {
    /// Unique identifier for a live SSE connection.
    ConnectionId
}
random_id!(ConnectionId);

branded_id! {
    /// Identifier of a dynamically registered OAuth client (`mcp_<hex>`).
    ClientId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn session_id_is_uuid() {
        let id = SessionId::new();
        assert!(uuid::Uuid::parse_str(id.as_str()).is_ok());
    }

    #[test]
    fn display_matches_inner() {
        let id = SessionId::from_string("abc-123".into());
        assert_eq!(id.to_string(), "abc-123");
        assert_eq!(id.as_str(), "abc-123");
    }

    #[test]
    fn serde_is_transparent() {
        let id = ConnectionId::from_string("conn-1".into());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"conn-1\"");
        let back: ConnectionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn client_id_round_trips_through_string() {
        let id = ClientId::from("mcp_abcd");
        let s: String = id.clone().into();
        assert_eq!(s, "mcp_abcd");
        assert_eq!(ClientId::from(s), id);
    }

    #[test]
    fn deref_to_str() {
        let id = SessionId::from_string("x".into());
        assert!(id.starts_with('x'));
    }
}
