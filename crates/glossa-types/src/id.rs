//! Identifier types for glossa.
//!
//! All identifiers are opaque strings on the wire. `new()` mints a
//! UUID v4 so fresh identifiers are unique across processes and machines
//! without coordination; identifiers handed to us by collaborators are
//! preserved byte-for-byte.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! opaque_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Mints a fresh UUID-backed identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

opaque_id! {
    /// Identifier for one worker process and its control channel.
    ///
    /// Minted by the host when the channel is constructed and carried on
    /// every inbound event so that multiple channels can share one bus.
    WorkerId
}

opaque_id! {
    /// Identifier for a user function, unique within a channel.
    ///
    /// Assigned by metadata discovery upstream; the channel treats it as
    /// opaque and uses it to key input queues and load results.
    FunctionId
}

opaque_id! {
    /// Identifier for a single invocation, unique within a channel.
    ///
    /// Keys the correlation table entry between `InvocationRequest` and
    /// `InvocationResponse`.
    InvocationId
}
