//! Errors raised while building or decoding session events.

/// Errors that can occur while encoding or decoding a [`SessionEvent`].
///
/// [`SessionEvent`]: crate::events::SessionEvent
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The event name was empty.
    #[error("event name must not be empty")]
    EmptyName,

    /// The envelope could not be parsed as JSON or is missing required fields.
    #[error("malformed event envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The envelope parsed but its `data` does not match the named event.
    #[error("invalid data for event '{event_name}': {source}")]
    InvalidData {
        /// Name of the event whose data failed to decode.
        event_name: String,
        /// Underlying decode failure.
        #[source]
        source: serde_json::Error,
    },

    /// The payload could not be serialized.
    #[error("failed to serialize event payload: {0}")]
    Serialization(#[source] serde_json::Error),
}
