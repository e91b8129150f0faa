//! Session state: canonical entities, the normalizer and the session store

pub mod normalize;
pub mod store;
pub mod types;

pub use normalize::{
    canonical_timestamp, canonical_timestamp_str, normalize_message, normalize_session,
    MessageInput, SessionInput,
};
pub use store::{SessionStore, SessionSummary};
pub use types::{
    new_id, now_timestamp, title_from_prompt, Message, Metadata, ProcessingStep, Role, Session,
    ERROR_MARKER, NO_RESPONSE, UNTITLED,
};
