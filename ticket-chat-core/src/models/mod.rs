pub mod message;
pub mod participant;
pub mod session;

pub use message::{ChatMessage, ContentOrigin, ContentType, MessageIdGenerator};
pub use participant::{IssueParticipant, IssueParticipantKey, ParticipantMap, ParticipantRole};
pub use session::{ChatSession, SessionKey};
