use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::participant::{IssueParticipant, ParticipantMap, ParticipantRole};

/// Composite key of a chat session row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKey {
    pub project_id: Uuid,
    pub issue_id: Uuid,
    pub session_id: Uuid,
}

impl SessionKey {
    pub fn new(project_id: Uuid, issue_id: Uuid, session_id: Uuid) -> Self {
        Self {
            project_id,
            issue_id,
            session_id,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "project={} issue={} session={}",
            self.project_id, self.issue_id, self.session_id
        )
    }
}

/// A multi-party chat attached to an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub project_id: Uuid,
    pub issue_id: Uuid,
    pub session_id: Uuid,
    pub participants: ParticipantMap,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl ChatSession {
    /// Builds a session with a fresh id; `created_at == modified_at`.
    pub fn new(project_id: Uuid, issue_id: Uuid, participants: ParticipantMap) -> Self {
        let now = Utc::now();
        Self {
            project_id,
            issue_id,
            session_id: Uuid::new_v4(),
            participants,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.project_id, self.issue_id, self.session_id)
    }

    pub fn role_of(&self, user_id: &Uuid) -> Option<ParticipantRole> {
        self.participants.get(user_id)
    }

    /// Index row for `user_id` as a member of this session.
    pub fn index_row(&self, user_id: Uuid, role: ParticipantRole) -> IssueParticipant {
        IssueParticipant {
            user_id,
            issue_id: self.issue_id,
            session_id: self.session_id,
            project_id: self.project_id,
            role,
        }
    }

    /// Index rows for every current participant.
    pub fn index_rows(&self) -> Vec<IssueParticipant> {
        self.participants
            .iter()
            .map(|(user_id, role)| self.index_row(*user_id, *role))
            .collect()
    }
}
