use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ChatError;

/// Role a participant holds within a chat session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantRole {
    Initiator,
    Handler,
    Observer,
    Viewer,
    Editor,
    Owner,
    Support,
}

impl ParticipantRole {
    pub const ALL: [ParticipantRole; 7] = [
        ParticipantRole::Initiator,
        ParticipantRole::Handler,
        ParticipantRole::Observer,
        ParticipantRole::Viewer,
        ParticipantRole::Editor,
        ParticipantRole::Owner,
        ParticipantRole::Support,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Initiator => "INITIATOR",
            ParticipantRole::Handler => "HANDLER",
            ParticipantRole::Observer => "OBSERVER",
            ParticipantRole::Viewer => "VIEWER",
            ParticipantRole::Editor => "EDITOR",
            ParticipantRole::Owner => "OWNER",
            ParticipantRole::Support => "SUPPORT",
        }
    }

    pub fn is_initiator(&self) -> bool {
        *self == ParticipantRole::Initiator
    }
}

impl fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParticipantRole {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        ParticipantRole::ALL
            .into_iter()
            .find(|role| role.as_str() == normalized)
            .ok_or_else(|| ChatError::InvalidRole(s.to_string()))
    }
}

/// Participant id to role mapping held in-row by a chat session.
///
/// Keys are unique and iteration order carries no meaning. Writes are
/// last-write-wins per key, matching how the store applies map-element updates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantMap(BTreeMap<Uuid, ParticipantRole>);

impl ParticipantMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a map from raw role strings, rejecting the first unknown role.
    pub fn try_from_roles<'a, I>(entries: I) -> Result<Self, ChatError>
    where
        I: IntoIterator<Item = (Uuid, &'a str)>,
    {
        entries
            .into_iter()
            .map(|(user_id, role)| Ok((user_id, role.parse::<ParticipantRole>()?)))
            .collect()
    }

    /// Sets the role for `user_id`, returning the role it replaced.
    pub fn insert(&mut self, user_id: Uuid, role: ParticipantRole) -> Option<ParticipantRole> {
        self.0.insert(user_id, role)
    }

    pub fn remove(&mut self, user_id: &Uuid) -> Option<ParticipantRole> {
        self.0.remove(user_id)
    }

    /// Applies every entry of `other` on top of this map; `other` wins per key.
    pub fn merge(&mut self, other: &ParticipantMap) {
        for (user_id, role) in other.iter() {
            self.0.insert(*user_id, *role);
        }
    }

    pub fn get(&self, user_id: &Uuid) -> Option<ParticipantRole> {
        self.0.get(user_id).copied()
    }

    pub fn contains(&self, user_id: &Uuid) -> bool {
        self.0.contains_key(user_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Uuid, &ParticipantRole)> {
        self.0.iter()
    }

    /// The participant holding INITIATOR, if any.
    pub fn initiator(&self) -> Option<Uuid> {
        self.0
            .iter()
            .find(|(_, role)| role.is_initiator())
            .map(|(user_id, _)| *user_id)
    }

    pub fn initiator_count(&self) -> usize {
        self.0.values().filter(|role| role.is_initiator()).count()
    }

    /// Checks the map a new session may be created with.
    pub fn validate_for_creation(&self) -> Result<(), ChatError> {
        if self.is_empty() {
            return Err(ChatError::InvalidParticipants(
                "a chat session needs at least one participant".to_string(),
            ));
        }

        let initiators = self.initiator_count();
        if initiators > 1 {
            return Err(ChatError::InvalidParticipants(format!(
                "at most one INITIATOR is allowed, got {}",
                initiators
            )));
        }

        Ok(())
    }
}

impl FromIterator<(Uuid, ParticipantRole)> for ParticipantMap {
    fn from_iter<T: IntoIterator<Item = (Uuid, ParticipantRole)>>(iter: T) -> Self {
        let mut map = ParticipantMap::new();
        for (user_id, role) in iter {
            map.insert(user_id, role);
        }
        map
    }
}

impl From<BTreeMap<Uuid, ParticipantRole>> for ParticipantMap {
    fn from(map: BTreeMap<Uuid, ParticipantRole>) -> Self {
        Self(map)
    }
}

/// Primary key of an issue participant index row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueParticipantKey {
    pub user_id: Uuid,
    pub issue_id: Uuid,
    pub session_id: Uuid,
}

impl fmt::Display for IssueParticipantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "user={} issue={} session={}",
            self.user_id, self.issue_id, self.session_id
        )
    }
}

/// Reverse index row: which sessions of which issues a user takes part in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueParticipant {
    pub user_id: Uuid,
    pub issue_id: Uuid,
    pub session_id: Uuid,
    pub project_id: Uuid,
    pub role: ParticipantRole,
}

impl IssueParticipant {
    pub fn key(&self) -> IssueParticipantKey {
        IssueParticipantKey {
            user_id: self.user_id,
            issue_id: self.issue_id,
            session_id: self.session_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_display() {
        for role in ParticipantRole::ALL {
            assert_eq!(role.to_string().parse::<ParticipantRole>().unwrap(), role);
        }
    }

    #[test]
    fn test_role_parse_is_case_insensitive() {
        assert_eq!(
            "handler".parse::<ParticipantRole>().unwrap(),
            ParticipantRole::Handler
        );
        assert_eq!(
            " Support ".parse::<ParticipantRole>().unwrap(),
            ParticipantRole::Support
        );
    }

    #[test]
    fn test_role_parse_rejects_unknown() {
        let err = "CAPTAIN".parse::<ParticipantRole>().unwrap_err();
        assert!(matches!(err, ChatError::InvalidRole(_)));
    }

    #[test]
    fn test_role_serializes_upper_case() {
        let json = serde_json::to_string(&ParticipantRole::Initiator).unwrap();
        assert_eq!(json, "\"INITIATOR\"");
    }

    #[test]
    fn test_map_insert_is_last_write_wins() {
        let user = Uuid::new_v4();
        let mut map = ParticipantMap::new();

        assert_eq!(map.insert(user, ParticipantRole::Viewer), None);
        assert_eq!(
            map.insert(user, ParticipantRole::Editor),
            Some(ParticipantRole::Viewer)
        );
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&user), Some(ParticipantRole::Editor));
    }

    #[test]
    fn test_map_from_raw_roles() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let map = ParticipantMap::try_from_roles([(a, "initiator"), (b, "HANDLER")]).unwrap();
        assert_eq!(map.get(&a), Some(ParticipantRole::Initiator));
        assert_eq!(map.get(&b), Some(ParticipantRole::Handler));

        let err = ParticipantMap::try_from_roles([(a, "INITIATOR"), (b, "TENANT")]).unwrap_err();
        assert!(matches!(err, ChatError::InvalidRole(role) if role == "TENANT"));
    }

    #[test]
    fn test_map_merge_prefers_other() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut map: ParticipantMap = [(a, ParticipantRole::Viewer)].into_iter().collect();
        let other: ParticipantMap = [(a, ParticipantRole::Owner), (b, ParticipantRole::Handler)]
            .into_iter()
            .collect();

        map.merge(&other);

        assert_eq!(map.get(&a), Some(ParticipantRole::Owner));
        assert_eq!(map.get(&b), Some(ParticipantRole::Handler));
    }

    #[test]
    fn test_validate_for_creation() {
        assert!(ParticipantMap::new().validate_for_creation().is_err());

        let one_initiator: ParticipantMap = [
            (Uuid::new_v4(), ParticipantRole::Initiator),
            (Uuid::new_v4(), ParticipantRole::Handler),
        ]
        .into_iter()
        .collect();
        assert!(one_initiator.validate_for_creation().is_ok());

        let no_initiator: ParticipantMap = [(Uuid::new_v4(), ParticipantRole::Observer)]
            .into_iter()
            .collect();
        assert!(no_initiator.validate_for_creation().is_ok());

        let two_initiators: ParticipantMap = [
            (Uuid::new_v4(), ParticipantRole::Initiator),
            (Uuid::new_v4(), ParticipantRole::Initiator),
        ]
        .into_iter()
        .collect();
        assert!(matches!(
            two_initiators.validate_for_creation(),
            Err(ChatError::InvalidParticipants(_))
        ));
    }

    #[test]
    fn test_map_json_uses_string_keys() {
        let user = Uuid::new_v4();
        let map: ParticipantMap = [(user, ParticipantRole::Handler)].into_iter().collect();

        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json[user.to_string()], "HANDLER");

        let back: ParticipantMap = serde_json::from_value(json).unwrap();
        assert_eq!(back, map);
    }
}
