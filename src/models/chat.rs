//! Durable chat entities read from and written to the external store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Role a user holds in a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectRole {
    Owner,
    Coach,
    Participant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub title: String,
    pub owner_id: i64,
    pub coach_ids: Vec<i64>,
    pub participant_ids: Vec<i64>,
}

impl Project {
    pub fn role_of(&self, user_id: i64) -> Option<ProjectRole> {
        if self.owner_id == user_id {
            Some(ProjectRole::Owner)
        } else if self.coach_ids.contains(&user_id) {
            Some(ProjectRole::Coach)
        } else if self.participant_ids.contains(&user_id) {
            Some(ProjectRole::Participant)
        } else {
            None
        }
    }

    pub fn is_member(&self, user_id: i64) -> bool {
        self.role_of(user_id).is_some()
    }

    /// Owner, then coaches, then participants.
    pub fn member_ids(&self) -> Vec<i64> {
        std::iter::once(self.owner_id)
            .chain(self.coach_ids.iter().copied())
            .chain(self.participant_ids.iter().copied())
            .collect()
    }
}

/// Message about to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub project_id: i64,
    pub sender_id: i64,
    pub receiver_id: Option<i64>,
    pub content: Option<String>,
    pub file_name: Option<String>,
    pub file_base64: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: i64,
    pub project_id: i64,
    pub sender_id: i64,
    pub receiver_id: Option<i64>,
    pub content: Option<String>,
    pub file_name: Option<String>,
    pub file_base64: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_private(&self) -> bool {
        self.receiver_id.is_some()
    }
}

/// Durable push subscription; `subscription_json` is opaque to this service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PushSubscription {
    pub user_id: i64,
    pub subscription_json: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> Project {
        Project {
            id: 1,
            title: "Apollo".into(),
            owner_id: 1,
            coach_ids: vec![2],
            participant_ids: vec![3, 4],
        }
    }

    #[test]
    fn roles() {
        let p = project();
        assert_eq!(p.role_of(1), Some(ProjectRole::Owner));
        assert_eq!(p.role_of(2), Some(ProjectRole::Coach));
        assert_eq!(p.role_of(4), Some(ProjectRole::Participant));
        assert_eq!(p.role_of(9), None);
    }

    #[test]
    fn member_ids_in_role_order() {
        assert_eq!(project().member_ids(), vec![1, 2, 3, 4]);
    }
}
