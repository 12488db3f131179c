//! Users and Acting Principals

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use loan_types::Role;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: impl Into<String>, role: Role, email_verified: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            role,
            email_verified,
            created_at: Utc::now(),
        }
    }
}

/// The principal performing an operation, as supplied by the session layer.
///
/// A precondition bypass only happens when a staff actor carries an explicit
/// `override_reason`; the reason ends up in the status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
    pub email_verified: bool,
    pub override_reason: Option<String>,
}

impl Actor {
    pub fn new(user_id: Uuid, role: Role, email_verified: bool) -> Self {
        Self {
            user_id,
            role,
            email_verified,
            override_reason: None,
        }
    }

    pub fn from_user(user: &User) -> Self {
        Self::new(user.id, user.role, user.email_verified)
    }

    pub fn with_override(mut self, reason: impl Into<String>) -> Self {
        self.override_reason = Some(reason.into());
        self
    }

    pub fn is_staff(&self) -> bool {
        self.role.is_staff()
    }

    /// The override reason, if this actor may bypass borrower preconditions
    pub fn bypass_reason(&self) -> Option<&str> {
        if !self.is_staff() {
            return None;
        }
        self.override_reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bypass_requires_staff_and_reason() {
        let id = Uuid::new_v4();

        let borrower = Actor::new(id, Role::Borrower, true).with_override("please");
        assert_eq!(borrower.bypass_reason(), None);

        let ops = Actor::new(id, Role::Operations, true);
        assert_eq!(ops.bypass_reason(), None);

        let ops = ops.with_override("appraisal waived by credit committee");
        assert_eq!(
            ops.bypass_reason(),
            Some("appraisal waived by credit committee")
        );

        let blank = Actor::new(id, Role::Admin, true).with_override("  ");
        assert_eq!(blank.bypass_reason(), None);
    }
}
