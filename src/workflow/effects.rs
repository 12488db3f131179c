//! Post-Commit Side Effects
//!
//! Transitions plan notifications and emails; the engine dispatches them only
//! once the commit has landed. Delivery failures are logged, never returned.

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use loan_types::Role;

use crate::services::NotificationSink;
use crate::store::LoanStore;

#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    /// In-app notification to one user
    Notify {
        user_id: Uuid,
        title: String,
        message: String,
    },
    /// In-app notification to every user holding a role
    NotifyRole {
        role: Role,
        title: String,
        message: String,
    },
    /// Email to a user, resolved to their address at dispatch
    Email {
        template: String,
        user_id: Uuid,
        data: Value,
    },
}

impl SideEffect {
    pub fn notify(user_id: Uuid, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Notify {
            user_id,
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn notify_ops(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotifyRole {
            role: Role::Operations,
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn email(template: impl Into<String>, user_id: Uuid, data: Value) -> Self {
        Self::Email {
            template: template.into(),
            user_id,
            data,
        }
    }
}

/// Deliver planned effects; returns how many were delivered
pub async fn dispatch(
    effects: Vec<SideEffect>,
    store: &dyn LoanStore,
    sink: &dyn NotificationSink,
) -> usize {
    let mut delivered = 0;
    for effect in effects {
        match deliver(&effect, store, sink).await {
            Ok(n) => delivered += n,
            Err(e) => warn!(?effect, error = %e, "Side effect failed; transition already committed"),
        }
    }
    debug!(delivered, "Side effects dispatched");
    delivered
}

async fn deliver(
    effect: &SideEffect,
    store: &dyn LoanStore,
    sink: &dyn NotificationSink,
) -> anyhow::Result<usize> {
    match effect {
        SideEffect::Notify {
            user_id,
            title,
            message,
        } => {
            sink.notify(*user_id, title, message).await?;
            Ok(1)
        }
        SideEffect::NotifyRole {
            role,
            title,
            message,
        } => {
            let mut recipients = store.users_with_role(*role).await?;
            // Admins see everything operations sees
            if *role == Role::Operations {
                recipients.extend(store.users_with_role(Role::Admin).await?);
            }
            let mut sent = 0;
            for user in recipients {
                match sink.notify(user.id, title, message).await {
                    Ok(()) => sent += 1,
                    Err(e) => warn!(user_id = %user.id, error = %e, "Notification failed"),
                }
            }
            Ok(sent)
        }
        SideEffect::Email {
            template,
            user_id,
            data,
        } => {
            let user = store
                .load_user(*user_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("no user {user_id} to email"))?;
            sink.send_email(template, &user.email, data).await?;
            Ok(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use crate::services::RecordingNotifier;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_role_fan_out_includes_admins() {
        let store = MemoryStore::new();
        let ops = User::new("ops@example.com", Role::Operations, true);
        let admin = User::new("admin@example.com", Role::Admin, true);
        let borrower = User::new("b@example.com", Role::Borrower, true);
        for u in [&ops, &admin, &borrower] {
            store.insert_user(u).await.unwrap();
        }
        let sink = RecordingNotifier::new();

        let delivered = dispatch(
            vec![SideEffect::notify_ops("Quote requested", "RPC-2026-0001")],
            &store,
            &sink,
        )
        .await;

        assert_eq!(delivered, 2);
        assert_eq!(sink.notifications_for(ops.id).len(), 1);
        assert_eq!(sink.notifications_for(admin.id).len(), 1);
        assert!(sink.notifications_for(borrower.id).is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let store = MemoryStore::new();
        let sink = RecordingNotifier::failing();
        let delivered = dispatch(
            vec![
                SideEffect::notify(Uuid::new_v4(), "t", "m"),
                SideEffect::email("needs_list", Uuid::new_v4(), Value::Null),
            ],
            &store,
            &sink,
        )
        .await;
        assert_eq!(delivered, 0);
    }
}
