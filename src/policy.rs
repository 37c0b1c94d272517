//! Central authorization rules.
//!
//! Every handler that needs a capability check asks [`authorize`] instead of
//! re-deriving role or standing flags itself.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::types::{AccountStatus, Message, Order, Product, Profile, Role};

/// The authenticated caller, as of the moment the request was received.
#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
    /// Effective status; a lapsed temporary ban is already folded into `Good`.
    pub status: AccountStatus,
    pub premium: bool,
}

impl Actor {
    pub fn from_profile(profile: &Profile, now: DateTime<Utc>) -> Self {
        Self {
            user_id: profile.id,
            role: profile.role,
            status: profile.effective_status(now),
            premium: profile.is_premium(now),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    fn is_restricted(&self) -> bool {
        matches!(
            self.status,
            AccountStatus::Banned | AccountStatus::TemporaryBan
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Purchase,
    View,
    Edit,
    MarkRead,
    SendMessage,
    ChangeDisplayName,
    Report,
    Moderate,
}

#[derive(Debug, Clone, Copy)]
pub enum Resource<'a> {
    None,
    Product(&'a Product),
    Order(&'a Order),
    Message(&'a Message),
    Profile(&'a Profile),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(String),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn into_result(self) -> Result<(), ServiceError> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => Err(ServiceError::Forbidden(reason)),
        }
    }
}

fn deny(reason: &str) -> Decision {
    Decision::Deny(reason.to_string())
}

fn allow_if(cond: bool, reason: &str) -> Decision {
    if cond { Decision::Allow } else { deny(reason) }
}

/// Decides whether `actor` may perform `action` on `resource`.
pub fn authorize(actor: &Actor, action: Action, resource: Resource<'_>) -> Decision {
    match (action, resource) {
        (Action::Moderate, _) => allow_if(actor.is_admin(), "admin access required"),

        (Action::Purchase, Resource::Product(product)) => {
            if actor.is_restricted() {
                deny("account is suspended")
            } else if !product.is_active {
                deny("product is not for sale")
            } else {
                allow_if(
                    !product.is_premium || actor.premium,
                    "premium membership required",
                )
            }
        }

        (Action::View, Resource::Order(order)) => allow_if(
            actor.is_admin() || order.user_id == actor.user_id,
            "order belongs to another user",
        ),

        (Action::View, Resource::Message(message)) => allow_if(
            actor.is_admin()
                || message.sender_id == actor.user_id
                || message.recipient_id == actor.user_id,
            "not a participant of this conversation",
        ),

        (Action::Edit, Resource::Message(message)) => {
            if message.sender_id != actor.user_id {
                deny("only the sender can change a message")
            } else {
                allow_if(!message.is_deleted, "message was deleted")
            }
        }

        (Action::MarkRead, Resource::Message(message)) => allow_if(
            message.recipient_id == actor.user_id,
            "only the recipient can mark a message read",
        ),

        (Action::SendMessage, _) => allow_if(!actor.is_restricted(), "account is suspended"),

        (Action::Report, _) => allow_if(
            actor.status != AccountStatus::Banned,
            "account is suspended",
        ),

        (Action::ChangeDisplayName, Resource::Profile(profile)) => {
            if profile.id != actor.user_id && !actor.is_admin() {
                deny("cannot rename another user")
            } else {
                allow_if(
                    actor.premium || actor.is_admin(),
                    "premium membership required to change display name",
                )
            }
        }

        _ => deny("action not permitted"),
    }
}
