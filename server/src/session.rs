//! Per-connection protocol state
//!
//! A connection is either unjoined or a member of exactly one match with one
//! role. Keeping match id and role together in a single `Option` makes a
//! half-joined state unrepresentable.

use shared::Role;

/// Match id and role assigned by a successful `JOIN_MATCH`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub match_id: String,
    pub role: Role,
}

/// Session state owned by a single connection's task
#[derive(Debug, Default, Clone)]
pub struct ConnectionSession {
    membership: Option<Membership>,
}

impl ConnectionSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<&Membership> {
        self.membership.as_ref()
    }

    /// Records a join, returning the membership it replaced
    pub fn set(&mut self, match_id: impl Into<String>, role: Role) -> Option<Membership> {
        self.membership.replace(Membership {
            match_id: match_id.into(),
            role,
        })
    }

    pub fn clear(&mut self) -> Option<Membership> {
        self.membership.take()
    }

    pub fn match_id(&self) -> Option<&str> {
        self.membership.as_ref().map(|m| m.match_id.as_str())
    }

    pub fn role(&self) -> Option<Role> {
        self.membership.as_ref().map(|m| m.role)
    }

    pub fn is_joined(&self) -> bool {
        self.membership.is_some()
    }
}
