// src/models/actor.rs
//! Acting-user identity as supplied by the external command interface.

use serde::{Deserialize, Serialize};

/// The user performing a command, with their role membership.
///
/// The chat-platform front end resolves the user's identity and role ids
/// before dispatching a command; this struct carries that context into the
/// authorization checks. It is trusted input from the platform, not from
/// the end user.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Actor {
    /// Platform user id of the caller
    pub id: i64,

    /// Role ids the caller currently holds
    pub roles: Vec<i64>,
}

impl Actor {
    /// Whether the actor holds the given role.
    pub fn has_role(&self, role_id: i64) -> bool {
        self.roles.contains(&role_id)
    }
}
