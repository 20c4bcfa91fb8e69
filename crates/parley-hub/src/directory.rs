//! Read-only directory of users allowed to connect.

use crate::client::ClientId;
use serde::Serialize;
use std::collections::BTreeMap;

/// A known user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserEntry {
    /// User id, also the client id of their connection.
    pub id: ClientId,
    /// Display name.
    pub name: String,
}

/// Mapping from user id to display name.
///
/// Built once from configuration and shared by reference. Nothing in the
/// relay mutates it after startup.
#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    users: BTreeMap<ClientId, String>,
}

impl UserDirectory {
    /// Create a directory from `(id, name)` pairs. Later duplicates win.
    pub fn new(users: impl IntoIterator<Item = (ClientId, String)>) -> Self {
        Self {
            users: users.into_iter().collect(),
        }
    }

    /// Whether the id is known.
    pub fn contains(&self, id: ClientId) -> bool {
        self.users.contains_key(&id)
    }

    /// Display name for an id.
    pub fn name(&self, id: ClientId) -> Option<&str> {
        self.users.get(&id).map(String::as_str)
    }

    /// Number of known users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether the directory has no users.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// All users, ordered by id.
    pub fn entries(&self) -> Vec<UserEntry> {
        self.users
            .iter()
            .map(|(id, name)| UserEntry {
                id: *id,
                name: name.clone(),
            })
            .collect()
    }

    /// Roster payload: comma-joined `id:name` pairs, ordered by id.
    pub fn roster(&self) -> String {
        self.users
            .iter()
            .map(|(id, name)| format!("{}:{}", id, name))
            .collect::<Vec<_>>()
            .join(",")
    }
}
