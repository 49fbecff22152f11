use serde::{Deserialize, Serialize};

use crate::models::Group;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GroupResponse {
    pub id: i64,
    pub name: String,
    pub governor: i64,
}

impl From<&Group> for GroupResponse {
    fn from(group: &Group) -> Self {
        Self {
            id: group.id(),
            name: group.name().to_string(),
            governor: group.governor_id(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: Option<String>,
    /// Defaults to the caller.
    pub governor: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateGroupRequest {
    pub name: Option<String>,
    pub governor: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: i64,
}
