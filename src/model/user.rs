use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "Administrator")]
    Administrator,
    #[serde(rename = "Power User")]
    PowerUser,
    #[serde(rename = "User")]
    User,
    #[serde(rename = "Read-Only")]
    ReadOnly,
    #[serde(rename = "Upload-Only")]
    UploadOnly,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Administrator => "Administrator",
            Role::PowerUser => "Power User",
            Role::User => "User",
            Role::ReadOnly => "Read-Only",
            Role::UploadOnly => "Upload-Only",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Administrator" => Some(Role::Administrator),
            "Power User" => Some(Role::PowerUser),
            "User" => Some(Role::User),
            "Read-Only" => Some(Role::ReadOnly),
            "Upload-Only" => Some(Role::UploadOnly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub principal_name: String,
    pub role: Role,
    pub all_environments: bool,
    /// Domain SIDs / tenant ids this user may see when ETAC is enabled.
    pub environments: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Administrator
    }

    pub fn can_write_graph(&self) -> bool {
        matches!(self.role, Role::Administrator | Role::PowerUser)
    }

    pub fn can_ingest(&self) -> bool {
        matches!(self.role, Role::Administrator | Role::PowerUser | Role::UploadOnly)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentAccess {
    pub all_environments: bool,
    #[serde(default)]
    pub environments: Vec<String>,
}
