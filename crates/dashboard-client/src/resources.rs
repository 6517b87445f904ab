use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;

use crate::client::DashboardClient;
use crate::error::ApiClientError;

/// Backend collections reachable through the authenticated client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Users,
    Roles,
    Permissions,
    Projects,
    Tasks,
    TimeLogs,
    Attachments,
}

impl Resource {
    pub const ALL: [Self; 7] = [
        Self::Users,
        Self::Roles,
        Self::Permissions,
        Self::Projects,
        Self::Tasks,
        Self::TimeLogs,
        Self::Attachments,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Roles => "roles",
            Self::Permissions => "permissions",
            Self::Projects => "projects",
            Self::Tasks => "tasks",
            Self::TimeLogs => "time-logs",
            Self::Attachments => "attachments",
        }
    }

    /// Accepts the path segment, singular forms, and `_` in place of `-`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().trim_matches('/').to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "users" | "user" => Some(Self::Users),
            "roles" | "role" => Some(Self::Roles),
            "permissions" | "permission" => Some(Self::Permissions),
            "projects" | "project" => Some(Self::Projects),
            "tasks" | "task" => Some(Self::Tasks),
            "time-logs" | "time-log" | "timelogs" | "timelog" => Some(Self::TimeLogs),
            "attachments" | "attachment" => Some(Self::Attachments),
            _ => None,
        }
    }

    #[must_use]
    pub fn collection_path(self) -> String {
        format!("/{}", self.as_str())
    }

    /// The id is percent-encoded as a single path segment.
    #[must_use]
    pub fn item_path(self, id: &str) -> String {
        format!("/{}/{}", self.as_str(), urlencoding::encode(id.trim()))
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown resource: {0}")]
pub struct UnknownResource(pub String);

impl FromStr for Resource {
    type Err = UnknownResource;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw).ok_or_else(|| UnknownResource(raw.to_string()))
    }
}

impl DashboardClient {
    pub async fn list(&self, resource: Resource) -> Result<Value, ApiClientError> {
        self.get_json(&resource.collection_path()).await
    }

    /// `None` when the backend answers 404.
    pub async fn fetch(
        &self,
        resource: Resource,
        id: &str,
    ) -> Result<Option<Value>, ApiClientError> {
        self.get_optional_json(&resource.item_path(id)).await
    }

    pub async fn create<B>(&self, resource: Resource, body: &B) -> Result<Value, ApiClientError>
    where
        B: Serialize + ?Sized,
    {
        self.post_json(&resource.collection_path(), body).await
    }

    pub async fn update<B>(
        &self,
        resource: Resource,
        id: &str,
        body: &B,
    ) -> Result<Value, ApiClientError>
    where
        B: Serialize + ?Sized,
    {
        self.put_json(&resource.item_path(id), body).await
    }

    pub async fn patch<B>(
        &self,
        resource: Resource,
        id: &str,
        body: &B,
    ) -> Result<Value, ApiClientError>
    where
        B: Serialize + ?Sized,
    {
        self.patch_json(&resource.item_path(id), body).await
    }

    pub async fn remove(&self, resource: Resource, id: &str) -> Result<(), ApiClientError> {
        self.delete(&resource.item_path(id)).await
    }
}
