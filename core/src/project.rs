use crate::api::ApiClient;
use crate::error::{ClientError, ClientResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::info;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Draft,
    Active,
    Archived,
    Deployed,
}

impl ProjectStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Archived => "archived",
            Self::Deployed => "deployed",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A project owned by the signed-in user. The server is the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: ProjectStatus,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NewProject {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl NewProject {
    pub fn new(name: &str, description: Option<&str>) -> ClientResult<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ClientError::Validation("project name cannot be empty".into()));
        }
        Ok(Self {
            name: name.to_string(),
            description: description
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .map(str::to_string),
        })
    }
}

/// Locally cached project listing.
#[derive(Debug, Clone, Default)]
pub struct ProjectList {
    projects: Vec<Project>,
}

impl ProjectList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    pub fn find(&self, id: &str) -> Option<&Project> {
        self.projects.iter().find(|project| project.id == id)
    }

    pub async fn refresh(&mut self, api: &ApiClient) -> ClientResult<&[Project]> {
        self.projects = api.projects().await?;
        Ok(&self.projects)
    }

    pub async fn create(&mut self, api: &ApiClient, project: &NewProject) -> ClientResult<&Project> {
        let created = api.create_project(project).await?;
        info!("id" = %created.id, "slug" = %created.slug, "project created");
        self.projects.insert(0, created);
        Ok(&self.projects[0])
    }

    /// Removes the project locally only once the server confirms the delete.
    pub async fn delete(&mut self, api: &ApiClient, id: &str) -> ClientResult<()> {
        api.delete_project(id).await?;
        self.projects.retain(|project| project.id != id);
        info!("id" = id, "project deleted");
        Ok(())
    }
}
