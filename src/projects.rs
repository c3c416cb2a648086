//! Project registry: projects and their fixed floor counts.

use std::sync::Arc;

use serde_json::json;

use crate::backend::{Query, RecordStore, Session, Table};
use crate::error::{AppError, AppResult};
use crate::models::{from_record, Project, MAX_FLOORS};

/// Form input for a new project, validated before anything is sent.
#[derive(Debug, Clone, PartialEq)]
pub struct NewProject {
    pub name: String,
    pub description: Option<String>,
    pub floors: u32,
}

impl NewProject {
    pub fn new(name: &str, description: Option<&str>, floors: u32) -> AppResult<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::BadRequest("Project name is required".into()));
        }
        if floors < 1 {
            return Err(AppError::BadRequest(
                "A project needs at least one floor".into(),
            ));
        }
        if floors > MAX_FLOORS {
            return Err(AppError::BadRequest(format!(
                "A project can have at most {} floors",
                MAX_FLOORS
            )));
        }
        let description = description
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        Ok(Self {
            name: name.to_string(),
            description,
            floors,
        })
    }
}

#[derive(Clone)]
pub struct ProjectRegistry {
    records: Arc<dyn RecordStore>,
}

impl ProjectRegistry {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    /// All of the caller's projects, newest first.
    pub async fn list_projects(&self, session: &Session) -> AppResult<Vec<Project>> {
        let rows = self
            .records
            .select(session, Table::Projects, &Query::new().newest_first())
            .await?;
        rows.into_iter().map(from_record).collect()
    }

    pub async fn get_project(&self, session: &Session, id: &str) -> AppResult<Project> {
        let rows = self
            .records
            .select(session, Table::Projects, &Query::new().eq("id", id))
            .await?;
        let row = rows.into_iter().next().ok_or(AppError::NotFound)?;
        from_record(row)
    }

    pub async fn create_project(&self, session: &Session, project: NewProject) -> AppResult<Project> {
        let record = json!({
            "name": project.name,
            "description": project.description,
            "floors": project.floors,
        });
        let stored = self.records.insert(session, Table::Projects, record).await?;
        let created: Project = from_record(stored)?;

        tracing::info!(project_id = %created.id, floors = created.floors, "Created project");
        Ok(created)
    }
}

/// The projects view's in-memory list. Loaded once; creations are prepended
/// without fetching again.
#[derive(Debug, Clone, Default)]
pub struct ProjectList {
    projects: Vec<Project>,
}

impl ProjectList {
    pub async fn load(registry: &ProjectRegistry, session: &Session) -> AppResult<Self> {
        Ok(Self {
            projects: registry.list_projects(session).await?,
        })
    }

    pub async fn create(
        &mut self,
        registry: &ProjectRegistry,
        session: &Session,
        project: NewProject,
    ) -> AppResult<&Project> {
        let created = registry.create_project(session, project).await?;
        self.projects.insert(0, created);
        Ok(&self.projects[0])
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}
