use askama::Template;
use axum::extract::State;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Form, Router};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::extractors::RequireSession;
use crate::models::Project;
use crate::notify::{Flash, Notice, Redirect};
use crate::projects::{NewProject, ProjectList, ProjectRegistry};
use crate::routes::page;
use crate::state::AppState;

#[derive(Template)]
#[template(path = "pages/projects.html")]
struct ProjectsTemplate {
    notice: Option<Notice>,
    signed_in: bool,
    projects: Vec<Project>,
}

#[derive(Deserialize)]
struct CreateProjectForm {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    floors: String,
}

impl CreateProjectForm {
    fn validate(&self) -> AppResult<NewProject> {
        let floors = match self.floors.trim() {
            "" => 1,
            n => n
                .parse()
                .map_err(|_| AppError::BadRequest("Floors must be a whole number".into()))?,
        };
        NewProject::new(&self.name, Some(&self.description), floors)
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/projects", post(create))
}

async fn index(
    State(state): State<AppState>,
    RequireSession(session): RequireSession,
    flash: Flash,
) -> Response {
    let registry = ProjectRegistry::new(state.backend.records.clone());
    let (projects, notice) = match ProjectList::load(&registry, &session).await {
        Ok(list) => (list.projects().to_vec(), flash.0.clone()),
        Err(e) => {
            tracing::warn!("Loading projects failed: {}", e);
            (Vec::new(), Some(Notice::error(e.to_string())))
        }
    };

    let template = ProjectsTemplate {
        notice,
        signed_in: true,
        projects,
    };
    page(template, &flash)
}

async fn create(
    State(state): State<AppState>,
    RequireSession(session): RequireSession,
    Form(form): Form<CreateProjectForm>,
) -> Redirect {
    let registry = ProjectRegistry::new(state.backend.records.clone());
    let result = match form.validate() {
        Ok(project) => registry.create_project(&session, project).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(_) => Redirect::to("/").success("Project created successfully!"),
        Err(e) => Redirect::to("/").error(e.to_string()),
    }
}
