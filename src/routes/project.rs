use askama::Template;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;

use crate::backend::Session;
use crate::error::{AppError, AppResult};
use crate::extractors::RequireSession;
use crate::images::{ImageRegistry, Upload};
use crate::models::{Image, Project};
use crate::notify::{Flash, Notice, Redirect};
use crate::projects::ProjectRegistry;
use crate::routes::page;
use crate::state::AppState;

const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

#[derive(Template)]
#[template(path = "pages/project.html")]
struct ProjectTemplate {
    notice: Option<Notice>,
    signed_in: bool,
    project: Project,
    floors: Vec<u32>,
    images: Vec<Image>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/project/{id}", get(show)).route(
        "/project/{id}/images",
        post(upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
    )
}

async fn show(
    State(state): State<AppState>,
    RequireSession(session): RequireSession,
    Path(id): Path<String>,
    flash: Flash,
) -> AppResult<Response> {
    let project = ProjectRegistry::new(state.backend.records.clone())
        .get_project(&session, &id)
        .await?;
    let images = ImageRegistry::new(state.backend.records.clone(), state.backend.blobs.clone());

    let (images, notice) = match images.list_images(&session, &project.id).await {
        Ok(images) => (images, flash.0.clone()),
        Err(e) => (Vec::new(), Some(Notice::error(e.to_string()))),
    };

    let template = ProjectTemplate {
        notice,
        signed_in: true,
        floors: project.floor_numbers().collect(),
        project,
        images,
    };
    Ok(page(template, &flash))
}

async fn upload(
    State(state): State<AppState>,
    RequireSession(session): RequireSession,
    Path(id): Path<String>,
    multipart: Multipart,
) -> AppResult<Response> {
    let back = format!("/project/{}", id);
    let redirect = match store_upload(&state, &session, &id, multipart).await {
        Ok(Some(_)) => Redirect::to(back).success("Image uploaded successfully!"),
        Ok(None) => Redirect::to(back),
        Err(AppError::NotFound) => return Err(AppError::NotFound),
        Err(e) => Redirect::to(back).error(e.to_string()),
    };
    Ok(redirect.into_response())
}

async fn store_upload(
    state: &AppState,
    session: &Session,
    project_id: &str,
    multipart: Multipart,
) -> AppResult<Option<Image>> {
    let project = ProjectRegistry::new(state.backend.records.clone())
        .get_project(session, project_id)
        .await?;
    let upload = read_file_field(multipart).await?;

    ImageRegistry::new(state.backend.records.clone(), state.backend.blobs.clone())
        .upload_image(session, &project.id, upload)
        .await
}

/// First file part of the form, `None` when the form carried none.
async fn read_file_field(mut multipart: Multipart) -> AppResult<Option<Upload>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;

        return Ok(Some(Upload {
            file_name,
            content_type,
            data,
        }));
    }
    Ok(None)
}
