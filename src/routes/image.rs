//! Image view: pins over the photo and the detail panel of one pin.
//!
//! The open panel lives in the query string so that each request can rebuild
//! the [`PinBoard`] it acts on: `?pin=ID&placed=1` right after placing a pin,
//! `?pin=ID` for a selected pin, nothing when idle.

use askama::Template;
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Form, Router};
use serde::Deserialize;

use crate::backend::Session;
use crate::error::AppResult;
use crate::extractors::RequireSession;
use crate::images::ImageRegistry;
use crate::models::{Image, Pin};
use crate::notify::{Flash, Notice, Redirect};
use crate::pins::{ImageRect, Panel, PinAnnotator, PinBoard};
use crate::projects::ProjectRegistry;
use crate::routes::page;
use crate::state::AppState;

#[derive(Template)]
#[template(path = "pages/image.html")]
struct ImageTemplate {
    notice: Option<Notice>,
    signed_in: bool,
    image: Image,
    markers: Vec<Marker>,
    panel: Option<PinPanel>,
}

struct Marker {
    id: String,
    left: String,
    top: String,
    selected: bool,
}

struct PinPanel {
    pin_id: String,
    placed: bool,
    entries: Vec<Entry>,
}

struct Entry {
    key: String,
    value: String,
}

impl ImageTemplate {
    fn new(notice: Option<Notice>, image: Image, board: &PinBoard) -> Self {
        let selected_id = board.panel().pin_id();
        let markers = board
            .pins()
            .iter()
            .map(|pin| {
                let marker = pin.marker();
                Marker {
                    id: pin.id.clone(),
                    left: format!("{:.4}", marker.left_percent),
                    top: format!("{:.4}", marker.top_percent),
                    selected: selected_id == Some(pin.id.as_str()),
                }
            })
            .collect();
        let panel = board.selected().map(|pin: &Pin| PinPanel {
            pin_id: pin.id.clone(),
            placed: matches!(board.panel(), Panel::Created(_)),
            entries: pin
                .metadata
                .iter()
                .map(|(key, value)| Entry {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect(),
        });

        Self {
            notice,
            signed_in: true,
            image,
            markers,
            panel,
        }
    }
}

#[derive(Deserialize, Default)]
struct PanelQuery {
    pin: Option<String>,
    placed: Option<String>,
}

impl PanelQuery {
    fn panel(self) -> Panel {
        match (self.pin.filter(|p| !p.is_empty()), self.placed.is_some()) {
            (None, _) => Panel::Idle,
            (Some(id), true) => Panel::Created(id),
            (Some(id), false) => Panel::Selected(id),
        }
    }
}

/// What `<input type="image" name="click">` submits, plus the rendered size
/// the inline script adds. Values are text so that a missing size reads as
/// "unknown" rather than failing the form.
#[derive(Deserialize)]
struct ClickForm {
    #[serde(rename = "click.x", default)]
    x: String,
    #[serde(rename = "click.y", default)]
    y: String,
    #[serde(default)]
    width: String,
    #[serde(default)]
    height: String,
    #[serde(default)]
    open_pin: String,
    #[serde(default)]
    placed: String,
}

impl ClickForm {
    fn open_panel(&self) -> Panel {
        PanelQuery {
            pin: Some(self.open_pin.clone()),
            placed: (!self.placed.is_empty()).then(String::new),
        }
        .panel()
    }
}

#[derive(Deserialize)]
struct MetadataForm {
    key: String,
    value: String,
    #[serde(default)]
    placed: String,
}

fn number(value: &str) -> f64 {
    value.trim().parse().unwrap_or(f64::NAN)
}

/// URL of the image view with the given panel open.
pub fn panel_url(image_id: &str, panel: &Panel) -> String {
    match panel {
        Panel::Idle => format!("/image/{}", image_id),
        Panel::Created(pin) => format!("/image/{}?pin={}&placed=1", image_id, pin),
        Panel::Selected(pin) => format!("/image/{}?pin={}", image_id, pin),
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/image/{id}", get(show))
        .route("/image/{id}/pins", post(place_pin))
        .route("/image/{id}/pins/{pin_id}/metadata", post(add_metadata))
}

async fn load_board(
    state: &AppState,
    session: &Session,
    image_id: &str,
) -> AppResult<(Image, PinAnnotator, PinBoard)> {
    let image = ImageRegistry::new(state.backend.records.clone(), state.backend.blobs.clone())
        .get_image(session, image_id)
        .await?;
    // An image is only reachable through a project the caller can see
    ProjectRegistry::new(state.backend.records.clone())
        .get_project(session, &image.project_id)
        .await?;
    let annotator = PinAnnotator::new(state.backend.records.clone());
    let board = PinBoard::load(&annotator, session, &image.id).await?;
    Ok((image, annotator, board))
}

async fn show(
    State(state): State<AppState>,
    RequireSession(session): RequireSession,
    Path(id): Path<String>,
    Query(query): Query<PanelQuery>,
    flash: Flash,
) -> AppResult<Response> {
    let (image, _, mut board) = load_board(&state, &session, &id).await?;
    board.restore(query.panel());

    let template = ImageTemplate::new(flash.0.clone(), image, &board);
    Ok(page(template, &flash))
}

async fn place_pin(
    State(state): State<AppState>,
    RequireSession(session): RequireSession,
    Path(id): Path<String>,
    Form(form): Form<ClickForm>,
) -> AppResult<Redirect> {
    let (image, annotator, mut board) = load_board(&state, &session, &id).await?;
    board.restore(form.open_panel());

    let rect = ImageRect::sized(number(&form.width), number(&form.height));
    let placed = board
        .click_image(&annotator, &session, rect, number(&form.x), number(&form.y))
        .await
        .map(|pin| pin.is_some());

    let back = Redirect::to(panel_url(&image.id, board.panel()));
    Ok(match placed {
        Ok(_) => back,
        Err(e) => back.error(e.to_string()),
    })
}

async fn add_metadata(
    State(state): State<AppState>,
    RequireSession(session): RequireSession,
    Path((id, pin_id)): Path<(String, String)>,
    Form(form): Form<MetadataForm>,
) -> AppResult<Redirect> {
    let (image, annotator, mut board) = load_board(&state, &session, &id).await?;
    let panel = if form.placed.is_empty() {
        Panel::Selected(pin_id)
    } else {
        Panel::Created(pin_id)
    };
    board.restore(panel);

    let back = panel_url(&image.id, board.panel());
    let redirect = match board
        .add_metadata(&annotator, &session, &form.key, &form.value)
        .await
    {
        Ok(()) => Redirect::to(back).success("Metadata added successfully!"),
        Err(e) => Redirect::to(back).error(e.to_string()),
    };
    Ok(redirect)
}
