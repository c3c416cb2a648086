//! Pin annotator: point annotations over a displayed image.
//!
//! Positions are stored as fractions of the image's rendered width and
//! height, so a marker drawn at `(100x%, 100y%)` of the image container
//! lands on the same spot at any display size. Scaling that does not keep
//! the aspect ratio will misplace markers; no per-axis correction is made.

use std::sync::Arc;

use serde_json::json;

use crate::backend::{Query, RecordStore, Session, Table};
use crate::error::{AppError, AppResult};
use crate::models::{from_record, Metadata, Pin};

/// Where the image is drawn, in the same pixel space as the click.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// A position relative to the image, each axis in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedPoint {
    pub x: f64,
    pub y: f64,
}

/// CSS offsets of a marker inside the image container.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerPosition {
    pub left_percent: f64,
    pub top_percent: f64,
}

impl ImageRect {
    /// Rect of an image whose click offsets are already relative to its
    /// top-left corner.
    pub fn sized(width: f64, height: f64) -> Self {
        Self {
            left: 0.0,
            top: 0.0,
            width,
            height,
        }
    }

    /// Normalize a click. `None` for clicks outside the image or an image
    /// with no rendered area.
    pub fn normalize(&self, click_x: f64, click_y: f64) -> Option<NormalizedPoint> {
        if !(self.width > 0.0 && self.height > 0.0) {
            return None;
        }
        let x = (click_x - self.left) / self.width;
        let y = (click_y - self.top) / self.height;
        let inside = (0.0..=1.0).contains(&x) && (0.0..=1.0).contains(&y);
        inside.then_some(NormalizedPoint { x, y })
    }
}

impl NormalizedPoint {
    pub fn marker(&self) -> MarkerPosition {
        MarkerPosition {
            left_percent: self.x * 100.0,
            top_percent: self.y * 100.0,
        }
    }
}

impl Pin {
    pub fn position(&self) -> NormalizedPoint {
        NormalizedPoint {
            x: self.x,
            y: self.y,
        }
    }

    pub fn marker(&self) -> MarkerPosition {
        self.position().marker()
    }
}

#[derive(Clone)]
pub struct PinAnnotator {
    records: Arc<dyn RecordStore>,
}

impl PinAnnotator {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    /// Pins on an image in the order they were placed.
    pub async fn list_pins(&self, session: &Session, image_id: &str) -> AppResult<Vec<Pin>> {
        let rows = self
            .records
            .select(
                session,
                Table::Pins,
                &Query::new().eq("image_id", image_id).oldest_first(),
            )
            .await?;
        rows.into_iter().map(from_record).collect()
    }

    pub async fn place_pin(
        &self,
        session: &Session,
        image_id: &str,
        point: NormalizedPoint,
    ) -> AppResult<Pin> {
        let stored = self
            .records
            .insert(
                session,
                Table::Pins,
                json!({ "image_id": image_id, "x": point.x, "y": point.y, "metadata": {} }),
            )
            .await?;
        let pin: Pin = from_record(stored)?;
        tracing::info!(pin_id = %pin.id, image_id, x = pin.x, y = pin.y, "Placed pin");
        Ok(pin)
    }

    /// Persist a pin's complete metadata mapping.
    pub async fn save_metadata(
        &self,
        session: &Session,
        pin_id: &str,
        metadata: &Metadata,
    ) -> AppResult<()> {
        self.records
            .update(session, Table::Pins, pin_id, json!({ "metadata": metadata }))
            .await?;
        Ok(())
    }
}

/// Detail panel state of an image view.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Panel {
    #[default]
    Idle,
    /// A pin was just placed and its panel opened.
    Created(String),
    /// An existing pin was clicked.
    Selected(String),
}

impl Panel {
    pub fn pin_id(&self) -> Option<&str> {
        match self {
            Panel::Idle => None,
            Panel::Created(id) | Panel::Selected(id) => Some(id),
        }
    }
}

/// The image view: its pins plus the open panel.
#[derive(Debug, Clone)]
pub struct PinBoard {
    image_id: String,
    pins: Vec<Pin>,
    panel: Panel,
}

impl PinBoard {
    pub fn new(image_id: impl Into<String>, pins: Vec<Pin>) -> Self {
        Self {
            image_id: image_id.into(),
            pins,
            panel: Panel::Idle,
        }
    }

    pub async fn load(annotator: &PinAnnotator, session: &Session, image_id: &str) -> AppResult<Self> {
        let pins = annotator.list_pins(session, image_id).await?;
        Ok(Self::new(image_id, pins))
    }

    pub fn image_id(&self) -> &str {
        &self.image_id
    }

    pub fn pins(&self) -> &[Pin] {
        &self.pins
    }

    pub fn panel(&self) -> &Panel {
        &self.panel
    }

    pub fn is_form_open(&self) -> bool {
        self.panel != Panel::Idle
    }

    /// The pin whose panel is open.
    pub fn selected(&self) -> Option<&Pin> {
        let id = self.panel.pin_id()?;
        self.pins.iter().find(|p| p.id == id)
    }

    /// Place a pin where the image was clicked.
    ///
    /// Ignored (returns `Ok(None)`) while a panel is open, and for clicks
    /// that fall outside the image.
    pub async fn click_image(
        &mut self,
        annotator: &PinAnnotator,
        session: &Session,
        rect: ImageRect,
        click_x: f64,
        click_y: f64,
    ) -> AppResult<Option<&Pin>> {
        if self.is_form_open() {
            tracing::debug!(image_id = %self.image_id, "Click ignored while a pin panel is open");
            return Ok(None);
        }
        let Some(point) = rect.normalize(click_x, click_y) else {
            return Ok(None);
        };

        let pin = annotator.place_pin(session, &self.image_id, point).await?;
        self.panel = Panel::Created(pin.id.clone());
        self.pins.push(pin);
        Ok(self.pins.last())
    }

    /// Open the panel of an existing pin, replacing whatever was open.
    /// Returns false for a pin that is not on this image.
    pub fn select(&mut self, pin_id: &str) -> bool {
        if self.pins.iter().any(|p| p.id == pin_id) {
            self.panel = Panel::Selected(pin_id.to_string());
            true
        } else {
            false
        }
    }

    /// Merge one key/value pair into the open pin's metadata and persist the
    /// whole mapping. In-memory state changes only once the save succeeds.
    pub async fn add_metadata(
        &mut self,
        annotator: &PinAnnotator,
        session: &Session,
        key: &str,
        value: &str,
    ) -> AppResult<()> {
        if key.is_empty() || value.is_empty() {
            return Err(AppError::BadRequest("Key and value are both required".into()));
        }
        let pin = self
            .selected()
            .ok_or_else(|| AppError::BadRequest("No pin is selected".into()))?;

        let pin_id = pin.id.clone();
        let mut metadata = pin.metadata.clone();
        metadata.insert(key.to_string(), value.to_string());

        annotator.save_metadata(session, &pin_id, &metadata).await?;

        if let Some(pin) = self.pins.iter_mut().find(|p| p.id == pin_id) {
            pin.metadata = metadata;
        }
        tracing::info!(pin_id = %pin_id, key, "Added pin metadata");
        Ok(())
    }

    /// Close the panel. The pin itself stays.
    pub fn close(&mut self) {
        self.panel = Panel::Idle;
    }

    /// Restore a panel carried over from a previous request. Unknown pins
    /// leave the board idle.
    pub fn restore(&mut self, panel: Panel) {
        let known = panel
            .pin_id()
            .map(|id| self.pins.iter().any(|p| p.id == id))
            .unwrap_or(true);
        self.panel = if known { panel } else { Panel::Idle };
    }
}
