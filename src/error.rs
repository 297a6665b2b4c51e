//! Error taxonomy of the map engine and the error channel hosts listen on.
//!
//! Every failure inside the engine ends up in exactly one place: the
//! [`ErrorChannel`] resource. Fetch failures, micro-task failures and
//! tick-level system failures are all logged and forwarded to the handler the
//! host registered, never swallowed and never thrown across the tick boundary.

use std::sync::atomic::{AtomicUsize, Ordering};

use bevy::prelude::*;

use crate::geometry::CellKey;

#[derive(Debug, Clone, thiserror::Error)]
pub enum MapError {
    #[error("failed to fetch {key}: {reason}")]
    Fetch { key: String, reason: String },
    #[error("failed to parse tile {key}: {reason}")]
    Parse { key: CellKey, reason: String },
    #[error("failed to render tile {key}: {reason}")]
    Render { key: CellKey, reason: String },
    #[error("micro task failed: {0}")]
    Task(String),
    #[error("missing singleton: {0}")]
    MissingSingleton(&'static str),
    #[error("entity {0} does not exist")]
    NoSuchEntity(Entity),
    #[error("image error: {0}")]
    Image(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("invalid quad key {0:?}")]
    InvalidQuadKey(String),
    #[error("system {system} failed: {reason}")]
    System { system: &'static str, reason: String },
}

impl MapError {
    pub fn fetch(key: impl ToString, reason: impl ToString) -> Self {
        MapError::Fetch {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<image::ImageError> for MapError {
    fn from(err: image::ImageError) -> Self {
        MapError::Image(err.to_string())
    }
}

impl From<std::io::Error> for MapError {
    fn from(err: std::io::Error) -> Self {
        MapError::Io(err.to_string())
    }
}

pub type ErrorHandler = Box<dyn Fn(&MapError) + Send + Sync>;

/// Single sink for every engine failure. The host registers one handler per map.
#[derive(Resource, Default)]
pub struct ErrorChannel {
    handler: Option<ErrorHandler>,
    reported: AtomicUsize,
}

impl ErrorChannel {
    /// Registers the host handler. Only the first registration is kept.
    pub fn register(&mut self, handler: impl Fn(&MapError) + Send + Sync + 'static) -> bool {
        if self.handler.is_some() {
            warn!("Error handler is already registered, ignoring the new one");
            return false;
        }
        self.handler = Some(Box::new(handler));
        true
    }

    pub fn report(&self, err: &MapError) {
        error!("{err}");
        self.reported.fetch_add(1, Ordering::Relaxed);
        if let Some(handler) = &self.handler {
            handler(err);
        }
    }

    /// Number of failures reported since the map was created.
    pub fn reported(&self) -> usize {
        self.reported.load(Ordering::Relaxed)
    }
}
