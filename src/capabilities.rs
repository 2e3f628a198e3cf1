use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::{EmbedderBackend, VizConfig};
use crate::render::fonts;
use crate::{AppError, AppResult};

/// What this build and host can do, detected once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// The local transformer backend was compiled in.
    pub local_ml: bool,
    /// Font used for figure text, if one was found.
    pub font: Option<PathBuf>,
}

impl Capabilities {
    pub fn detect(config: &VizConfig) -> Self {
        let caps = Self {
            local_ml: cfg!(feature = "local-ml"),
            font: fonts::find_font(config.render.font_path.as_deref()),
        };
        debug!("Detected capabilities: {:?}", caps);
        if caps.font.is_none() {
            info!("No font found; figures will be rendered without text");
        }
        caps
    }

    /// Fail fast when the selected embedder cannot run here.
    pub fn require_embedder(&self, backend: EmbedderBackend) -> AppResult<()> {
        match backend {
            EmbedderBackend::Hashing => Ok(()),
            EmbedderBackend::Bert if self.local_ml => Ok(()),
            EmbedderBackend::Bert => Err(AppError::DependencyUnavailable(
                "the bert embedder needs a build with the `local-ml` feature".to_string(),
            )),
        }
    }
}
