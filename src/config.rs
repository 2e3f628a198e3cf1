use std::path::{Path, PathBuf};

use clap::ValueEnum;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{AppError, AppResult};

/// Which embedding backend turns snippets into vectors.
#[derive(ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderBackend {
    /// Deterministic feature hashing, always available
    #[default]
    Hashing,
    /// Local sentence-transformers model (requires the `local-ml` feature)
    Bert,
}

impl std::fmt::Display for EmbedderBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbedderBackend::Hashing => write!(f, "hashing"),
            EmbedderBackend::Bert => write!(f, "bert"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HashingConfig {
    pub dimension: usize,
    pub seed: u32,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            dimension: 384,
            seed: 0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ClusteringConfig {
    /// Cluster count of the left panel.
    pub coarse_k: usize,
    /// Cluster count of the right panel.
    pub fine_k: usize,
    pub seed: u64,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            coarse_k: 2,
            fine_k: 4,
            seed: 0,
            max_iterations: 300,
            tolerance: 1e-4,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectionConfig {
    pub perplexity: f64,
    pub iterations: usize,
    pub seed: u64,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            perplexity: 30.0,
            iterations: 1000,
            seed: 0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    /// Figure width in inches.
    pub width_in: f64,
    /// Figure height in inches.
    pub height_in: f64,
    pub dpi: u32,
    pub title_width: usize,
    pub label_max_chars: usize,
    /// Label font size in points.
    pub label_font_pt: f64,
    /// Title font size in points.
    pub title_font_pt: f64,
    pub layout_iterations: usize,
    /// TrueType font used for all text. Common system locations are searched when unset.
    /// Fonts are registered once per process, so only the first renderer's choice takes effect.
    pub font_path: Option<PathBuf>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width_in: 15.0,
            height_in: 7.0,
            dpi: 150,
            title_width: 30,
            label_max_chars: 50,
            label_font_pt: 8.0,
            title_font_pt: 12.0,
            layout_iterations: 200,
            font_path: None,
        }
    }
}

impl RenderConfig {
    /// Pixel dimensions of the full figure before cropping.
    pub fn pixel_size(&self) -> (u32, u32) {
        let dpi = f64::from(self.dpi);
        (
            (self.width_in * dpi).round() as u32,
            (self.height_in * dpi).round() as u32,
        )
    }

    /// Convert a size in points to pixels at the configured resolution.
    pub fn pt_to_px(&self, pt: f64) -> f64 {
        pt * f64::from(self.dpi) / 72.0
    }
}

/// Every tunable of the pipeline. Missing fields fall back to their defaults.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct VizConfig {
    pub embedder: EmbedderBackend,
    /// Hugging Face model used by the `bert` backend.
    pub model: String,
    pub hashing: HashingConfig,
    /// Below this many snippets clustering and projection are skipped.
    pub min_points: usize,
    pub clustering: ClusteringConfig,
    pub projection: ProjectionConfig,
    pub render: RenderConfig,
}

impl Default for VizConfig {
    fn default() -> Self {
        Self {
            embedder: EmbedderBackend::default(),
            model: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            hashing: HashingConfig::default(),
            min_points: 4,
            clustering: ClusteringConfig::default(),
            projection: ProjectionConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

/// Prefix of environment overrides. Nested keys are separated by `__`,
/// e.g. `LEAN_EMBED_VIZ_RENDER__DPI=72`.
pub const ENV_PREFIX: &str = "LEAN_EMBED_VIZ_";

fn defaults() -> Figment {
    Figment::from(Serialized::defaults(VizConfig::default()))
}

impl VizConfig {
    /// Parse a config from JSON text layered over the defaults.
    pub fn from_json_str(data: &str) -> AppResult<Self> {
        Self::extract(defaults().merge(Json::string(data)))
    }

    /// Layer defaults, the user config file, an explicit config file and
    /// `LEAN_EMBED_VIZ_*` environment variables, in that order.
    #[tracing::instrument(name = "Loading configuration", level = "debug")]
    pub fn load(explicit: Option<&Path>) -> AppResult<Self> {
        let mut figment = defaults();

        match lean_embed_viz_dirs::config_file() {
            Ok(user_file) if user_file.is_file() => {
                debug!("Reading user configuration from {}", user_file.display());
                figment = figment.merge(Json::file(user_file));
            }
            Ok(user_file) => trace!("No user configuration at {}", user_file.display()),
            Err(e) => trace!("Skipping user configuration: {}", e),
        }

        if let Some(path) = explicit {
            if !path.is_file() {
                return Err(AppError::Validation(format!(
                    "configuration file {} does not exist",
                    path.display()
                )));
            }
            debug!("Reading configuration from {}", path.display());
            figment = figment.merge(Json::file(path));
        }

        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    fn extract(figment: Figment) -> AppResult<Self> {
        let config: VizConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |msg: &str| Err(AppError::Validation(format!("invalid configuration: {msg}")));
        if self.min_points < 2 {
            return invalid("min_points must be at least 2");
        }
        if self.clustering.coarse_k == 0 || self.clustering.fine_k == 0 {
            return invalid("cluster counts must be positive");
        }
        if self.hashing.dimension == 0 {
            return invalid("hashing.dimension must be positive");
        }
        if !(self.projection.perplexity > 0.0) {
            return invalid("projection.perplexity must be positive");
        }
        if self.projection.iterations == 0 {
            return invalid("projection.iterations must be positive");
        }
        if self.render.dpi == 0 || self.render.width_in <= 0.0 || self.render.height_in <= 0.0 {
            return invalid("render size must be positive");
        }
        if self.render.title_width == 0 || self.render.label_max_chars == 0 {
            return invalid("render widths must be positive");
        }
        Ok(())
    }
}
