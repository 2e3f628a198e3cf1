//! Orchestration of one visualization request.
//!
//! `Start → Embedding → (DegenerateDisplay | FullAnalysis) → Rendered → Encoded → Done`,
//! with `Failed` reachable from every step before `Done`. Nothing is kept between calls.

use std::fmt::Display;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analysis::KMeansClusterer;
use crate::analysis::hashing::HashingEmbedder;
use crate::analysis::traits::{Clusterer, Embedder, Projector};
use crate::analysis::tsne::TsneProjector;
use crate::capabilities::Capabilities;
use crate::config::{EmbedderBackend, VizConfig};
use crate::render::Renderer;
use crate::{AppError, AppResult, ErrorKind};

/// Input of a visualization call.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VisualizeRequest {
    pub informal_statement: String,
    pub lean_codes: Vec<String>,
}

impl VisualizeRequest {
    /// Admission check run before any model is loaded.
    /// `Ok(None)` means there is nothing to draw.
    pub fn validate(&self) -> AppResult<Option<&[String]>> {
        validate_inputs(&self.informal_statement, &self.lean_codes)
    }
}

fn validate_inputs<'a>(statement: &str, codes: &'a [String]) -> AppResult<Option<&'a [String]>> {
    if statement.is_empty() {
        return Err(AppError::Validation(
            "informal_statement must not be empty".to_string(),
        ));
    }
    if codes.is_empty() {
        return Ok(None);
    }
    Ok(Some(codes))
}

/// Response envelope: `{plot_image, success}` or `{error, success}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VisualizeResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plot_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub success: bool,
    #[serde(skip)]
    pub kind: Option<ErrorKind>,
}

impl VisualizeResponse {
    pub fn ok(plot_image: String) -> Self {
        Self {
            plot_image: Some(plot_image),
            error: None,
            success: true,
            kind: None,
        }
    }

    pub fn failed(error: &AppError) -> Self {
        Self {
            plot_image: None,
            error: Some(error.to_string()),
            success: false,
            kind: Some(error.kind()),
        }
    }

    /// HTTP-style status a transport would answer with.
    pub fn status_code(&self) -> u16 {
        match (self.success, self.kind) {
            (true, _) => 200,
            (false, Some(ErrorKind::Validation)) => 400,
            (false, _) => 500,
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> i32 {
        match self.status_code() {
            200 => 0,
            400 => 2,
            _ => 1,
        }
    }
}

impl From<AppResult<String>> for VisualizeResponse {
    fn from(result: AppResult<String>) -> Self {
        match result {
            Ok(image) => Self::ok(image),
            Err(e) => Self::failed(&e),
        }
    }
}

/// Readiness report.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    pub status: String,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            status: "healthy".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    Embedding,
    DegenerateDisplay,
    FullAnalysis,
    Rendered,
    Encoded,
    Done,
    Failed,
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Start => "start",
            Stage::Embedding => "embedding",
            Stage::DegenerateDisplay => "degenerate_display",
            Stage::FullAnalysis => "full_analysis",
            Stage::Rendered => "rendered",
            Stage::Encoded => "encoded",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Build the embedder selected in `config`, failing fast when it is unavailable.
pub async fn embedder_from_config(
    config: &VizConfig,
    caps: &Capabilities,
) -> AppResult<Box<dyn Embedder>> {
    caps.require_embedder(config.embedder)?;
    match config.embedder {
        EmbedderBackend::Hashing => Ok(Box::new(HashingEmbedder::from_config(&config.hashing))),
        #[cfg(feature = "local-ml")]
        EmbedderBackend::Bert => Ok(Box::new(
            crate::analysis::bert::BertEmbedder::new_from_pretrained(&config.model).await?,
        )),
        #[cfg(not(feature = "local-ml"))]
        EmbedderBackend::Bert => Err(AppError::DependencyUnavailable(format!(
            "cannot load {} without the `local-ml` feature",
            config.model
        ))),
    }
}

/// Embed, cluster, project and render. Each stage is a trait so it can be swapped.
pub struct Pipeline<E, C = KMeansClusterer, P = TsneProjector> {
    embedder: E,
    clusterer: C,
    projector: P,
    renderer: Renderer,
    min_points: usize,
    coarse_k: usize,
    fine_k: usize,
}

impl<E: Embedder> Pipeline<E> {
    /// Default k-means and t-SNE stages configured from `config`.
    pub fn with_embedder(embedder: E, config: &VizConfig) -> Self {
        Self::new(
            embedder,
            KMeansClusterer::from_config(&config.clustering),
            TsneProjector::from_config(&config.projection),
            config,
        )
    }
}

impl<E: Embedder, C: Clusterer, P: Projector> Pipeline<E, C, P> {
    pub fn new(embedder: E, clusterer: C, projector: P, config: &VizConfig) -> Self {
        Self {
            embedder,
            clusterer,
            projector,
            renderer: Renderer::new(config.render.clone()),
            min_points: config.min_points,
            coarse_k: config.clustering.coarse_k,
            fine_k: config.clustering.fine_k,
        }
    }

    /// PNG bytes of the figure, or `None` when there is nothing to draw.
    #[tracing::instrument(
        name = "Visualizing formalizations",
        level = "info",
        skip_all,
        fields(snippets = codes.len(), embedder = self.embedder.name())
    )]
    pub fn render_png(&self, statement: &str, codes: &[String]) -> AppResult<Option<Vec<u8>>> {
        debug!(stage = %Stage::Start);
        let Some(codes) = validate_inputs(statement, codes)? else {
            info!("No formalizations given, nothing to visualize");
            return Ok(None);
        };

        debug!(stage = %Stage::Embedding);
        let embeddings = self.embedder.embed(codes)?;
        if embeddings.nrows() != codes.len() {
            return Err(AppError::Embedding(format!(
                "got {} embeddings for {} snippets",
                embeddings.nrows(),
                codes.len()
            )));
        }

        let n_points = embeddings.nrows();
        let png = if n_points < self.min_points {
            debug!(stage = %Stage::DegenerateDisplay, n_points);
            self.renderer.render_placeholder(n_points, statement)?
        } else {
            debug!(stage = %Stage::FullAnalysis, n_points);
            let coarse = self.clusterer.cluster(&embeddings, self.coarse_k)?;
            let fine = self.clusterer.cluster(&embeddings, self.fine_k)?;
            let projection = self.projector.project(&embeddings)?;
            self.renderer
                .render(codes, &projection, &coarse, &fine, statement)?
        };
        debug!(stage = %Stage::Rendered, bytes = png.len());
        Ok(Some(png))
    }

    /// Base64 (standard alphabet, padded) PNG; the empty string when there is nothing to draw.
    pub fn run(&self, statement: &str, codes: &[String]) -> AppResult<String> {
        let result = self.render_png(statement, codes).map(|png| match png {
            Some(bytes) => {
                let encoded = STANDARD.encode(bytes);
                debug!(stage = %Stage::Encoded, chars = encoded.len());
                encoded
            }
            None => String::new(),
        });
        match &result {
            Ok(_) => debug!(stage = %Stage::Done),
            Err(e) => warn!(stage = %Stage::Failed, kind = %e.kind(), "{}", e),
        }
        result
    }

    /// Run a request and wrap the outcome in the response envelope.
    pub fn handle(&self, request: &VisualizeRequest) -> VisualizeResponse {
        self.run(&request.informal_statement, &request.lean_codes)
            .into()
    }
}
