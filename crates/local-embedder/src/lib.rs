use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use futures::StreamExt;
use murmur3::murmur3_x86_128;
use tokenizers::tokenizer::{Tokenizer, TruncationParams};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info_span, trace, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use tracing_indicatif::style::ProgressStyle;

/// Sentence-transformers model used when no other model is configured.
pub static DEFAULT_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// all-MiniLM-L6-v2 was trained with at most 256 word pieces per input.
static MAX_SEQ_LEN: usize = 256;

static MODEL_FILES: [&str; 3] = ["config.json", "model.safetensors", "tokenizer.json"];

#[derive(thiserror::Error, Debug)]
pub enum EmbedderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),
    #[error("Bincode error: {0}")]
    Bincode(#[from] bincode::error::DecodeError),
    #[error("Bincode encode error: {0}")]
    BincodeEncode(#[from] bincode::error::EncodeError),
    #[error("Int parse error: {0}")]
    ParseInt(#[from] std::num::ParseIntError),
    #[error("Header value error: {0}")]
    HeaderValue(#[from] reqwest::header::ToStrError),
    #[error("Model file {file} could not be downloaded: HTTP {status}")]
    Download { file: String, status: u16 },
    #[error("{0}")]
    Dir(#[from] lean_embed_viz_dirs::DirError),
}

// Tokenizer error mapping
impl From<Box<dyn std::error::Error + Send + Sync>> for EmbedderError {
    fn from(e: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::Tokenizer(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EmbedderError>;

/// Sentence embedder around a BERT encoder with mean pooling and L2 normalization.
#[derive(Clone)]
pub struct BertEmbedder {
    device: Device,
    model: Arc<BertModel>,
    tokenizer: Arc<Tokenizer>,
    model_name: String,
    hidden_size: usize,
    cache_dir: PathBuf,
}

impl std::fmt::Debug for BertEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BertEmbedder")
            .field("model_name", &self.model_name)
            .field("hidden_size", &self.hidden_size)
            .field("cache_dir", &self.cache_dir)
            .finish_non_exhaustive()
    }
}

impl BertEmbedder {
    fn create_device() -> Result<Device> {
        #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
        {
            Ok(Device::new_metal(0)?)
        }

        #[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
        {
            Ok(Device::Cpu)
        }
    }

    /// Directory under the cache root holding the files for `model_name`.
    fn model_dir(cache_root: &Path, model_name: &str) -> PathBuf {
        cache_root
            .join("huggingface")
            .join("transformers")
            .join(model_name.replace('/', "_"))
    }

    #[tracing::instrument(name = "Downloading embedding model from Hugging Face", level = "info")]
    pub async fn new_from_pretrained<S: AsRef<str> + std::fmt::Debug>(
        model_name: S,
    ) -> Result<Self> {
        let cache_dir = lean_embed_viz_dirs::DirType::Cache
            .ensure_dir_async()
            .await?;
        let model_dir = Self::model_dir(&cache_dir, model_name.as_ref());

        if !model_dir.exists() {
            tokio::fs::create_dir_all(&model_dir).await?;
        }

        let base_url = format!(
            "https://huggingface.co/{}/resolve/main/",
            model_name.as_ref()
        );

        let client = reqwest::ClientBuilder::new()
            .user_agent(format!("lean-embed-viz/{}", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(10))
            .referer(true)
            .retry(reqwest::retry::for_host("huggingface.co").max_retries_per_request(3))
            .build()?;

        for file in MODEL_FILES {
            let file_path = model_dir.join(file);
            if file_path.exists() {
                continue;
            }
            let url = format!("{}{}", base_url, file);
            let resp = client.get(&url).send().await?;
            if !resp.status().is_success() {
                return Err(EmbedderError::Download {
                    file: file.to_string(),
                    status: resp.status().as_u16(),
                });
            }

            let header_span = info_span!("Downloading model file", file = %file);
            header_span.pb_set_message("Downloading...");
            header_span.pb_set_finish_message("Download complete");

            if let Some(content_length) = resp.headers().get(reqwest::header::CONTENT_LENGTH) {
                let file_size: u64 = content_length.to_str()?.parse()?;
                debug!("Expected file size: {} bytes", file_size);
                if let Ok(style) = ProgressStyle::default_bar()
                    .template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                {
                    header_span.pb_set_style(&style);
                }
                header_span.pb_set_length(file_size);
            } else {
                warn!("Content-Length header not found.");
                if let Ok(style) = ProgressStyle::default_spinner().template("{msg} {spinner}") {
                    header_span.pb_set_style(&style);
                }
            }
            let _enter = header_span.enter();

            // Renamed into place only once the stream completes.
            let partial_path = file_path.with_extension("partial");
            let mut open_file = tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&partial_path)
                .await?;
            let mut stream = resp.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                open_file.write_all(&chunk).await?;
                header_span.pb_inc(chunk.len() as u64);
            }
            open_file.flush().await?;
            open_file.sync_all().await?;
            open_file.shutdown().await?;
            tokio::fs::rename(&partial_path, &file_path).await?;
        }

        Self::new_from_dir(model_dir, model_name.as_ref())
    }

    #[tracing::instrument(
        name = "Loading embedding model from directory",
        level = "info",
        skip(model_dir)
    )]
    pub fn new_from_dir<P: AsRef<Path>>(model_dir: P, model_name: &str) -> Result<Self> {
        let cache_dir = lean_embed_viz_dirs::DirType::Cache
            .ensure_dir()?
            .join("embeddings")
            .join(model_name.replace('/', "_"));
        std::fs::create_dir_all(&cache_dir)?;
        let model_dir = model_dir.as_ref();

        let tokenizer_path = model_dir.join("tokenizer.json");
        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| EmbedderError::Tokenizer(e.to_string()))?;
        tokenizer
            .with_padding(None)
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQ_LEN,
                ..Default::default()
            }))
            .map_err(|e| EmbedderError::Tokenizer(e.to_string()))?;

        let config_path = model_dir.join("config.json");
        let config_bytes = std::fs::read(&config_path)?;
        let config: BertConfig = serde_json::from_slice(&config_bytes)?;
        let hidden_size = serde_json::from_slice::<serde_json::Value>(&config_bytes)?
            .get("hidden_size")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(384) as usize;

        let device = Self::create_device()?;

        let weights_path = model_dir.join("model.safetensors");
        let weights_data = std::fs::read(&weights_path)?;
        let vb = VarBuilder::from_slice_safetensors(&weights_data, DType::F32, &device)?;

        let model = BertModel::load(vb, &config)?;

        Ok(Self {
            device,
            model: Arc::new(model),
            tokenizer: Arc::new(tokenizer),
            model_name: model_name.to_string(),
            hidden_size,
            cache_dir,
        })
    }

    /// Output dimension of the sentence embeddings.
    pub fn dimension(&self) -> usize {
        self.hidden_size
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    fn cache_path(&self, text: &str) -> Result<PathBuf> {
        let hash = murmur3_x86_128(&mut Cursor::new(text), 0)?;
        Ok(self.cache_dir.join(format!("{hash}.bin")))
    }

    /// Embed a single text. Lookups hit the on-disk cache first.
    pub fn embed_text_blocking(&self, text: &str) -> Result<Vec<f32>> {
        let cache_path = self.cache_path(text)?;
        if cache_path.exists() {
            let f = std::fs::File::open(&cache_path)?;
            let reader = std::io::BufReader::new(f);
            let vec: Vec<f32> = bincode::decode_from_reader(reader, bincode::config::standard())?;
            if vec.len() == self.hidden_size {
                return Ok(vec);
            }
            trace!("Discarding cached embedding with stale dimension {}", vec.len());
        }

        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| EmbedderError::Tokenizer(e.to_string()))?;

        let ids = encoding.get_ids();
        let type_ids = encoding.get_type_ids();
        let attn_mask = encoding.get_attention_mask();

        let seq_len = ids.len();
        let batch_size = 1usize;

        let input_ids = Tensor::new(ids, &self.device)?.reshape((batch_size, seq_len))?;
        let token_type_ids = Tensor::new(type_ids, &self.device)?.reshape((batch_size, seq_len))?;
        let attention_mask =
            Tensor::new(attn_mask, &self.device)?.reshape((batch_size, seq_len))?;

        // outputs = (batch, seq_len, hidden)
        let outputs = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        // Mean over real tokens only, then unit length.
        let mask = attention_mask.to_dtype(DType::F32)?.unsqueeze(2)?;
        let summed = outputs.broadcast_mul(&mask)?.sum(1)?;
        let counts = mask.sum(1)?.clamp(1e-9, f64::MAX)?;
        let mean = summed.broadcast_div(&counts)?;
        let norm = mean.sqr()?.sum_keepdim(1)?.sqrt()?.clamp(1e-12, f64::MAX)?;
        let embedding = mean.broadcast_div(&norm)?.squeeze(0)?.to_vec1::<f32>()?;

        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&cache_path)?;
        bincode::encode_into_std_write(&embedding, &mut f, bincode::config::standard())?;

        Ok(embedding)
    }

    /// Embed a batch of texts in order on the calling thread.
    pub fn embed_texts_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let header_span = info_span!("Running embeddings for formalizations");
        header_span.pb_set_message("Embedding...");
        header_span.pb_set_finish_message("Embedding complete");
        header_span.pb_set_length(texts.len() as u64);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            header_span.pb_set_style(&style);
        }
        let _enter = header_span.enter();

        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed_text_blocking(text)?);
            header_span.pb_inc(1);
        }
        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_dir_flattens_repository_name() {
        let dir = BertEmbedder::model_dir(Path::new("/tmp/cache"), DEFAULT_MODEL);
        assert_eq!(
            dir,
            PathBuf::from(
                "/tmp/cache/huggingface/transformers/sentence-transformers_all-MiniLM-L6-v2"
            )
        );
    }
}
