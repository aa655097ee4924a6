use crate::error::CiteweaveError;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use std::path::Path;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Prefix joined with a chunk's image id to form the inline media URL.
    pub image_url_prefix: String,
    /// Document extensions that open directly at their URL instead of the in-app preview.
    pub viewable_extensions: Vec<SmolStr>,
    /// `doc_type` values rendered as inline media rather than a popover.
    pub media_doc_types: Vec<SmolStr>,
    /// Summary text of a collapsed reasoning section.
    pub reasoning_label: String,
    /// Render math spans to MathML. When off, TeX source is shown escaped.
    pub render_math: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            image_url_prefix: "/v1/document/image/".to_owned(),
            viewable_extensions: ["pdf", "html", "htm", "txt", "md"]
                .into_iter()
                .map(SmolStr::new_static)
                .collect(),
            media_doc_types: ["image", "picture", "figure"]
                .into_iter()
                .map(SmolStr::new_static)
                .collect(),
            reasoning_label: "Reasoning".to_owned(),
            render_math: true,
        }
    }
}

impl Config {
    /// Loads the configuration from the provided loader.
    pub fn load(loader: &impl Loader) -> Result<Self, CiteweaveError> {
        loader
            .load()
            .map_err(|e| CiteweaveError::Config(format!("failed to load configuration: {e}")))
    }

    /// Saves the configuration using the provided saver.
    pub fn save(&self, saver: &impl Saver) -> Result<(), CiteweaveError> {
        saver
            .save(self)
            .map_err(|e| CiteweaveError::Config(format!("failed to save configuration: {e}")))
    }

    pub fn is_media_type(&self, doc_type: &str) -> bool {
        self.media_doc_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(doc_type))
    }

    pub fn is_viewable_extension(&self, ext: &str) -> bool {
        self.viewable_extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(ext))
    }
}

/// The trait for loading configuration data.
pub trait Loader {
    /// Loads the configuration data.
    fn load(&self) -> Result<Config, Box<dyn std::error::Error + Send + Sync + 'static>>;
}

/// The trait for saving configuration data.
pub trait Saver {
    /// Saves the configuration data.
    fn save(
        &self,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>>;
}

/// An implementation of [`Loader`] and [`Saver`] that reads and writes a configuration file.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Create a new [`FileStore`] with the given path.
    ///
    /// Only `.json` files are supported.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Loader for FileStore {
    fn load(&self) -> Result<Config, Box<dyn std::error::Error + Send + Sync + 'static>> {
        match self.path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(serde_json::from_str(&std::fs::read_to_string(&self.path)?)?),
            _ => Err(format!("unsupported config format: {}", self.path.display()).into()),
        }
    }
}

impl Saver for FileStore {
    fn save(
        &self,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
        match self.path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => {
                if let Some(parent) = self.path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                Ok(std::fs::write(
                    &self.path,
                    serde_json::to_string_pretty(config)?,
                )?)
            }
            _ => Err(format!("unsupported config format: {}", self.path.display()).into()),
        }
    }
}
