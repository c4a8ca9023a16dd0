// Script-side access to a job's inputs and outputs.
//
// A job script runs with the job root as its working directory. Inputs live
// under `in/` (`params.json` plus one directory per input package) and
// output packages are written to `out/{n}/` with `n` counting from 1.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::file_readers::FileReaderRegistry;
use crate::io_util::IOUtil;

/// Prefix of environment variables carrying job secrets.
pub const SECRET_PREFIX: &str = "RNDFLOW_SECRET_";

const INPUT_DIRECTORY: &str = "in";
const OUTPUT_DIRECTORY: &str = "out";
const PARAMS_FILE: &str = "params.json";
const LABEL_FILE: &str = "label";
const FIELDS_FILE: &str = "fields.json";
const FILES_DIRECTORY: &str = "files";

/// Read access to the inputs of the job rooted at `root`.
#[derive(Debug, Clone)]
pub struct JobData {
    root: PathBuf,
}

impl JobData {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Job data for the current working directory.
    pub fn from_current_dir() -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to resolve current directory")?;
        Ok(Self::new(cwd))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The job id, which is the name of the job root directory.
    pub fn job_id(&self) -> Result<u64> {
        let name = self
            .root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        name.parse()
            .with_context(|| format!("Job root '{}' is not named by a job id", self.root.display()))
    }

    /// Job parameters from `in/params.json`, or an empty object.
    pub fn params(&self) -> Result<Map<String, Value>> {
        read_object(&self.root.join(INPUT_DIRECTORY).join(PARAMS_FILE))
    }

    /// All input packages, sorted by directory name.
    pub fn packages(&self) -> Result<Vec<InputPackage>> {
        let dir = self.root.join(INPUT_DIRECTORY);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut packages = Vec::new();
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("Failed to list '{}'", dir.display()))?
        {
            let path = entry?.path();
            if path.is_dir() {
                packages.push(InputPackage::new(path));
            }
        }
        packages.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(packages)
    }

    /// Files of every input package, optionally filtered by extension.
    pub fn files(&self, suffixes: &[&str]) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for package in self.packages()? {
            files.extend(package.files(suffixes)?);
        }
        Ok(files)
    }

    /// Parameters merged with the loaded contents of every input package.
    pub fn load(&self, readers: &FileReaderRegistry) -> Result<Map<String, Value>> {
        let mut data = self.params()?;
        for package in self.packages()? {
            data.extend(package.load(readers)?);
        }
        Ok(data)
    }

    /// Look up `RNDFLOW_SECRET_{NAME}`, falling back to `default`.
    pub fn secret(name: &str, default: Option<&str>) -> Result<String> {
        let var = format!("{SECRET_PREFIX}{}", name.to_uppercase());
        match (std::env::var(&var), default) {
            (Ok(value), _) => Ok(value),
            (Err(_), Some(default)) => Ok(default.to_string()),
            (Err(_), None) => anyhow::bail!("The required environment variable \"{var}\" is not set"),
        }
    }
}

/// One input package directory `in/{id}/`.
#[derive(Debug, Clone)]
pub struct InputPackage {
    path: PathBuf,
}

impl InputPackage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The package id, which is the directory name.
    pub fn id(&self) -> Result<u64> {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        name.parse()
            .with_context(|| format!("Package directory '{}' is not an id", self.path.display()))
    }

    /// The trimmed label, if a label file exists.
    pub fn label(&self) -> Result<Option<String>> {
        let path = self.path.join(LABEL_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read '{}'", path.display()))?;
        Ok(Some(text.trim().to_string()))
    }

    /// Package fields, or an empty object.
    pub fn fields(&self) -> Result<Map<String, Value>> {
        read_object(&self.path.join(FIELDS_FILE))
    }

    /// Regular files under `files/`, sorted, filtered by lower-cased
    /// extension when `suffixes` is non-empty (`".csv"` or `"csv"`).
    pub fn files(&self, suffixes: &[&str]) -> Result<Vec<PathBuf>> {
        let dir = self.path.join(FILES_DIRECTORY);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let wanted: Vec<String> = suffixes
            .iter()
            .map(|s| s.trim_start_matches('.').to_lowercase())
            .collect();

        let mut files = Vec::new();
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("Failed to list '{}'", dir.display()))?
        {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if wanted.is_empty() || wanted.contains(&ext) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Fields merged with every readable file, keyed by file stem.
    /// Files with no registered reader are skipped.
    pub fn load(&self, readers: &FileReaderRegistry) -> Result<Map<String, Value>> {
        let mut data = self.fields()?;
        for file in self.files(&[])? {
            match readers.reader_for(&file) {
                Some(reader) => {
                    let stem = file
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    data.insert(stem, reader(&file)?);
                }
                None => tracing::info!("Skipping {}: unknown format", file.display()),
            }
        }
        Ok(data)
    }
}

/// Produces one output file from caller-supplied content.
pub enum FileWriter {
    /// Raw bytes written verbatim.
    Bytes(Vec<u8>),
    /// A callback that writes the file at the given path itself.
    Custom(Box<dyn FnOnce(&Path) -> Result<()> + Send>),
}

impl fmt::Debug for FileWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileWriter::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            FileWriter::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Supported image outputs. The caller picks the kind explicitly.
pub enum ImageRenderer {
    /// Encoded PNG bytes; `.png` is appended to names without an extension.
    Png(Vec<u8>),
    /// A Plotly figure, stored as JSON in `{name}.plt`.
    PlotlyJson(Value),
    /// A callback that renders the image at the given path itself.
    Custom(Box<dyn FnOnce(&Path) -> Result<()> + Send>),
}

impl fmt::Debug for ImageRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageRenderer::Png(b) => write!(f, "Png({} bytes)", b.len()),
            ImageRenderer::PlotlyJson(_) => write!(f, "PlotlyJson(..)"),
            ImageRenderer::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Everything that goes into one output package.
#[derive(Debug, Default)]
pub struct OutputPackage {
    pub label: Option<String>,
    pub fields: Map<String, Value>,
    pub files: Vec<(String, FileWriter)>,
    pub images: Vec<(String, ImageRenderer)>,
}

/// Writes output packages to `out/{n}/`, numbering them from 1.
#[derive(Debug)]
pub struct OutputWriter {
    root: PathBuf,
    next_index: AtomicU32,
}

impl OutputWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            next_index: AtomicU32::new(1),
        }
    }

    /// Write a complete package and return its directory.
    pub fn save_package(&self, package: OutputPackage) -> Result<PathBuf> {
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        let path = self.root.join(OUTPUT_DIRECTORY).join(index.to_string());
        fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create '{}'", path.display()))?;

        if let Some(label) = &package.label {
            fs::write(path.join(LABEL_FILE), label.trim())
                .with_context(|| format!("Failed to write label of package {index}"))?;
        }

        if !package.fields.is_empty() {
            IOUtil::save_json(&path.join(FIELDS_FILE), &package.fields)?;
        }

        let files_dir = path.join(FILES_DIRECTORY);
        if !package.files.is_empty() || !package.images.is_empty() {
            fs::create_dir_all(&files_dir)
                .with_context(|| format!("Failed to create '{}'", files_dir.display()))?;
        }

        for (name, writer) in package.files {
            let target = files_dir.join(&name);
            match writer {
                FileWriter::Bytes(bytes) => fs::write(&target, bytes)
                    .with_context(|| format!("Failed to write '{}'", target.display()))?,
                FileWriter::Custom(write) => write(&target)
                    .with_context(|| format!("Failed to produce '{}'", target.display()))?,
            }
        }

        for (name, renderer) in package.images {
            let target = files_dir.join(&name);
            match renderer {
                ImageRenderer::Png(bytes) => {
                    let target = if target.extension().is_none() {
                        target.with_extension("png")
                    } else {
                        target
                    };
                    fs::write(&target, bytes)
                        .with_context(|| format!("Failed to write '{}'", target.display()))?;
                }
                ImageRenderer::PlotlyJson(figure) => {
                    IOUtil::save_json(&target.with_extension("plt"), &figure)?;
                }
                ImageRenderer::Custom(render) => render(&target)
                    .with_context(|| format!("Failed to render '{}'", target.display()))?,
            }
        }

        Ok(path)
    }

    /// Shortcut for a package that carries only a label and fields.
    pub fn save_labeled_fields(
        &self,
        label: impl Into<String>,
        fields: Map<String, Value>,
    ) -> Result<PathBuf> {
        self.save_package(OutputPackage {
            label: Some(label.into()),
            fields,
            ..OutputPackage::default()
        })
    }
}

fn read_object(path: &Path) -> Result<Map<String, Value>> {
    if !path.is_file() {
        return Ok(Map::new());
    }
    IOUtil::load_json(path)
}
