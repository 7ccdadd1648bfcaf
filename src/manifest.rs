use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::DogError;

pub const DEFAULT_MANIFEST_PATH: &str = "results.json";

/// One successfully transferred image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub file_name: String,
    pub breed: String,
    pub subbreed: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct ManifestWriter {
    path: Utf8PathBuf,
}

impl ManifestWriter {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Replaces the manifest with `records`. The file is written next to the
    /// destination and renamed over it, so readers see either the old or the
    /// new manifest.
    pub fn write(&self, records: &[ImageRecord]) -> Result<(), DogError> {
        let content = render(records).map_err(|err| self.failure(err))?;
        let parent = self.parent_dir();
        fs::create_dir_all(parent.as_std_path()).map_err(|err| self.failure(err))?;
        let mut temp = tempfile::Builder::new()
            .prefix(".dogbatch-manifest")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| self.failure(err))?;
        temp.write_all(content.as_bytes())
            .map_err(|err| self.failure(err))?;
        temp.persist(self.path.as_std_path())
            .map_err(|err| self.failure(err))?;
        Ok(())
    }

    /// Empties an existing manifest. Returns whether there was one.
    pub fn clear(&self) -> Result<bool, DogError> {
        if !self.path.as_std_path().exists() {
            return Ok(false);
        }
        fs::write(self.path.as_std_path(), b"").map_err(|err| self.failure(err))?;
        Ok(true)
    }

    pub fn read(&self) -> Result<Vec<ImageRecord>, DogError> {
        let content = fs::read_to_string(self.path.as_std_path())
            .map_err(|err| DogError::Filesystem(format!("{}: {err}", self.path)))?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content)
            .map_err(|err| DogError::Filesystem(format!("{}: {err}", self.path)))
    }

    fn parent_dir(&self) -> &Utf8Path {
        match self.path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        }
    }

    fn failure(&self, err: impl ToString) -> DogError {
        DogError::ManifestWrite {
            path: self.path.to_string(),
            message: err.to_string(),
        }
    }
}

/// Pretty JSON with a four-space indent and non-ASCII kept as is.
fn render(records: &[ImageRecord]) -> Result<String, serde_json::Error> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    records.serialize(&mut serializer)?;
    out.push(b'\n');
    Ok(String::from_utf8_lossy(&out).into_owned())
}
