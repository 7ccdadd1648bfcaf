use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::sync::LazyLock;

use camino::Utf8Path;
use regex::Regex;

use crate::disk::DiskClient;
use crate::error::DogError;

pub const TOKEN_KEY: &str = "yandex_disk_token";

static ENTRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:export\s+)?([A-Za-z_][A-Za-z0-9_.]*)\s*=\s*(.*?)\s*$").unwrap()
});

/// Key/value settings kept in a dotenv-style file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    entries: BTreeMap<String, String>,
}

impl Settings {
    pub fn parse(content: &str) -> Self {
        let entries = content
            .lines()
            .filter(|line| !line.trim_start().starts_with('#'))
            .filter_map(|line| ENTRY_RE.captures(line))
            .map(|caps| (caps[1].to_string(), unquote(&caps[2]).to_string()))
            .collect();
        Self { entries }
    }

    /// Missing file means empty settings.
    pub fn load(path: &Utf8Path) -> Result<Self, DogError> {
        if !path.as_std_path().exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|_| DogError::SettingsRead(path.as_std_path().to_path_buf()))?;
        Ok(Self::parse(&content))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(key, value)| format!("{key}={value}\n"))
            .collect()
    }

    pub fn save(&self, path: &Utf8Path) -> Result<(), DogError> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        };
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| DogError::Filesystem(err.to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix(".dogbatch-settings")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| DogError::Filesystem(err.to_string()))?;
        temp.write_all(self.render().as_bytes())
            .map_err(|err| DogError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| DogError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2
        && (bytes[0] == b'"' || bytes[0] == b'\'')
        && bytes[bytes.len() - 1] == bytes[0]
    {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

/// Token from the environment, falling back to the settings file.
pub fn load_token(path: &Utf8Path) -> Result<Option<String>, DogError> {
    if let Ok(token) = std::env::var(TOKEN_KEY) {
        if !token.trim().is_empty() {
            return Ok(Some(token.trim().to_string()));
        }
    }
    Ok(Settings::load(path)?.get(TOKEN_KEY).map(str::to_string))
}

/// Stores the token, keeping any other keys already in the file.
pub fn save_token(path: &Utf8Path, token: &str) -> Result<(), DogError> {
    let mut settings = Settings::load(path)?;
    settings.set(TOKEN_KEY, token.trim());
    settings.save(path)
}

/// Builds a store client for `token` and verifies it before any transfer.
pub fn open_session<D, F>(token: Option<&str>, connect: F) -> Result<D, DogError>
where
    D: DiskClient,
    F: FnOnce(&str) -> Result<D, DogError>,
{
    let token = token
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(DogError::MissingCredential)?;
    let disk = connect(token)?;
    if !disk.check_credential()? {
        return Err(DogError::InvalidCredential);
    }
    Ok(disk)
}
