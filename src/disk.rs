use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use thiserror::Error;

use crate::domain::RemotePath;
use crate::error::DogError;

pub const DEFAULT_DISK_API_URL: &str = "https://cloud-api.yandex.net/v1/disk";

const EXISTING_DIRECTORY_CODE: &str = "DiskPathPointsToExistentDirectoryError";
const MISSING_PARENT_CODE: &str = "DiskPathDoesntExistsError";

/// Outcome kinds of a directory creation that did not return 201.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory already exists: {0}")]
    AlreadyExists(RemotePath),

    #[error("parent directory is missing for {0}")]
    ParentMissing(RemotePath),

    #[error(transparent)]
    Other(#[from] DogError),
}

/// Destination store contract.
pub trait DiskClient: Send + Sync {
    fn check_credential(&self) -> Result<bool, DogError>;
    fn create_directory(&self, path: &RemotePath) -> Result<(), DirectoryError>;
    fn upload(&self, bytes: &[u8], path: &RemotePath) -> Result<(), DogError>;
}

/// Creates `path` unless it is already there.
pub fn ensure_directory(disk: &dyn DiskClient, path: &RemotePath) -> Result<(), DirectoryError> {
    match disk.create_directory(path) {
        Ok(()) | Err(DirectoryError::AlreadyExists(_)) => Ok(()),
        Err(err) => Err(err),
    }
}

/// Walks every prefix of `path` top-down and creates the missing ones.
/// Returns the failures; a failing segment does not stop the walk.
pub fn ensure_remote_path(
    disk: &dyn DiskClient,
    path: &RemotePath,
) -> Vec<(RemotePath, DirectoryError)> {
    path.prefixes()
        .into_iter()
        .filter_map(|prefix| {
            ensure_directory(disk, &prefix)
                .err()
                .map(|err| (prefix, err))
        })
        .collect()
}

#[derive(Debug, Default, Deserialize)]
struct DiskApiError {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadLink {
    href: String,
}

/// Maps a failed `PUT /resources` response onto a directory error kind by the
/// API's `error` code.
pub fn classify_directory_error(path: &RemotePath, status: u16, body: &str) -> DirectoryError {
    let api_error = serde_json::from_str::<DiskApiError>(body).unwrap_or_default();
    match (status, api_error.error.as_deref()) {
        (409, Some(EXISTING_DIRECTORY_CODE)) => DirectoryError::AlreadyExists(path.clone()),
        (409, Some(MISSING_PARENT_CODE)) => DirectoryError::ParentMissing(path.clone()),
        _ => DirectoryError::Other(DogError::DiskStatus {
            status,
            message: api_error
                .message
                .or(api_error.description)
                .unwrap_or_else(|| body.to_string()),
        }),
    }
}

#[derive(Clone)]
pub struct YandexDiskClient {
    client: Client,
    transfer: Client,
    base_url: String,
}

impl YandexDiskClient {
    pub fn new(token: &str, base_url: &str, timeout: Duration) -> Result<Self, DogError> {
        let agent = HeaderValue::from_str(&format!("dogbatch/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| DogError::DiskHttp(err.to_string()))?;

        let mut auth = HeaderValue::from_str(&format!("OAuth {}", token.trim()))
            .map_err(|_| DogError::InvalidCredential)?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, agent.clone());
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(AUTHORIZATION, auth);
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| DogError::DiskHttp(err.to_string()))?;

        // Upload links are pre-signed and must not carry the token.
        let mut transfer_headers = HeaderMap::new();
        transfer_headers.insert(USER_AGENT, agent);
        let transfer = Client::builder()
            .default_headers(transfer_headers)
            .timeout(timeout)
            .build()
            .map_err(|err| DogError::DiskHttp(err.to_string()))?;

        Ok(Self {
            client,
            transfer,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn resources_url(&self) -> String {
        format!("{}/resources", self.base_url)
    }

    fn status_error(response: reqwest::blocking::Response) -> DogError {
        let status = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        let api_error = serde_json::from_str::<DiskApiError>(&body).unwrap_or_default();
        DogError::DiskStatus {
            status,
            message: api_error.message.unwrap_or(body),
        }
    }
}

impl DiskClient for YandexDiskClient {
    fn check_credential(&self) -> Result<bool, DogError> {
        let response = self
            .client
            .get(&self.base_url)
            .send()
            .map_err(|err| DogError::DiskHttp(err.to_string()))?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(false),
            _ => Err(Self::status_error(response)),
        }
    }

    fn create_directory(&self, path: &RemotePath) -> Result<(), DirectoryError> {
        let response = self
            .client
            .put(self.resources_url())
            .query(&[("path", path.as_str())])
            .send()
            .map_err(|err| DogError::DiskHttp(err.to_string()))?;
        if response.status().is_success() {
            return Ok(());
        }
        let status = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        Err(classify_directory_error(path, status, &body))
    }

    fn upload(&self, bytes: &[u8], path: &RemotePath) -> Result<(), DogError> {
        let response = self
            .client
            .get(format!("{}/upload", self.resources_url()))
            .query(&[("path", path.as_str()), ("overwrite", "true")])
            .send()
            .map_err(|err| DogError::DiskHttp(err.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::status_error(response));
        }
        let link: UploadLink = response
            .json()
            .map_err(|err| DogError::DiskHttp(err.to_string()))?;

        let response = self
            .transfer
            .put(&link.href)
            .body(bytes.to_vec())
            .send()
            .map_err(|err| DogError::DiskHttp(err.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::status_error(response));
        }
        Ok(())
    }
}
