use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum DogError {
    #[error("invalid selector: {0}")]
    #[diagnostic(help("pass a breed, a breed/sub-breed pair or -/sub-breed"))]
    InvalidSelector(String),

    #[error("invalid image count: {0}")]
    #[diagnostic(help("use a positive integer or `all`"))]
    InvalidCount(String),

    #[error("breed list is unavailable: {0}")]
    TaxonomyUnavailable(String),

    #[error("breed not found: {0}")]
    BreedUnknown(String),

    #[error("sub-breed not found: {0}")]
    SubbreedUnknown(String),

    #[error("sub-breed {subbreed} does not belong to breed {breed}")]
    SubbreedNotInBreed { breed: String, subbreed: String },

    #[error("sub-breed {subbreed} belongs to several breeds: {}", candidates.join(", "))]
    #[diagnostic(help("choose one with --pick N or let the tool decide with --random"))]
    AmbiguousSubbreed {
        subbreed: String,
        candidates: Vec<String>,
    },

    #[error("tie-break index {index} is out of range for {count} candidates")]
    InvalidTieBreak { index: usize, count: usize },

    #[error("breed selection aborted")]
    SelectionAborted,

    #[error("dog.ceo request failed: {0}")]
    DogApiHttp(String),

    #[error("dog.ceo returned status {status}: {message}")]
    DogApiStatus { status: u16, message: String },

    #[error("dog.ceo returned an unexpected payload: {0}")]
    DogApiPayload(String),

    #[error("image download failed: {0}")]
    ImageFetch(String),

    #[error("Yandex Disk token not found")]
    #[diagnostic(help("run `dogbatch login` or set yandex_disk_token in the settings file"))]
    MissingCredential,

    #[error("Yandex Disk rejected the token")]
    InvalidCredential,

    #[error("Yandex Disk request failed: {0}")]
    DiskHttp(String),

    #[error("Yandex Disk returned status {status}: {message}")]
    DiskStatus { status: u16, message: String },

    #[error("failed to write manifest {path}: {message}")]
    ManifestWrite { path: String, message: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("failed to read settings file at {0}")]
    SettingsRead(PathBuf),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("prompt failed: {0}")]
    Prompt(String),
}
