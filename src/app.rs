use std::time::{Duration, Instant};

use serde::Serialize;

use crate::catalog::Catalog;
use crate::disk::DiskClient;
use crate::dogapi::DogApiClient;
use crate::domain::{Limit, RemotePath, Selector, Taxonomy, TransferUnit};
use crate::error::DogError;
use crate::manifest::{ImageRecord, ManifestWriter};
use crate::resolver::{Resolution, SubbreedHint, TieBreaker, resolve, subbreed_hints};
use crate::transfer::{CancelToken, TransferEngine, TransferStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLevel {
    Info,
    Warning,
    Error,
    Success,
}

/// Position of an image inside the run: unit `unit` of `units`, image `done`
/// of `total` within that unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub unit: usize,
    pub units: usize,
    pub done: usize,
    pub total: usize,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub level: EventLevel,
    pub message: String,
    pub progress: Option<Progress>,
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    fn new(level: EventLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            progress: None,
            elapsed: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(EventLevel::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(EventLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventLevel::Error, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(EventLevel::Success, message)
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Forwards progress events to `tracing`. Installing a subscriber is up to the
/// caller.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn event(&self, event: ProgressEvent) {
        let elapsed_ms = event.elapsed.map(|elapsed| elapsed.as_millis() as u64);
        match event.level {
            EventLevel::Info | EventLevel::Success => {
                tracing::info!(target: "dogbatch", elapsed_ms, "{}", event.message)
            }
            EventLevel::Warning => tracing::warn!(target: "dogbatch", "{}", event.message),
            EventLevel::Error => tracing::error!(target: "dogbatch", "{}", event.message),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub selector: Selector,
    pub limit: Limit,
}

/// Units to transfer for a selector, plus how a bare sub-breed was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub units: Vec<TransferUnit>,
    pub resolution: Option<Resolution>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub selector: String,
    pub limit: String,
    pub resolution: Option<Resolution>,
    pub units: Vec<TransferUnit>,
    pub remote_root: RemotePath,
    pub manifest_path: String,
    pub records: Vec<ImageRecord>,
    pub stats: TransferStats,
    pub cancelled: bool,
    pub started_at: String,
    pub finished_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreedEntry {
    pub breed: String,
    pub subbreeds: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreedsResult {
    pub breeds: Vec<BreedEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubbreedsResult {
    pub subbreeds: Vec<SubbreedHint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearResult {
    pub manifest_path: String,
    pub cleared: bool,
}

/// Checks `selector` against the taxonomy and expands it into transfer units.
/// Only a bare sub-breed goes through the resolver.
pub fn plan_units(
    selector: &Selector,
    taxonomy: &Taxonomy,
    tie_breaker: &dyn TieBreaker,
) -> Result<Plan, DogError> {
    match selector {
        Selector::Breed(breed) => {
            if !taxonomy.contains_breed(breed) {
                return Err(DogError::BreedUnknown(breed.clone()));
            }
            Ok(Plan {
                units: TransferUnit::expand_breed(breed, taxonomy),
                resolution: None,
            })
        }
        Selector::BreedAndSubbreed { breed, subbreed } => {
            let subs = taxonomy
                .subbreeds(breed)
                .ok_or_else(|| DogError::BreedUnknown(breed.clone()))?;
            if !subs.contains(subbreed) {
                return Err(DogError::SubbreedNotInBreed {
                    breed: breed.clone(),
                    subbreed: subbreed.clone(),
                });
            }
            Ok(Plan {
                units: vec![TransferUnit::new(breed.clone(), Some(subbreed.clone()))],
                resolution: None,
            })
        }
        Selector::Subbreed(subbreed) => {
            let resolution = resolve(subbreed, taxonomy, tie_breaker)?;
            Ok(Plan {
                units: vec![TransferUnit::new(
                    resolution.breed.clone(),
                    Some(resolution.subbreed.clone()),
                )],
                resolution: Some(resolution),
            })
        }
    }
}

/// The pipeline shared by every front end.
#[derive(Clone)]
pub struct App<A: DogApiClient> {
    api: A,
    manifest: ManifestWriter,
    remote_root: RemotePath,
}

impl<A: DogApiClient> App<A> {
    pub fn new(api: A, manifest: ManifestWriter, remote_root: RemotePath) -> Self {
        Self {
            api,
            manifest,
            remote_root,
        }
    }

    pub fn manifest(&self) -> &ManifestWriter {
        &self.manifest
    }

    pub fn remote_root(&self) -> &RemotePath {
        &self.remote_root
    }

    /// Resolves the selection, copies the images and rewrites the manifest.
    /// A cancelled run still writes the records collected so far.
    pub fn run(
        &self,
        disk: &dyn DiskClient,
        request: &FetchRequest,
        tie_breaker: &dyn TieBreaker,
        cancel: &CancelToken,
        sink: &dyn ProgressSink,
    ) -> Result<FetchResult, DogError> {
        let started_at = iso_timestamp();
        let started = Instant::now();

        sink.event(ProgressEvent::info("phase=Verify; checking Yandex Disk token"));
        if !disk.check_credential()? {
            return Err(DogError::InvalidCredential);
        }

        sink.event(ProgressEvent::info(format!(
            "phase=Resolve; selection {}",
            request.selector
        )));
        let catalog = Catalog::new(&self.api, sink);
        let plan = plan_units(&request.selector, catalog.taxonomy(), tie_breaker)?;
        if let Some(resolution) = &plan.resolution {
            tracing::debug!(
                target: "dogbatch",
                subbreed = %resolution.subbreed,
                breed = %resolution.breed,
                candidates = resolution.candidates.len(),
                "sub-breed resolved"
            );
            sink.event(ProgressEvent::info(format!(
                "sub-breed {} resolved to breed {} ({})",
                resolution.subbreed, resolution.breed, resolution.method
            )));
        }

        sink.event(ProgressEvent::info(format!(
            "phase=Transfer; {} unit(s), limit {}",
            plan.units.len(),
            request.limit
        )));
        let engine = TransferEngine::new(&catalog, &self.api, disk, self.remote_root.clone());
        let outcome = engine.transfer(&plan.units, request.limit, cancel, sink);

        sink.event(ProgressEvent::info(format!(
            "phase=Manifest; writing {}",
            self.manifest.path()
        )));
        self.manifest.write(&outcome.records)?;
        sink.event(
            ProgressEvent::success(format!(
                "{} image(s) transferred, manifest saved to {}",
                outcome.records.len(),
                self.manifest.path()
            ))
            .with_elapsed(started.elapsed()),
        );

        Ok(FetchResult {
            selector: request.selector.to_string(),
            limit: request.limit.to_string(),
            resolution: plan.resolution,
            units: plan.units,
            remote_root: self.remote_root.clone(),
            manifest_path: self.manifest.path().to_string(),
            records: outcome.records,
            stats: outcome.stats,
            cancelled: outcome.cancelled,
            started_at,
            finished_at: iso_timestamp(),
        })
    }

    pub fn taxonomy(&self, sink: &dyn ProgressSink) -> Result<Taxonomy, DogError> {
        sink.event(ProgressEvent::info("phase=Resolve; loading breed list"));
        self.api
            .list_breeds()
            .map_err(|err| DogError::TaxonomyUnavailable(err.to_string()))
    }

    pub fn breeds(&self, sink: &dyn ProgressSink) -> Result<BreedsResult, DogError> {
        let taxonomy = self.taxonomy(sink)?;
        let breeds = taxonomy
            .iter()
            .map(|(breed, subs)| BreedEntry {
                breed: breed.to_string(),
                subbreeds: subs.to_vec(),
            })
            .collect();
        Ok(BreedsResult { breeds })
    }

    pub fn subbreeds(&self, sink: &dyn ProgressSink) -> Result<SubbreedsResult, DogError> {
        let taxonomy = self.taxonomy(sink)?;
        Ok(SubbreedsResult {
            subbreeds: subbreed_hints(&taxonomy),
        })
    }

    pub fn clear(&self, sink: &dyn ProgressSink) -> Result<ClearResult, DogError> {
        sink.event(ProgressEvent::info(format!(
            "phase=Manifest; clearing {}",
            self.manifest.path()
        )));
        let cleared = self.manifest.clear()?;
        Ok(ClearResult {
            manifest_path: self.manifest.path().to_string(),
            cleared,
        })
    }
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
