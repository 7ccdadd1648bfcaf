use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::Serialize;

use crate::app::{Progress, ProgressEvent, ProgressSink};
use crate::catalog::Catalog;
use crate::disk::{DiskClient, ensure_remote_path};
use crate::dogapi::DogApiClient;
use crate::domain::{Limit, RemotePath, TransferUnit, image_file_name};
use crate::manifest::ImageRecord;

/// Cooperative stop flag, checked before every unit and every image.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferStats {
    pub units: usize,
    pub empty_units: usize,
    pub attempted: usize,
    pub transferred: usize,
    pub fetch_failures: usize,
    pub upload_failures: usize,
    pub directory_failures: usize,
    pub duplicates: usize,
    pub unnamed: usize,
}

#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub records: Vec<ImageRecord>,
    pub stats: TransferStats,
    pub cancelled: bool,
}

pub struct TransferEngine<'a> {
    catalog: &'a Catalog<'a>,
    api: &'a dyn DogApiClient,
    disk: &'a dyn DiskClient,
    remote_root: RemotePath,
}

impl<'a> TransferEngine<'a> {
    pub fn new(
        catalog: &'a Catalog<'a>,
        api: &'a dyn DogApiClient,
        disk: &'a dyn DiskClient,
        remote_root: RemotePath,
    ) -> Self {
        Self {
            catalog,
            api,
            disk,
            remote_root,
        }
    }

    /// Copies the images of every unit, in order, from the source to the
    /// store. A failing image is reported and skipped; only successfully
    /// fetched and uploaded images produce a record.
    pub fn transfer(
        &self,
        units: &[TransferUnit],
        limit: Limit,
        cancel: &CancelToken,
        sink: &dyn ProgressSink,
    ) -> TransferOutcome {
        let mut records = Vec::new();
        let mut stats = TransferStats::default();
        let mut cancelled = false;

        'units: for (index, unit) in units.iter().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            stats.units += 1;
            let started = Instant::now();
            let label = unit.label();
            sink.event(ProgressEvent::info(format!(
                "[{}/{}] listing images for {label}",
                index + 1,
                units.len()
            )));

            let images = self
                .catalog
                .list_images(&unit.breed, unit.subbreed.as_deref());
            if images.is_empty() {
                stats.empty_units += 1;
                sink.event(ProgressEvent::warning(format!(
                    "no images found for {label}"
                )));
                continue;
            }
            let dir = unit.remote_dir(&self.remote_root);
            let candidates = named_images(&unit.breed, images, &dir, &mut stats, sink);
            let candidates = limit.apply(candidates);
            let total = candidates.len();

            for (path, err) in ensure_remote_path(self.disk, &dir) {
                stats.directory_failures += 1;
                sink.event(ProgressEvent::error(format!(
                    "failed to create directory {path}: {err}"
                )));
            }

            for (position, (url, file_name)) in candidates.into_iter().enumerate() {
                if cancel.is_cancelled() {
                    cancelled = true;
                    break 'units;
                }
                let progress = Progress {
                    unit: index + 1,
                    units: units.len(),
                    done: position + 1,
                    total,
                };

                let target = dir.join(&file_name);
                stats.attempted += 1;

                let bytes = match self.api.fetch_image(&url) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        stats.fetch_failures += 1;
                        sink.event(ProgressEvent::error(err.to_string()).with_progress(progress));
                        continue;
                    }
                };

                if let Err(err) = self.disk.upload(&bytes, &target) {
                    stats.upload_failures += 1;
                    sink.event(
                        ProgressEvent::error(format!("upload of {target} failed: {err}"))
                            .with_progress(progress),
                    );
                    continue;
                }

                records.push(ImageRecord {
                    file_name,
                    breed: unit.breed.clone(),
                    subbreed: unit.subbreed.clone(),
                    url,
                });
                stats.transferred += 1;
                sink.event(ProgressEvent::info(format!("uploaded {target}")).with_progress(progress));
            }

            sink.event(
                ProgressEvent::success(format!("{label} done"))
                    .with_elapsed(started.elapsed()),
            );
        }

        if cancelled {
            sink.event(ProgressEvent::warning(format!(
                "transfer cancelled after {} images",
                records.len()
            )));
        }

        TransferOutcome {
            records,
            stats,
            cancelled,
        }
    }
}

/// Pairs each url with its target file name, in listing order. Urls with no
/// file name and names already taken in `dir` are reported and dropped, so a
/// limit applied afterwards counts only images that will be attempted.
fn named_images(
    breed: &str,
    images: Vec<String>,
    dir: &RemotePath,
    stats: &mut TransferStats,
    sink: &dyn ProgressSink,
) -> Vec<(String, String)> {
    let mut seen = HashSet::new();
    let mut named = Vec::with_capacity(images.len());
    for url in images {
        let Some(file_name) = image_file_name(breed, &url) else {
            stats.unnamed += 1;
            sink.event(ProgressEvent::warning(format!("no file name in {url}")));
            continue;
        };
        if !seen.insert(file_name.clone()) {
            stats.duplicates += 1;
            sink.event(ProgressEvent::warning(format!(
                "skipping duplicate {}",
                dir.join(&file_name)
            )));
            continue;
        }
        named.push((url, file_name));
    }
    named
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use super::*;
    use crate::disk::DirectoryError;
    use crate::domain::Taxonomy;
    use crate::error::DogError;
    use crate::output::JsonOutput;

    #[derive(Default)]
    struct MockApi {
        images: HashMap<String, Vec<String>>,
        broken: HashSet<String>,
        fetched: Mutex<Vec<String>>,
    }

    impl MockApi {
        fn with(mut self, key: &str, count: usize) -> Self {
            let urls = (1..=count)
                .map(|n| format!("https://images.dog.ceo/breeds/{key}/{n}.jpg"))
                .collect();
            self.images.insert(key.to_string(), urls);
            self
        }
    }

    impl DogApiClient for MockApi {
        fn list_breeds(&self) -> Result<Taxonomy, DogError> {
            Ok(Taxonomy::from_entries([
                ("hound", vec!["afghan", "blood"]),
                ("terrier", vec![]),
            ]))
        }

        fn list_images(
            &self,
            breed: &str,
            subbreed: Option<&str>,
        ) -> Result<Vec<String>, DogError> {
            let key = match subbreed {
                Some(sub) => format!("{breed}-{sub}"),
                None => breed.to_string(),
            };
            Ok(self.images.get(&key).cloned().unwrap_or_default())
        }

        fn fetch_image(&self, url: &str) -> Result<Vec<u8>, DogError> {
            self.fetched.lock().unwrap().push(url.to_string());
            if self.broken.contains(url) {
                return Err(DogError::ImageFetch(format!("{url}: status 503")));
            }
            Ok(url.as_bytes().to_vec())
        }
    }

    #[derive(Default)]
    struct MockDisk {
        dirs: Mutex<HashSet<String>>,
        uploads: Mutex<Vec<String>>,
        reject_uploads: bool,
        broken_dir: Option<String>,
    }

    impl DiskClient for MockDisk {
        fn check_credential(&self) -> Result<bool, DogError> {
            Ok(true)
        }

        fn create_directory(&self, path: &RemotePath) -> Result<(), DirectoryError> {
            if self.broken_dir.as_deref() == Some(path.to_string().as_str()) {
                return Err(DirectoryError::Other(DogError::DiskStatus {
                    status: 507,
                    message: "insufficient storage".to_string(),
                }));
            }
            if !self.dirs.lock().unwrap().insert(path.to_string()) {
                return Err(DirectoryError::AlreadyExists(path.clone()));
            }
            Ok(())
        }

        fn upload(&self, _bytes: &[u8], path: &RemotePath) -> Result<(), DogError> {
            if self.reject_uploads {
                return Err(DogError::DiskStatus {
                    status: 507,
                    message: "insufficient storage".to_string(),
                });
            }
            self.uploads.lock().unwrap().push(path.to_string());
            Ok(())
        }
    }

    fn run(api: &MockApi, disk: &MockDisk, units: &[TransferUnit], limit: Limit) -> TransferOutcome {
        let catalog = Catalog::new(api, &JsonOutput);
        let engine = TransferEngine::new(&catalog, api, disk, RemotePath::root());
        engine.transfer(units, limit, &CancelToken::new(), &JsonOutput)
    }

    fn hound_units() -> Vec<TransferUnit> {
        vec![
            TransferUnit::new("hound", Some("afghan".to_string())),
            TransferUnit::new("hound", Some("blood".to_string())),
        ]
    }

    #[test]
    fn one_record_per_unit_with_limit_one() {
        let api = MockApi::default()
            .with("hound-afghan", 3)
            .with("hound-blood", 2);
        let disk = MockDisk::default();

        let outcome = run(&api, &disk, &hound_units(), Limit::count(1).unwrap());

        assert_eq!(outcome.records.len(), 2);
        assert!(outcome.records.iter().all(|r| r.breed == "hound"));
        assert_eq!(outcome.records[0].subbreed.as_deref(), Some("afghan"));
        assert_eq!(outcome.records[0].file_name, "hound_1.jpg");
        assert_eq!(
            *disk.uploads.lock().unwrap(),
            vec!["/hound/afghan/hound_1.jpg", "/hound/blood/hound_1.jpg"]
        );
        assert!(!outcome.cancelled);
    }

    #[test]
    fn truncation_keeps_listing_order() {
        let api = MockApi::default().with("terrier", 5);
        let disk = MockDisk::default();
        let units = vec![TransferUnit::new("terrier", None)];

        let outcome = run(&api, &disk, &units, Limit::count(3).unwrap());

        let fetched = api.fetched.lock().unwrap().clone();
        assert_eq!(
            fetched,
            vec![
                "https://images.dog.ceo/breeds/terrier/1.jpg",
                "https://images.dog.ceo/breeds/terrier/2.jpg",
                "https://images.dog.ceo/breeds/terrier/3.jpg",
            ]
        );
        assert_eq!(outcome.stats.attempted, 3);
    }

    #[test]
    fn failed_fetch_skips_only_that_image() {
        let mut api = MockApi::default().with("terrier", 3);
        api.broken
            .insert("https://images.dog.ceo/breeds/terrier/2.jpg".to_string());
        let disk = MockDisk::default();
        let units = vec![TransferUnit::new("terrier", None)];

        let outcome = run(&api, &disk, &units, Limit::All);

        let names = outcome
            .records
            .iter()
            .map(|r| r.file_name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["terrier_1.jpg", "terrier_3.jpg"]);
        assert_eq!(outcome.stats.fetch_failures, 1);
        assert_eq!(outcome.stats.transferred, 2);
    }

    #[test]
    fn failed_upload_produces_no_record() {
        let api = MockApi::default().with("terrier", 2);
        let disk = MockDisk {
            reject_uploads: true,
            ..MockDisk::default()
        };
        let units = vec![TransferUnit::new("terrier", None)];

        let outcome = run(&api, &disk, &units, Limit::All);

        assert!(outcome.records.is_empty());
        assert_eq!(outcome.stats.upload_failures, 2);
        assert_eq!(api.fetched.lock().unwrap().len(), 2);
    }

    #[test]
    fn empty_unit_is_skipped() {
        let api = MockApi::default().with("hound-blood", 1);
        let disk = MockDisk::default();

        let outcome = run(&api, &disk, &hound_units(), Limit::All);

        assert_eq!(outcome.stats.empty_units, 1);
        assert_eq!(outcome.records.len(), 1);
        assert!(!disk.dirs.lock().unwrap().contains("/hound/afghan"));
    }

    #[test]
    fn existing_directories_are_not_errors() {
        let api = MockApi::default().with("hound-afghan", 1);
        let disk = MockDisk::default();
        disk.dirs.lock().unwrap().insert("/hound".to_string());
        let units = vec![TransferUnit::new("hound", Some("afghan".to_string()))];

        let outcome = run(&api, &disk, &units, Limit::All);

        assert_eq!(outcome.stats.directory_failures, 0);
        assert_eq!(outcome.records.len(), 1);
    }

    #[test]
    fn cancellation_stops_before_next_image() {
        struct CancelAfterFirstUpload(CancelToken);

        impl ProgressSink for CancelAfterFirstUpload {
            fn event(&self, event: ProgressEvent) {
                if event.message.starts_with("uploaded") {
                    self.0.cancel();
                }
            }
        }

        let api = MockApi::default()
            .with("hound-afghan", 3)
            .with("hound-blood", 3);
        let disk = MockDisk::default();
        let cancel = CancelToken::new();
        let sink = CancelAfterFirstUpload(cancel.clone());
        let catalog = Catalog::new(&api, &sink);
        let engine = TransferEngine::new(&catalog, &api, &disk, RemotePath::new("runs"));

        let outcome = engine.transfer(&hound_units(), Limit::All, &cancel, &sink);

        assert!(outcome.cancelled);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(
            *disk.uploads.lock().unwrap(),
            vec!["/runs/hound/afghan/hound_1.jpg"]
        );
    }

    #[test]
    fn failed_directory_is_reported_and_uploads_continue() {
        let api = MockApi::default().with("hound-afghan", 2);
        let disk = MockDisk {
            broken_dir: Some("/hound/afghan".to_string()),
            ..MockDisk::default()
        };
        let units = vec![TransferUnit::new("hound", Some("afghan".to_string()))];

        let outcome = run(&api, &disk, &units, Limit::All);

        assert_eq!(outcome.stats.directory_failures, 1);
        assert_eq!(outcome.stats.transferred, 2);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(
            *disk.uploads.lock().unwrap(),
            vec!["/hound/afghan/hound_1.jpg", "/hound/afghan/hound_2.jpg"]
        );
    }

    #[test]
    fn duplicate_names_do_not_count_against_the_limit() {
        let mut api = MockApi::default();
        api.images.insert(
            "terrier".to_string(),
            vec![
                "https://images.dog.ceo/breeds/terrier-a/1.jpg".to_string(),
                "https://images.dog.ceo/breeds/terrier-b/1.jpg".to_string(),
                "https://images.dog.ceo/breeds/terrier-a/2.jpg".to_string(),
                "https://images.dog.ceo/breeds/terrier-a/3.jpg".to_string(),
            ],
        );
        let disk = MockDisk::default();
        let units = vec![TransferUnit::new("terrier", None)];

        let outcome = run(&api, &disk, &units, Limit::count(2).unwrap());

        assert_eq!(outcome.stats.duplicates, 1);
        assert_eq!(outcome.stats.attempted, 2);
        let names = outcome
            .records
            .iter()
            .map(|r| r.file_name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["terrier_1.jpg", "terrier_2.jpg"]);
    }

    #[test]
    fn url_without_file_name_is_skipped() {
        let mut api = MockApi::default();
        api.images.insert(
            "terrier".to_string(),
            vec![
                "https://images.dog.ceo/breeds/terrier/".to_string(),
                "https://images.dog.ceo/breeds/terrier/1.jpg?size=large".to_string(),
            ],
        );
        let disk = MockDisk::default();
        let units = vec![TransferUnit::new("terrier", None)];

        let outcome = run(&api, &disk, &units, Limit::count(1).unwrap());

        assert_eq!(outcome.stats.unnamed, 1);
        assert_eq!(outcome.stats.attempted, 1);
        assert_eq!(outcome.records[0].file_name, "terrier_1.jpg");
        assert_eq!(
            *disk.uploads.lock().unwrap(),
            vec!["/terrier/terrier_1.jpg"]
        );
    }
}
