use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use dogbatch::app::{App, FetchRequest, ProgressEvent, ProgressSink};
use dogbatch::disk::{DirectoryError, DiskClient};
use dogbatch::dogapi::DogApiClient;
use dogbatch::domain::{Limit, RemotePath, Selector, Taxonomy};
use dogbatch::error::DogError;
use dogbatch::manifest::{ImageRecord, ManifestWriter};
use dogbatch::output::JsonOutput;
use dogbatch::resolver::{ResolutionMethod, TieBreak};
use dogbatch::transfer::CancelToken;

struct MockDogApi {
    taxonomy: Taxonomy,
    images: HashMap<String, Vec<String>>,
    broken: HashSet<String>,
    listings: Mutex<Vec<String>>,
}

impl MockDogApi {
    fn new() -> Self {
        let mut images = HashMap::new();
        for (key, count) in [
            ("hound", 2),
            ("hound/afghan", 3),
            ("hound/blood", 2),
            ("hound/english", 1),
            ("setter/english", 2),
            ("terrier", 4),
        ] {
            let dir = key.replace('/', "-");
            let urls = (1..=count)
                .map(|n| format!("https://images.dog.ceo/breeds/{dir}/img_{n}.jpg"))
                .collect();
            images.insert(key.to_string(), urls);
        }
        Self {
            taxonomy: Taxonomy::from_entries([
                ("hound", vec!["afghan", "blood", "english"]),
                ("setter", vec!["english"]),
                ("terrier", vec![]),
            ]),
            images,
            broken: HashSet::new(),
            listings: Mutex::new(Vec::new()),
        }
    }
}

impl DogApiClient for MockDogApi {
    fn list_breeds(&self) -> Result<Taxonomy, DogError> {
        Ok(self.taxonomy.clone())
    }

    fn list_images(&self, breed: &str, subbreed: Option<&str>) -> Result<Vec<String>, DogError> {
        let key = match subbreed {
            Some(sub) => format!("{breed}/{sub}"),
            None => breed.to_string(),
        };
        self.listings.lock().unwrap().push(key.clone());
        Ok(self.images.get(&key).cloned().unwrap_or_default())
    }

    fn fetch_image(&self, url: &str) -> Result<Vec<u8>, DogError> {
        if self.broken.contains(url) {
            return Err(DogError::ImageFetch(format!("{url}: status 404")));
        }
        Ok(vec![0xff, 0xd8, 0xff])
    }
}

#[derive(Default)]
struct MockDisk {
    rejects_token: bool,
    dirs: Mutex<HashSet<String>>,
    uploads: Mutex<Vec<String>>,
}

impl DiskClient for MockDisk {
    fn check_credential(&self) -> Result<bool, DogError> {
        Ok(!self.rejects_token)
    }

    fn create_directory(&self, path: &RemotePath) -> Result<(), DirectoryError> {
        if !self.dirs.lock().unwrap().insert(path.to_string()) {
            return Err(DirectoryError::AlreadyExists(path.clone()));
        }
        Ok(())
    }

    fn upload(&self, _bytes: &[u8], path: &RemotePath) -> Result<(), DogError> {
        self.uploads.lock().unwrap().push(path.to_string());
        Ok(())
    }
}

fn app_in(dir: &tempfile::TempDir, api: MockDogApi) -> App<MockDogApi> {
    let path = Utf8PathBuf::from_path_buf(dir.path().join("results.json")).unwrap();
    App::new(api, ManifestWriter::new(path), RemotePath::root())
}

fn request(selector: &str, limit: &str) -> FetchRequest {
    FetchRequest {
        selector: selector.parse().unwrap(),
        limit: limit.parse().unwrap(),
    }
}

fn run(app: &App<MockDogApi>, disk: &MockDisk, request: &FetchRequest) -> Result<dogbatch::app::FetchResult, DogError> {
    app.run(disk, request, &TieBreak::Refuse, &CancelToken::new(), &JsonOutput)
}

#[test]
fn hound_with_limit_one_writes_one_record_per_subbreed() {
    let temp = tempfile::tempdir().unwrap();
    let app = app_in(&temp, MockDogApi::new());
    let disk = MockDisk::default();

    let result = run(&app, &disk, &request("hound", "1")).unwrap();

    assert_eq!(result.records.len(), 3);
    assert!(result.records.iter().all(|record| record.breed == "hound"));
    let manifest = app.manifest().read().unwrap();
    assert_eq!(manifest, result.records);
    assert_eq!(
        manifest[0],
        ImageRecord {
            file_name: "hound_img_1.jpg".to_string(),
            breed: "hound".to_string(),
            subbreed: Some("afghan".to_string()),
            url: "https://images.dog.ceo/breeds/hound-afghan/img_1.jpg".to_string(),
        }
    );
    let dirs = disk.dirs.lock().unwrap();
    assert!(dirs.contains("/hound"));
    assert!(dirs.contains("/hound/blood"));
}

#[test]
fn two_subbreed_hound_yields_at_most_two_records() {
    let temp = tempfile::tempdir().unwrap();
    let api = MockDogApi {
        taxonomy: Taxonomy::from_entries([("hound", vec!["afghan", "blood"]), ("terrier", vec![])]),
        ..MockDogApi::new()
    };
    let app = app_in(&temp, api);
    let disk = MockDisk::default();

    let result = run(&app, &disk, &request("hound", "1")).unwrap();

    let units = result.units.iter().map(|unit| unit.label()).collect::<Vec<_>>();
    assert_eq!(units, vec!["hound/afghan", "hound/blood"]);
    assert!(result.records.len() <= 2);
    assert!(result.records.iter().all(|record| record.breed == "hound"));
    assert_eq!(app.manifest().read().unwrap().len(), result.records.len());
}

#[test]
fn breed_without_subbreeds_is_a_single_unit() {
    let temp = tempfile::tempdir().unwrap();
    let app = app_in(&temp, MockDogApi::new());
    let disk = MockDisk::default();

    let result = run(&app, &disk, &request("terrier", "all")).unwrap();

    assert_eq!(result.records.len(), 4);
    assert!(result.records.iter().all(|record| record.subbreed.is_none()));
    assert_eq!(
        disk.uploads.lock().unwrap().first().map(String::as_str),
        Some("/terrier/terrier_img_1.jpg")
    );
}

#[test]
fn unique_bare_subbreed_resolves_to_its_breed() {
    let temp = tempfile::tempdir().unwrap();
    let app = app_in(&temp, MockDogApi::new());
    let disk = MockDisk::default();

    let result = run(&app, &disk, &request("-/blood", "all")).unwrap();

    let resolution = result.resolution.unwrap();
    assert_eq!(resolution.breed, "hound");
    assert_eq!(resolution.method, ResolutionMethod::Unique);
    assert_eq!(result.records.len(), 2);
}

#[test]
fn ambiguous_subbreed_with_pick() {
    let temp = tempfile::tempdir().unwrap();
    let app = app_in(&temp, MockDogApi::new());
    let disk = MockDisk::default();
    let request = request("-/english", "all");

    let refused = run(&app, &disk, &request);
    assert_matches!(refused, Err(DogError::AmbiguousSubbreed { .. }));
    assert!(!app.manifest().path().as_std_path().exists());
    assert!(disk.uploads.lock().unwrap().is_empty());

    let result = app
        .run(&disk, &request, &TieBreak::Pick(1), &CancelToken::new(), &JsonOutput)
        .unwrap();
    assert_eq!(result.records.len(), 2);
    assert!(result.records.iter().all(|record| record.breed == "setter"));
}

#[test]
fn rejected_token_stops_before_any_request() {
    let temp = tempfile::tempdir().unwrap();
    let api = MockDogApi::new();
    let app = app_in(&temp, api);
    let disk = MockDisk {
        rejects_token: true,
        ..MockDisk::default()
    };

    assert_matches!(
        run(&app, &disk, &request("terrier", "all")),
        Err(DogError::InvalidCredential)
    );
    assert!(disk.dirs.lock().unwrap().is_empty());
}

#[test]
fn failed_downloads_are_left_out_of_the_manifest() {
    let temp = tempfile::tempdir().unwrap();
    let mut api = MockDogApi::new();
    api.broken
        .insert("https://images.dog.ceo/breeds/terrier/img_2.jpg".to_string());
    let app = app_in(&temp, api);
    let disk = MockDisk::default();

    let result = run(&app, &disk, &request("terrier", "3")).unwrap();

    assert_eq!(result.stats.attempted, 3);
    assert_eq!(result.stats.fetch_failures, 1);
    let names = app
        .manifest()
        .read()
        .unwrap()
        .into_iter()
        .map(|record| record.file_name)
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["terrier_img_1.jpg", "terrier_img_3.jpg"]);
}

#[test]
fn cancelled_run_keeps_partial_manifest() {
    struct StopAfterUpload(CancelToken);

    impl ProgressSink for StopAfterUpload {
        fn event(&self, event: ProgressEvent) {
            if event.message.starts_with("uploaded") {
                self.0.cancel();
            }
        }
    }

    let temp = tempfile::tempdir().unwrap();
    let app = app_in(&temp, MockDogApi::new());
    let disk = MockDisk::default();
    let cancel = CancelToken::new();

    let result = app
        .run(
            &disk,
            &request("hound", "all"),
            &TieBreak::Refuse,
            &cancel,
            &StopAfterUpload(cancel.clone()),
        )
        .unwrap();

    assert!(result.cancelled);
    assert_eq!(result.records.len(), 1);
    assert_eq!(app.manifest().read().unwrap().len(), 1);
}

#[test]
fn second_run_overwrites_manifest() {
    let temp = tempfile::tempdir().unwrap();
    let app = app_in(&temp, MockDogApi::new());
    let disk = MockDisk::default();

    run(&app, &disk, &request("terrier", "all")).unwrap();
    run(&app, &disk, &request("hound/blood", "1")).unwrap();

    let manifest = app.manifest().read().unwrap();
    assert_eq!(manifest.len(), 1);
    assert_eq!(manifest[0].subbreed.as_deref(), Some("blood"));
}

#[test]
fn breeds_and_clear() {
    let temp = tempfile::tempdir().unwrap();
    let app = app_in(&temp, MockDogApi::new());

    let breeds = app.breeds(&JsonOutput).unwrap();
    let names = breeds
        .breeds
        .iter()
        .map(|entry| entry.breed.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["hound", "setter", "terrier"]);

    let hints = app.subbreeds(&JsonOutput).unwrap();
    let english = hints
        .subbreeds
        .iter()
        .find(|hint| hint.subbreed == "english")
        .unwrap();
    assert_eq!(english.breeds, vec!["hound", "setter"]);

    assert!(!app.clear(&JsonOutput).unwrap().cleared);
    run(&app, &MockDisk::default(), &request("terrier", "1")).unwrap();
    assert!(app.clear(&JsonOutput).unwrap().cleared);
    assert!(app.manifest().read().unwrap().is_empty());
}

#[test]
fn selector_shapes_from_parts() {
    assert_eq!(
        Selector::new(Some("Hound"), Some(" Afghan ")).unwrap(),
        Selector::BreedAndSubbreed {
            breed: "hound".to_string(),
            subbreed: "afghan".to_string(),
        }
    );
    assert_eq!(Limit::count(2), "2".parse::<Limit>().ok());
}
