use std::cell::OnceCell;

use crate::app::{ProgressEvent, ProgressSink};
use crate::dogapi::DogApiClient;
use crate::domain::Taxonomy;
use crate::error::DogError;

/// Fetches the breed taxonomy. Never fails: an unavailable provider yields an
/// empty taxonomy and a warning on the sink.
pub fn fetch_taxonomy(api: &dyn DogApiClient, sink: &dyn ProgressSink) -> Taxonomy {
    match api.list_breeds() {
        Ok(taxonomy) => {
            sink.event(ProgressEvent::info(format!(
                "breed list loaded: {} breeds",
                taxonomy.len()
            )));
            taxonomy
        }
        Err(err) => {
            let err = DogError::TaxonomyUnavailable(err.to_string());
            sink.event(ProgressEvent::warning(err.to_string()));
            Taxonomy::default()
        }
    }
}

/// Image Lister bound to one pipeline run. The taxonomy is fetched on first
/// use and then reused for the rest of the run.
pub struct Catalog<'a> {
    api: &'a dyn DogApiClient,
    sink: &'a dyn ProgressSink,
    taxonomy: OnceCell<Taxonomy>,
}

impl<'a> Catalog<'a> {
    pub fn new(api: &'a dyn DogApiClient, sink: &'a dyn ProgressSink) -> Self {
        Self {
            api,
            sink,
            taxonomy: OnceCell::new(),
        }
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        self.taxonomy
            .get_or_init(|| fetch_taxonomy(self.api, self.sink))
    }

    /// Image urls for a breed or a breed/sub-breed pair.
    ///
    /// Without a sub-breed the breed's own images come first, followed by each
    /// of its sub-breeds in taxonomy order. A failing listing is reported and
    /// skipped; the result is whatever succeeded.
    pub fn list_images(&self, breed: &str, subbreed: Option<&str>) -> Vec<String> {
        let mut images = Vec::new();
        match subbreed {
            Some(sub) => self.extend_from(&mut images, breed, Some(sub)),
            None => {
                self.extend_from(&mut images, breed, None);
                let subs = self
                    .taxonomy()
                    .subbreeds(breed)
                    .map(<[String]>::to_vec)
                    .unwrap_or_default();
                for sub in &subs {
                    self.extend_from(&mut images, breed, Some(sub));
                }
            }
        }
        images
    }

    fn extend_from(&self, images: &mut Vec<String>, breed: &str, subbreed: Option<&str>) {
        match self.api.list_images(breed, subbreed) {
            Ok(urls) => images.extend(urls),
            Err(err) => {
                let label = match subbreed {
                    Some(sub) => format!("{breed}/{sub}"),
                    None => breed.to_string(),
                };
                self.sink.event(ProgressEvent::warning(format!(
                    "image listing for {label} failed: {err}"
                )));
            }
        }
    }
}
