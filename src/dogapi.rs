use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;

use crate::domain::Taxonomy;
use crate::error::DogError;

pub const DEFAULT_DOG_API_URL: &str = "https://dog.ceo/api";

/// Image source contract: the breed list, per-breed image listings and raw
/// image bytes.
pub trait DogApiClient: Send + Sync {
    fn list_breeds(&self) -> Result<Taxonomy, DogError>;
    fn list_images(&self, breed: &str, subbreed: Option<&str>) -> Result<Vec<String>, DogError>;
    fn fetch_image(&self, url: &str) -> Result<Vec<u8>, DogError>;
}

#[derive(Clone)]
pub struct DogApiHttpClient {
    client: Client,
    base_url: String,
}

impl DogApiHttpClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DogError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("dogbatch/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| DogError::DogApiHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| DogError::DogApiHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn breeds_url(&self) -> String {
        format!("{}/breeds/list/all", self.base_url)
    }

    pub fn images_url(&self, breed: &str, subbreed: Option<&str>) -> String {
        match subbreed {
            Some(sub) => format!("{}/breed/{}/{}/images", self.base_url, breed, sub),
            None => format!("{}/breed/{}/images", self.base_url, breed),
        }
    }

    fn get_json(&self, url: &str) -> Result<Value, DogError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| DogError::DogApiHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "dog.ceo request failed".to_string());
            return Err(DogError::DogApiStatus { status, message });
        }
        response
            .json()
            .map_err(|err| DogError::DogApiPayload(err.to_string()))
    }
}

impl DogApiClient for DogApiHttpClient {
    fn list_breeds(&self) -> Result<Taxonomy, DogError> {
        let payload = self.get_json(&self.breeds_url())?;
        parse_breeds_payload(&payload)
    }

    fn list_images(&self, breed: &str, subbreed: Option<&str>) -> Result<Vec<String>, DogError> {
        let payload = self.get_json(&self.images_url(breed, subbreed))?;
        parse_images_payload(&payload)
    }

    fn fetch_image(&self, url: &str) -> Result<Vec<u8>, DogError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| DogError::ImageFetch(format!("{url}: {err}")))?;
        if !response.status().is_success() {
            return Err(DogError::ImageFetch(format!(
                "{url}: status {}",
                response.status().as_u16()
            )));
        }
        let bytes = response
            .bytes()
            .map_err(|err| DogError::ImageFetch(format!("{url}: {err}")))?;
        Ok(bytes.to_vec())
    }
}

fn success_message(payload: &Value) -> Result<&Value, DogError> {
    let status = payload
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("missing");
    if status != "success" {
        let message = payload
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("no message");
        return Err(DogError::DogApiPayload(format!(
            "status {status}: {message}"
        )));
    }
    payload
        .get("message")
        .ok_or_else(|| DogError::DogApiPayload("missing message field".to_string()))
}

/// `{status, message: {breed: [sub-breed]}}` → taxonomy.
pub fn parse_breeds_payload(payload: &Value) -> Result<Taxonomy, DogError> {
    let message = success_message(payload)?
        .as_object()
        .ok_or_else(|| DogError::DogApiPayload("breed list is not an object".to_string()))?;

    let entries = message
        .iter()
        .map(|(breed, subs)| {
            let subs = subs
                .as_array()
                .map(|items| items.iter().filter_map(Value::as_str).collect::<Vec<_>>())
                .unwrap_or_default();
            (breed.as_str(), subs)
        })
        .collect::<Vec<_>>();
    Ok(Taxonomy::from_entries(entries))
}

/// `{status, message: [url]}` → urls in listing order.
pub fn parse_images_payload(payload: &Value) -> Result<Vec<String>, DogError> {
    let message = success_message(payload)?
        .as_array()
        .ok_or_else(|| DogError::DogApiPayload("image list is not an array".to_string()))?;
    Ok(message
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect())
}
