use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

use serde::Serialize;

use crate::error::DogError;

/// Lowercased, trimmed form used for every breed and sub-breed name.
pub fn normalize_name(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Breed → sub-breeds mapping as reported by the image source.
///
/// Names are normalized on construction and empty names are dropped, so every
/// key and value is non-empty, trimmed and lowercase. Breeds iterate in
/// alphabetical order (the order dog.ceo reports them in); sub-breeds keep the
/// provider's order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Taxonomy(BTreeMap<String, Vec<String>>);

impl Taxonomy {
    pub fn from_entries<I, B, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (B, Vec<S>)>,
        B: AsRef<str>,
        S: AsRef<str>,
    {
        let mut map = BTreeMap::new();
        for (breed, subbreeds) in entries {
            let breed = normalize_name(breed.as_ref());
            if breed.is_empty() {
                continue;
            }
            let entry: &mut Vec<String> = map.entry(breed).or_default();
            for sub in subbreeds {
                let sub = normalize_name(sub.as_ref());
                if !sub.is_empty() && !entry.contains(&sub) {
                    entry.push(sub);
                }
            }
        }
        Self(map)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains_breed(&self, breed: &str) -> bool {
        self.0.contains_key(&normalize_name(breed))
    }

    pub fn subbreeds(&self, breed: &str) -> Option<&[String]> {
        self.0.get(&normalize_name(breed)).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0
            .iter()
            .map(|(breed, subs)| (breed.as_str(), subs.as_slice()))
    }
}

/// What the caller asked to transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Breed(String),
    BreedAndSubbreed { breed: String, subbreed: String },
    Subbreed(String),
}

impl Selector {
    pub fn new(breed: Option<&str>, subbreed: Option<&str>) -> Result<Self, DogError> {
        let breed = breed.map(normalize_name).filter(|value| !value.is_empty());
        let subbreed = subbreed.map(normalize_name).filter(|value| !value.is_empty());
        match (breed, subbreed) {
            (Some(breed), Some(subbreed)) => Ok(Selector::BreedAndSubbreed { breed, subbreed }),
            (Some(breed), None) => Ok(Selector::Breed(breed)),
            (None, Some(subbreed)) => Ok(Selector::Subbreed(subbreed)),
            (None, None) => Err(DogError::InvalidSelector(
                "neither breed nor sub-breed given".to_string(),
            )),
        }
    }

    pub fn breed(&self) -> Option<&str> {
        match self {
            Selector::Breed(breed) | Selector::BreedAndSubbreed { breed, .. } => Some(breed),
            Selector::Subbreed(_) => None,
        }
    }

    pub fn subbreed(&self) -> Option<&str> {
        match self {
            Selector::BreedAndSubbreed { subbreed, .. } | Selector::Subbreed(subbreed) => {
                Some(subbreed)
            }
            Selector::Breed(_) => None,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Breed(breed) => write!(f, "{breed}"),
            Selector::BreedAndSubbreed { breed, subbreed } => write!(f, "{breed}/{subbreed}"),
            Selector::Subbreed(subbreed) => write!(f, "-/{subbreed}"),
        }
    }
}

impl FromStr for Selector {
    type Err = DogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        match trimmed.split_once('/') {
            Some((breed, subbreed)) => {
                if subbreed.contains('/') {
                    return Err(DogError::InvalidSelector(value.to_string()));
                }
                let breed = breed.trim();
                let breed = (breed != "-").then_some(breed);
                let subbreed = subbreed.trim();
                if subbreed.is_empty() {
                    return Err(DogError::InvalidSelector(value.to_string()));
                }
                Selector::new(breed, Some(subbreed))
            }
            None if trimmed == "-" => Err(DogError::InvalidSelector(value.to_string())),
            None => Selector::new(Some(trimmed), None),
        }
    }
}

/// One directory-scoped batch of images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferUnit {
    pub breed: String,
    pub subbreed: Option<String>,
}

impl TransferUnit {
    pub fn new(breed: impl Into<String>, subbreed: Option<String>) -> Self {
        Self {
            breed: breed.into(),
            subbreed,
        }
    }

    /// Units for a bare breed: one per sub-breed, or the breed itself when it
    /// has none.
    pub fn expand_breed(breed: &str, taxonomy: &Taxonomy) -> Vec<TransferUnit> {
        let breed = normalize_name(breed);
        match taxonomy.subbreeds(&breed) {
            Some(subs) if !subs.is_empty() => subs
                .iter()
                .map(|sub| TransferUnit::new(breed.clone(), Some(sub.clone())))
                .collect(),
            _ => vec![TransferUnit::new(breed, None)],
        }
    }

    pub fn label(&self) -> String {
        match &self.subbreed {
            Some(sub) => format!("{}/{}", self.breed, sub),
            None => self.breed.clone(),
        }
    }

    pub fn remote_dir(&self, root: &RemotePath) -> RemotePath {
        let dir = root.join(&self.breed);
        match &self.subbreed {
            Some(sub) => dir.join(sub),
            None => dir,
        }
    }
}

/// `{breed}_{last path segment of the url}`, ignoring any query or fragment.
/// `None` when the url has no final segment.
pub fn image_file_name(breed: &str, url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next().unwrap_or(path).trim();
    if last.is_empty() {
        return None;
    }
    Some(format!("{breed}_{last}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Limit {
    #[default]
    All,
    Count(NonZeroUsize),
}

impl Limit {
    pub fn count(value: usize) -> Option<Self> {
        NonZeroUsize::new(value).map(Limit::Count)
    }

    pub fn apply<T>(&self, mut items: Vec<T>) -> Vec<T> {
        if let Limit::Count(count) = self {
            items.truncate(count.get());
        }
        items
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::All => write!(f, "all"),
            Limit::Count(count) => write!(f, "{count}"),
        }
    }
}

impl FromStr for Limit {
    type Err = DogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("all") {
            return Ok(Limit::All);
        }
        trimmed
            .parse::<usize>()
            .ok()
            .and_then(Limit::count)
            .ok_or_else(|| DogError::InvalidCount(value.to_string()))
    }
}

/// Absolute `/`-delimited directory on the destination store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RemotePath(String);

impl RemotePath {
    pub fn new(path: &str) -> Self {
        let segments = path
            .split('/')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>();
        Self(format!("/{}", segments.join("/")))
    }

    pub fn root() -> Self {
        Self("/".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    pub fn join(&self, segment: &str) -> Self {
        if self.is_root() {
            Self::new(segment)
        } else {
            Self::new(&format!("{}/{}", self.0, segment))
        }
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|segment| !segment.is_empty())
    }

    /// Every cumulative directory from the top down, ending with `self`.
    pub fn prefixes(&self) -> Vec<RemotePath> {
        let mut current = RemotePath::root();
        let mut out = Vec::new();
        for segment in self.segments() {
            current = current.join(segment);
            out.push(current.clone());
        }
        out
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
