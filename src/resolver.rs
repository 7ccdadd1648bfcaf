use std::fmt;

use rand::Rng;
use serde::Serialize;

use crate::domain::{Selector, Taxonomy, normalize_name};
use crate::error::DogError;

/// Answer of a tie-break strategy for an ambiguous sub-breed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreakChoice {
    /// Zero-based index into the ordered candidate list.
    Index(usize),
    Random,
    Abort,
}

/// Decides between several breeds that share a sub-breed.
pub trait TieBreaker {
    fn choose(&self, subbreed: &str, candidates: &[String]) -> TieBreakChoice;
}

/// Non-interactive tie-break policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
    Pick(usize),
    Random,
    #[default]
    Refuse,
}

impl TieBreak {
    /// Policy from the `--pick N` (1-based) and `--random` flags. `None` when
    /// neither flag is given. The flags only make sense for a bare
    /// sub-breed, so any other selector rejects them.
    pub fn from_flags(
        selector: &Selector,
        pick: Option<usize>,
        random: bool,
    ) -> Result<Option<Self>, DogError> {
        if (pick.is_some() || random) && !matches!(selector, Selector::Subbreed(_)) {
            return Err(DogError::InvalidSelector(
                "--pick and --random only apply to -/sub-breed".to_string(),
            ));
        }
        match (pick, random) {
            (Some(0), _) => Err(DogError::InvalidSelector("--pick starts at 1".to_string())),
            (Some(pick), _) => Ok(Some(TieBreak::Pick(pick - 1))),
            (None, true) => Ok(Some(TieBreak::Random)),
            (None, false) => Ok(None),
        }
    }
}

impl TieBreaker for TieBreak {
    fn choose(&self, _subbreed: &str, _candidates: &[String]) -> TieBreakChoice {
        match self {
            TieBreak::Pick(index) => TieBreakChoice::Index(*index),
            TieBreak::Random => TieBreakChoice::Random,
            TieBreak::Refuse => TieBreakChoice::Abort,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionMethod {
    Unique,
    ExplicitPick { index: usize },
    RandomTieBreak,
}

impl fmt::Display for ResolutionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionMethod::Unique => write!(f, "single match"),
            ResolutionMethod::ExplicitPick { index } => write!(f, "explicit pick #{}", index + 1),
            ResolutionMethod::RandomTieBreak => write!(f, "random tie-break"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub breed: String,
    pub subbreed: String,
    pub candidates: Vec<String>,
    pub method: ResolutionMethod,
}

/// Every breed owning `subbreed`, in taxonomy order.
pub fn breeds_with_subbreed(taxonomy: &Taxonomy, subbreed: &str) -> Vec<String> {
    let subbreed = normalize_name(subbreed);
    taxonomy
        .iter()
        .filter(|(_, subs)| subs.contains(&subbreed))
        .map(|(breed, _)| breed.to_string())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubbreedHint {
    pub subbreed: String,
    pub breeds: Vec<String>,
}

/// Every known sub-breed, sorted, with the breeds it belongs to.
pub fn subbreed_hints(taxonomy: &Taxonomy) -> Vec<SubbreedHint> {
    let mut subbreeds = taxonomy
        .iter()
        .flat_map(|(_, subs)| subs.iter().cloned())
        .collect::<Vec<_>>();
    subbreeds.sort();
    subbreeds.dedup();
    subbreeds
        .into_iter()
        .map(|subbreed| SubbreedHint {
            breeds: breeds_with_subbreed(taxonomy, &subbreed),
            subbreed,
        })
        .collect()
}

/// Finds the parent breed of a bare sub-breed.
pub fn resolve(
    subbreed: &str,
    taxonomy: &Taxonomy,
    tie_breaker: &dyn TieBreaker,
) -> Result<Resolution, DogError> {
    resolve_with_rng(subbreed, taxonomy, tie_breaker, &mut rand::thread_rng())
}

pub fn resolve_with_rng<R: Rng>(
    subbreed: &str,
    taxonomy: &Taxonomy,
    tie_breaker: &dyn TieBreaker,
    rng: &mut R,
) -> Result<Resolution, DogError> {
    let subbreed = normalize_name(subbreed);
    let candidates = breeds_with_subbreed(taxonomy, &subbreed);

    let (breed, method) = match candidates.as_slice() {
        [] => return Err(DogError::SubbreedUnknown(subbreed)),
        [only] => (only.clone(), ResolutionMethod::Unique),
        _ => match tie_breaker.choose(&subbreed, &candidates) {
            TieBreakChoice::Index(index) => {
                let breed = candidates
                    .get(index)
                    .cloned()
                    .ok_or(DogError::InvalidTieBreak {
                        index,
                        count: candidates.len(),
                    })?;
                (breed, ResolutionMethod::ExplicitPick { index })
            }
            TieBreakChoice::Random => {
                let index = rng.gen_range(0..candidates.len());
                (candidates[index].clone(), ResolutionMethod::RandomTieBreak)
            }
            TieBreakChoice::Abort => {
                return Err(DogError::AmbiguousSubbreed {
                    subbreed,
                    candidates,
                });
            }
        },
    };

    Ok(Resolution {
        breed,
        subbreed,
        candidates,
        method,
    })
}
