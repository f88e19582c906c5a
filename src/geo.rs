//! Resolution of human-readable locations into platform geo keys.
//!
//! Two-letter entries are ISO country codes and pass through untouched.
//! Anything longer is looked up through the platform's fuzzy geo search,
//! preferring candidates in the home market. Lookups are read-only, so the
//! whole step can be re-run freely.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::platform::UpstreamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoKind {
    City,
    Region,
    #[serde(other)]
    Other,
}

/// One match returned by the geo search.
#[derive(Debug, Clone, Deserialize)]
pub struct GeoCandidate {
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: GeoKind,
    #[serde(rename = "country_code", default)]
    pub country: String,
}

#[async_trait]
pub trait GeoSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<GeoCandidate>, UpstreamError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeoTarget {
    Country(String),
    Region(String),
    City(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeoKey {
    pub key: String,
}

/// Geography section of the targeting payload. Empty lists are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GeoLocations {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub countries: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub regions: Vec<GeoKey>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cities: Vec<GeoKey>,
}

impl GeoLocations {
    pub fn is_empty(&self) -> bool {
        self.countries.is_empty() && self.regions.is_empty() && self.cities.is_empty()
    }

    fn push(&mut self, target: GeoTarget) {
        match target {
            GeoTarget::Country(code) => self.countries.push(code),
            GeoTarget::Region(key) => self.regions.push(GeoKey { key }),
            GeoTarget::City(key) => self.cities.push(GeoKey { key }),
        }
    }
}

pub struct GeoResolver {
    search: Arc<dyn GeoSearch>,
    home_country: String,
}

impl GeoResolver {
    pub fn new(search: Arc<dyn GeoSearch>, home_country: impl Into<String>) -> Self {
        Self {
            search,
            home_country: home_country.into().to_uppercase(),
        }
    }

    pub fn home_country(&self) -> &str {
        &self.home_country
    }

    /// Resolves every entry it can. Never returns an empty geography: when
    /// nothing resolves the payload falls back to the home country.
    pub async fn resolve(&self, entries: &[String]) -> GeoLocations {
        let mut locations = GeoLocations::default();

        for entry in entries {
            if let Some(target) = self.resolve_entry(entry).await {
                locations.push(target);
            }
        }

        if locations.is_empty() {
            tracing::info!(
                home_country = %self.home_country,
                "No locations resolved, targeting home country"
            );
            locations.countries.push(self.home_country.clone());
        }
        locations
    }

    async fn resolve_entry(&self, entry: &str) -> Option<GeoTarget> {
        let entry = entry.trim();
        if entry.is_empty() {
            return None;
        }
        if entry.chars().count() == 2 {
            return Some(GeoTarget::Country(entry.to_uppercase()));
        }

        let query = entry.replace('_', " ");
        let candidates = match self.search.search(&query).await {
            Ok(candidates) => candidates,
            Err(err) => {
                tracing::warn!(location = %query, "Geo search failed, dropping location: {err}");
                return None;
            }
        };

        match pick_candidate(&candidates, &self.home_country) {
            Some(candidate) => {
                tracing::debug!(
                    location = %query,
                    key = %candidate.key,
                    name = %candidate.name,
                    "Resolved location"
                );
                match candidate.kind {
                    GeoKind::City => Some(GeoTarget::City(candidate.key.clone())),
                    GeoKind::Region => Some(GeoTarget::Region(candidate.key.clone())),
                    GeoKind::Other => None,
                }
            }
            None => {
                tracing::warn!(location = %query, "No geo match found, dropping location");
                None
            }
        }
    }
}

/// Prefers the first city/region in the home country, else the first city/region at all.
fn pick_candidate<'a>(candidates: &'a [GeoCandidate], home_country: &str) -> Option<&'a GeoCandidate> {
    let usable = || {
        candidates
            .iter()
            .filter(|candidate| candidate.kind != GeoKind::Other)
    };
    usable()
        .find(|candidate| candidate.country.eq_ignore_ascii_case(home_country))
        .or_else(|| usable().next())
}
