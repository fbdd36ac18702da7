use super::Endpoint;
use crate::error::MeasurementError;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

const CLOUDFLARE_HOST: &str = "https://speed.cloudflare.com";

/// Ordered list of candidate servers. Order is significant: it is the last
/// tie-breaker during selection.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointCatalog {
    endpoints: Vec<Endpoint>,
}

impl EndpointCatalog {
    pub fn new(endpoints: Vec<Endpoint>) -> Result<Self, MeasurementError> {
        if endpoints.is_empty() {
            return Err(MeasurementError::Catalog("catalog is empty".to_string()));
        }

        let mut seen = HashSet::new();
        for endpoint in &endpoints {
            if !seen.insert(endpoint.id) {
                return Err(MeasurementError::Catalog(format!(
                    "duplicate endpoint id {}",
                    endpoint.id
                )));
            }
            if endpoint.host.trim().is_empty() {
                return Err(MeasurementError::Catalog(format!(
                    "endpoint {} has no host",
                    endpoint.id
                )));
            }
        }

        Ok(Self { endpoints })
    }

    pub fn builtin() -> Self {
        Self {
            endpoints: vec![Endpoint {
                id: 1,
                host: CLOUDFLARE_HOST.to_string(),
                sponsor: "Cloudflare".to_string(),
                country: "Anycast".to_string(),
                distance_km: 0.0,
            }],
        }
    }

    pub fn from_json(json: &str) -> Result<Self, MeasurementError> {
        let endpoints: Vec<Endpoint> =
            serde_json::from_str(json).map_err(|e| MeasurementError::Catalog(e.to_string()))?;
        Self::new(endpoints)
    }

    pub fn load(path: &Path) -> Result<Self, MeasurementError> {
        let content = fs::read_to_string(path)
            .map_err(|e| MeasurementError::Catalog(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    pub fn get(&self, id: u32) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
