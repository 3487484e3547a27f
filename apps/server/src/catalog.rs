//! Static studio catalog: braiding services, add-ons and time slots.
//!
//! Loaded once at startup (embedded JSON, or `CATALOG_PATH`) and shared
//! read-only behind `Arc<AppState>` for the lifetime of the process.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::validation::is_twelve_hour_time;

const EMBEDDED_CATALOG: &str = include_str!("../data/catalog.json");

// ── Variant enums ──

/// Braid size. Drives both the price and the time multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Size {
    Small,
    Medium,
    Jumbo,
}

impl Size {
    pub const ALL: [Size; 3] = [Size::Small, Size::Medium, Size::Jumbo];

    pub fn as_str(self) -> &'static str {
        match self {
            Size::Small => "small",
            Size::Medium => "medium",
            Size::Jumbo => "jumbo",
        }
    }
}

/// Hair length category. Adds a flat surcharge before the size multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Length {
    Shoulder,
    MidBack,
    Waist,
    Butt,
}

impl Length {
    pub const ALL: [Length; 4] = [Length::Shoulder, Length::MidBack, Length::Waist, Length::Butt];

    pub fn as_str(self) -> &'static str {
        match self {
            Length::Shoulder => "shoulder",
            Length::MidBack => "midBack",
            Length::Waist => "waist",
            Length::Butt => "butt",
        }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Length {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Size {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Size::ALL.into_iter().find(|v| v.as_str() == s).ok_or(())
    }
}

impl FromStr for Length {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Length::ALL.into_iter().find(|v| v.as_str() == s).ok_or(())
    }
}

// ── Catalog entries ──

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeVariant {
    pub price_multiplier: f64,
    pub time_multiplier: f64,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LengthVariant {
    pub price_add: f64,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub base_price: f64,
    /// Hours.
    pub base_duration: f64,
    pub sizes: BTreeMap<Size, SizeVariant>,
    pub lengths: BTreeMap<Length, LengthVariant>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOn {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    /// Display symbol used in emails and messages.
    pub currency: String,
    pub services: Vec<ServiceDefinition>,
    pub add_ons: Vec<AddOn>,
    pub time_slots: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("cannot read catalog file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("service {service} has no {variant} variant")]
    MissingVariant { service: String, variant: String },
    #[error("duplicate {kind} id {id}")]
    DuplicateId { kind: &'static str, id: String },
    #[error("{0}")]
    Invalid(String),
}

impl Catalog {
    /// Catalog compiled into the binary.
    pub fn embedded() -> Result<Self, CatalogError> {
        Self::from_json(EMBEDDED_CATALOG)
    }

    /// Parse and check a catalog document.
    pub fn from_json(raw: &str) -> Result<Self, CatalogError> {
        let catalog: Catalog = serde_json::from_str(raw)?;
        catalog.check()?;
        Ok(catalog)
    }

    /// Load from `path` when given, otherwise use the embedded catalog.
    pub fn load(path: Option<&str>) -> Result<Self, CatalogError> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
                    path: path.to_string(),
                    source,
                })?;
                Self::from_json(&raw)
            }
            None => Self::embedded(),
        }
    }

    /// Every service must price every size and length the wizard offers.
    pub fn check(&self) -> Result<(), CatalogError> {
        let mut service_ids = HashSet::new();
        for service in &self.services {
            if !service_ids.insert(service.id.as_str()) {
                return Err(CatalogError::DuplicateId {
                    kind: "service",
                    id: service.id.clone(),
                });
            }
            if service.base_price <= 0.0 || service.base_duration <= 0.0 {
                return Err(CatalogError::Invalid(format!(
                    "service {} must have a positive base price and duration",
                    service.id
                )));
            }
            for size in Size::ALL {
                if !service.sizes.contains_key(&size) {
                    return Err(CatalogError::MissingVariant {
                        service: service.id.clone(),
                        variant: format!("size:{size}"),
                    });
                }
            }
            for length in Length::ALL {
                if !service.lengths.contains_key(&length) {
                    return Err(CatalogError::MissingVariant {
                        service: service.id.clone(),
                        variant: format!("length:{length}"),
                    });
                }
            }
        }

        let mut add_on_ids = HashSet::new();
        for add_on in &self.add_ons {
            if !add_on_ids.insert(add_on.id.as_str()) {
                return Err(CatalogError::DuplicateId {
                    kind: "add-on",
                    id: add_on.id.clone(),
                });
            }
            if add_on.price <= 0.0 {
                return Err(CatalogError::Invalid(format!(
                    "add-on {} must have a positive price",
                    add_on.id
                )));
            }
        }

        if let Some(slot) = self.time_slots.iter().find(|s| !is_twelve_hour_time(s)) {
            return Err(CatalogError::Invalid(format!(
                "time slot {slot:?} is not in H:MM AM/PM format"
            )));
        }

        Ok(())
    }

    pub fn service(&self, id: &str) -> Option<&ServiceDefinition> {
        self.services.iter().find(|s| s.id == id)
    }

    pub fn add_on(&self, id: &str) -> Option<&AddOn> {
        self.add_ons.iter().find(|a| a.id == id)
    }
}
