//! Domain models for the extraction pipeline.
//!
//! Provenance is carried as a set of source page numbers on every derived
//! record. Page sets are `BTreeSet` so serialized output is sorted and
//! stable across runs.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// One page of raw document text, as produced by the document reader.
///
/// Pages are immutable once read. Numbers are 1-based and need not be
/// contiguous when a sub-range was requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub number: u32,
    pub text: String,
}

/// A reconstructed paragraph with the pages whose lines contributed to it.
///
/// `source_pages` is union-only: it never shrinks once assigned, and it is
/// non-empty whenever `text` is non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paragraph {
    pub text: String,
    pub source_pages: BTreeSet<u32>,
}

/// Category of an extracted entity.
///
/// The service returns categories as free text; anything outside the known
/// set folds to `Unknown` rather than failing the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String")]
pub enum EntityCategory {
    Disease,
    Symptom,
    Drug,
    Treatment,
    Unknown,
}

impl From<String> for EntityCategory {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "disease" => Self::Disease,
            "symptom" => Self::Symptom,
            "drug" | "medication" => Self::Drug,
            "treatment" | "therapy" => Self::Treatment,
            _ => {
                tracing::warn!(category = %s, "Unknown entity category, folding to Unknown");
                Self::Unknown
            }
        }
    }
}

impl EntityCategory {
    /// Node-id prefix used at graph export time
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Disease => "DISEASE",
            Self::Symptom => "SYMPTOM",
            Self::Drug => "DRUG",
            Self::Treatment => "TREATMENT",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disease => "Disease",
            Self::Symptom => "Symptom",
            Self::Drug => "Drug",
            Self::Treatment => "Treatment",
            Self::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for EntityCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An extracted entity.
///
/// Before normalization the working-set key is `(term, category)`; after
/// normalization the canonical term alone identifies the entity, with the
/// first-seen category winning on a cross-category merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub term: String,
    pub category: EntityCategory,
    pub source_pages: BTreeSet<u32>,
}

/// A directed, labeled relation between two entity terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub source: String,
    pub target: String,
    pub relation: String,
    #[serde(default)]
    pub source_pages: BTreeSet<u32>,
}

/// Alias -> canonical term mapping, built once per run by majority vote.
///
/// Aliases absent from the map are treated as self-mapping by consumers.
/// `BTreeMap` keeps iteration (and the exported normalization graph)
/// deterministic.
pub type NormalizationMap = BTreeMap<String, String>;
