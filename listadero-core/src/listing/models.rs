use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingKind {
    Item,
    Property,
}

impl ListingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingKind::Item => "item",
            ListingKind::Property => "property",
        }
    }
}

impl fmt::Display for ListingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListingKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "item" => Ok(ListingKind::Item),
            "property" => Ok(ListingKind::Property),
            other => Err(format!("unknown listing kind: {other}")),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ListingError {
    #[error("listing title must not be empty")]
    EmptyTitle,
    #[error("listing description must not be empty")]
    EmptyDescription,
    #[error("field {key} is not part of the {kind} registry")]
    UnknownField { key: String, kind: ListingKind },
}

/// One marketplace post under construction. Consumed once to derive an
/// [`crate::listing::InteractionPlan`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingRequest {
    pub kind: ListingKind,
    pub title: String,
    pub description: String,
    /// Optional semantic fields keyed per listing kind (`precio`,
    /// `recamaras`, ...). BTreeMap keeps iteration deterministic.
    pub fields: BTreeMap<String, String>,
    /// Pre-filtered, pre-ordered image references from the image collaborator.
    pub images: Vec<PathBuf>,
}

impl ListingRequest {
    pub fn new(
        kind: ListingKind,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            title: title.into(),
            description: description.into(),
            fields: BTreeMap::new(),
            images: Vec::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_images(mut self, images: Vec<PathBuf>) -> Self {
        self.images = images;
        self
    }
}
