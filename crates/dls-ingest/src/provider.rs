//! Provider profiles
//!
//! A profile is a bundle of small strategies describing how one publisher
//! deviates from plain SDMX: its frequency codes, how series are named and
//! keyed, observation order, missing-value sentinels and where its
//! structure endpoints live. Parsers consult the profile instead of being
//! specialised per provider.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::models::Provider;
use crate::period::Frequency;

/// Provider frequency code remapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrequencyMap {
    codes: HashMap<String, Frequency>,
}

impl FrequencyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, code: impl Into<String>, frequency: Frequency) -> Self {
        self.codes.insert(code.into(), frequency);
        self
    }

    /// Remapped code first, then the canonical one-letter codes
    pub fn resolve(&self, raw: &str) -> Option<Frequency> {
        let raw = raw.trim();
        self.codes
            .get(raw)
            .copied()
            .or_else(|| Frequency::from_code(raw))
    }

    /// Numeric codes used by the Federal Reserve
    pub fn fed() -> Self {
        let mut map = Self::new()
            .with("8", Frequency::Daily)
            .with("129", Frequency::Monthly)
            .with("162", Frequency::Quarterly)
            .with("203", Frequency::Annual);
        for weekly in ["17", "18", "19", "20", "21"] {
            map = map.with(weekly, Frequency::Weekly);
        }
        map
    }
}

/// How a series display name is built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NameStrategy {
    /// Long labels of the dimension values, in dimension order
    DimensionLabels,
    /// Short codes of the dimension values, in dimension order
    DimensionCodes,
    /// Value of a series attribute, falling back to dimension labels
    Attribute(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObservationOrder {
    Ascending,
    Descending,
}

/// All provider quirks the parsers and fetchers need
#[derive(Debug, Clone)]
pub struct ProviderProfile {
    pub name: String,
    pub long_name: String,
    pub region: Option<String>,
    pub website: Option<String>,
    pub frequency_map: FrequencyMap,
    /// Accepted canonical frequencies; every frequency when empty
    pub supported: BTreeSet<Frequency>,
    /// Raw frequency codes rejected before any remapping
    pub rejected: BTreeSet<String>,
    pub name_strategy: NameStrategy,
    /// Series attribute carrying an explicit series identifier
    pub key_attribute: Option<String>,
    pub observation_order: ObservationOrder,
    /// Series attribute carrying a duration hint such as `P3M`
    pub time_format_attribute: Option<String>,
    /// Base of the structure query API, used for remote codelists
    pub structure_url: Option<String>,
    /// Data structure query, `{dataset}` is substituted
    pub datastructure_template: Option<String>,
    /// Data query, `{dataset}` and `{key}` are substituted
    pub data_template: Option<String>,
    /// Dimension whose codes split a data query into shards
    pub shard_dimension: Option<String>,
    /// Values stored as `NaN`
    pub missing_values: BTreeSet<String>,
}

pub const MISSING_VALUE: &str = "NaN";

fn set<T: Ord + Clone>(items: &[T]) -> BTreeSet<T> {
    items.iter().cloned().collect()
}

fn strings(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl ProviderProfile {
    /// Plain SDMX provider without quirks
    pub fn generic(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            long_name: name.clone(),
            name,
            region: None,
            website: None,
            frequency_map: FrequencyMap::new(),
            supported: BTreeSet::new(),
            rejected: BTreeSet::new(),
            name_strategy: NameStrategy::DimensionLabels,
            key_attribute: None,
            observation_order: ObservationOrder::Ascending,
            time_format_attribute: Some("TIME_FORMAT".to_string()),
            structure_url: None,
            datastructure_template: None,
            data_template: None,
            shard_dimension: None,
            missing_values: strings(&["", "NaN", "NA", "-", "."]),
        }
    }

    pub fn ecb() -> Self {
        let base = "https://data-api.ecb.europa.eu/service";
        Self {
            long_name: "European Central Bank".to_string(),
            region: Some("Europe".to_string()),
            website: Some("http://www.ecb.europa.eu".to_string()),
            supported: set(&[
                Frequency::Annual,
                Frequency::Semiannual,
                Frequency::Quarterly,
                Frequency::Monthly,
                Frequency::Weekly,
                Frequency::Daily,
            ]),
            rejected: strings(&["H", "N", "B"]),
            name_strategy: NameStrategy::Attribute("TITLE".to_string()),
            structure_url: Some(base.to_string()),
            datastructure_template: Some(format!(
                "{base}/dataflow/ECB/{{dataset}}/latest?references=all"
            )),
            data_template: Some(format!("{base}/data/{{dataset}}/{{key}}")),
            shard_dimension: Some("FREQ".to_string()),
            ..Self::generic("ECB")
        }
    }

    pub fn insee() -> Self {
        let base = "https://bdm.insee.fr/series/sdmx";
        Self {
            long_name: "National Institute of Statistics and Economic Studies".to_string(),
            region: Some("France".to_string()),
            website: Some("http://www.insee.fr".to_string()),
            frequency_map: FrequencyMap::new()
                .with("T", Frequency::Quarterly)
                .with("B", Frequency::Daily),
            name_strategy: NameStrategy::Attribute("TITLE_FR".to_string()),
            key_attribute: Some("IDBANK".to_string()),
            observation_order: ObservationOrder::Descending,
            structure_url: Some(base.to_string()),
            datastructure_template: Some(format!(
                "{base}/dataflow/FR1/{{dataset}}/latest?references=all"
            )),
            data_template: Some(format!("{base}/data/{{dataset}}/{{key}}")),
            ..Self::generic("INSEE")
        }
    }

    pub fn fed() -> Self {
        Self {
            long_name: "Federal Reserve".to_string(),
            region: Some("US".to_string()),
            website: Some("http://www.federalreserve.gov".to_string()),
            frequency_map: FrequencyMap::fed(),
            name_strategy: NameStrategy::Attribute("SHORT_DESCRIPTION".to_string()),
            key_attribute: Some("SERIES_NAME".to_string()),
            missing_values: strings(&["", "NC", "ND", "NA", "-"]),
            ..Self::generic("FED")
        }
    }

    pub fn imf() -> Self {
        Self {
            long_name: "International Monetary Fund".to_string(),
            region: Some("World".to_string()),
            website: Some("http://www.imf.org".to_string()),
            supported: set(&[Frequency::Annual, Frequency::Quarterly, Frequency::Monthly]),
            ..Self::generic("IMF")
        }
    }

    pub fn destatis() -> Self {
        Self {
            long_name: "Statistisches Bundesamt".to_string(),
            region: Some("Germany".to_string()),
            website: Some("https://www.destatis.de".to_string()),
            ..Self::generic("DESTATIS")
        }
    }

    pub fn eurostat() -> Self {
        Self {
            long_name: "Eurostat".to_string(),
            region: Some("Europe".to_string()),
            website: Some("http://ec.europa.eu/eurostat".to_string()),
            missing_values: strings(&["", "NaN", ":", "-"]),
            ..Self::generic("EUROSTAT")
        }
    }

    /// Built-in profile by case-insensitive name, `generic` otherwise
    pub fn by_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "ecb" => Self::ecb(),
            "insee" => Self::insee(),
            "fed" => Self::fed(),
            "imf" => Self::imf(),
            "destatis" => Self::destatis(),
            "eurostat" => Self::eurostat(),
            _ => Self::generic(name.to_ascii_uppercase()),
        }
    }

    /// Remap and validate a raw frequency code
    pub fn resolve_frequency(&self, raw: &str) -> Option<Frequency> {
        if self.rejected.contains(raw.trim()) {
            return None;
        }
        let frequency = self.frequency_map.resolve(raw)?;
        if self.supported.is_empty() || self.supported.contains(&frequency) {
            Some(frequency)
        } else {
            None
        }
    }

    pub fn normalize_value(&self, raw: &str) -> String {
        let value = raw.trim();
        if self.missing_values.contains(value) {
            MISSING_VALUE.to_string()
        } else {
            value.to_string()
        }
    }

    pub fn datastructure_url(&self, dataset: &str) -> Option<String> {
        self.datastructure_template
            .as_ref()
            .map(|t| t.replace("{dataset}", dataset))
    }

    pub fn data_url(&self, dataset: &str, key: &str) -> Option<String> {
        self.data_template
            .as_ref()
            .map(|t| t.replace("{dataset}", dataset).replace("{key}", key))
    }

    pub fn provider(&self) -> Provider {
        let mut provider = Provider::new(&self.name, &self.long_name);
        provider.region = self.region.clone();
        provider.website = self.website.clone();
        provider
    }
}
