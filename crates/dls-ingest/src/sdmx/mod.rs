//! SDMX-ML parsing
//!
//! Three schema generations (1.0, 2.0, 2.1) are in circulation. A document's
//! generation is read from the namespace declarations on its root element
//! and its wire shape from the root element name:
//!
//! | Root | Generation | Shape |
//! |---|---|---|
//! | `CompactData` | 1.0 | [`WireShape::Compact10`] |
//! | `CompactData` | 2.0 | [`WireShape::Compact20`] |
//! | `GenericData` | 1.0, 2.0 | [`WireShape::Generic20`] |
//! | `GenericData` | 2.1 | [`WireShape::Generic21`] |
//! | `StructureSpecificData` | 2.1 | [`WireShape::Specific21`] |

pub mod data;
pub mod structure;

use serde::{Deserialize, Serialize};

use crate::xml::Element;

pub use data::{ChainedSource, SeriesReader, SeriesSource};
pub use structure::{
    parse_structure, resolve_remote_codelists, CodelistRef, Component, DataStructure, Dataflow,
    KeyDef, SeriesLayout, StructureDefinition,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchemaGeneration {
    #[serde(rename = "1.0")]
    V1_0,
    #[serde(rename = "2.0")]
    V2_0,
    #[serde(rename = "2.1")]
    V2_1,
}

impl SchemaGeneration {
    /// Newest generation named by any namespace declaration on `root`
    pub fn detect(root: &Element) -> Option<Self> {
        let namespaces: Vec<&str> = root
            .attributes
            .iter()
            .filter(|(k, _)| k == "xmlns" || k.starts_with("xmlns:"))
            .map(|(_, v)| v.as_str())
            .collect();

        [
            ("v2_1", SchemaGeneration::V2_1),
            ("v2_0", SchemaGeneration::V2_0),
            ("v1_0", SchemaGeneration::V1_0),
        ]
        .into_iter()
        .find(|(marker, _)| namespaces.iter().any(|ns| ns.contains(marker)))
        .map(|(_, generation)| generation)
    }
}

impl std::fmt::Display for SchemaGeneration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SchemaGeneration::V1_0 => "1.0",
            SchemaGeneration::V2_0 => "2.0",
            SchemaGeneration::V2_1 => "2.1",
        })
    }
}

/// Data message layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WireShape {
    /// FED-style compact data: inline attributes, numeric frequency codes
    Compact10,
    /// Compact data, inline attributes
    Compact20,
    /// Generic data with `concept=` references (1.0 and 2.0)
    Generic20,
    /// Generic data with `id=` references and `ObsDimension`
    Generic21,
    /// Structure-specific data, inline attributes
    Specific21,
}

impl WireShape {
    pub fn detect(root: &Element) -> Option<Self> {
        let generation = SchemaGeneration::detect(root)?;
        match (root.name.as_str(), generation) {
            ("CompactData", SchemaGeneration::V1_0) => Some(WireShape::Compact10),
            ("CompactData", SchemaGeneration::V2_0) => Some(WireShape::Compact20),
            ("GenericData", SchemaGeneration::V1_0 | SchemaGeneration::V2_0) => {
                Some(WireShape::Generic20)
            },
            ("GenericData", SchemaGeneration::V2_1) => Some(WireShape::Generic21),
            ("StructureSpecificData", SchemaGeneration::V2_1) => Some(WireShape::Specific21),
            _ => None,
        }
    }

    /// Series keys and attributes are XML attributes of `Series`
    pub fn is_inline(self) -> bool {
        !matches!(self, WireShape::Generic20 | WireShape::Generic21)
    }
}
