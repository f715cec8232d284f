//! Structure (DSD) parsing
//!
//! One streaming pass over a structure message collects codelists,
//! concepts, data structures, dataflows, category schemes and
//! categorisations. Each `Code`, `Concept`, `DataStructure`/`KeyFamily`,
//! `Dataflow`, `CategoryScheme` and `Categorisation` is materialised on its
//! own and dropped once recorded, so a codelist with tens of thousands of
//! codes never sits in memory as a tree.
//!
//! Repeated ids keep their first definition.
//!
//! Generation differences handled here:
//!
//! - 2.1 references concepts and codelists with nested `Ref` elements
//!   (`ConceptIdentity/Ref`, `LocalRepresentation/Enumeration/Ref`) and
//!   labels codes with `Name`.
//! - 2.0 uses `conceptRef`/`codelist` attributes, `isFrequencyDimension`
//!   and labels codes with `Description`.
//! - 1.0 uses `concept`/`codelist` attributes and has no dataflows; one is
//!   synthesised per key family.

use quick_xml::events::Event;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::BufRead;
use tracing::{debug, warn};

use super::SchemaGeneration;
use crate::categories::CategoryTree;
use crate::codes::{CodeDict, CodeMap};
use crate::error::{StructureError, XmlError};
use crate::fetch::CodelistResolver;
use crate::xml::{new_reader, read_root, read_subtree, skip_subtree, Element};

const DEFAULT_TIME_KEY: &str = "TIME_PERIOD";
const DEFAULT_MEASURE_KEY: &str = "OBS_VALUE";

/// Reference to a codelist by id, with agency and version when known
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CodelistRef {
    pub id: String,
    pub agency: Option<String>,
    pub version: Option<String>,
}

/// A dimension or attribute of a data structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub id: String,
    pub concept: String,
    pub codelist: Option<CodelistRef>,
    pub is_frequency: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataStructure {
    pub id: String,
    pub agency: Option<String>,
    pub version: Option<String>,
    pub name: String,
    pub dimensions: Vec<Component>,
    pub attributes: Vec<Component>,
    pub time_dimension: Option<String>,
    pub primary_measure: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataflow {
    pub id: String,
    pub agency: Option<String>,
    pub name: String,
    pub dsd_id: String,
}

/// Category -> dataflow link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Categorisation {
    pub category: String,
    pub dataflow: String,
}

/// Everything collected from one structure message
#[derive(Debug, Clone)]
pub struct StructureDefinition {
    pub generation: SchemaGeneration,
    pub codelists: HashMap<String, CodeMap>,
    pub concepts: HashMap<String, String>,
    pub data_structures: BTreeMap<String, DataStructure>,
    pub dataflows: BTreeMap<String, Dataflow>,
    pub categories: CategoryTree,
    pub categorisations: Vec<Categorisation>,
}

/// A dimension or attribute with its resolved display name and codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDef {
    pub id: String,
    pub name: String,
    pub codes: CodeMap,
}

/// Ordered keys of one dataset, ready for the data parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesLayout {
    pub dsd_id: String,
    pub dimensions: Vec<KeyDef>,
    pub attributes: Vec<KeyDef>,
    pub frequency_key: Option<String>,
    pub time_key: String,
    pub measure_key: String,
}

impl SeriesLayout {
    pub fn dimension_keys(&self) -> Vec<String> {
        self.dimensions.iter().map(|d| d.id.clone()).collect()
    }

    pub fn attribute_keys(&self) -> Vec<String> {
        self.attributes.iter().map(|a| a.id.clone()).collect()
    }

    pub fn dimension(&self, id: &str) -> Option<&KeyDef> {
        self.dimensions.iter().find(|d| d.id == id)
    }

    pub fn attribute(&self, id: &str) -> Option<&KeyDef> {
        self.attributes.iter().find(|a| a.id == id)
    }

    pub fn is_dimension(&self, id: &str) -> bool {
        self.dimension(id).is_some()
    }

    /// Declared codelists, keyed by dimension/attribute id
    pub fn codelists(&self) -> CodeDict {
        let mut dict = CodeDict::new();
        for key in self.dimensions.iter().chain(&self.attributes) {
            dict.entry(&key.id).merge(&key.codes);
        }
        dict
    }

    pub fn concepts(&self) -> BTreeMap<String, String> {
        self.dimensions
            .iter()
            .chain(&self.attributes)
            .map(|k| (k.id.clone(), k.name.clone()))
            .collect()
    }

    /// Layout without a structure document: every key is learnt from data
    pub fn inferred(dimension_keys: &[&str], attribute_keys: &[&str]) -> Self {
        let key = |id: &&str| KeyDef {
            id: id.to_string(),
            name: id.to_string(),
            codes: CodeMap::new(),
        };
        let frequency_key = dimension_keys
            .iter()
            .find(|k| **k == "FREQ")
            .map(|k| k.to_string());
        Self {
            dsd_id: String::new(),
            dimensions: dimension_keys.iter().map(key).collect(),
            attributes: attribute_keys.iter().map(key).collect(),
            frequency_key,
            time_key: DEFAULT_TIME_KEY.to_string(),
            measure_key: DEFAULT_MEASURE_KEY.to_string(),
        }
    }
}

impl StructureDefinition {
    fn new(generation: SchemaGeneration) -> Self {
        Self {
            generation,
            codelists: HashMap::new(),
            concepts: HashMap::new(),
            data_structures: BTreeMap::new(),
            dataflows: BTreeMap::new(),
            categories: CategoryTree::new(),
            categorisations: Vec::new(),
        }
    }

    /// Data structure behind a dataflow id, or a DSD id used directly
    pub fn data_structure(&self, id: &str) -> Result<&DataStructure, StructureError> {
        if let Some(flow) = self.dataflows.get(id) {
            return self
                .data_structures
                .get(&flow.dsd_id)
                .ok_or_else(|| StructureError::UnknownStructure(flow.dsd_id.clone()));
        }
        self.data_structures
            .get(id)
            .ok_or_else(|| StructureError::UnknownDataflow(id.to_string()))
    }

    pub fn layout(&self, id: &str) -> Result<SeriesLayout, StructureError> {
        let dsd = self.data_structure(id)?;

        let frequency_key = dsd
            .dimensions
            .iter()
            .find(|d| d.is_frequency)
            .or_else(|| dsd.dimensions.iter().find(|d| d.id == "FREQ" || d.id == "FREQUENCY"))
            .map(|d| d.id.clone());

        Ok(SeriesLayout {
            dsd_id: dsd.id.clone(),
            dimensions: dsd.dimensions.iter().map(|c| self.key_def(&dsd.id, c)).collect(),
            attributes: dsd.attributes.iter().map(|c| self.key_def(&dsd.id, c)).collect(),
            frequency_key,
            time_key: dsd
                .time_dimension
                .clone()
                .unwrap_or_else(|| DEFAULT_TIME_KEY.to_string()),
            measure_key: dsd
                .primary_measure
                .clone()
                .unwrap_or_else(|| DEFAULT_MEASURE_KEY.to_string()),
        })
    }

    fn key_def(&self, dsd_id: &str, component: &Component) -> KeyDef {
        let Some(name) = self.concepts.get(&component.concept) else {
            warn!(
                dsd = %dsd_id,
                key = %component.id,
                concept = %component.concept,
                "Unresolved concept, key has no enumeration"
            );
            return KeyDef {
                id: component.id.clone(),
                name: component.id.clone(),
                codes: CodeMap::new(),
            };
        };

        let codes = match &component.codelist {
            Some(reference) => match self.codelists.get(&reference.id) {
                Some(codes) => codes.clone(),
                None => {
                    warn!(dsd = %dsd_id, key = %component.id, codelist = %reference.id, "Codelist not found");
                    CodeMap::new()
                },
            },
            None => CodeMap::new(),
        };

        KeyDef {
            id: component.id.clone(),
            name: name.clone(),
            codes,
        }
    }

    /// Codelists referenced by a data structure but absent from the message
    pub fn missing_codelists(&self) -> Vec<CodelistRef> {
        let mut seen = HashSet::new();
        self.data_structures
            .values()
            .flat_map(|dsd| dsd.dimensions.iter().chain(&dsd.attributes))
            .filter_map(|c| c.codelist.as_ref())
            .filter(|r| !self.codelists.contains_key(&r.id))
            .filter(|r| seen.insert(r.id.clone()))
            .cloned()
            .collect()
    }
}

/// Parse a structure message
pub fn parse_structure<R: BufRead>(source: R) -> Result<StructureDefinition, StructureError> {
    let mut reader = new_reader(source);
    let root = read_root(&mut reader)?;
    let generation = SchemaGeneration::detect(&root)
        .ok_or_else(|| StructureError::UnsupportedSchema(root.name.clone()))?;

    let mut parser = StructureParser {
        def: StructureDefinition::new(generation),
        codelist: None,
    };
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_event_into(&mut buf).map_err(XmlError::from)? {
            Event::Start(e) => {
                let element = Element::from_start(&e)?;
                parser.start(&mut reader, element)?;
            },
            Event::Empty(e) => {
                let element = Element::from_start(&e)?;
                parser.empty(&element);
            },
            Event::End(e) => {
                if matches!(e.local_name().as_ref(), b"Codelist" | b"CodeList") {
                    parser.codelist = None;
                }
            },
            Event::Eof => break,
            _ => {},
        }
    }

    Ok(parser.finish())
}

/// Fetch codelists the message only references (2.1 only).
///
/// Any failure is fatal: a structure with a missing enumeration cannot be
/// ingested reliably.
pub async fn resolve_remote_codelists(
    def: &mut StructureDefinition,
    resolver: &dyn CodelistResolver,
) -> Result<usize, StructureError> {
    if def.generation != SchemaGeneration::V2_1 {
        return Ok(0);
    }

    let mut resolved = 0;
    for reference in def.missing_codelists() {
        let remote_error = |reason: String| StructureError::RemoteCodelist {
            codelist: reference.id.clone(),
            reason,
        };

        debug!(codelist = %reference.id, agency = ?reference.agency, "Fetching remote codelist");
        let bytes = resolver
            .fetch_codelist(&reference)
            .await
            .map_err(|e| remote_error(e.to_string()))?;
        let remote = parse_structure(bytes.as_slice()).map_err(|e| remote_error(e.to_string()))?;
        let codes = remote
            .codelists
            .get(&reference.id)
            .ok_or_else(|| remote_error("codelist missing from response".to_string()))?;

        def.codelists
            .entry(reference.id.clone())
            .or_insert_with(|| codes.clone());
        resolved += 1;
    }

    Ok(resolved)
}

struct StructureParser {
    def: StructureDefinition,
    /// Id of the codelist whose codes are being read
    codelist: Option<String>,
}

impl StructureParser {
    fn start<R: BufRead>(
        &mut self,
        reader: &mut quick_xml::Reader<R>,
        element: Element,
    ) -> Result<(), StructureError> {
        let name = element.name.clone();
        match name.as_str() {
            "Codelist" | "CodeList" => {
                let id = element.attr("id").unwrap_or_default().to_string();
                if self.def.codelists.contains_key(&id) {
                    skip_subtree(reader)?;
                } else {
                    self.def.codelists.insert(id.clone(), CodeMap::new());
                    self.codelist = Some(id);
                }
            },
            "Code" if self.codelist.is_some() => {
                let code = read_subtree(reader, element)?;
                self.add_code(&code);
            },
            "Concept" => {
                let concept = read_subtree(reader, element)?;
                self.add_concept(&concept);
            },
            "DataStructure" | "KeyFamily" => {
                let dsd = read_subtree(reader, element)?;
                self.add_data_structure(&dsd);
            },
            "Dataflow" => {
                let flow = read_subtree(reader, element)?;
                self.add_dataflow(&flow);
            },
            "CategoryScheme" => {
                let scheme = read_subtree(reader, element)?;
                self.add_categories(&scheme, None);
            },
            "Categorisation" => {
                let link = read_subtree(reader, element)?;
                self.add_categorisation(&link);
            },
            _ => {},
        }
        Ok(())
    }

    fn empty(&mut self, element: &Element) {
        match element.name.as_str() {
            "Code" if self.codelist.is_some() => self.add_code(element),
            "Concept" => self.add_concept(element),
            _ => {},
        }
    }

    fn add_code(&mut self, code: &Element) {
        let Some(list) = self.codelist.as_ref().and_then(|id| self.def.codelists.get_mut(id)) else {
            return;
        };
        let Some(id) = code.attr("id").or_else(|| code.attr("value")) else {
            return;
        };
        let label = code
            .localized("Name")
            .or_else(|| code.localized("Description"))
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| id.to_string());
        list.insert_if_absent(id, label);
    }

    fn add_concept(&mut self, concept: &Element) {
        let Some(id) = concept.attr("id") else {
            return;
        };
        let name = concept
            .localized("Name")
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| id.to_string());
        self.def.concepts.entry(id.to_string()).or_insert(name);
    }

    fn component(&self, element: &Element, is_dimension: bool) -> Component {
        let concept = element
            .path(&["ConceptIdentity", "Ref"])
            .and_then(|r| r.attr("id"))
            .or_else(|| element.attr("conceptRef"))
            .or_else(|| element.attr("concept"))
            .or_else(|| element.attr("id"))
            .unwrap_or_default()
            .to_string();
        let id = element.attr("id").map(str::to_string).unwrap_or_else(|| concept.clone());

        let codelist = element
            .path(&["LocalRepresentation", "Enumeration", "Ref"])
            .and_then(|r| {
                r.attr("id").map(|id| CodelistRef {
                    id: id.to_string(),
                    agency: r.attr("agencyID").map(str::to_string),
                    version: r.attr("version").map(str::to_string),
                })
            })
            .or_else(|| {
                element.attr("codelist").map(|id| CodelistRef {
                    id: id.to_string(),
                    agency: element.attr("codelistAgency").map(str::to_string),
                    version: element.attr("codelistVersion").map(str::to_string),
                })
            });

        let is_frequency = is_dimension
            && (element.attr("isFrequencyDimension") == Some("true")
                || (self.def.generation != SchemaGeneration::V2_0 && id == "FREQ"));

        Component {
            id,
            concept,
            codelist,
            is_frequency,
        }
    }

    fn add_data_structure(&mut self, dsd: &Element) {
        let Some(id) = dsd.attr("id").map(str::to_string) else {
            return;
        };
        if self.def.data_structures.contains_key(&id) {
            return;
        }

        // 2.1 splits components into lists, older generations keep them flat
        let (dimension_parent, attribute_parent, measure_parent) =
            match dsd.child("DataStructureComponents") {
                Some(comps) => (
                    comps.child("DimensionList"),
                    comps.child("AttributeList"),
                    comps.child("MeasureList"),
                ),
                None => {
                    let comps = dsd.child("Components");
                    (comps, comps, comps)
                },
            };

        let dimensions = dimension_parent
            .map(|p| p.children_named("Dimension").map(|d| self.component(d, true)).collect())
            .unwrap_or_default();
        let attributes = attribute_parent
            .map(|p| p.children_named("Attribute").map(|a| self.component(a, false)).collect())
            .unwrap_or_default();
        let time_dimension = dimension_parent
            .and_then(|p| p.child("TimeDimension"))
            .map(|t| self.component(t, false).id);
        let primary_measure = measure_parent
            .and_then(|p| p.child("PrimaryMeasure"))
            .map(|m| self.component(m, false).id);

        let structure = DataStructure {
            name: dsd.localized("Name").unwrap_or_else(|| id.clone()),
            agency: dsd.attr("agencyID").map(str::to_string),
            version: dsd.attr("version").map(str::to_string),
            id: id.clone(),
            dimensions,
            attributes,
            time_dimension,
            primary_measure,
        };
        self.def.data_structures.insert(id, structure);
    }

    fn add_dataflow(&mut self, flow: &Element) {
        let Some(id) = flow.attr("id") else {
            return;
        };
        let dsd_id = flow
            .path(&["Structure", "Ref"])
            .and_then(|r| r.attr("id").map(str::to_string))
            .or_else(|| flow.path(&["KeyFamilyRef", "KeyFamilyID"]).map(|k| k.text().to_string()))
            .unwrap_or_else(|| id.to_string());

        self.def
            .dataflows
            .entry(id.to_string())
            .or_insert_with(|| Dataflow {
                id: id.to_string(),
                agency: flow.attr("agencyID").map(str::to_string),
                name: flow.localized("Name").unwrap_or_else(|| id.to_string()),
                dsd_id,
            });
    }

    fn add_categories(&mut self, parent_element: &Element, parent: Option<&str>) {
        for category in parent_element.children_named("Category") {
            let Some(code) = category.attr("id") else {
                continue;
            };
            let name = category.localized("Name").unwrap_or_else(|| code.to_string());
            self.def.categories.insert(code, name, parent);

            // 2.0 links dataflows from inside the category
            for flow_ref in category.children_named("DataflowRef") {
                if let Some(flow) = flow_ref.child("DataflowID") {
                    self.def.categorisations.push(Categorisation {
                        category: code.to_string(),
                        dataflow: flow.text().to_string(),
                    });
                }
            }

            self.add_categories(category, Some(code));
        }
    }

    fn add_categorisation(&mut self, link: &Element) {
        let source = link.path(&["Source", "Ref"]).and_then(|r| r.attr("id"));
        let target = link.path(&["Target", "Ref"]).and_then(|r| r.attr("id"));
        if let (Some(dataflow), Some(category)) = (source, target) {
            self.def.categorisations.push(Categorisation {
                category: category.to_string(),
                dataflow: dataflow.to_string(),
            });
        }
    }

    fn finish(mut self) -> StructureDefinition {
        let def = &mut self.def;

        if def.dataflows.is_empty() {
            for dsd in def.data_structures.values() {
                def.dataflows.insert(
                    dsd.id.clone(),
                    Dataflow {
                        id: dsd.id.clone(),
                        agency: dsd.agency.clone(),
                        name: dsd.name.clone(),
                        dsd_id: dsd.id.clone(),
                    },
                );
            }
        }

        for link in &def.categorisations {
            if def.categories.attach_dataset(&link.category, &link.dataflow).is_err() {
                debug!(category = %link.category, dataflow = %link.dataflow, "Categorisation to unknown category");
            }
        }

        debug!(
            generation = %def.generation,
            codelists = def.codelists.len(),
            concepts = def.concepts.len(),
            data_structures = def.data_structures.len(),
            dataflows = def.dataflows.len(),
            categories = def.categories.len(),
            "Structure parsed"
        );

        self.def
    }
}
