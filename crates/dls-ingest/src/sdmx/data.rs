//! Data message parsing
//!
//! [`SeriesReader`] walks a data message once and yields one
//! `Result<SeriesRecord, SeriesError>` per `Series` element. Per-series
//! problems (unknown frequency, no observations, bad period) come out as
//! `Err` items and the iteration goes on. A broken document ends the
//! iteration after a single fatal `Err`.
//!
//! The five wire shapes differ only in where keys, attributes and
//! observations sit, so each step below dispatches on [`WireShape`]:
//!
//! ```text
//! Compact / StructureSpecific:  <Series FREQ="M" REF_AREA="FR" TITLE="..">
//!                                 <Obs TIME_PERIOD="2000-01" OBS_VALUE="1.5"/>
//! Generic 1.0/2.0:              <SeriesKey><Value concept="FREQ" value="M"/>
//!                               <Obs><Time>2000-01</Time><ObsValue value="1.5"/>
//! Generic 2.1:                  <SeriesKey><Value id="FREQ" value="M"/>
//!                               <Obs><ObsDimension value="2000-01"/><ObsValue value="1.5"/>
//! ```

use chrono::{DateTime, NaiveDateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::{BTreeMap, VecDeque};
use std::io::BufRead;
use tracing::{debug, trace};

use super::structure::SeriesLayout;
use super::WireShape;
use crate::codes::CodeDict;
use crate::error::{SeriesError, XmlError};
use crate::models::{Observation, SeriesRecord};
use crate::period::{normalize_special_period, ordinal_from_period, period_from_ordinal, Frequency};
use crate::provider::{NameStrategy, ObservationOrder, ProviderProfile};
use crate::xml::{new_reader, read_root, read_subtree, Element};

/// A finite, single-pass sequence of parsed series
pub trait SeriesSource: Iterator<Item = Result<SeriesRecord, SeriesError>> {
    /// Dimension and attribute codes seen in yielded series, drained
    fn take_observed_codes(&mut self) -> CodeDict;
}

impl<S: SeriesSource + ?Sized> SeriesSource for Box<S> {
    fn take_observed_codes(&mut self) -> CodeDict {
        (**self).take_observed_codes()
    }
}

/// Streaming reader over one SDMX-ML data message
pub struct SeriesReader<R: BufRead> {
    reader: Reader<R>,
    shape: WireShape,
    layout: SeriesLayout,
    profile: ProviderProfile,
    observed: CodeDict,
    prepared: Option<DateTime<Utc>>,
    /// Series met while looking for the header
    pending: Option<Element>,
    done: bool,
}

impl<R: BufRead> SeriesReader<R> {
    pub fn new(source: R, layout: SeriesLayout, profile: ProviderProfile) -> Result<Self, SeriesError> {
        let mut reader = new_reader(source);
        let root = read_root(&mut reader)?;
        let shape = WireShape::detect(&root)
            .ok_or_else(|| XmlError::UnsupportedDocument(root.name.clone()))?;
        debug!(?shape, provider = %profile.name, dsd = %layout.dsd_id, "Reading data message");

        let mut series_reader = Self {
            reader,
            shape,
            layout,
            profile,
            observed: CodeDict::new(),
            prepared: None,
            pending: None,
            done: false,
        };
        series_reader.read_header()?;
        Ok(series_reader)
    }

    pub fn shape(&self) -> WireShape {
        self.shape
    }

    pub fn layout(&self) -> &SeriesLayout {
        &self.layout
    }

    /// `Prepared` timestamp of the message header
    pub fn prepared(&self) -> Option<DateTime<Utc>> {
        self.prepared
    }

    /// Advance past the header, which precedes every data set
    fn read_header(&mut self) -> Result<(), XmlError> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match self.reader.read_event_into(&mut buf)? {
                Event::Start(e) => {
                    let element = Element::from_start(&e)?;
                    let name = element.name.clone();
                    match name.as_str() {
                        "Header" => {
                            let header = read_subtree(&mut self.reader, element)?;
                            self.prepared = header.child("Prepared").and_then(|p| parse_timestamp(p.text()));
                        },
                        "Series" => self.pending = Some(read_subtree(&mut self.reader, element)?),
                        "DataSet" => self.check_data_set(&element)?,
                        _ => {},
                    }
                    return Ok(());
                },
                Event::Empty(e) => {
                    let element = Element::from_start(&e)?;
                    if element.name == "Series" {
                        self.pending = Some(element);
                    }
                    return Ok(());
                },
                Event::Eof => return Ok(()),
                _ => {},
            }
        }
    }

    /// Observations must be attached to the time dimension
    fn check_data_set(&self, data_set: &Element) -> Result<(), XmlError> {
        match data_set.attr("dimensionAtObservation") {
            Some(dim) if dim != self.layout.time_key && dim != "TIME_PERIOD" => Err(
                XmlError::UnsupportedDocument(format!("DataSet dimensionAtObservation={dim}")),
            ),
            _ => Ok(()),
        }
    }

    fn next_series(&mut self) -> Result<Option<Element>, XmlError> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match self.reader.read_event_into(&mut buf)? {
                Event::Start(e) => {
                    let element = Element::from_start(&e)?;
                    let name = element.name.clone();
                    match name.as_str() {
                        "Series" => return read_subtree(&mut self.reader, element).map(Some),
                        "Header" => {
                            let header = read_subtree(&mut self.reader, element)?;
                            self.prepared = header.child("Prepared").and_then(|p| parse_timestamp(p.text()));
                        },
                        "DataSet" => self.check_data_set(&element)?,
                        _ => {},
                    }
                },
                Event::Empty(e) => {
                    let element = Element::from_start(&e)?;
                    if element.name == "Series" {
                        return Ok(Some(element));
                    }
                },
                Event::Eof => return Ok(None),
                _ => {},
            }
        }
    }

    fn build(&mut self, series: &Element) -> Result<SeriesRecord, SeriesError> {
        let (dimensions, attributes) = self.keys(series);
        let key = self.series_key(&dimensions, &attributes);

        let time_format = self
            .profile
            .time_format_attribute
            .as_ref()
            .and_then(|attr| attributes.get(attr))
            .cloned();

        let frequency = self.frequency(&key, &dimensions, &attributes, time_format.as_deref())?;
        let raw = self.observations(series);

        let mut values = Vec::with_capacity(raw.len());
        for (label, value, obs_attributes) in raw {
            let label = match &time_format {
                Some(format) => {
                    normalize_special_period(&label, format)
                        .map_err(|source| SeriesError::Period {
                            key: key.clone(),
                            source,
                        })?
                        .0
                },
                None => label,
            };
            let ordinal = ordinal_from_period(&label, frequency).map_err(|source| SeriesError::Period {
                key: key.clone(),
                source,
            })?;
            let period = period_from_ordinal(ordinal, frequency).map_err(|source| SeriesError::Period {
                key: key.clone(),
                source,
            })?;
            values.push(Observation {
                period,
                ordinal,
                value: self.profile.normalize_value(&value),
                attributes: obs_attributes,
            });
        }

        if self.profile.observation_order == ObservationOrder::Descending {
            values.reverse();
        }
        values.sort_by_key(|o| o.ordinal);

        let (Some(first), Some(last)) = (values.first(), values.last()) else {
            return Err(SeriesError::RejectEmptySeries { key });
        };
        let (start_date, end_date) = (first.ordinal, last.ordinal);

        let name = self.series_name(&dimensions, &attributes);
        let record = SeriesRecord {
            notes: attributes
                .get("COMMENT")
                .or_else(|| attributes.get("COMMENT_TS"))
                .cloned(),
            key,
            name,
            frequency,
            dimensions: dimensions.into_iter().collect(),
            attributes,
            values,
            start_date,
            end_date,
            last_update_ds: self.prepared,
        };

        self.register_codes(&record);
        trace!(key = %record.key, observations = record.values.len(), "Series parsed");
        Ok(record)
    }

    /// Dimension values in layout order, and the remaining series attributes
    fn keys(&self, series: &Element) -> (Vec<(String, String)>, BTreeMap<String, String>) {
        let mut raw_dims = Vec::new();
        let mut attributes = BTreeMap::new();

        if self.shape.is_inline() {
            for (k, v) in plain_attributes(series) {
                if self.layout.is_dimension(k) || (self.layout.dimensions.is_empty() && k == "FREQ") {
                    raw_dims.push((k.to_string(), v.to_string()));
                } else {
                    attributes.insert(k.to_string(), v.to_string());
                }
            }
            if self.shape == WireShape::Compact10 {
                for (k, v) in annotations(series) {
                    attributes.entry(k).or_insert(v);
                }
            }
        } else {
            let id_attr = self.generic_id_attr();
            if let Some(key) = series.child("SeriesKey") {
                raw_dims.extend(generic_values(key, id_attr));
            }
            if let Some(attrs) = series.child("Attributes") {
                attributes.extend(generic_values(attrs, id_attr));
            }
        }

        // layout order first, then anything the structure did not declare
        let mut dimensions = Vec::with_capacity(raw_dims.len());
        for def in &self.layout.dimensions {
            if let Some(pos) = raw_dims.iter().position(|(k, _)| *k == def.id) {
                dimensions.push(raw_dims.remove(pos));
            }
        }
        dimensions.extend(raw_dims);

        (dimensions, attributes)
    }

    fn generic_id_attr(&self) -> &'static str {
        match self.shape {
            WireShape::Generic21 => "id",
            _ => "concept",
        }
    }

    fn series_key(&self, dimensions: &[(String, String)], attributes: &BTreeMap<String, String>) -> String {
        if let Some(explicit) = self
            .profile
            .key_attribute
            .as_ref()
            .and_then(|attr| attributes.get(attr))
            .filter(|v| !v.is_empty())
        {
            return explicit.clone();
        }
        dimensions
            .iter()
            .map(|(_, v)| v.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }

    fn frequency(
        &self,
        key: &str,
        dimensions: &[(String, String)],
        attributes: &BTreeMap<String, String>,
        time_format: Option<&str>,
    ) -> Result<Frequency, SeriesError> {
        let frequency_key = self.layout.frequency_key.as_deref().unwrap_or("FREQ");
        let raw = dimensions
            .iter()
            .find(|(k, _)| k == frequency_key)
            .map(|(_, v)| v.as_str())
            .or_else(|| attributes.get(frequency_key).map(String::as_str))
            .or_else(|| attributes.get("FREQ").map(String::as_str));

        let reject = |raw: &str| SeriesError::RejectFrequency {
            key: key.to_string(),
            frequency: raw.to_string(),
        };

        match raw {
            Some(raw) => self.profile.resolve_frequency(raw).ok_or_else(|| reject(raw)),
            // no frequency key at all: the duration hint is the only source
            None => match time_format {
                Some(format) => normalize_special_period("", format)
                    .map(|(_, frequency)| frequency)
                    .map_err(|source| SeriesError::Period {
                        key: key.to_string(),
                        source,
                    }),
                None => Err(reject("")),
            },
        }
    }

    /// Raw (period, value, attributes) triples in document order
    fn observations(&self, series: &Element) -> Vec<(String, String, BTreeMap<String, String>)> {
        let time_key = self.layout.time_key.as_str();
        let measure_key = self.layout.measure_key.as_str();

        series
            .children_named("Obs")
            .filter_map(|obs| {
                if self.shape.is_inline() {
                    let period = obs
                        .attr(time_key)
                        .or_else(|| obs.attr("TIME_PERIOD"))
                        .or_else(|| obs.attr("TIME"))?;
                    let value = obs.attr(measure_key).or_else(|| obs.attr("OBS_VALUE")).unwrap_or("");
                    let attributes = plain_attributes(obs)
                        .filter(|(k, _)| *k != time_key && *k != measure_key)
                        .filter(|(k, _)| *k != "TIME_PERIOD" && *k != "OBS_VALUE")
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect();
                    Some((period.to_string(), value.to_string(), attributes))
                } else {
                    let period = match self.shape {
                        WireShape::Generic21 => obs.child("ObsDimension")?.attr("value")?.to_string(),
                        _ => obs.child("Time")?.text().to_string(),
                    };
                    let value = obs
                        .child("ObsValue")
                        .and_then(|v| v.attr("value"))
                        .unwrap_or("")
                        .to_string();
                    let attributes = obs
                        .child("Attributes")
                        .map(|a| generic_values(a, self.generic_id_attr()).collect())
                        .unwrap_or_default();
                    Some((period, value, attributes))
                }
            })
            .collect()
    }

    fn series_name(&self, dimensions: &[(String, String)], attributes: &BTreeMap<String, String>) -> String {
        let labels = || {
            dimensions
                .iter()
                .map(|(k, v)| {
                    self.layout
                        .dimension(k)
                        .and_then(|d| d.codes.get(v))
                        .unwrap_or(v)
                        .to_string()
                })
                .collect::<Vec<_>>()
                .join(" - ")
        };

        match &self.profile.name_strategy {
            NameStrategy::DimensionLabels => labels(),
            NameStrategy::DimensionCodes => dimensions
                .iter()
                .map(|(_, v)| v.as_str())
                .collect::<Vec<_>>()
                .join(" - "),
            NameStrategy::Attribute(attr) => attributes
                .get(attr)
                .filter(|v| !v.trim().is_empty())
                .cloned()
                .unwrap_or_else(labels),
        }
    }

    fn register_codes(&mut self, record: &SeriesRecord) {
        for (k, v) in &record.dimensions {
            let label = self
                .layout
                .dimension(k)
                .and_then(|d| d.codes.get(v))
                .unwrap_or(v);
            self.observed.update_entry(k, Some(v.as_str()), label);
        }

        let skip = [
            self.profile.key_attribute.as_deref(),
            match &self.profile.name_strategy {
                NameStrategy::Attribute(attr) => Some(attr.as_str()),
                _ => None,
            },
        ];
        let obs_attributes = record.values.iter().flat_map(|o| o.attributes.iter());
        for (k, v) in record.attributes.iter().chain(obs_attributes) {
            if skip.contains(&Some(k.as_str())) {
                continue;
            }
            let label = self
                .layout
                .attribute(k)
                .and_then(|a| a.codes.get(v))
                .unwrap_or(v);
            self.observed.update_entry(k, Some(v.as_str()), label);
        }
    }
}

impl<R: BufRead> Iterator for SeriesReader<R> {
    type Item = Result<SeriesRecord, SeriesError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(series) = self.pending.take() {
            return Some(self.build(&series));
        }
        match self.next_series() {
            Ok(Some(series)) => Some(self.build(&series)),
            Ok(None) => {
                self.done = true;
                None
            },
            Err(e) => {
                self.done = true;
                Some(Err(e.into()))
            },
        }
    }
}

impl<R: BufRead> SeriesSource for SeriesReader<R> {
    fn take_observed_codes(&mut self) -> CodeDict {
        std::mem::take(&mut self.observed)
    }
}

/// Unqualified XML attributes (namespace declarations and `xsi:*` skipped)
fn plain_attributes(element: &Element) -> impl Iterator<Item = (&str, &str)> {
    element
        .attributes
        .iter()
        .filter(|(k, _)| k != "xmlns" && !k.contains(':'))
        .map(|(k, v)| (k.as_str(), v.as_str()))
}

/// `<Value concept|id="K" value="V"/>` pairs of a generic key or attribute block
fn generic_values<'a>(
    parent: &'a Element,
    id_attr: &'a str,
) -> impl Iterator<Item = (String, String)> + 'a {
    parent.children_named("Value").filter_map(move |v| {
        let key = v.attr(id_attr).or_else(|| v.attr("concept")).or_else(|| v.attr("id"))?;
        Some((key.to_string(), v.attr("value").unwrap_or_default().to_string()))
    })
}

/// Series annotations of 1.0 compact messages as `TYPE_NAME -> text`
fn annotations(series: &Element) -> Vec<(String, String)> {
    let Some(block) = series.child("Annotations") else {
        return Vec::new();
    };
    block
        .children_named("Annotation")
        .filter_map(|a| {
            let kind = a.child("AnnotationType")?.text();
            let text = a.localized("AnnotationText")?;
            let key = kind
                .split_whitespace()
                .map(str::to_ascii_uppercase)
                .collect::<Vec<_>>()
                .join("_");
            Some((key, text))
        })
        .collect()
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
                .map(|dt| dt.and_utc())
                .ok()
        })
}

/// Several sources read back to back, e.g. one per fetched shard
#[derive(Default)]
pub struct ChainedSource {
    sources: VecDeque<Box<dyn SeriesSource + Send>>,
    observed: CodeDict,
}

impl ChainedSource {
    pub fn new(sources: Vec<Box<dyn SeriesSource + Send>>) -> Self {
        Self {
            sources: sources.into(),
            observed: CodeDict::new(),
        }
    }

    pub fn push(&mut self, source: Box<dyn SeriesSource + Send>) {
        self.sources.push_back(source);
    }
}

impl Iterator for ChainedSource {
    type Item = Result<SeriesRecord, SeriesError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let current = self.sources.front_mut()?;
            match current.next() {
                Some(item) => return Some(item),
                None => {
                    let mut finished = self.sources.pop_front()?;
                    self.observed.merge(&finished.take_observed_codes());
                },
            }
        }
    }
}

impl SeriesSource for ChainedSource {
    fn take_observed_codes(&mut self) -> CodeDict {
        for source in self.sources.iter_mut() {
            self.observed.merge(&source.take_observed_codes());
        }
        std::mem::take(&mut self.observed)
    }
}

/// Records produced by a provider adapter without a data message
pub struct RecordSource {
    records: std::vec::IntoIter<Result<SeriesRecord, SeriesError>>,
    observed: CodeDict,
}

impl RecordSource {
    pub fn new(records: Vec<Result<SeriesRecord, SeriesError>>) -> Self {
        Self {
            records: records.into_iter(),
            observed: CodeDict::new(),
        }
    }
}

impl Iterator for RecordSource {
    type Item = Result<SeriesRecord, SeriesError>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.records.next()?;
        if let Ok(record) = &item {
            for (k, v) in record.dimensions.iter().chain(&record.attributes) {
                self.observed.update_entry(k, Some(v.as_str()), v);
            }
        }
        Some(item)
    }
}

impl SeriesSource for RecordSource {
    fn take_observed_codes(&mut self) -> CodeDict {
        std::mem::take(&mut self.observed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::codes::CodeMap;
    use crate::sdmx::structure::KeyDef;

    fn layout() -> SeriesLayout {
        let mut layout = SeriesLayout::inferred(&["FREQ", "REF_AREA"], &["TITLE", "OBS_STATUS"]);
        layout.dimensions[1].codes = CodeMap::from_iter([("FR", "France"), ("DE", "Germany")]);
        layout
    }

    fn read(xml: &str, profile: ProviderProfile) -> (Vec<Result<SeriesRecord, SeriesError>>, CodeDict) {
        let mut reader = SeriesReader::new(xml.as_bytes(), layout(), profile).unwrap();
        let items: Vec<_> = reader.by_ref().collect();
        let codes = reader.take_observed_codes();
        (items, codes)
    }

    const SPECIFIC: &str = r#"<message:StructureSpecificData
        xmlns:message="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/message"
        xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
      <message:Header><message:Prepared>2024-03-01T10:00:00</message:Prepared></message:Header>
      <message:DataSet>
        <Series FREQ="Q" REF_AREA="FR" TITLE="French GDP" xsi:type="ns1:SeriesType">
          <Obs TIME_PERIOD="2001-Q2" OBS_VALUE="2.5" OBS_STATUS="A"/>
          <Obs TIME_PERIOD="2001-Q1" OBS_VALUE="-"/>
        </Series>
        <Series FREQ="X" REF_AREA="DE"><Obs TIME_PERIOD="2001" OBS_VALUE="1"/></Series>
        <Series FREQ="A" REF_AREA="DE"/>
      </message:DataSet>
    </message:StructureSpecificData>"#;

    #[test]
    fn test_specific_series_and_rejects() {
        let (items, codes) = read(SPECIFIC, ProviderProfile::ecb());
        assert_eq!(items.len(), 3);

        let first = items[0].as_ref().unwrap();
        assert_eq!(first.key, "Q.FR");
        assert_eq!(first.name, "French GDP");
        assert_eq!(first.frequency, Frequency::Quarterly);
        assert_eq!(first.values[0].period, "2001Q1");
        assert_eq!(first.values[0].value, "NaN");
        assert_eq!(first.values[1].attributes["OBS_STATUS"], "A");
        assert_eq!(first.start_date, ordinal_from_period("2001Q1", Frequency::Quarterly).unwrap());
        assert!(first.last_update_ds.is_some());
        assert!(!first.attributes.contains_key("xsi:type"));

        assert!(matches!(items[1], Err(SeriesError::RejectFrequency { ref key, .. }) if key == "X.DE"));
        assert!(matches!(items[2], Err(SeriesError::RejectEmptySeries { ref key }) if key == "A.DE"));

        // only the accepted series contributes codes
        assert_eq!(codes.get("REF_AREA").unwrap().get("FR"), Some("France"));
        assert!(codes.get("REF_AREA").unwrap().get("DE").is_none());
        assert!(codes.get("TITLE").is_none());
    }

    #[test]
    fn test_descending_provider_is_reversed() {
        let xml = r#"<m:StructureSpecificData xmlns:m="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/message">
          <Series FREQ="T" REF_AREA="FR" IDBANK="001565530">
            <Obs TIME_PERIOD="2001-Q3" OBS_VALUE="3"/><Obs TIME_PERIOD="2001-Q2" OBS_VALUE="2"/><Obs TIME_PERIOD="2001-Q1" OBS_VALUE="1"/>
          </Series></m:StructureSpecificData>"#;
        let (items, _) = read(xml, ProviderProfile::insee());
        let series = items[0].as_ref().unwrap();
        assert_eq!(series.key, "001565530");
        let values: Vec<_> = series.values.iter().map(|o| o.value.as_str()).collect();
        assert_eq!(values, vec!["1", "2", "3"]);
        assert_eq!(series.name, "T - France");
    }

    #[test]
    fn test_fatal_error_ends_iteration() {
        let xml = r#"<m:StructureSpecificData xmlns:m="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/message">
          <Series FREQ="A" REF_AREA="FR"><Obs TIME_PERIOD="2001" OBS_VALUE="1"/></Series>
          <Series FREQ="A" REF_AREA="DE"><Obs"#;
        let (items, _) = read(xml, ProviderProfile::generic("T"));
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].as_ref().unwrap_err().is_fatal());
    }

    #[test]
    fn test_unsupported_document() {
        let xml = r#"<CrossSectionalData xmlns="http://www.SDMX.org/resources/SDMXML/schemas/v2_0/message"/>"#;
        let err = SeriesReader::new(xml.as_bytes(), layout(), ProviderProfile::generic("T"))
            .err()
            .unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_cross_sectional_data_set_is_refused() {
        let xml = r#"<m:StructureSpecificData xmlns:m="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/message">
          <m:Header><m:ID>X</m:ID></m:Header>
          <m:DataSet dimensionAtObservation="REF_AREA">
            <Series FREQ="A" TIME_PERIOD="2001"><Obs REF_AREA="FR" OBS_VALUE="1"/></Series>
          </m:DataSet></m:StructureSpecificData>"#;
        let (items, _) = read(xml, ProviderProfile::generic("T"));
        assert_eq!(items.len(), 1);
        assert!(items[0].as_ref().unwrap_err().is_fatal());
    }

    #[test]
    fn test_chained_source_merges_codes() {
        let xml_fr = r#"<m:StructureSpecificData xmlns:m="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/message">
          <Series FREQ="A" REF_AREA="FR"><Obs TIME_PERIOD="2001" OBS_VALUE="1"/></Series></m:StructureSpecificData>"#;
        let xml_de = xml_fr.replace("\"FR\"", "\"DE\"");
        let profile = ProviderProfile::generic("T");
        let sources: Vec<Box<dyn SeriesSource + Send>> = vec![
            Box::new(SeriesReader::new(std::io::Cursor::new(xml_fr.as_bytes().to_vec()), layout(), profile.clone()).unwrap()),
            Box::new(SeriesReader::new(std::io::Cursor::new(xml_de.into_bytes()), layout(), profile).unwrap()),
        ];
        let mut chained = ChainedSource::new(sources);
        let keys: Vec<_> = chained.by_ref().map(|r| r.unwrap().key).collect();
        assert_eq!(keys, vec!["A.FR", "A.DE"]);
        let areas = chained.take_observed_codes();
        assert_eq!(areas.get("REF_AREA").unwrap().codes().collect::<Vec<_>>(), vec!["FR", "DE"]);
    }

    #[test]
    fn test_key_def_labels_used_for_names() {
        let mut layout = layout();
        layout.dimensions.push(KeyDef {
            id: "UNIT".to_string(),
            name: "Unit".to_string(),
            codes: CodeMap::new(),
        });
        let xml = r#"<m:StructureSpecificData xmlns:m="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/message">
          <Series UNIT="EUR" REF_AREA="DE" FREQ="M"><Obs TIME_PERIOD="2001-02" OBS_VALUE="1"/></Series></m:StructureSpecificData>"#;
        let mut reader = SeriesReader::new(xml.as_bytes(), layout, ProviderProfile::generic("T")).unwrap();
        let series = reader.next().unwrap().unwrap();
        assert_eq!(series.key, "M.DE.EUR");
        assert_eq!(series.name, "M - Germany - EUR");
        assert_eq!(series.values[0].period, "2001-02");
    }
}
