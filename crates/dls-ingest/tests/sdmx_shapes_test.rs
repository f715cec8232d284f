//! Structure and data messages across schema generations and wire shapes

#![allow(clippy::unwrap_used)]

mod common;

use chrono::{TimeZone, Utc};
use common::*;
use dls_ingest::error::SeriesError;
use dls_ingest::period::Frequency;
use dls_ingest::provider::ProviderProfile;
use dls_ingest::sdmx::{SchemaGeneration, SeriesReader, SeriesSource, WireShape};
use dls_ingest::xml::{document_from_bytes, open_document};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;

// ============================================================================
// Structure messages
// ============================================================================

#[test]
fn test_v21_structure_layout() {
    init_tracing();
    let def = structure(STRUCTURE_V21);
    assert_eq!(def.generation, SchemaGeneration::V2_1);
    assert_eq!(def.dataflows["EXR"].dsd_id, "DSD_EXR");
    assert_eq!(def.dataflows["EXR"].name, "Exchange rates");

    let layout = def.layout("EXR").expect("layout through the dataflow");
    assert_eq!(layout.dsd_id, "DSD_EXR");
    assert_eq!(layout.dimension_keys(), ["FREQ", "REF_AREA"]);
    assert_eq!(layout.attribute_keys(), ["TITLE", "OBS_STATUS"]);
    assert_eq!(layout.frequency_key.as_deref(), Some("FREQ"));
    assert_eq!(layout.time_key, "TIME_PERIOD");
    assert_eq!(layout.measure_key, "OBS_VALUE");

    let area = layout.dimension("REF_AREA").unwrap();
    assert_eq!(area.name, "Reference area");
    // english label preferred over document order
    assert_eq!(area.codes.get("FR"), Some("France"));
    assert_eq!(layout.concepts()["OBS_STATUS"], "Observation status");

    // DSD ids resolve directly as well
    assert_eq!(def.layout("DSD_EXR").unwrap().dimension_keys(), layout.dimension_keys());
}

#[test]
fn test_v21_categories_and_categorisations() {
    let def = structure(STRUCTURE_V21);
    let markets = def.categories.get("MARKETS").unwrap();
    assert_eq!(markets.parent, None);
    assert_eq!(markets.name, "Markets");

    let rates = def.categories.get("RATES").unwrap();
    assert_eq!(rates.parent.as_deref(), Some("MARKETS"));
    assert_eq!(rates.datasets, ["EXR"]);

    let ancestors: Vec<_> = def
        .categories
        .ancestors("RATES")
        .unwrap()
        .iter()
        .map(|n| n.code.clone())
        .collect();
    assert_eq!(ancestors, ["MARKETS"]);
}

#[test]
fn test_v20_structure_key_family() {
    let def = structure(STRUCTURE_V20);
    assert_eq!(def.generation, SchemaGeneration::V2_0);
    assert_eq!(def.dataflows["EXR"].dsd_id, "ECB_EXR1");

    let layout = def.layout("EXR").unwrap();
    assert_eq!(layout.dimension_keys(), ["FREQ", "REF_AREA"]);
    assert_eq!(layout.attribute_keys(), ["TITLE"]);
    assert_eq!(layout.frequency_key.as_deref(), Some("FREQ"));
    assert_eq!(layout.dimension("FREQ").unwrap().codes.get("M"), Some("Monthly"));

    // 2.0 links dataflows from inside the category
    assert_eq!(def.categories.get("RATES").unwrap().datasets, ["EXR"]);
}

#[test]
fn test_v10_structure_synthesises_dataflow() {
    let def = structure(STRUCTURE_V10);
    assert_eq!(def.generation, SchemaGeneration::V1_0);
    assert_eq!(def.dataflows.len(), 1);
    assert_eq!(def.dataflows["H15"].name, "Selected Interest Rates");

    let layout = def.layout("H15").unwrap();
    assert_eq!(layout.dimension_keys(), ["FREQ", "CURRENCY"]);
    assert_eq!(layout.attribute_keys(), ["UNIT", "SERIES_NAME"]);
    assert_eq!(layout.dimension("FREQ").unwrap().codes.get("129"), Some("Monthly"));
    assert!(def.missing_codelists().is_empty());
}

// ============================================================================
// Data messages
// ============================================================================

#[test]
fn test_structure_specific_21() {
    init_tracing();
    let mut reader = reader(DATA_SPECIFIC21, exr_layout(), ProviderProfile::ecb());
    assert_eq!(reader.shape(), WireShape::Specific21);
    assert_eq!(
        reader.prepared(),
        Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap())
    );

    let records: Vec<_> = reader.by_ref().map(|r| r.expect("series parses")).collect();
    assert_eq!(records.len(), 2);

    let fr = &records[0];
    assert_eq!(fr.key, "M.FR");
    assert_eq!(fr.name, "Euro rate, France");
    assert_eq!(fr.frequency, Frequency::Monthly);
    assert_eq!(fr.values.len(), 2);
    assert_eq!(fr.values[0].period, "2001-01");
    assert_eq!(fr.values[1].value, "1.6");
    assert_eq!(fr.values[0].attributes["OBS_STATUS"], "A");
    assert_eq!(fr.dimensions["REF_AREA"], "FR");
    assert_eq!(fr.attributes["TITLE"], "Euro rate, France");
    assert_eq!(fr.last_update_ds, reader.prepared());

    // no title: names fall back to dimension labels
    assert_eq!(records[1].key, "A.DE");
    assert_eq!(records[1].name, "Annual - Germany");

    let codes = reader.take_observed_codes();
    let areas: Vec<_> = codes.get("REF_AREA").unwrap().codes().collect();
    assert_eq!(areas, ["FR", "DE"]);
    assert_eq!(codes.get("OBS_STATUS").unwrap().get("A"), Some("A"));
}

#[test]
fn test_generic_21() {
    let mut reader = reader(DATA_GENERIC21, exr_layout(), ProviderProfile::generic("TEST"));
    assert_eq!(reader.shape(), WireShape::Generic21);

    let series = reader.next().unwrap().unwrap();
    // key follows the layout order, not the document order
    assert_eq!(series.key, "Q.DE");
    assert_eq!(series.name, "Quarterly - Germany");
    assert_eq!(series.frequency, Frequency::Quarterly);
    assert_eq!(series.attributes["TITLE"], "Germany quarterly");

    let periods: Vec<_> = series.values.iter().map(|o| o.period.as_str()).collect();
    assert_eq!(periods, ["2001Q1", "2001Q2"]);
    assert_eq!(series.values[0].attributes["OBS_STATUS"], "E");
    assert!(series.values[1].attributes.is_empty());
    assert!(reader.next().is_none());
}

#[test]
fn test_generic_20() {
    let layout = structure(STRUCTURE_V20).layout("EXR").unwrap();
    let mut reader = reader(DATA_GENERIC20, layout, ProviderProfile::generic("ECB"));
    assert_eq!(reader.shape(), WireShape::Generic20);

    let series = reader.next().unwrap().unwrap();
    assert_eq!(series.key, "M.FR");
    assert_eq!(series.attributes["TITLE"], "France monthly");

    // observations come back in period order
    let values: Vec<_> = series.values.iter().map(|o| (o.period.as_str(), o.value.as_str())).collect();
    assert_eq!(values, [("2001-01", "2"), ("2001-02", "3")]);
    assert_eq!(series.start_date, series.values[0].ordinal);
    assert_eq!(series.end_date, series.values[1].ordinal);
}

#[test]
fn test_compact_20_rejects_unknown_frequency() {
    let layout = structure(STRUCTURE_V20).layout("EXR").unwrap();
    let mut reader = reader(DATA_COMPACT20, layout, ProviderProfile::generic("ECB"));
    assert_eq!(reader.shape(), WireShape::Compact20);

    let items: Vec<_> = reader.by_ref().collect();
    assert_eq!(items.len(), 2);

    let annual = items[0].as_ref().unwrap();
    assert_eq!(annual.key, "A.DE");
    let values: Vec<_> = annual.values.iter().map(|o| o.value.as_str()).collect();
    assert_eq!(values, ["1", "NaN"]);

    match &items[1] {
        Err(SeriesError::RejectFrequency { key, frequency }) => {
            assert_eq!(key, "H.FR");
            assert_eq!(frequency, "H");
        },
        other => panic!("expected a frequency reject, got {other:?}"),
    }
    assert!(!items[1].as_ref().unwrap_err().is_fatal());

    // rejected series leave no codes behind
    let codes = reader.take_observed_codes();
    let areas: Vec<_> = codes.get("REF_AREA").unwrap().codes().collect();
    assert_eq!(areas, ["DE"]);
}

#[test]
fn test_compact_10_fed() {
    let layout = structure(STRUCTURE_V10).layout("H15").unwrap();
    let mut reader = reader(DATA_COMPACT10, layout, ProviderProfile::fed());
    assert_eq!(reader.shape(), WireShape::Compact10);

    let series = reader.next().unwrap().unwrap();
    assert_eq!(series.key, "RIFSPFF_N.M");
    assert_eq!(series.frequency, Frequency::Monthly);
    assert_eq!(series.name, "Federal funds effective rate");
    assert_eq!(series.attributes["UNIT"], "Percent");
    assert_eq!(series.attributes["SHORT_DESCRIPTION"], "Federal funds effective rate");
    assert_eq!(series.dimensions["FREQ"], "129");

    let values: Vec<_> = series.values.iter().map(|o| o.value.as_str()).collect();
    assert_eq!(values, ["5.98", "NaN"]);
    assert_eq!(series.values[1].attributes["OBS_STATUS"], "ND");

    // the series identifier and name attributes are not codelists
    let codes = reader.take_observed_codes();
    assert!(codes.get("SERIES_NAME").is_none());
    assert!(codes.get("SHORT_DESCRIPTION").is_none());
    assert_eq!(codes.get("FREQ").unwrap().get("129"), Some("Monthly"));
}

#[test]
fn test_gzip_document() {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(DATA_SPECIFIC21.as_bytes()).unwrap();
    let compressed = encoder.finish().unwrap();

    let document = document_from_bytes(compressed.clone()).unwrap();
    let reader = SeriesReader::new(document, exr_layout(), ProviderProfile::ecb()).unwrap();
    assert_eq!(reader.count(), 2);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("EXR.xml.gz");
    std::fs::write(&path, compressed).unwrap();
    let reader = SeriesReader::new(open_document(&path).unwrap(), exr_layout(), ProviderProfile::ecb()).unwrap();
    let keys: Vec<_> = reader.map(|r| r.unwrap().key).collect();
    assert_eq!(keys, ["M.FR", "A.DE"]);
}

#[test]
fn test_structure_message_is_not_data() {
    let err = SeriesReader::new(STRUCTURE_V21.as_bytes(), exr_layout(), ProviderProfile::ecb())
        .err()
        .expect("structure message refused");
    assert!(err.is_fatal());
}
