//! Shared fixtures for dls-ingest integration tests
//!
//! Structure messages for the three schema generations, data messages for
//! the five wire shapes, and helpers to build small data messages inline.

#![allow(dead_code)]

use dls_ingest::provider::ProviderProfile;
use dls_ingest::sdmx::{parse_structure, SeriesLayout, SeriesReader, StructureDefinition};

/// Install a test-writer subscriber once; later calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dls_ingest=debug")
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Structure messages
// ============================================================================

pub const STRUCTURE_V21: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<mes:Structure xmlns:mes="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/message"
               xmlns:str="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/structure"
               xmlns:com="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/common">
  <mes:Header><mes:ID>STRUCT</mes:ID><mes:Prepared>2024-01-01T00:00:00</mes:Prepared></mes:Header>
  <mes:Structures>
    <str:Categorisations>
      <str:Categorisation id="CAT_EXR" agencyID="TEST" version="1.0">
        <com:Name xml:lang="en">Exchange rates in markets</com:Name>
        <str:Source><Ref id="EXR" agencyID="TEST" version="1.0" class="Dataflow"/></str:Source>
        <str:Target><Ref id="RATES" maintainableParentID="TOPICS" class="Category"/></str:Target>
      </str:Categorisation>
    </str:Categorisations>
    <str:CategorySchemes>
      <str:CategoryScheme id="TOPICS" agencyID="TEST" version="1.0">
        <com:Name xml:lang="en">Topics</com:Name>
        <str:Category id="MARKETS">
          <com:Name xml:lang="en">Markets</com:Name>
          <str:Category id="RATES"><com:Name xml:lang="en">Exchange rates</com:Name></str:Category>
        </str:Category>
      </str:CategoryScheme>
    </str:CategorySchemes>
    <str:Codelists>
      <str:Codelist id="CL_FREQ" agencyID="TEST" version="1.0">
        <com:Name xml:lang="en">Frequency</com:Name>
        <str:Code id="A"><com:Name xml:lang="en">Annual</com:Name></str:Code>
        <str:Code id="Q"><com:Name xml:lang="en">Quarterly</com:Name></str:Code>
        <str:Code id="M"><com:Name xml:lang="en">Monthly</com:Name></str:Code>
      </str:Codelist>
      <str:Codelist id="CL_AREA" agencyID="TEST" version="1.0">
        <com:Name xml:lang="en">Area</com:Name>
        <str:Code id="FR"><com:Name xml:lang="fr">La France</com:Name><com:Name xml:lang="en">France</com:Name></str:Code>
        <str:Code id="DE"><com:Name xml:lang="en">Germany</com:Name></str:Code>
      </str:Codelist>
    </str:Codelists>
    <str:Concepts>
      <str:ConceptScheme id="CS" agencyID="TEST" version="1.0">
        <com:Name xml:lang="en">Concepts</com:Name>
        <str:Concept id="FREQ"><com:Name xml:lang="en">Frequency</com:Name></str:Concept>
        <str:Concept id="REF_AREA"><com:Name xml:lang="en">Reference area</com:Name></str:Concept>
        <str:Concept id="TITLE"><com:Name xml:lang="en">Title</com:Name></str:Concept>
        <str:Concept id="OBS_STATUS"><com:Name xml:lang="en">Observation status</com:Name></str:Concept>
        <str:Concept id="TIME_PERIOD"><com:Name xml:lang="en">Time</com:Name></str:Concept>
        <str:Concept id="OBS_VALUE"><com:Name xml:lang="en">Value</com:Name></str:Concept>
      </str:ConceptScheme>
    </str:Concepts>
    <str:DataStructures>
      <str:DataStructure id="DSD_EXR" agencyID="TEST" version="1.0">
        <com:Name xml:lang="en">Exchange rates</com:Name>
        <str:DataStructureComponents>
          <str:DimensionList id="DimensionDescriptor">
            <str:Dimension id="FREQ" position="1">
              <str:ConceptIdentity><Ref id="FREQ" maintainableParentID="CS" class="Concept"/></str:ConceptIdentity>
              <str:LocalRepresentation><str:Enumeration><Ref id="CL_FREQ" agencyID="TEST" version="1.0" class="Codelist"/></str:Enumeration></str:LocalRepresentation>
            </str:Dimension>
            <str:Dimension id="REF_AREA" position="2">
              <str:ConceptIdentity><Ref id="REF_AREA" maintainableParentID="CS" class="Concept"/></str:ConceptIdentity>
              <str:LocalRepresentation><str:Enumeration><Ref id="CL_AREA" agencyID="TEST" version="1.0" class="Codelist"/></str:Enumeration></str:LocalRepresentation>
            </str:Dimension>
            <str:TimeDimension id="TIME_PERIOD" position="3">
              <str:ConceptIdentity><Ref id="TIME_PERIOD" maintainableParentID="CS" class="Concept"/></str:ConceptIdentity>
            </str:TimeDimension>
          </str:DimensionList>
          <str:AttributeList id="AttributeDescriptor">
            <str:Attribute id="TITLE" assignmentStatus="Conditional">
              <str:ConceptIdentity><Ref id="TITLE" maintainableParentID="CS" class="Concept"/></str:ConceptIdentity>
            </str:Attribute>
            <str:Attribute id="OBS_STATUS" assignmentStatus="Mandatory">
              <str:ConceptIdentity><Ref id="OBS_STATUS" maintainableParentID="CS" class="Concept"/></str:ConceptIdentity>
            </str:Attribute>
          </str:AttributeList>
          <str:MeasureList id="MeasureDescriptor">
            <str:PrimaryMeasure id="OBS_VALUE">
              <str:ConceptIdentity><Ref id="OBS_VALUE" maintainableParentID="CS" class="Concept"/></str:ConceptIdentity>
            </str:PrimaryMeasure>
          </str:MeasureList>
        </str:DataStructureComponents>
      </str:DataStructure>
    </str:DataStructures>
    <str:Dataflows>
      <str:Dataflow id="EXR" agencyID="TEST" version="1.0">
        <com:Name xml:lang="en">Exchange rates</com:Name>
        <str:Structure><Ref id="DSD_EXR" agencyID="TEST" version="1.0" class="DataStructure"/></str:Structure>
      </str:Dataflow>
    </str:Dataflows>
  </mes:Structures>
</mes:Structure>"#;

pub const STRUCTURE_V20: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Structure xmlns="http://www.SDMX.org/resources/SDMXML/schemas/v2_0/message"
           xmlns:structure="http://www.SDMX.org/resources/SDMXML/schemas/v2_0/structure">
  <Header><ID>STRUCT</ID><Prepared>2024-01-01T00:00:00</Prepared></Header>
  <Dataflows>
    <structure:Dataflow id="EXR" agencyID="ECB">
      <structure:Name xml:lang="en">Exchange rates</structure:Name>
      <structure:KeyFamilyRef><structure:KeyFamilyID>ECB_EXR1</structure:KeyFamilyID></structure:KeyFamilyRef>
    </structure:Dataflow>
  </Dataflows>
  <CategorySchemes>
    <structure:CategoryScheme id="SDW" agencyID="ECB">
      <structure:Category id="MARKETS">
        <structure:Name xml:lang="en">Markets</structure:Name>
        <structure:Category id="RATES">
          <structure:Name xml:lang="en">Exchange rates</structure:Name>
          <structure:DataflowRef><structure:DataflowID>EXR</structure:DataflowID></structure:DataflowRef>
        </structure:Category>
      </structure:Category>
    </structure:CategoryScheme>
  </CategorySchemes>
  <CodeLists>
    <structure:CodeList id="CL_FREQ" agencyID="ECB">
      <structure:Name>Frequency</structure:Name>
      <structure:Code value="A"><structure:Description xml:lang="en">Annual</structure:Description></structure:Code>
      <structure:Code value="M"><structure:Description xml:lang="en">Monthly</structure:Description></structure:Code>
    </structure:CodeList>
    <structure:CodeList id="CL_AREA" agencyID="ECB">
      <structure:Code value="FR"><structure:Description xml:lang="en">France</structure:Description></structure:Code>
      <structure:Code value="DE"><structure:Description xml:lang="en">Germany</structure:Description></structure:Code>
    </structure:CodeList>
  </CodeLists>
  <Concepts>
    <structure:Concept id="FREQ"><structure:Name xml:lang="en">Frequency</structure:Name></structure:Concept>
    <structure:Concept id="REF_AREA"><structure:Name xml:lang="en">Reference area</structure:Name></structure:Concept>
    <structure:Concept id="TITLE"><structure:Name xml:lang="en">Title</structure:Name></structure:Concept>
  </Concepts>
  <KeyFamilies>
    <structure:KeyFamily id="ECB_EXR1" agencyID="ECB">
      <structure:Name xml:lang="en">Exchange rates</structure:Name>
      <structure:Components>
        <structure:Dimension conceptRef="FREQ" codelist="CL_FREQ" isFrequencyDimension="true"/>
        <structure:Dimension conceptRef="REF_AREA" codelist="CL_AREA"/>
        <structure:TimeDimension conceptRef="TIME_PERIOD"/>
        <structure:PrimaryMeasure conceptRef="OBS_VALUE"/>
        <structure:Attribute conceptRef="TITLE" attachmentLevel="Series"/>
      </structure:Components>
    </structure:KeyFamily>
  </KeyFamilies>
</Structure>"#;

pub const STRUCTURE_V10: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Structure xmlns="http://www.SDMX.org/resources/SDMXML/schemas/v1_0/message"
           xmlns:structure="http://www.SDMX.org/resources/SDMXML/schemas/v1_0/structure">
  <Header><ID>H15</ID><Prepared>2024-01-01T00:00:00</Prepared></Header>
  <CodeLists>
    <structure:CodeList id="CL_FREQ" agency="FRB">
      <structure:Name>Frequency</structure:Name>
      <structure:Code value="129"><structure:Description>Monthly</structure:Description></structure:Code>
      <structure:Code value="203"><structure:Description>Annual</structure:Description></structure:Code>
    </structure:CodeList>
    <structure:CodeList id="CL_CURRENCY" agency="FRB">
      <structure:Code value="NA"><structure:Description>Not Applicable</structure:Description></structure:Code>
      <structure:Code value="USD"><structure:Description>U.S. Dollar</structure:Description></structure:Code>
    </structure:CodeList>
  </CodeLists>
  <Concepts>
    <structure:Concept id="FREQ"><structure:Name>Frequency</structure:Name></structure:Concept>
    <structure:Concept id="CURRENCY"><structure:Name>Currency</structure:Name></structure:Concept>
    <structure:Concept id="UNIT"><structure:Name>Unit</structure:Name></structure:Concept>
    <structure:Concept id="SERIES_NAME"><structure:Name>Series name</structure:Name></structure:Concept>
  </Concepts>
  <KeyFamilies>
    <structure:KeyFamily id="H15" agency="FRB">
      <structure:Name>Selected Interest Rates</structure:Name>
      <structure:Components>
        <structure:Dimension concept="FREQ" codelist="CL_FREQ"/>
        <structure:Dimension concept="CURRENCY" codelist="CL_CURRENCY"/>
        <structure:TimeDimension concept="TIME_PERIOD"/>
        <structure:PrimaryMeasure concept="OBS_VALUE"/>
        <structure:Attribute concept="UNIT" attachmentLevel="Series"/>
        <structure:Attribute concept="SERIES_NAME" attachmentLevel="Series"/>
      </structure:Components>
    </structure:KeyFamily>
  </KeyFamilies>
</Structure>"#;

// ============================================================================
// Data messages, one per wire shape
// ============================================================================

pub const DATA_SPECIFIC21: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<message:StructureSpecificData xmlns:message="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/message"
                               xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <message:Header><message:ID>EXR</message:ID><message:Prepared>2024-03-01T10:00:00</message:Prepared></message:Header>
  <message:DataSet structureRef="DSD_EXR" dimensionAtObservation="TIME_PERIOD">
    <Series FREQ="M" REF_AREA="FR" TITLE="Euro rate, France" xsi:type="ns1:SeriesType">
      <Obs TIME_PERIOD="2001-01" OBS_VALUE="1.5" OBS_STATUS="A"/>
      <Obs TIME_PERIOD="2001-02" OBS_VALUE="1.6" OBS_STATUS="A"/>
    </Series>
    <Series FREQ="A" REF_AREA="DE">
      <Obs TIME_PERIOD="2000" OBS_VALUE="2"/>
    </Series>
  </message:DataSet>
</message:StructureSpecificData>"#;

pub const DATA_GENERIC21: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<message:GenericData xmlns:message="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/message"
                     xmlns:generic="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/data/generic">
  <message:Header><message:ID>EXR</message:ID><message:Prepared>2024-03-01T10:00:00</message:Prepared></message:Header>
  <message:DataSet>
    <generic:Series>
      <generic:SeriesKey>
        <generic:Value id="REF_AREA" value="DE"/>
        <generic:Value id="FREQ" value="Q"/>
      </generic:SeriesKey>
      <generic:Attributes><generic:Value id="TITLE" value="Germany quarterly"/></generic:Attributes>
      <generic:Obs>
        <generic:ObsDimension value="2001-Q1"/>
        <generic:ObsValue value="1.5"/>
        <generic:Attributes><generic:Value id="OBS_STATUS" value="E"/></generic:Attributes>
      </generic:Obs>
      <generic:Obs><generic:ObsDimension value="2001-Q2"/><generic:ObsValue value="1.6"/></generic:Obs>
    </generic:Series>
  </message:DataSet>
</message:GenericData>"#;

pub const DATA_GENERIC20: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<GenericData xmlns="http://www.SDMX.org/resources/SDMXML/schemas/v2_0/message"
             xmlns:generic="http://www.SDMX.org/resources/SDMXML/schemas/v2_0/generic">
  <Header><ID>EXR</ID><Prepared>2024-03-01T10:00:00</Prepared></Header>
  <generic:DataSet>
    <generic:KeyFamilyRef>ECB_EXR1</generic:KeyFamilyRef>
    <generic:Series>
      <generic:SeriesKey>
        <generic:Value concept="FREQ" value="M"/>
        <generic:Value concept="REF_AREA" value="FR"/>
      </generic:SeriesKey>
      <generic:Attributes><generic:Value concept="TITLE" value="France monthly"/></generic:Attributes>
      <generic:Obs><generic:Time>2001-02</generic:Time><generic:ObsValue value="3"/></generic:Obs>
      <generic:Obs><generic:Time>2001-01</generic:Time><generic:ObsValue value="2"/></generic:Obs>
    </generic:Series>
  </generic:DataSet>
</GenericData>"#;

pub const DATA_COMPACT20: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<CompactData xmlns="http://www.SDMX.org/resources/SDMXML/schemas/v2_0/message"
             xmlns:exr="urn:sdmx:org.sdmx.infomodel.datastructure.DataStructure=ECB:ECB_EXR1(1.0):compact">
  <Header><ID>EXR</ID><Prepared>2024-03-01T10:00:00</Prepared></Header>
  <exr:DataSet>
    <exr:Series FREQ="A" REF_AREA="DE" TITLE="Germany annual">
      <exr:Obs TIME_PERIOD="1999" OBS_VALUE="1"/>
      <exr:Obs TIME_PERIOD="2000" OBS_VALUE="NaN"/>
    </exr:Series>
    <exr:Series FREQ="H" REF_AREA="FR">
      <exr:Obs TIME_PERIOD="2000-H1" OBS_VALUE="1"/>
    </exr:Series>
  </exr:DataSet>
</CompactData>"#;

pub const DATA_COMPACT10: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<CompactData xmlns="http://www.SDMX.org/resources/SDMXML/schemas/v1_0/message"
             xmlns:common="http://www.SDMX.org/resources/SDMXML/schemas/v1_0/common"
             xmlns:kf="http://www.federalreserve.gov/structure/compact/H15_H15">
  <Header><ID>H15</ID><Prepared>2024-03-01T10:00:00</Prepared></Header>
  <kf:DataSet>
    <kf:Series FREQ="129" CURRENCY="NA" UNIT="Percent" SERIES_NAME="RIFSPFF_N.M">
      <common:Annotations>
        <common:Annotation>
          <common:AnnotationType>Short Description</common:AnnotationType>
          <common:AnnotationText>Federal funds effective rate</common:AnnotationText>
        </common:Annotation>
      </common:Annotations>
      <kf:Obs TIME_PERIOD="2001-01" OBS_VALUE="5.98" OBS_STATUS="A"/>
      <kf:Obs TIME_PERIOD="2001-02" OBS_VALUE="ND" OBS_STATUS="ND"/>
    </kf:Series>
  </kf:DataSet>
</CompactData>"#;

// ============================================================================
// Helpers
// ============================================================================

pub fn structure(xml: &str) -> StructureDefinition {
    parse_structure(xml.as_bytes()).expect("structure fixture parses")
}

pub fn exr_layout() -> SeriesLayout {
    structure(STRUCTURE_V21).layout("EXR").expect("EXR layout")
}

/// Structure-specific message with one series per `(freq, area, observations)`
pub fn specific_message(series: &[(&str, &str, Vec<(&str, &str)>)]) -> String {
    let mut body = String::new();
    for (freq, area, observations) in series {
        body.push_str(&format!(r#"<Series FREQ="{freq}" REF_AREA="{area}">"#));
        for (period, value) in observations {
            body.push_str(&format!(r#"<Obs TIME_PERIOD="{period}" OBS_VALUE="{value}"/>"#));
        }
        body.push_str("</Series>");
    }
    format!(
        r#"<message:StructureSpecificData xmlns:message="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/message">
  <message:Header><message:ID>EXR</message:ID></message:Header>
  <message:DataSet>{body}</message:DataSet>
</message:StructureSpecificData>"#
    )
}

pub fn reader(xml: &str, layout: SeriesLayout, profile: ProviderProfile) -> SeriesReader<std::io::Cursor<Vec<u8>>> {
    SeriesReader::new(std::io::Cursor::new(xml.as_bytes().to_vec()), layout, profile).expect("data fixture opens")
}

/// Reader over a structure-specific EXR message built by [`specific_message`]
pub fn exr_reader(series: &[(&str, &str, Vec<(&str, &str)>)]) -> SeriesReader<std::io::Cursor<Vec<u8>>> {
    reader(&specific_message(series), exr_layout(), ProviderProfile::generic("TEST"))
}
