//! Static registry of every dataset a survey geodatabase can hold.
//!
//! The table is plain data: names, grouping, storage kind and field maps.
//! Nothing here touches an archive; binding a descriptor to a concrete
//! geodatabase happens in [`crate::accessor`].

use std::fmt;

/// Grouping that decides which realization of the project a dataset lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    SurveyData,
    SurveyExtents,
    Stage,
    Topography,
    Surfaces,
    Qa,
}

impl Family {
    pub fn as_str(&self) -> &'static str {
        match self {
            Family::SurveyData => "surveydata",
            Family::SurveyExtents => "surveyextents",
            Family::Stage => "stage",
            Family::Topography => "topography",
            Family::Surfaces => "surfaces",
            Family::Qa => "QA",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    Vector { projected: bool },
    Raster,
    Table,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Wetted,
    Bankfull,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Wetted => "wetted",
            Stage::Bankfull => "bankfull",
        }
    }

    /// Sub-folder name under `Stages/`.
    pub fn folder(&self) -> &'static str {
        match self {
            Stage::Wetted => "Wetted",
            Stage::Bankfull => "Bankfull",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageType {
    Extent,
    Centerline,
    CrossSections,
    Islands,
}

impl StageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageType::Extent => "extent",
            StageType::Centerline => "centerline",
            StageType::CrossSections => "crosssections",
            StageType::Islands => "islands",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageInfo {
    pub stage: Stage,
    pub stage_type: StageType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text(u16),
    Double,
    Long,
}

/// One (source name, output name, type) entry of a field map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub source: &'static str,
    pub output: &'static str,
    pub ty: FieldType,
}

const fn text(source: &'static str, output: &'static str, len: u16) -> FieldSpec {
    FieldSpec {
        source,
        output,
        ty: FieldType::Text(len),
    }
}

const fn double(name: &'static str) -> FieldSpec {
    FieldSpec {
        source: name,
        output: name,
        ty: FieldType::Double,
    }
}

const fn long(name: &'static str) -> FieldSpec {
    FieldSpec {
        source: name,
        output: name,
        ty: FieldType::Long,
    }
}

const STRING_LEN: u16 = 255;

pub const FIELD_DESCRIPTION: &str = "DESCRIPTION";
pub const FIELD_POINT_NUMBER: &str = "POINT_NUMBER";

const DESCRIPTION: FieldSpec = text(FIELD_DESCRIPTION, "Code", 6);
const POINT_NUMBER: FieldSpec = text(FIELD_POINT_NUMBER, "POINT_NUMB", 10);
const POINT_QUALITY: FieldSpec = text("POINT_QUALITY", "PQuality", STRING_LEN);
const VDE: FieldSpec = text("VDE", "VDE", STRING_LEN);
const HDE: FieldSpec = text("HDE", "HDE", STRING_LEN);
const STATION: FieldSpec = text("Station", "Station", STRING_LEN);
const ERROR_TYPE: FieldSpec = text("ErrorType", "ErrorType", STRING_LEN);
const LINE_TYPE: FieldSpec = text("LineType", "LineType", STRING_LEN);
const ROD_HEIGHT: FieldSpec = double("ROD_HEIGHT");
const EVENT_ID: FieldSpec = double("EVENT_ID");

pub const FIELD_CHANNEL: &str = "Channel";
pub const FIELD_EXTENT_TYPE: &str = "ExtentType";

const CHANNEL: FieldSpec = text(FIELD_CHANNEL, FIELD_CHANNEL, STRING_LEN);
const EXTENT_TYPE: FieldSpec = text(FIELD_EXTENT_TYPE, FIELD_EXTENT_TYPE, STRING_LEN);
const CLID: FieldSpec = text("CLID", "CLID", STRING_LEN);
const IS_VALID: FieldSpec = text("IsValid", "IsValid", STRING_LEN);
const QUALIFYING: FieldSpec = text("Qualifying", "Qualifying", STRING_LEN);

const SURVEY_POINT_FIELDS: &[FieldSpec] = &[
    VDE,
    HDE,
    DESCRIPTION,
    POINT_NUMBER,
    POINT_QUALITY,
    STATION,
    ROD_HEIGHT,
    EVENT_ID,
];

const CONTROL_POINT_FIELDS: &[FieldSpec] = &[
    VDE,
    HDE,
    DESCRIPTION,
    POINT_NUMBER,
    POINT_QUALITY,
    STATION,
    text("Type", "Type", STRING_LEN),
    text("Source", "Source", STRING_LEN),
    ROD_HEIGHT,
    EVENT_ID,
];

const ERROR_POINT_FIELDS: &[FieldSpec] = &[
    DESCRIPTION,
    VDE,
    HDE,
    POINT_QUALITY,
    POINT_NUMBER,
    ERROR_TYPE,
    STATION,
    ROD_HEIGHT,
    EVENT_ID,
];

const BREAKLINE_FIELDS: &[FieldSpec] = &[DESCRIPTION, LINE_TYPE];
const ERROR_LINE_FIELDS: &[FieldSpec] = &[DESCRIPTION, LINE_TYPE, ERROR_TYPE];
const EXTENT_FIELDS: &[FieldSpec] = &[EXTENT_TYPE];
const CENTERLINE_FIELDS: &[FieldSpec] = &[CHANNEL, CLID];
const CROSS_SECTION_FIELDS: &[FieldSpec] = &[CHANNEL, IS_VALID];
const ISLAND_FIELDS: &[FieldSpec] = &[IS_VALID, QUALIFYING];
const CHANNEL_UNIT_FIELDS: &[FieldSpec] = &[text("Unit_Number", "UnitNumber", STRING_LEN)];
const THALWEG_FIELDS: &[FieldSpec] = &[long("PoolWt"), long("SmoothT")];

/// Immutable definition of one exportable resource.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetDescriptor {
    /// Resource name inside the survey geodatabase.
    pub name: &'static str,
    /// Base name (no extension) of the exported file.
    pub output_name: &'static str,
    /// Stable manifest id.
    pub id: &'static str,
    pub display_name: &'static str,
    /// Manifest dataset type, when it differs from the storage kind.
    pub dataset_type: Option<&'static str>,
    pub family: Option<Family>,
    pub kind: StorageKind,
    pub stage: Option<StageInfo>,
    pub required: bool,
    pub publish: bool,
    pub export_enabled: bool,
    pub fields: &'static [FieldSpec],
}

impl DatasetDescriptor {
    pub fn is_raster(&self) -> bool {
        matches!(self.kind, StorageKind::Raster)
    }

    pub fn is_vector(&self) -> bool {
        matches!(self.kind, StorageKind::Vector { .. })
    }

    pub fn is_table(&self) -> bool {
        matches!(self.kind, StorageKind::Table)
    }

    /// `Some(projected)` for vectors, `None` otherwise.
    pub fn projected(&self) -> Option<bool> {
        match self.kind {
            StorageKind::Vector { projected } => Some(projected),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self.kind {
            StorageKind::Vector { .. } => "shp",
            StorageKind::Raster => "tif",
            StorageKind::Table => "xml",
            StorageKind::File => "",
        }
    }

    pub fn output_file_name(&self) -> String {
        file_name(self.output_name, self.extension())
    }

    /// Dataset element name used in the project manifest.
    pub fn manifest_type(&self) -> &'static str {
        self.dataset_type.unwrap_or(match self.kind {
            StorageKind::Vector { .. } => "Vector",
            StorageKind::Raster => "Raster",
            StorageKind::Table => "Table",
            StorageKind::File => "File",
        })
    }

    /// Output field name for a source field, falling back to the source name.
    pub fn output_field<'a>(&self, source: &'a str) -> &'a str {
        self.fields
            .iter()
            .find(|f| f.source == source)
            .map(|f| f.output)
            .unwrap_or(source)
    }
}

pub(crate) fn file_name(base: &str, extension: &str) -> String {
    if extension.is_empty() {
        base.to_string()
    } else {
        format!("{base}.{extension}")
    }
}

const fn vector(
    name: &'static str,
    id: &'static str,
    display_name: &'static str,
    family: Option<Family>,
    projected: bool,
    fields: &'static [FieldSpec],
) -> DatasetDescriptor {
    DatasetDescriptor {
        name,
        output_name: name,
        id,
        display_name,
        dataset_type: None,
        family,
        kind: StorageKind::Vector { projected },
        stage: None,
        required: true,
        publish: true,
        export_enabled: true,
        fields,
    }
}

const fn unprojected(
    name: &'static str,
    output_name: &'static str,
    id: &'static str,
    display_name: &'static str,
    fields: &'static [FieldSpec],
) -> DatasetDescriptor {
    DatasetDescriptor {
        output_name,
        ..vector(name, id, display_name, Some(Family::SurveyData), false, fields)
    }
}

const fn stage(
    name: &'static str,
    id: &'static str,
    display_name: &'static str,
    stage: Stage,
    stage_type: StageType,
    fields: &'static [FieldSpec],
) -> DatasetDescriptor {
    DatasetDescriptor {
        stage: Some(StageInfo { stage, stage_type }),
        ..vector(name, id, display_name, Some(Family::Stage), true, fields)
    }
}

const fn raster(
    name: &'static str,
    id: &'static str,
    display_name: &'static str,
    family: Family,
) -> DatasetDescriptor {
    DatasetDescriptor {
        name,
        output_name: name,
        id,
        display_name,
        dataset_type: Some(id),
        family: Some(family),
        kind: StorageKind::Raster,
        stage: None,
        required: true,
        publish: true,
        export_enabled: true,
        fields: &[],
    }
}

const fn table(name: &'static str, family: Option<Family>) -> DatasetDescriptor {
    DatasetDescriptor {
        name,
        output_name: name,
        id: name,
        display_name: name,
        dataset_type: None,
        family,
        kind: StorageKind::Table,
        stage: None,
        required: false,
        publish: true,
        export_enabled: true,
        fields: &[],
    }
}

pub const DEM_ID: &str = "DEM";
pub const WSEDEM_ID: &str = "WaterSurfaceDEM";
pub const WATER_DEPTH_ID: &str = "WaterDepth";
pub const BREAKLINES_NAME: &str = "Breaklines";
pub const TOPO_POINTS_NAME: &str = "Topo_Points";
pub const CONTROL_POINTS_NAME: &str = "Control_Points";
pub const EDGE_OF_WATER_NAME: &str = "EdgeofWater_Points";
pub const STREAM_FEATURES_NAME: &str = "Stream_Features";
pub const SURVEY_INFO_TABLE: &str = "SurveyInfo";
pub const LOG_TABLE: &str = "Log";
pub const MAP_IMAGES_TABLE: &str = "MapImages";
pub const TRANSFORMATIONS_TABLE: &str = "Transformations";
pub const RAW_POINTS_NAME: &str = "QaQcRawPoints";

static CATALOG: &[DatasetDescriptor] = &[
    vector(CONTROL_POINTS_NAME, "control_points", "Control Points", Some(Family::SurveyData), true, CONTROL_POINT_FIELDS),
    vector(TOPO_POINTS_NAME, "topo_points", "Topo Points", Some(Family::SurveyData), true, SURVEY_POINT_FIELDS),
    stage("Bankfull", "bankfull_extent", "BExtent", Stage::Bankfull, StageType::Extent, EXTENT_FIELDS),
    stage("BankfullCL", "bankfull_centerline", "BCenterline", Stage::Bankfull, StageType::Centerline, CENTERLINE_FIELDS),
    stage("BankfullXS", "bankfull_crosssections", "BCrossSections", Stage::Bankfull, StageType::CrossSections, CROSS_SECTION_FIELDS),
    stage("BIslands", "bankfull_islands", "BIslands", Stage::Bankfull, StageType::Islands, ISLAND_FIELDS),
    DatasetDescriptor {
        required: false,
        export_enabled: false,
        ..vector("Benchmarks", "benchmarks", "Benchmarks", None, true, &[])
    },
    vector(BREAKLINES_NAME, "breaklines", "Breaklines", Some(Family::SurveyData), true, BREAKLINE_FIELDS),
    DatasetDescriptor {
        dataset_type: Some("ChannelUnits"),
        ..vector("Channel_Units", "ChannelUnits", "Channel Units", Some(Family::Topography), true, CHANNEL_UNIT_FIELDS)
    },
    DatasetDescriptor {
        dataset_type: Some("ChannelUnitsField"),
        export_enabled: false,
        ..vector("Channel_Units_Field", "ChannelUnitsField", "Channel Units", Some(Family::Topography), true, CHANNEL_UNIT_FIELDS)
    },
    vector(EDGE_OF_WATER_NAME, "eow_points", "Edge of Water Points", Some(Family::SurveyData), true, SURVEY_POINT_FIELDS),
    DatasetDescriptor {
        required: false,
        ..vector("Error_Lines", "error_lines", "Error Lines", None, true, ERROR_LINE_FIELDS)
    },
    vector("Error_Points", "error_points", "Error Points", Some(Family::SurveyData), true, ERROR_POINT_FIELDS),
    vector(STREAM_FEATURES_NAME, "stream_features", "Stream Features", Some(Family::SurveyData), true, SURVEY_POINT_FIELDS),
    vector("Survey_Extent", "survey_extent", "Survey Extent", Some(Family::SurveyExtents), true, &[]),
    DatasetDescriptor {
        dataset_type: Some("Thalweg"),
        ..vector("Thalweg", "thalweg", "Thalweg", Some(Family::Topography), true, THALWEG_FIELDS)
    },
    stage("CenterLine", "wetted_centerline", "WCenterline", Stage::Wetted, StageType::Centerline, CENTERLINE_FIELDS),
    stage("WaterExtent", "wetted_extent", "WExtent", Stage::Wetted, StageType::Extent, EXTENT_FIELDS),
    stage("WettedXS", "wetted_crosssections", "WCrossSections", Stage::Wetted, StageType::CrossSections, CROSS_SECTION_FIELDS),
    stage("WIslands", "wetted_islands", "WIslands", Stage::Wetted, StageType::Islands, ISLAND_FIELDS),
    raster("DEM", DEM_ID, "DEM", Family::Topography),
    raster("Detrended", "Detrended", "Detrended", Family::Topography),
    raster("DEMHillshade", "DEMHillshade", "Hillshade", Family::Topography),
    raster("Assoc3DPQ", "PointQuality3D", "Assoc3DPQ", Family::Surfaces),
    raster("AssocD50", "D50", "AssocD50", Family::Surfaces),
    raster("AssocIErr", "InterpolationError", "AssocIErr", Family::Surfaces),
    raster("AssocPDensity", "PointDensity", "AssocPDensity", Family::Surfaces),
    raster("AssocSlope", "Slope", "AssocSlope", Family::Surfaces),
    raster("AssocRough", "Roughness", "AssocRough", Family::Surfaces),
    raster("ErrSurface", "ErrSurface", "ErrSurface", Family::Surfaces),
    raster("WSEDEM", WSEDEM_ID, "Water Surface DEM", Family::Topography),
    raster("Water_Depth", WATER_DEPTH_ID, "Water Depth", Family::Topography),
    unprojected("Topo_Points_Unprojected", TOPO_POINTS_NAME, "topo_points", "Topo Points", SURVEY_POINT_FIELDS),
    unprojected("Control_Points_Unprojected", CONTROL_POINTS_NAME, "control_points", "Control Points", CONTROL_POINT_FIELDS),
    unprojected("Error_Points_Unprojected", "Error_Points", "error_points", "Error Points", ERROR_POINT_FIELDS),
    unprojected("EdgeofWater_Points_Unprojected", EDGE_OF_WATER_NAME, "eow_points", "Edge of Water Points", SURVEY_POINT_FIELDS),
    unprojected("Breaklines_Unprojected", BREAKLINES_NAME, "breaklines", "Breaklines", BREAKLINE_FIELDS),
    unprojected("Stream_Features_Unprojected", STREAM_FEATURES_NAME, "stream_features", "Stream Features", SURVEY_POINT_FIELDS),
    table("QaQcPoints", Some(Family::Qa)),
    table("QaQcLines", Some(Family::Qa)),
    table("QaQcPolygons", Some(Family::Qa)),
    table("QaQcVector", Some(Family::Qa)),
    table("QaQcTIN", Some(Family::Qa)),
    table(LOG_TABLE, None),
    table("OrthogInfo", None),
    table(SURVEY_INFO_TABLE, None),
    table(TRANSFORMATIONS_TABLE, None),
    table("CrewFeedback", Some(Family::Qa)),
    table(MAP_IMAGES_TABLE, None),
    DatasetDescriptor {
        output_name: "QaQcPoints",
        ..vector(RAW_POINTS_NAME, "QaQcPoints", "QaQc Raw Points", None, true, SURVEY_POINT_FIELDS)
    },
    table("QaQcBacksightLog", Some(Family::Qa)),
    table("QaQcUncertaintySummary", Some(Family::Qa)),
];

/// Every descriptor, in catalog order.
pub fn all_datasets() -> &'static [DatasetDescriptor] {
    CATALOG
}

/// Descriptors of one family; `None` selects the ungrouped ones.
pub fn by_family(family: Option<Family>) -> impl Iterator<Item = &'static DatasetDescriptor> {
    CATALOG.iter().filter(move |d| d.family == family)
}

pub fn by_capability<P>(predicate: P) -> impl Iterator<Item = &'static DatasetDescriptor>
where
    P: Fn(&DatasetDescriptor) -> bool,
{
    CATALOG.iter().filter(move |d| predicate(d))
}

/// Survey data vectors of one projection state.
pub fn survey_datasets(projected: bool) -> impl Iterator<Item = &'static DatasetDescriptor> {
    by_family(Some(Family::SurveyData)).filter(move |d| d.projected() == Some(projected))
}

/// Looks a descriptor up by its geodatabase resource name.
pub fn by_name(name: &str) -> Option<&'static DatasetDescriptor> {
    CATALOG.iter().find(|d| d.name == name)
}

/// First descriptor with the given manifest id. Projected variants come
/// first in the catalog, so shared ids resolve to the projected dataset.
pub fn by_id(id: &str) -> Option<&'static DatasetDescriptor> {
    CATALOG.iter().find(|d| d.id == id)
}
