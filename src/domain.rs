use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::CollocateError;

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y%m%dT%H%M%S",
];

const AWARE_DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"];

const NAIVE_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y%m%d"];

/// Parses the timestamp spellings found in dataset metadata. Naive values
/// are taken as UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, CollocateError> {
    let trimmed = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in AWARE_DATETIME_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(trimmed, format) {
            return Ok(parsed.with_timezone(&Utc));
        }
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(parsed.and_utc());
        }
    }
    for format in NAIVE_DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, format) {
            if let Some(midnight) = parsed.and_hms_opt(0, 0, 0) {
                return Ok(midnight.and_utc());
            }
        }
    }
    Err(CollocateError::Timestamp(value.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SelectionRelation {
    Any,
    Before,
    After,
}

impl fmt::Display for SelectionRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionRelation::Any => write!(f, "any"),
            SelectionRelation::Before => write!(f, "before"),
            SelectionRelation::After => write!(f, "after"),
        }
    }
}

impl FromStr for SelectionRelation {
    type Err = CollocateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "any" | "0" => Ok(SelectionRelation::Any),
            "before" | "1" => Ok(SelectionRelation::Before),
            "after" | "2" => Ok(SelectionRelation::After),
            _ => Err(CollocateError::InvalidRelation(value.to_string())),
        }
    }
}

/// Which end of a dataset's time coverage nearest-selection compares against
/// the reference time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageBound {
    Start,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeCoverage {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeCoverage {
    pub fn bound(&self, bound: CoverageBound) -> DateTime<Utc> {
        match bound {
            CoverageBound::Start => self.start,
            CoverageBound::End => self.end,
        }
    }
}

/// Geographic extent as `[lon_min, lat_min, lon_max, lat_max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lon_min: f64,
    pub lat_min: f64,
    pub lon_max: f64,
    pub lat_max: f64,
}

impl BoundingBox {
    pub const WORLD: BoundingBox = BoundingBox {
        lon_min: -180.0,
        lat_min: -90.0,
        lon_max: 180.0,
        lat_max: 90.0,
    };

    pub fn new(lon_min: f64, lat_min: f64, lon_max: f64, lat_max: f64) -> Self {
        Self {
            lon_min,
            lat_min,
            lon_max,
            lat_max,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GeoExtent {
    Bbox(BoundingBox),
    Polygon(Vec<(f64, f64)>),
}

impl GeoExtent {
    pub fn bounding_box(&self) -> Result<BoundingBox, CollocateError> {
        match self {
            GeoExtent::Bbox(bbox) => Ok(*bbox),
            GeoExtent::Polygon(_) => Err(CollocateError::UnsupportedSearch),
        }
    }
}

/// Reference time and extent derived from the seed dataset. Read-only after
/// construction; the time is always timezone-aware.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceContext {
    time: DateTime<Utc>,
    bbox: Option<BoundingBox>,
}

impl ReferenceContext {
    pub fn new(time: DateTime<Utc>, bbox: Option<BoundingBox>) -> Self {
        Self { time, bbox }
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        self.bbox
    }
}

/// Satellite scene filename such as
/// `S1B_IW_RAW__0SDV_20190107T171737_20190107T171910_...`. The sixth
/// underscore-separated field carries the acquisition start time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneFilename {
    name: String,
    start_time: DateTime<Utc>,
}

impl SceneFilename {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }
}

impl fmt::Display for SceneFilename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl FromStr for SceneFilename {
    type Err = CollocateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let basename = value
            .trim()
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default()
            .to_string();
        let field = basename
            .split('_')
            .nth(5)
            .ok_or_else(|| CollocateError::SceneFilename(value.to_string()))?;
        let start_time = parse_timestamp(field).map_err(|_| CollocateError::DateFormat {
            got: field.to_string(),
        })?;
        Ok(Self {
            name: basename,
            start_time,
        })
    }
}
