use chrono::{DateTime, TimeDelta, Utc};

use crate::domain::BoundingBox;

pub const TEMP_EXTENT_BEGIN: &str = "apiso:TempExtent_begin";
pub const ANY_TEXT: &str = "csw:AnyText";
pub const TITLE: &str = "dc:title";
pub const CRS84: &str = "urn:ogc:def:crs:OGC:1.3:CRS84";

pub const DEFAULT_WINDOW_HOURS: i64 = 24;

const CSW_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Catalogue search predicate. The HTTP connection renders these as OGC
/// filter XML; tests and mocks match on them structurally.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchFilter {
    Equal { property: String, literal: String },
    LessOrEqual { property: String, literal: String },
    GreaterOrEqual { property: String, literal: String },
    Like { property: String, literal: String },
    Bbox { bbox: BoundingBox, crs: String },
    And(Vec<SearchFilter>),
}

impl SearchFilter {
    pub fn equal(property: &str, literal: &str) -> Self {
        SearchFilter::Equal {
            property: property.to_string(),
            literal: literal.to_string(),
        }
    }

    pub fn less_or_equal(property: &str, literal: &str) -> Self {
        SearchFilter::LessOrEqual {
            property: property.to_string(),
            literal: literal.to_string(),
        }
    }

    pub fn greater_or_equal(property: &str, literal: &str) -> Self {
        SearchFilter::GreaterOrEqual {
            property: property.to_string(),
            literal: literal.to_string(),
        }
    }

    pub fn like(property: &str, literal: &str) -> Self {
        SearchFilter::Like {
            property: property.to_string(),
            literal: literal.to_string(),
        }
    }

    /// Free-text match over the whole record. The literal is taken verbatim;
    /// callers supply their own wildcards if they want any.
    pub fn free_text(text: &str) -> Self {
        Self::like(ANY_TEXT, text)
    }

    /// Title match. Known not to match anything against the production
    /// catalogue; kept for catalogues that do index dc:title.
    pub fn title(text: &str) -> Self {
        Self::like(TITLE, text)
    }

    pub fn bbox(bbox: BoundingBox) -> Self {
        SearchFilter::Bbox {
            bbox,
            crs: CRS84.to_string(),
        }
    }

    pub fn and(filters: Vec<SearchFilter>) -> Self {
        SearchFilter::And(filters)
    }
}

/// Symmetric time window around `time`, returned as (upper bound, lower
/// bound). Both predicates target the coverage begin field: the production
/// catalogue does not index the end field usably, so a window split across
/// begin and end matches nothing. Windows narrower than 24 h can therefore
/// miss long-coverage datasets.
pub fn temporal_window(time: DateTime<Utc>, dt: TimeDelta) -> (SearchFilter, SearchFilter) {
    let stop = (time + dt).format(CSW_TIME_FORMAT).to_string();
    let start = (time - dt).format(CSW_TIME_FORMAT).to_string();
    (
        SearchFilter::less_or_equal(TEMP_EXTENT_BEGIN, &stop),
        SearchFilter::greater_or_equal(TEMP_EXTENT_BEGIN, &start),
    )
}
