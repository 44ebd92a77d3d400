use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use clap::ValueEnum;
use serde::Serialize;

use crate::config::CollocateConfig;
use crate::csw::{CandidateSet, CswConnection, SearchOptions};
use crate::dap::DapClient;
use crate::domain::{CoverageBound, SceneFilename, SelectionRelation};
use crate::engine::CollocationEngine;
use crate::error::CollocateError;
use crate::filter::SearchFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DatasetFamily {
    AromeArctic,
    Meps,
    MetNordic,
    #[value(name = "norkyst800")]
    NorKyst800,
    WeatherForecast,
}

impl fmt::Display for DatasetFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetFamily::AromeArctic => write!(f, "arome-arctic"),
            DatasetFamily::Meps => write!(f, "meps"),
            DatasetFamily::MetNordic => write!(f, "met-nordic"),
            DatasetFamily::NorKyst800 => write!(f, "norkyst800"),
            DatasetFamily::WeatherForecast => write!(f, "weather-forecast"),
        }
    }
}

impl FromStr for DatasetFamily {
    type Err = CollocateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "arome-arctic" | "aromearctic" => Ok(DatasetFamily::AromeArctic),
            "meps" => Ok(DatasetFamily::Meps),
            "met-nordic" | "metnordic" => Ok(DatasetFamily::MetNordic),
            "norkyst800" | "norkyst-800" => Ok(DatasetFamily::NorKyst800),
            "weather-forecast" | "weatherforecast" => Ok(DatasetFamily::WeatherForecast),
            _ => Err(CollocateError::UnknownFamily(value.to_string())),
        }
    }
}

pub type UrlTemplate = fn(DateTime<Utc>, &CollocateConfig) -> String;

/// Per-family search strategy: subset labels for the catalogue free-text
/// predicate, or a deterministic URL template for archives the catalogue
/// does not cover yet.
#[derive(Debug)]
pub struct FamilySpec {
    pub name: &'static str,
    pub supports_search: bool,
    pub subsets: &'static [(&'static str, &'static str)],
    pub default_subset: Option<&'static str>,
    pub url_template: Option<UrlTemplate>,
}

static AROME_ARCTIC: FamilySpec = FamilySpec {
    name: "Arome-Arctic",
    supports_search: true,
    subsets: &[
        ("deterministic", "Arome-Arctic 2.5Km deterministic"),
        ("lagged subset", "Arome-Arctic 2.5Km lagged subset"),
        ("lagged vc", "Arome-Arctic 2.5Km lagged vc"),
        ("lagged tracking", "Arome-Arctic 2.5Km lagged tracking"),
    ],
    default_subset: Some("deterministic"),
    url_template: None,
};

static MEPS: FamilySpec = FamilySpec {
    name: "Meps",
    supports_search: true,
    subsets: &[
        ("model level", "Meps 2.5 km deterministic model level parameters"),
        (
            "pressure level",
            "Meps 2.5 km deterministic pressure level parameters",
        ),
        ("surface", "Meps 2.5 km deterministic surface parameters"),
        (
            "height level",
            "Meps 2.5 km deterministic height level parameters",
        ),
    ],
    default_subset: Some("surface"),
    url_template: None,
};

static MET_NORDIC: FamilySpec = FamilySpec {
    name: "MET Nordic",
    supports_search: true,
    subsets: &[],
    default_subset: None,
    url_template: Some(met_nordic_url),
};

static NORKYST800: FamilySpec = FamilySpec {
    name: "NorKyst800",
    supports_search: true,
    subsets: &[],
    default_subset: None,
    url_template: Some(norkyst_url),
};

static WEATHER_FORECAST: FamilySpec = FamilySpec {
    name: "weather forecast",
    supports_search: false,
    subsets: &[],
    default_subset: None,
    url_template: None,
};

pub fn family_spec(family: DatasetFamily) -> Result<&'static FamilySpec, CollocateError> {
    let spec = match family {
        DatasetFamily::AromeArctic => &AROME_ARCTIC,
        DatasetFamily::Meps => &MEPS,
        DatasetFamily::MetNordic => &MET_NORDIC,
        DatasetFamily::NorKyst800 => &NORKYST800,
        DatasetFamily::WeatherForecast => &WEATHER_FORECAST,
    };
    if !spec.supports_search {
        return Err(CollocateError::NotImplemented(format!(
            "generic {} search is not implemented, it needs a polygon intersection search instead of a bounding box",
            spec.name
        )));
    }
    Ok(spec)
}

/// Free-text predicate selecting one subset of a family. `None` picks the
/// family default; an unknown name is a hard failure, including any subset
/// requested for a family that has none.
pub fn subset_filter(
    spec: &FamilySpec,
    subset: Option<&str>,
) -> Result<Option<SearchFilter>, CollocateError> {
    let Some(name) = subset.or(spec.default_subset) else {
        return Ok(None);
    };
    let label = spec
        .subsets
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, label)| *label)
        .ok_or_else(|| CollocateError::UnknownSubset {
            family: spec.name.to_string(),
            subset: name.to_string(),
        })?;
    Ok(Some(SearchFilter::free_text(label)))
}

impl<C: CswConnection, D: DapClient> CollocationEngine<C, D> {
    /// Catalogue records for one dataset family around the reference time.
    pub fn family_collocations(
        &self,
        family: DatasetFamily,
        subset: Option<&str>,
        dt: TimeDelta,
        options: &SearchOptions,
    ) -> Result<CandidateSet, CollocateError> {
        let spec = family_spec(family)?;
        let mut extra = Vec::new();
        if let Some(filter) = subset_filter(spec, subset)? {
            extra.push(filter);
        }
        self.collocate(&extra, dt, options)
    }

    /// URL of the family dataset nearest the reference time. Template
    /// families render a deterministic URL and probe it; search families go
    /// through the catalogue.
    pub fn family_nearest_url(
        &self,
        family: DatasetFamily,
        subset: Option<&str>,
        dt: TimeDelta,
        bound: CoverageBound,
        relation: SelectionRelation,
        options: &SearchOptions,
        config: &CollocateConfig,
    ) -> Result<Option<String>, CollocateError> {
        let spec = family_spec(family)?;
        let filter = subset_filter(spec, subset)?;
        if let Some(template) = spec.url_template {
            let url = template(self.context().time(), config);
            self.introspector().assert_available(&url)?;
            return Ok(Some(url));
        }
        let extra: Vec<SearchFilter> = filter.into_iter().collect();
        self.resolve_nearest(&extra, dt, bound, relation, options)
    }
}

/// Daily NorKyst-800 ocean model file for the given time.
pub fn norkyst_url(time: DateTime<Utc>, config: &CollocateConfig) -> String {
    format!(
        "{}/{}.{}00.nc",
        config.norkyst_path.trim_end_matches('/'),
        config.norkyst_prefile,
        time.format("%Y%m%d")
    )
}

/// Hourly MET Nordic analysis file for the given time.
pub fn met_nordic_url(time: DateTime<Utc>, config: &CollocateConfig) -> String {
    format!(
        "{}/{}/{}_{}T{}Z.nc",
        config.met_nordic_path.trim_end_matches('/'),
        time.format("%Y/%m/%d"),
        config.met_nordic_prefile,
        time.format("%Y%m%d"),
        time.format("%H")
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SceneModelUrls {
    pub norkyst: String,
    pub met_nordic: String,
}

/// Both model URLs collocated with a scene, rendered from its acquisition
/// time. Pure URL construction, no availability probe.
pub fn model_urls_for_scene(
    filename: &str,
    config: &CollocateConfig,
) -> Result<SceneModelUrls, CollocateError> {
    let scene: SceneFilename = filename.parse()?;
    Ok(SceneModelUrls {
        norkyst: norkyst_url(scene.start_time(), config),
        met_nordic: met_nordic_url(scene.start_time(), config),
    })
}
