use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::domain::{BoundingBox, TimeCoverage, parse_timestamp};
use crate::error::CollocateError;

pub const TIME_COVERAGE_START: &str = "time_coverage_start";
pub const TIME_COVERAGE_END: &str = "time_coverage_end";
pub const ACQUISITION_START_TIME: &str = "ACQUISITION_START_TIME";

/// Global attributes of one dataset, as read from its DAS.
#[derive(Debug, Clone, Default)]
pub struct DatasetAttributes {
    attrs: BTreeMap<String, String>,
}

impl DatasetAttributes {
    /// Extracts the global attribute container (NC_GLOBAL or HDF5_GLOBAL)
    /// from a DAS document. Unparseable input yields an empty attribute set;
    /// callers fail later with a metadata-missing error naming the field.
    pub fn from_das(text: &str) -> Self {
        Self {
            attrs: parse_das_global(text),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: &str, value: &str) {
        self.attrs.insert(name.to_string(), value.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }
}

pub trait DapClient: Send + Sync {
    /// Opens the dataset at `url` and returns its global attributes. Failure
    /// to open is always `CannotOpen`.
    fn open(&self, url: &str) -> Result<DatasetAttributes, CollocateError>;
}

pub struct HttpDapClient {
    client: Client,
}

impl HttpDapClient {
    pub fn new() -> Result<Self, CollocateError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("sat-collocate/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| CollocateError::DapHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| CollocateError::DapHttp(err.to_string()))?;
        Ok(Self { client })
    }
}

impl DapClient for HttpDapClient {
    fn open(&self, url: &str) -> Result<DatasetAttributes, CollocateError> {
        let target = das_url(url);
        let response = self
            .client
            .get(&target)
            .send()
            .map_err(|err| CollocateError::CannotOpen {
                url: url.to_string(),
                reason: err.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(CollocateError::CannotOpen {
                url: url.to_string(),
                reason: format!("status {}", response.status().as_u16()),
            });
        }
        let text = response.text().map_err(|err| CollocateError::CannotOpen {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        Ok(DatasetAttributes::from_das(&text))
    }
}

/// The DAS endpoint of an OPeNDAP dataset URL. Client directives after `#`
/// are not part of the resource path.
fn das_url(url: &str) -> String {
    let base = url.split('#').next().unwrap_or(url);
    format!("{base}.das")
}

pub struct Introspector<D> {
    dap: D,
}

impl<D: DapClient> Introspector<D> {
    pub fn new(dap: D) -> Self {
        Self { dap }
    }

    /// Opens a dataset, retrying once with the `#fillmismatch` directive.
    /// Some archives carry fill values that fail validation and only open
    /// with the check disabled.
    pub fn open(&self, url: &str) -> Result<DatasetAttributes, CollocateError> {
        match self.dap.open(url) {
            Ok(attrs) => Ok(attrs),
            Err(CollocateError::CannotOpen { .. }) => {
                let retry = format!("{url}#fillmismatch");
                debug!(url, "open failed, retrying with fillmismatch");
                self.dap.open(&retry)
            }
            Err(err) => Err(err),
        }
    }

    /// Reference time and bounding box of the dataset, for seeding a
    /// collocation search. Falls back to the acquisition start attribute for
    /// archives that do not carry standard coverage metadata.
    pub fn open_and_extract(
        &self,
        url: &str,
    ) -> Result<(DateTime<Utc>, BoundingBox), CollocateError> {
        let attrs = self.open(url)?;
        let time = reference_time_from(&attrs, url)?;
        let bbox = bbox_from(&attrs, url)?;
        Ok((time, bbox))
    }

    pub fn time_coverage(&self, url: &str) -> Result<TimeCoverage, CollocateError> {
        let attrs = self.open(url)?;
        let start = required_timestamp(&attrs, url, TIME_COVERAGE_START)?;
        let end = required_timestamp(&attrs, url, TIME_COVERAGE_END)?;
        Ok(TimeCoverage { start, end })
    }

    /// Existence probe: open and discard. Any open failure becomes the
    /// uniform unavailable error naming the URL.
    pub fn assert_available(&self, url: &str) -> Result<(), CollocateError> {
        match self.open(url) {
            Ok(_) => Ok(()),
            Err(_) => Err(CollocateError::Unavailable {
                url: url.to_string(),
            }),
        }
    }
}

fn reference_time_from(
    attrs: &DatasetAttributes,
    url: &str,
) -> Result<DateTime<Utc>, CollocateError> {
    let value = attrs
        .get(TIME_COVERAGE_START)
        .or_else(|| attrs.get(ACQUISITION_START_TIME))
        .ok_or_else(|| CollocateError::MetadataMissing {
            url: url.to_string(),
            attribute: TIME_COVERAGE_START.to_string(),
        })?;
    parse_timestamp(value)
}

fn bbox_from(attrs: &DatasetAttributes, url: &str) -> Result<BoundingBox, CollocateError> {
    Ok(BoundingBox::new(
        numeric_attr(attrs, url, "geospatial_lon_min")?,
        numeric_attr(attrs, url, "geospatial_lat_min")?,
        numeric_attr(attrs, url, "geospatial_lon_max")?,
        numeric_attr(attrs, url, "geospatial_lat_max")?,
    ))
}

fn numeric_attr(attrs: &DatasetAttributes, url: &str, name: &str) -> Result<f64, CollocateError> {
    attrs
        .get(name)
        .and_then(|value| value.trim().parse::<f64>().ok())
        .ok_or_else(|| CollocateError::MetadataMissing {
            url: url.to_string(),
            attribute: name.to_string(),
        })
}

fn required_timestamp(
    attrs: &DatasetAttributes,
    url: &str,
    name: &str,
) -> Result<DateTime<Utc>, CollocateError> {
    let value = attrs
        .get(name)
        .ok_or_else(|| CollocateError::MetadataMissing {
            url: url.to_string(),
            attribute: name.to_string(),
        })?;
    parse_timestamp(value)
}

/// DAS grammar, as far as this crate needs it:
/// `Attributes { <container> { <type> <name> <value>[, <value>]*; ... } ... }`.
/// Only the global container is collected; string values may span lines and
/// contain braces or semicolons.
fn parse_das_global(text: &str) -> BTreeMap<String, String> {
    let attribute_re = Regex::new(
        r"^(?:Byte|Int16|UInt16|Int32|UInt32|Float32|Float64|String|Url)\s+(\S+)\s+(.+);$",
    )
    .unwrap();

    let mut attrs = BTreeMap::new();
    let mut depth = 0usize;
    let mut global_depth = 0usize;
    let mut in_global = false;
    let mut pending = String::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if pending.is_empty() {
            if let Some(opened) = trimmed.strip_suffix('{') {
                depth += 1;
                if !in_global && depth == 2 && opened.trim().ends_with("GLOBAL") {
                    in_global = true;
                    global_depth = depth;
                }
                continue;
            }
            if trimmed == "}" {
                if in_global && depth == global_depth {
                    in_global = false;
                }
                depth = depth.saturating_sub(1);
                continue;
            }
        }
        if !in_global {
            continue;
        }
        if !pending.is_empty() {
            pending.push(' ');
        }
        pending.push_str(trimmed);
        if pending.ends_with(';') && quotes_balanced(&pending) {
            if let Some(captures) = attribute_re.captures(&pending) {
                let name = captures[1].to_string();
                let value = clean_value(&captures[2]);
                attrs.insert(name, value);
            }
            pending.clear();
        }
    }
    attrs
}

fn quotes_balanced(text: &str) -> bool {
    let mut open = false;
    let mut escaped = false;
    for ch in text.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '"' => open = !open,
            _ => {}
        }
    }
    !open
}

fn clean_value(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.starts_with('"') {
        return trimmed.to_string();
    }
    let mut out = String::new();
    let mut inside = false;
    let mut escaped = false;
    let mut first = true;
    for ch in trimmed.chars() {
        if escaped {
            out.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if inside => escaped = true,
            '"' => {
                inside = !inside;
                if inside && !first {
                    out.push_str(", ");
                }
                first = false;
            }
            _ if inside => out.push(ch),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const DAS: &str = r#"Attributes {
    latitude {
        String long_name "latitude";
        String units "degree_north";
    }
    NC_GLOBAL {
        String title "Arome-Arctic 2.5Km deterministic";
        String time_coverage_start "2019-01-07T00:00:00Z";
        String time_coverage_end "2019-01-09T18:00:00Z";
        Float64 geospatial_lat_min 62.0;
        Float64 geospatial_lat_max 88.0;
        Float64 geospatial_lon_min -18.0;
        Float64 geospatial_lon_max 80.0;
        String history "2019-01-07: created by fimex;
2019-01-07: attributes patched";
        Int32 forecast_length 66;
    }
    DODS_EXTRA {
        String Unlimited_Dimension "time";
    }
}"#;

    #[test]
    fn das_global_attributes() {
        let attrs = DatasetAttributes::from_das(DAS);
        assert_eq!(
            attrs.get("time_coverage_start"),
            Some("2019-01-07T00:00:00Z")
        );
        assert_eq!(attrs.get("geospatial_lon_min"), Some("-18.0"));
        assert_eq!(attrs.get("forecast_length"), Some("66"));
        // Variable and DODS_EXTRA attributes stay out of the global set.
        assert_eq!(attrs.get("long_name"), None);
        assert_eq!(attrs.get("Unlimited_Dimension"), None);
    }

    #[test]
    fn das_multiline_string_value() {
        let attrs = DatasetAttributes::from_das(DAS);
        assert_eq!(
            attrs.get("history"),
            Some("2019-01-07: created by fimex; 2019-01-07: attributes patched")
        );
    }

    #[test]
    fn das_multiple_string_chunks_join() {
        let das = r#"Attributes {
    NC_GLOBAL {
        String keywords "ocean", "model";
    }
}"#;
        let attrs = DatasetAttributes::from_das(das);
        assert_eq!(attrs.get("keywords"), Some("ocean, model"));
    }

    #[test]
    fn das_url_strips_client_directives() {
        assert_eq!(
            das_url("https://thredds.met.no/thredds/dodsC/a.nc#fillmismatch"),
            "https://thredds.met.no/thredds/dodsC/a.nc.das"
        );
        assert_eq!(
            das_url("https://thredds.met.no/thredds/dodsC/a.nc"),
            "https://thredds.met.no/thredds/dodsC/a.nc.das"
        );
    }

    struct StubDap {
        datasets: BTreeMap<String, DatasetAttributes>,
    }

    impl StubDap {
        fn new() -> Self {
            Self {
                datasets: BTreeMap::new(),
            }
        }

        fn with(mut self, url: &str, pairs: &[(&str, &str)]) -> Self {
            let mut attrs = DatasetAttributes::default();
            for (name, value) in pairs {
                attrs.insert(name, value);
            }
            self.datasets.insert(url.to_string(), attrs);
            self
        }
    }

    impl DapClient for StubDap {
        fn open(&self, url: &str) -> Result<DatasetAttributes, CollocateError> {
            self.datasets
                .get(url)
                .cloned()
                .ok_or_else(|| CollocateError::CannotOpen {
                    url: url.to_string(),
                    reason: "not found".to_string(),
                })
        }
    }

    #[test]
    fn open_retries_with_fillmismatch() {
        let stub = StubDap::new().with(
            "https://example.org/a.nc#fillmismatch",
            &[("time_coverage_start", "2019-01-07T00:00:00Z")],
        );
        let introspector = Introspector::new(stub);
        let attrs = introspector.open("https://example.org/a.nc").unwrap();
        assert_eq!(
            attrs.get("time_coverage_start"),
            Some("2019-01-07T00:00:00Z")
        );
    }

    #[test]
    fn open_retry_failure_propagates() {
        let introspector = Introspector::new(StubDap::new());
        let err = introspector.open("https://example.org/a.nc").unwrap_err();
        assert_matches!(err, CollocateError::CannotOpen { url, .. } if url.ends_with("#fillmismatch"));
    }

    #[test]
    fn reference_time_falls_back_to_acquisition_start() {
        let stub = StubDap::new().with(
            "https://example.org/s1.nc",
            &[
                ("ACQUISITION_START_TIME", "2019-01-07T17:17:37.123456"),
                ("geospatial_lon_min", "-18.0"),
                ("geospatial_lat_min", "62.0"),
                ("geospatial_lon_max", "80.0"),
                ("geospatial_lat_max", "88.0"),
            ],
        );
        let introspector = Introspector::new(stub);
        let (time, bbox) = introspector
            .open_and_extract("https://example.org/s1.nc")
            .unwrap();
        assert_eq!(time.format("%Y%m%dT%H%M%S").to_string(), "20190107T171737");
        assert_eq!(bbox, BoundingBox::new(-18.0, 62.0, 80.0, 88.0));
    }

    #[test]
    fn missing_start_time_reports_attribute() {
        let stub = StubDap::new().with("https://example.org/bare.nc", &[("title", "bare")]);
        let introspector = Introspector::new(stub);
        let err = introspector
            .open_and_extract("https://example.org/bare.nc")
            .unwrap_err();
        assert_matches!(
            err,
            CollocateError::MetadataMissing { attribute, .. } if attribute == "time_coverage_start"
        );
    }

    #[test]
    fn missing_bbox_attribute_is_hard_failure() {
        let stub = StubDap::new().with(
            "https://example.org/nobox.nc",
            &[
                ("time_coverage_start", "2019-01-07T00:00:00Z"),
                ("geospatial_lon_min", "-18.0"),
                ("geospatial_lat_min", "62.0"),
                ("geospatial_lat_max", "88.0"),
            ],
        );
        let introspector = Introspector::new(stub);
        let err = introspector
            .open_and_extract("https://example.org/nobox.nc")
            .unwrap_err();
        assert_matches!(
            err,
            CollocateError::MetadataMissing { attribute, .. } if attribute == "geospatial_lon_max"
        );
    }

    #[test]
    fn time_coverage_requires_both_bounds() {
        let stub = StubDap::new().with(
            "https://example.org/half.nc",
            &[("time_coverage_start", "2019-01-07T00:00:00Z")],
        );
        let introspector = Introspector::new(stub);
        let err = introspector
            .time_coverage("https://example.org/half.nc")
            .unwrap_err();
        assert_matches!(
            err,
            CollocateError::MetadataMissing { attribute, .. } if attribute == "time_coverage_end"
        );
    }

    #[test]
    fn time_coverage_naive_values_become_utc() {
        let stub = StubDap::new().with(
            "https://example.org/naive.nc",
            &[
                ("time_coverage_start", "2019-01-07 00:00:00"),
                ("time_coverage_end", "2019-01-09 18:00:00"),
            ],
        );
        let introspector = Introspector::new(stub);
        let coverage = introspector
            .time_coverage("https://example.org/naive.nc")
            .unwrap();
        assert_eq!(coverage.start.timezone(), Utc);
        assert_eq!(
            (coverage.end - coverage.start).num_hours(),
            66
        );
    }

    #[test]
    fn assert_available_maps_to_unavailable() {
        let introspector = Introspector::new(StubDap::new());
        let err = introspector
            .assert_available("https://example.org/gone.nc")
            .unwrap_err();
        assert_matches!(
            err,
            CollocateError::Unavailable { url } if url == "https://example.org/gone.nc"
        );
    }
}
