use std::collections::BTreeMap;
use std::time::Duration;

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::error::CollocateError;
use crate::filter::SearchFilter;

pub const DEFAULT_ENDPOINT: &str = "https://data.csw.met.no";
pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const DEFAULT_MAX_RECORDS: usize = 1000;

const OUTPUT_SCHEMA: &str = "http://www.opengis.net/cat/csw/2.0.2";
const ELEMENT_SET: &str = "full";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub scheme: String,
    pub url: String,
}

/// One catalogue entry with its access references.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CswRecord {
    pub identifier: String,
    pub title: String,
    pub references: Vec<Reference>,
}

impl CswRecord {
    /// First reference whose scheme mentions OPeNDAP. None when the record
    /// carries no such reference, which is a valid state, not an error.
    pub fn opendap_url(&self) -> Option<&str> {
        self.references
            .iter()
            .find(|reference| reference.scheme.to_lowercase().contains("opendap"))
            .map(|reference| reference.url.as_str())
    }
}

/// Search results keyed by record identifier. BTreeMap keeps iteration
/// order deterministic for tie-breaking further down the pipeline.
pub type CandidateSet = BTreeMap<String, CswRecord>;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordPage {
    pub records: Vec<CswRecord>,
    /// Index of the next record to request; 0 means end of results.
    pub next_record: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    pub page_size: usize,
    pub max_records: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_records: DEFAULT_MAX_RECORDS,
        }
    }
}

pub trait CswConnection: Send + Sync {
    fn get_records(
        &self,
        filter: &SearchFilter,
        start_position: usize,
        page_size: usize,
    ) -> Result<RecordPage, CollocateError>;
}

pub struct CatalogClient<C> {
    connection: C,
}

impl<C: CswConnection> CatalogClient<C> {
    pub fn new(connection: C) -> Self {
        Self { connection }
    }

    /// Runs the conjunction of `filters` and pages through all results, up
    /// to `max_records`. Pages merge by record identifier; a later page wins
    /// on duplicate keys.
    pub fn search(
        &self,
        filters: &[SearchFilter],
        options: &SearchOptions,
    ) -> Result<CandidateSet, CollocateError> {
        let filter = match filters {
            [single] => single.clone(),
            _ => SearchFilter::and(filters.to_vec()),
        };
        let mut records = CandidateSet::new();
        let mut start_position = 0usize;
        loop {
            let page = self
                .connection
                .get_records(&filter, start_position, options.page_size)?;
            debug!(
                start_position,
                returned = page.records.len(),
                next_record = page.next_record,
                "catalogue page"
            );
            for record in page.records {
                records.insert(record.identifier.clone(), record);
            }
            if page.next_record == 0 {
                break;
            }
            // The catalogue counts a page's last record as already consumed.
            start_position += options.page_size + 1;
            if start_position >= options.max_records {
                break;
            }
        }
        Ok(records)
    }
}

pub struct HttpCswConnection {
    client: Client,
    endpoint: String,
}

impl HttpCswConnection {
    pub fn new(endpoint: &str) -> Result<Self, CollocateError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("sat-collocate/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| CollocateError::CswHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| CollocateError::CswHttp(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl CswConnection for HttpCswConnection {
    fn get_records(
        &self,
        filter: &SearchFilter,
        start_position: usize,
        page_size: usize,
    ) -> Result<RecordPage, CollocateError> {
        let body = get_records_request(filter, start_position, page_size);
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/xml")
            .body(body)
            .send()
            .map_err(|err| CollocateError::CswHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "catalogue request failed".to_string());
            return Err(CollocateError::CswStatus { status, message });
        }
        let text = response
            .text()
            .map_err(|err| CollocateError::CswHttp(err.to_string()))?;
        parse_get_records_response(&text)
    }
}

fn get_records_request(filter: &SearchFilter, start_position: usize, page_size: usize) -> String {
    let mut constraint = String::new();
    write_filter(filter, &mut constraint);

    let mut body = String::from(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    body.push_str(&format!(
        r#"<csw:GetRecords xmlns:csw="http://www.opengis.net/cat/csw/2.0.2" xmlns:ogc="http://www.opengis.net/ogc" xmlns:gml="http://www.opengis.net/gml" xmlns:ows="http://www.opengis.net/ows" service="CSW" version="2.0.2" resultType="results" outputSchema="{OUTPUT_SCHEMA}" startPosition="{start_position}" maxRecords="{page_size}">"#
    ));
    body.push_str(r#"<csw:Query typeNames="csw:Record">"#);
    body.push_str(&format!(
        "<csw:ElementSetName>{ELEMENT_SET}</csw:ElementSetName>"
    ));
    if !constraint.is_empty() {
        body.push_str(r#"<csw:Constraint version="1.1.0"><ogc:Filter>"#);
        body.push_str(&constraint);
        body.push_str("</ogc:Filter></csw:Constraint>");
    }
    body.push_str("</csw:Query></csw:GetRecords>");
    body
}

fn write_filter(filter: &SearchFilter, out: &mut String) {
    match filter {
        SearchFilter::Equal { property, literal } => {
            write_comparison(out, "PropertyIsEqualTo", property, literal);
        }
        SearchFilter::LessOrEqual { property, literal } => {
            write_comparison(out, "PropertyIsLessThanOrEqualTo", property, literal);
        }
        SearchFilter::GreaterOrEqual { property, literal } => {
            write_comparison(out, "PropertyIsGreaterThanOrEqualTo", property, literal);
        }
        SearchFilter::Like { property, literal } => {
            out.push_str(
                r#"<ogc:PropertyIsLike escapeChar="\" singleChar="_" wildCard="%" matchCase="true">"#,
            );
            out.push_str(&format!(
                "<ogc:PropertyName>{}</ogc:PropertyName><ogc:Literal>{}</ogc:Literal>",
                escape(property),
                escape(literal)
            ));
            out.push_str("</ogc:PropertyIsLike>");
        }
        SearchFilter::Bbox { bbox, crs } => {
            out.push_str("<ogc:BBOX><ogc:PropertyName>ows:BoundingBox</ogc:PropertyName>");
            out.push_str(&format!(
                r#"<gml:Envelope srsName="{}"><gml:lowerCorner>{} {}</gml:lowerCorner><gml:upperCorner>{} {}</gml:upperCorner></gml:Envelope>"#,
                escape(crs),
                bbox.lon_min,
                bbox.lat_min,
                bbox.lon_max,
                bbox.lat_max
            ));
            out.push_str("</ogc:BBOX>");
        }
        SearchFilter::And(children) => match children.as_slice() {
            [] => {}
            [single] => write_filter(single, out),
            _ => {
                out.push_str("<ogc:And>");
                for child in children {
                    write_filter(child, out);
                }
                out.push_str("</ogc:And>");
            }
        },
    }
}

fn write_comparison(out: &mut String, tag: &str, property: &str, literal: &str) {
    out.push_str(&format!(
        "<ogc:{tag}><ogc:PropertyName>{}</ogc:PropertyName><ogc:Literal>{}</ogc:Literal></ogc:{tag}>",
        escape(property),
        escape(literal)
    ));
}

enum Field {
    Identifier,
    Title,
    Reference,
    Exception,
}

fn parse_get_records_response(xml: &str) -> Result<RecordPage, CollocateError> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut page = RecordPage {
        records: Vec::new(),
        next_record: 0,
    };
    let mut record: Option<CswRecord> = None;
    let mut field: Option<Field> = None;
    let mut scheme = String::new();
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"SearchResults" => {
                    page.next_record = next_record_attr(&e)?.unwrap_or(0);
                }
                b"Record" | b"SummaryRecord" | b"BriefRecord" => {
                    record = Some(CswRecord::default());
                }
                b"identifier" if record.is_some() => {
                    field = Some(Field::Identifier);
                    text.clear();
                }
                b"title" if record.is_some() => {
                    field = Some(Field::Title);
                    text.clear();
                }
                b"references" if record.is_some() => {
                    scheme = scheme_attr(&e)?;
                    field = Some(Field::Reference);
                    text.clear();
                }
                b"ExceptionText" => {
                    field = Some(Field::Exception);
                    text.clear();
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"SearchResults" {
                    page.next_record = next_record_attr(&e)?.unwrap_or(0);
                }
            }
            Ok(Event::Text(t)) if field.is_some() => {
                let chunk = t
                    .unescape()
                    .map_err(|err| CollocateError::CswResponse(err.to_string()))?;
                text.push_str(&chunk);
            }
            Ok(Event::CData(t)) if field.is_some() => {
                text.push_str(&String::from_utf8_lossy(&t.into_inner()));
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"identifier" => {
                    if let (Some(record), Some(Field::Identifier)) = (record.as_mut(), field.take())
                    {
                        record.identifier = text.trim().to_string();
                    }
                }
                b"title" => {
                    if let (Some(record), Some(Field::Title)) = (record.as_mut(), field.take()) {
                        record.title = text.trim().to_string();
                    }
                }
                b"references" => {
                    if let (Some(record), Some(Field::Reference)) = (record.as_mut(), field.take())
                    {
                        record.references.push(Reference {
                            scheme: std::mem::take(&mut scheme),
                            url: text.trim().to_string(),
                        });
                    }
                }
                b"ExceptionText" => {
                    if let Some(Field::Exception) = field.take() {
                        return Err(CollocateError::CswResponse(format!(
                            "catalogue exception: {}",
                            text.trim()
                        )));
                    }
                }
                b"Record" | b"SummaryRecord" | b"BriefRecord" => {
                    if let Some(done) = record.take() {
                        page.records.push(done);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                return Err(CollocateError::CswResponse(format!(
                    "at position {}: {err}",
                    reader.buffer_position()
                )));
            }
        }
        buf.clear();
    }
    Ok(page)
}

fn next_record_attr(e: &BytesStart<'_>) -> Result<Option<usize>, CollocateError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| CollocateError::CswResponse(err.to_string()))?;
        if attr.key.as_ref() == b"nextRecord" {
            let value = String::from_utf8_lossy(&attr.value).trim().to_string();
            let parsed = value
                .parse::<usize>()
                .map_err(|_| CollocateError::CswResponse(format!("invalid nextRecord: {value}")))?;
            return Ok(Some(parsed));
        }
    }
    Ok(None)
}

fn scheme_attr(e: &BytesStart<'_>) -> Result<String, CollocateError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| CollocateError::CswResponse(err.to_string()))?;
        if attr.key.as_ref() == b"scheme" {
            let value = attr
                .unescape_value()
                .map_err(|err| CollocateError::CswResponse(err.to_string()))?;
            return Ok(value.into_owned());
        }
    }
    Ok(String::new())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;

    use super::*;
    use crate::filter::TEMP_EXTENT_BEGIN;

    const RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<csw:GetRecordsResponse xmlns:csw="http://www.opengis.net/cat/csw/2.0.2" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:dct="http://purl.org/dc/terms/" version="2.0.2">
  <csw:SearchStatus timestamp="2019-01-07T12:00:00Z"/>
  <csw:SearchResults numberOfRecordsMatched="12" numberOfRecordsReturned="2" nextRecord="11" elementSet="full">
    <csw:Record>
      <dc:identifier>no.met:arome-a</dc:identifier>
      <dc:title>Arome-Arctic 2.5Km deterministic 2019-01-07</dc:title>
      <dct:references scheme="OPENDAP:OPENDAP">https://thredds.met.no/thredds/dodsC/a.nc</dct:references>
      <dct:references scheme="OGC:WMS">https://thredds.met.no/thredds/wms/a.nc</dct:references>
    </csw:Record>
    <csw:Record>
      <dc:identifier>no.met:arome-b</dc:identifier>
      <dc:title>Arome-Arctic 2.5Km deterministic 2019-01-08</dc:title>
    </csw:Record>
  </csw:SearchResults>
</csw:GetRecordsResponse>"#;

    #[test]
    fn parse_response_records_and_next() {
        let page = parse_get_records_response(RESPONSE).unwrap();
        assert_eq!(page.next_record, 11);
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].identifier, "no.met:arome-a");
        assert_eq!(
            page.records[0].opendap_url(),
            Some("https://thredds.met.no/thredds/dodsC/a.nc")
        );
        assert_eq!(page.records[1].opendap_url(), None);
    }

    #[test]
    fn parse_response_empty_results() {
        let xml = r#"<csw:GetRecordsResponse xmlns:csw="http://www.opengis.net/cat/csw/2.0.2">
            <csw:SearchResults numberOfRecordsMatched="0" numberOfRecordsReturned="0" nextRecord="0"/>
        </csw:GetRecordsResponse>"#;
        let page = parse_get_records_response(xml).unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.next_record, 0);
    }

    #[test]
    fn parse_exception_report() {
        let xml = r#"<ows:ExceptionReport xmlns:ows="http://www.opengis.net/ows">
            <ows:Exception exceptionCode="InvalidParameterValue">
                <ows:ExceptionText>Invalid value for startposition</ows:ExceptionText>
            </ows:Exception>
        </ows:ExceptionReport>"#;
        let err = parse_get_records_response(xml).unwrap_err();
        assert_matches!(err, CollocateError::CswResponse(message) if message.contains("startposition"));
    }

    #[test]
    fn opendap_scheme_match_is_case_insensitive() {
        let record = CswRecord {
            identifier: "x".to_string(),
            title: "x".to_string(),
            references: vec![Reference {
                scheme: "OPeNDAP:OPeNDAP".to_string(),
                url: "https://example.org/x.nc".to_string(),
            }],
        };
        assert_eq!(record.opendap_url(), Some("https://example.org/x.nc"));
        let empty = CswRecord::default();
        assert_eq!(empty.opendap_url(), None);
    }

    #[test]
    fn request_body_shape() {
        let filter = SearchFilter::and(vec![
            SearchFilter::less_or_equal(TEMP_EXTENT_BEGIN, "2019-01-08 10:00:00"),
            SearchFilter::greater_or_equal(TEMP_EXTENT_BEGIN, "2019-01-06 10:00:00"),
            SearchFilter::free_text("Meps & friends"),
        ]);
        let body = get_records_request(&filter, 0, 10);
        assert!(body.contains(r#"startPosition="0""#));
        assert!(body.contains(r#"maxRecords="10""#));
        assert!(body.contains("<csw:ElementSetName>full</csw:ElementSetName>"));
        assert!(body.contains("<ogc:And>"));
        assert!(body.contains("PropertyIsLessThanOrEqualTo"));
        assert!(body.contains("PropertyIsGreaterThanOrEqualTo"));
        assert!(body.contains(r#"escapeChar="\" singleChar="_" wildCard="%" matchCase="true""#));
        assert!(body.contains("Meps &amp; friends"));
        assert_eq!(body.matches(TEMP_EXTENT_BEGIN).count(), 2);
    }

    #[test]
    fn request_single_filter_has_no_and_wrapper() {
        let body = get_records_request(&SearchFilter::free_text("NorKyst"), 0, 10);
        assert!(!body.contains("<ogc:And>"));
        assert!(body.contains("NorKyst"));
    }

    #[test]
    fn bbox_filter_envelope_axis_order() {
        let mut out = String::new();
        write_filter(
            &SearchFilter::bbox(crate::domain::BoundingBox::new(-18.0, 68.0, 16.0, 76.0)),
            &mut out,
        );
        assert!(out.contains("<gml:lowerCorner>-18 68</gml:lowerCorner>"));
        assert!(out.contains("<gml:upperCorner>16 76</gml:upperCorner>"));
        assert!(out.contains("ows:BoundingBox"));
    }

    struct PagingStub {
        pages: Vec<RecordPage>,
        calls: Mutex<Vec<usize>>,
    }

    impl PagingStub {
        fn new(pages: Vec<RecordPage>) -> Self {
            Self {
                pages,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl CswConnection for PagingStub {
        fn get_records(
            &self,
            _filter: &SearchFilter,
            start_position: usize,
            _page_size: usize,
        ) -> Result<RecordPage, CollocateError> {
            let mut calls = self.calls.lock().unwrap();
            let index = calls.len().min(self.pages.len() - 1);
            calls.push(start_position);
            Ok(self.pages[index].clone())
        }
    }

    fn record(identifier: &str, title: &str) -> CswRecord {
        CswRecord {
            identifier: identifier.to_string(),
            title: title.to_string(),
            references: Vec::new(),
        }
    }

    #[test]
    fn search_stops_on_zero_next_record() {
        let stub = PagingStub::new(vec![
            RecordPage {
                records: vec![record("a", "one"), record("b", "two")],
                next_record: 11,
            },
            RecordPage {
                records: vec![record("c", "three")],
                next_record: 0,
            },
        ]);
        let client = CatalogClient::new(stub);
        let records = client
            .search(&[SearchFilter::free_text("x")], &SearchOptions::default())
            .unwrap();
        assert_eq!(
            records.keys().collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
        assert_eq!(*client.connection.calls.lock().unwrap(), vec![0, 11]);
    }

    #[test]
    fn search_terminates_at_max_records_cap() {
        let stub = PagingStub::new(vec![RecordPage {
            records: vec![record("a", "one")],
            next_record: 1,
        }]);
        let client = CatalogClient::new(stub);
        let options = SearchOptions {
            page_size: 10,
            max_records: 30,
        };
        let records = client
            .search(&[SearchFilter::free_text("x")], &options)
            .unwrap();
        assert_eq!(records.len(), 1);
        // Offsets advance by page_size + 1 until the cap.
        assert_eq!(*client.connection.calls.lock().unwrap(), vec![0, 11, 22]);
    }

    #[test]
    fn search_later_pages_override_duplicate_keys() {
        let stub = PagingStub::new(vec![
            RecordPage {
                records: vec![record("a", "stale")],
                next_record: 11,
            },
            RecordPage {
                records: vec![record("a", "fresh")],
                next_record: 0,
            },
        ]);
        let client = CatalogClient::new(stub);
        let records = client
            .search(&[SearchFilter::free_text("x")], &SearchOptions::default())
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records["a"].title, "fresh");
    }
}
