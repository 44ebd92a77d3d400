use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::csw::{CandidateSet, CatalogClient, CswConnection, CswRecord, SearchOptions};
use crate::dap::{DapClient, Introspector};
use crate::domain::{CoverageBound, ReferenceContext, SceneFilename, SelectionRelation};
use crate::error::CollocateError;
use crate::filter::{self, SearchFilter};

/// Finds catalogue datasets nearest in time to a reference dataset. The
/// reference context is fixed at construction; every search and selection
/// call is independent.
pub struct CollocationEngine<C, D> {
    context: ReferenceContext,
    catalog: CatalogClient<C>,
    introspector: Introspector<D>,
}

impl<C: CswConnection, D: DapClient> CollocationEngine<C, D> {
    /// Seeds the reference context from the dataset's own metadata: coverage
    /// start time and geospatial bounding box.
    pub fn from_dataset(url: &str, connection: C, dap: D) -> Result<Self, CollocateError> {
        let introspector = Introspector::new(dap);
        let (time, bbox) = introspector.open_and_extract(url)?;
        Ok(Self {
            context: ReferenceContext::new(time, Some(bbox)),
            catalog: CatalogClient::new(connection),
            introspector,
        })
    }

    /// Seeds the reference context from a scene filename alone. No bounding
    /// box, so searches are constrained in time only.
    pub fn from_scene_filename(name: &str, connection: C, dap: D) -> Result<Self, CollocateError> {
        let scene: SceneFilename = name.parse()?;
        Ok(Self::with_context(
            ReferenceContext::new(scene.start_time(), None),
            connection,
            dap,
        ))
    }

    pub fn with_context(context: ReferenceContext, connection: C, dap: D) -> Self {
        Self {
            context,
            catalog: CatalogClient::new(connection),
            introspector: Introspector::new(dap),
        }
    }

    pub fn context(&self) -> &ReferenceContext {
        &self.context
    }

    pub fn introspector(&self) -> &Introspector<D> {
        &self.introspector
    }

    /// Catalogue search around the reference time. `extra` predicates are
    /// conjoined with the temporal window and, when the context carries one,
    /// the bounding box. The result may be empty.
    pub fn collocate(
        &self,
        extra: &[SearchFilter],
        dt: TimeDelta,
        options: &SearchOptions,
    ) -> Result<CandidateSet, CollocateError> {
        let mut filters: Vec<SearchFilter> = extra.to_vec();
        let (upper, lower) = filter::temporal_window(self.context.time(), dt);
        filters.push(upper);
        filters.push(lower);
        if let Some(bbox) = self.context.bbox() {
            filters.push(SearchFilter::bbox(bbox));
        }
        self.catalog.search(&filters, options)
    }

    pub fn nearest_by_start<'r>(
        &self,
        records: &'r CandidateSet,
        relation: SelectionRelation,
    ) -> Result<&'r CswRecord, CollocateError> {
        self.nearest_by(records, CoverageBound::Start, relation)
    }

    pub fn nearest_by_end<'r>(
        &self,
        records: &'r CandidateSet,
        relation: SelectionRelation,
    ) -> Result<&'r CswRecord, CollocateError> {
        self.nearest_by(records, CoverageBound::End, relation)
    }

    /// Ranks `records` by the distance between the chosen coverage bound and
    /// the reference time, then selects per `relation`. Records without an
    /// OPeNDAP reference and records failing the availability probe are
    /// skipped; an empty pool after skipping is an error distinct from an
    /// empty input.
    pub fn nearest_by<'r>(
        &self,
        records: &'r CandidateSet,
        bound: CoverageBound,
        relation: SelectionRelation,
    ) -> Result<&'r CswRecord, CollocateError> {
        if records.is_empty() {
            return Err(CollocateError::EmptyInput);
        }
        let mut survivors: Vec<&CswRecord> = Vec::new();
        let mut deltas: Vec<TimeDelta> = Vec::new();
        for (key, record) in records {
            let Some(url) = record.opendap_url() else {
                debug!(%key, "record has no OPeNDAP reference, skipping");
                continue;
            };
            if let Err(err) = self.introspector.assert_available(url) {
                debug!(%key, %err, "skipping unavailable dataset");
                continue;
            }
            let coverage = self.introspector.time_coverage(url)?;
            survivors.push(record);
            deltas.push(coverage.bound(bound) - self.context.time());
        }
        if survivors.is_empty() {
            return Err(CollocateError::NoAvailableDatasets);
        }
        let index = select_index(&deltas, relation, self.context.time())?;
        Ok(survivors[index])
    }

    /// Convenience flow: collocate, select nearest, return its URL. An
    /// empty search result is `Ok(None)`; matches that all fail the
    /// availability probe stay an error.
    pub fn resolve_nearest(
        &self,
        extra: &[SearchFilter],
        dt: TimeDelta,
        bound: CoverageBound,
        relation: SelectionRelation,
        options: &SearchOptions,
    ) -> Result<Option<String>, CollocateError> {
        let records = self.collocate(extra, dt, options)?;
        if records.is_empty() {
            debug!("catalogue search returned no records");
            return Ok(None);
        }
        let nearest = self.nearest_by(&records, bound, relation)?;
        Ok(nearest.opendap_url().map(str::to_string))
    }
}

/// Index of the delta selected under `relation`. Before and After substitute
/// disqualified entries with the global minimum or maximum and then take the
/// first arg-extremum of the masked array, so ties resolve to the earliest
/// index. Zero deltas count as neither before nor after and are never
/// substituted.
fn select_index(
    deltas: &[TimeDelta],
    relation: SelectionRelation,
    reference: DateTime<Utc>,
) -> Result<usize, CollocateError> {
    if deltas.is_empty() {
        return Err(CollocateError::EmptyInput);
    }
    match relation {
        SelectionRelation::Any => {
            let absolutes: Vec<TimeDelta> = deltas.iter().map(|delta| delta.abs()).collect();
            Ok(argmin(&absolutes))
        }
        SelectionRelation::Before => {
            if !deltas.iter().any(|delta| *delta < TimeDelta::zero()) {
                return Err(CollocateError::NoDatasetsBefore {
                    reference: reference.to_string(),
                });
            }
            let global_min = deltas[argmin(deltas)];
            let masked: Vec<TimeDelta> = deltas
                .iter()
                .map(|delta| {
                    if *delta > TimeDelta::zero() {
                        global_min
                    } else {
                        *delta
                    }
                })
                .collect();
            Ok(argmax(&masked))
        }
        SelectionRelation::After => {
            if !deltas.iter().any(|delta| *delta > TimeDelta::zero()) {
                return Err(CollocateError::NoDatasetsAfter {
                    reference: reference.to_string(),
                });
            }
            let global_max = deltas[argmax(deltas)];
            let masked: Vec<TimeDelta> = deltas
                .iter()
                .map(|delta| {
                    if *delta < TimeDelta::zero() {
                        global_max
                    } else {
                        *delta
                    }
                })
                .collect();
            Ok(argmin(&masked))
        }
    }
}

fn argmin(deltas: &[TimeDelta]) -> usize {
    let mut best = 0usize;
    for (index, delta) in deltas.iter().enumerate().skip(1) {
        if *delta < deltas[best] {
            best = index;
        }
    }
    best
}

fn argmax(deltas: &[TimeDelta]) -> usize {
    let mut best = 0usize;
    for (index, delta) in deltas.iter().enumerate().skip(1) {
        if *delta > deltas[best] {
            best = index;
        }
    }
    best
}
