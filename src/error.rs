use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CollocateError {
    #[error("invalid scene filename: {0}")]
    SceneFilename(String),

    #[error("incorrect datetime format: got {got}, expected YYYYMMDDThhmmss")]
    DateFormat { got: String },

    #[error("could not parse timestamp: {0}")]
    Timestamp(String),

    #[error("invalid time relation: {0}, expected any (0), before (1) or after (2)")]
    InvalidRelation(String),

    #[error("unknown dataset family: {0}")]
    UnknownFamily(String),

    #[error("unknown {family} subset: {subset}")]
    UnknownSubset { family: String, subset: String },

    #[error("polygon search extents are not supported, only bounding boxes")]
    UnsupportedSearch,

    #[error("{0}")]
    NotImplemented(String),

    #[error("dataset request failed: {0}")]
    DapHttp(String),

    #[error("cannot open dataset {url}: {reason}")]
    CannotOpen { url: String, reason: String },

    #[error("dataset not available: {url}")]
    Unavailable { url: String },

    #[error("dataset at {url} has no {attribute} attribute")]
    MetadataMissing { url: String, attribute: String },

    #[error("input record set is empty")]
    EmptyInput,

    #[error("no available datasets for the given search interval")]
    NoAvailableDatasets,

    #[error("no available datasets before {reference}")]
    NoDatasetsBefore { reference: String },

    #[error("no available datasets after {reference}")]
    NoDatasetsAfter { reference: String },

    #[error("catalogue request failed: {0}")]
    CswHttp(String),

    #[error("catalogue returned status {status}: {message}")]
    CswStatus { status: u16, message: String },

    #[error("failed to parse catalogue response: {0}")]
    CswResponse(String),

    #[error("download request failed: {0}")]
    DownloadHttp(String),

    #[error("download returned status {status}: {message}")]
    DownloadStatus { status: u16, message: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
