//! Collocate a satellite scene with ocean and atmospheric model archives:
//! search a CSW catalogue around the scene's acquisition time, probe the
//! candidates over OPeNDAP, and pick the one nearest in time.

pub mod config;
pub mod csw;
pub mod dap;
pub mod domain;
pub mod download;
pub mod engine;
pub mod error;
pub mod families;
pub mod filter;
