// Balam: data access for a wildlife-monitoring platform
//
// This is the library root. Each module corresponds to a layer used by the
// camera-trap inference pipelines: storage, datasets, sequence grouping and
// the pipeline operations built on top of them.

pub mod config;
pub mod dataset;
pub mod db;
pub mod output;
pub mod pipeline;
pub mod sequence;
pub mod status;
