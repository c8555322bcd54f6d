pub mod aggregator;
pub mod config;
pub mod depot;
pub mod external;
pub mod filename_date;
pub mod grouping;
pub mod mosaic;
pub mod orchestrator;
pub mod raster_io;
pub mod region;
pub mod render;
pub mod sink;
pub mod types;

pub use config::Config;
pub use orchestrator::{Orchestrator, RunSummary};
pub use types::{AodError, Tier};
