//! Library half of the `kaf` event-log server: the storage engine (record
//! codec, log file, per-log actor, archival procedure), the log-set
//! registry, the stats loop, and the HTTP glue on top of them. `main.rs`
//! is a thin binary that wires these together from CLI arguments.

pub mod actor;
pub mod archive;
pub mod codec;
pub mod http;
pub mod logfile;
pub mod registry;
pub mod stats;
