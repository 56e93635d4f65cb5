/// Container runtime access through the docker CLI
pub mod docker;

/// Per-container tailing threads with reconnect
pub mod log_collector;

pub use docker::{
    split_timestamp, ContainerMetadata, DockerCli, LogSource, LogStream, StreamEvent, TailMode,
    TailOptions,
};
pub use log_collector::{AdapterExit, ContainerLogCollector, LineSink, ReconnectPolicy};
