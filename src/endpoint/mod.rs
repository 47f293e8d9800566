//! Source and sink signaling endpoints

pub mod sink;
pub mod source;

pub use sink::SinkEndpoint;
pub use source::SourceEndpoint;
