//! Media engine integration

pub mod factory;
pub mod track;

pub use factory::MediaFactory;
pub use track::{SourceTrack, MIRRORED_STREAM_LABEL};
