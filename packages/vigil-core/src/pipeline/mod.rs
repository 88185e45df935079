//! The async media pipeline: frame intake, sampling, and packaging.

pub mod encoder;
pub mod packager;
pub mod queue;
pub mod sampler;

pub use encoder::{encode_mp4, resize_and_encode, EncodedFrame};
pub use packager::MediaPackager;
pub use queue::DropOldestQueue;
pub use sampler::sample_batch;
