//! Frame ingestion: the TCP reader and the in-process distributor.

pub mod decoder;
pub mod distributor;
pub mod frame;
pub mod reader;

pub use decoder::{FramDecoder, StreamDecoder};
pub use distributor::{FrameDistributor, FrameSubscription};
pub use frame::Frame;
pub use reader::{ReaderState, TcpFrameReader};
