//! Dataset engine
//!
//! Reads raw rows into block-partitioned datasets and streams them through
//! parallel transform workers with prefetching, local shuffling and
//! backpressure.

pub mod backpressure;
pub mod dataset;
pub mod iterator;
pub mod pipeline;
pub mod reader;
pub mod shuffle;
pub mod split;

pub use backpressure::BackpressureController;
pub use dataset::{Dataset, DatasetMetadata, DatasetSchema, ExecutionContext};
pub use iterator::{BatchIterator, DataIterator, IterOptions};
pub use pipeline::{BatchMapper, MapOptions, MappedDataset, MapperFactory};
pub use reader::{DatasetReader, ItemsReader, JsonReader, ReadKwargs, ReaderRegistry};
pub use shuffle::LocalShuffleBuffer;
pub use split::SplitRouter;
