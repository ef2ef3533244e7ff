//! Section persistence, background work and the resident section index

pub mod container;
pub mod codec;
pub mod pools;
pub mod in_flight;
pub mod file_handler;
pub mod generation;
pub mod section_index;

pub use container::{Compression, Container, ContainerHeader};
pub use codec::{PayloadRegistry, PayloadRegistryBuilder};
pub use pools::WorkerPools;
pub use in_flight::InFlight;
pub use file_handler::{FileHandler, section_path};
pub use generation::{GenerationQueue, WorldGenerator};
pub use section_index::SectionIndex;
