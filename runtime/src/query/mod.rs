pub mod aggregator;
pub mod dedup;
pub mod retrieval;

pub use aggregator::{QueryAggregator, QueryAnswer, Reference};
pub use retrieval::{EvidenceItem, QueryMode, retrieve_evidence};
