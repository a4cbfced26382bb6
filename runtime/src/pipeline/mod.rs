pub mod chunker;
pub mod cluster;
pub mod community;
pub mod extractor;
pub mod graph;
pub mod indexer;
pub mod summarizer;
pub mod tree;
pub mod types;
pub mod utils;

pub use chunker::{Chunk, ChunkConfig, Chunker, ParagraphChunker};
pub use extractor::{GleaningExtractor, RecordExtractor};
pub use graph::{EntityGraph, MergeStrategy};
pub use indexer::{DeletePartition, IndexOptions, IndexStats, Indexer};
pub use summarizer::DescriptionSummarizer;
pub use tree::{TreeBuilder, TreeConfig};
