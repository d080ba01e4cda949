pub mod local;
pub mod qdrant;

pub use local::{IndexFile, LocalIndex, StoredDocument, INDEX_FILE_NAME};
pub use qdrant::QdrantIndex;
