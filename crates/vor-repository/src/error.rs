use thiserror::Error;
use vor_types::Version;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("store error: {0}")]
    Store(#[from] vor_store::StoreError),

    #[error("schema error: {0}")]
    Schema(#[from] vor_schema::SchemaError),

    #[error("item error: {0}")]
    Item(#[from] vor_item::ItemError),

    #[error("codec error: {0}")]
    Codec(#[from] vor_codec::CodecError),

    #[error(transparent)]
    Merge(#[from] vor_merge::MergeError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("version {requested} is past the current version {current}")]
    NoSuchVersion { requested: Version, current: Version },

    #[error("commit still conflicting after {0} attempts")]
    CommitRetries(usize),
}

impl RepositoryError {
    /// Whether this failure is a refused merge the caller could settle
    /// with a callback.
    pub fn is_merge_conflict(&self) -> bool {
        matches!(self, Self::Merge(e) if e.reason().is_some())
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;
