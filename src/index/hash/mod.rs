pub mod bucket;
pub mod directory;
pub mod error;
pub mod table;

pub use bucket::{bucket_array_size, HashBucketPage};
pub use directory::{HashDirectoryPage, DIRECTORY_ARRAY_SIZE, MAX_DEPTH};
pub use error::HashIndexError;
pub use table::ExtendibleHashIndex;
