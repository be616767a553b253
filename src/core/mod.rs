pub mod cache;
pub mod checksum;
pub mod comparator;
pub mod conflict;
pub mod filter;
pub mod listing;
pub mod queue;
pub mod resource;
pub mod status;
pub mod symlink;
pub mod throttle;
pub mod transfer;

pub use cache::DirectoryCache;
pub use checksum::ChecksumHasher;
pub use comparator::{
    ActionSummary, CompareStrategy, Comparison, ComparisonService, FileComparator, SyncAction,
    SyncDirection,
};
pub use conflict::TransferAction;
pub use filter::{filter_for, FilterContext, FilterOptions, SameSizePolicy, TransferFilter};
pub use listing::{AttributedList, Comparator, DirectoryListing, ExcludePatterns, ListFilter};
pub use queue::{QueueEntry, TransferQueue};
pub use resource::{Attributes, Checksum, HashAlgorithm, ReferenceKey, Resource, ResourceType};
pub use status::TransferStatus;
pub use symlink::{SymlinkDecision, SymlinkPolicy, SymlinkResolver};
pub use throttle::BandwidthThrottle;
pub use transfer::{
    FileOutcome, FileResult, Transfer, TransferItem, TransferKind, TransferOptions,
    TransferOutcome, TransferState,
};
