// Filter streams: each wraps exactly one stream and transforms bytes or
// addresses in one dimension.

pub mod buffer;
pub mod line_ending;
pub mod offset;
pub mod partition;
pub mod remap;
pub mod swap;

pub use buffer::BufferFilter;
pub use line_ending::LineEndingFilter;
pub use offset::OffsetFilter;
pub use partition::{PartitionEntry, PartitionFilter};
pub use remap::{parse_data_map, MapItem, RegionKind, RemapFilter};
pub use swap::SwapFilter;
