mod job;
mod library;
mod media_file;
mod metrics;
mod work_items;

pub use job::{ScanJob, ScanStatus};
pub use library::{Library, LibraryType};
pub use media_file::{MediaFileRecord, MediaType};
pub use metrics::{ContainerLimits, Limits, Metrics, NetStats};
pub use work_items::{DirectoryWorkItem, FileWorkItem, ResultItem};
