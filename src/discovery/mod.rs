//! 服务发现模块
//!
//! 包含服务记录、解析缓存、区域选择器和 watch 订阅管理。

pub mod cache;
pub mod options;
pub mod record;
pub mod selector;
pub mod watch;

pub use cache::{CacheEntry, ResolutionCache};
pub use options::{DiscoverOptions, Freshness, Resolution};
pub use record::ServiceRecord;
pub use selector::{RegionSelector, Selection};
pub(crate) use watch::WatchManager;
pub use watch::{ConnectionStatus, WatchEvent, WatchHandle};
