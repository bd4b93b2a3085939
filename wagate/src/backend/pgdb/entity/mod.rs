//! 数据库实体模块
//! Database entity module

pub mod api_keys;
pub mod prelude;
pub mod session_locks;
pub mod sessions;
pub mod signal_keys;

pub use prelude::*;
