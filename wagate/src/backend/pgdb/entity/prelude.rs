//! 实体前置导出
//! Entity prelude

pub use super::api_keys::Entity as ApiKeys;
pub use super::session_locks::Entity as SessionLocks;
pub use super::sessions::Entity as Sessions;
pub use super::signal_keys::Entity as SignalKeys;
