//! 存储后端模块
//! Storage backend module
//!
//! 提供存储门面的两种实现：PostgresSQL 与内存
//! Provides the two implementations of the storage facade: PostgresSQL and memory

pub mod memdb;
pub mod pgdb;

pub use memdb::MemoryStore;
pub use pgdb::PgStore;
