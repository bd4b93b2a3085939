//! 内存存储模块
//! Memory storage module
//!
//! 使用内存数据结构实现存储门面
//! Implements the storage facade using in-memory data structures

mod store;

pub use store::MemoryStore;
