//! PostgresSQL 存储模块
//! PostgresSQL storage module
//!
//! 使用 SeaORM 实现存储门面
//! Implements the storage facade using SeaORM

pub mod entity;
mod store;

pub use store::PgStore;
