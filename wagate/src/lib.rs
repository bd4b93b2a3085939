//! # Wagate
//!
//! Multi-tenant WhatsApp Web session lifecycle engine
//!
//! Wagate 是一个多租户 WhatsApp Web 会话网关的核心引擎，代表 API 调用方
//! 维护一批长期存活的 WhatsApp Web 会话。
//! Wagate is the core engine of a multi-tenant WhatsApp Web gateway,
//! maintaining a fleet of long-lived WhatsApp Web sessions on behalf of API
//! clients.
//!
//! ## 特性
//! ## Features
//!
//! - 每个租户密钥一条会话，配对 → 已连接 → 重连退避 → 已登出的完整状态机
//!   - One session per tenant key, with the full pairing → connected →
//!     reconnect-backoff → logged-out state machine
//! - 持久化的单持有者会话锁，带 TTL 与续租，跨进程协调会话归属
//!   - Durable single-owner session locks with TTL and renewal, coordinating
//!     ownership across processes
//! - Signal 根凭证与键材料的崩溃一致持久化，字节缓冲经 JSON 双射往返
//!   - Crash-consistent persistence of Signal root credentials and key
//!     material, byte buffers round-tripping bijectively through JSON
//! - 按租户密钥扇出的状态与二维码事件流，带心跳与死订阅者剔除
//!   - Per-tenant fan-out of status and qr events, with heartbeats and dead
//!     subscriber pruning
//! - 带抖动的指数退避重连，同一密钥同一进程至多一个活动套接字
//!   - Jittered exponential reconnect backoff, at most one live socket per
//!     key per process
//!
//! ## 快速开始
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wagate::backend::MemoryStore;
//! use wagate::components::event_bus::EventBus;
//! use wagate::components::supervisor::Supervisor;
//! use wagate::config::EngineConfig;
//! use wagate::upstream::sim::SimUpstream;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 内存存储 + 模拟上游（生产环境换成 PgStore 与真实传输适配器）
//!     // Memory store + simulated upstream (swap in PgStore and a real
//!     // transport adapter for production)
//!     let store = Arc::new(MemoryStore::new());
//!     let upstream = Arc::new(SimUpstream::new());
//!     let bus = Arc::new(EventBus::new());
//!     let supervisor = Supervisor::new(store, upstream, bus, EngineConfig::default())?;
//!
//!     let key = supervisor.registry().generate(Some("demo tenant")).await?;
//!     let response = supervisor.get_qr(&key.key, Some("Demo Bot".into())).await?;
//!     println!("pair by rendering: {:?}", response.qr);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod base;
pub mod components;
pub mod config;
pub mod error;
pub mod registry;
pub mod session;
pub mod upstream;

pub use base::Store;
pub use components::event_bus::{EventBus, Heartbeat, StreamFrame};
pub use components::supervisor::{QrResponse, Supervisor, WarmReport};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use registry::KeyRegistry;
pub use session::{ApiKeyRecord, ConnectionInfo, SessionRecord, SessionStatus};
