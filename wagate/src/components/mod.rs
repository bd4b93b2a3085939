//! 组件模块
//! Components module
//!
//! 包含事件总线与会话监督器，以及统一的组件生命周期特性
//! Contains the event bus and the session supervisor, plus the unified
//! component lifecycle trait

use std::sync::Arc;
use tokio::task::JoinHandle;

pub mod event_bus;
pub mod supervisor;

/// 后台组件的统一生命周期
/// Unified lifecycle of background components
pub trait ComponentLifecycle {
  /// 启动组件并返回其任务句柄
  /// Start the component and return its task handle
  fn start(self: Arc<Self>) -> JoinHandle<()>;

  /// 请求组件终止
  /// Request the component to terminate
  fn shutdown(&self);

  /// 检查是否已停止
  /// Check if it has stopped
  fn is_done(&self) -> bool;
}
