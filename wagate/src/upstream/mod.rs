//! 上游适配器模块
//! Upstream adapter module
//!
//! 定义了监督器与 WhatsApp Web 传输之间的窄门面
//! Defines the narrow facade between the supervisor and the WhatsApp Web transport
//!
//! 监督器只通过这里的特性与上游交互；事件按到达顺序逐个投递，
//! 同一个套接字上不允许并发写入。
//! The supervisor talks to the upstream only through these traits; events are
//! delivered one at a time in arrival order, and concurrent writes to one
//! socket are not allowed.

use crate::error::Result;
use crate::upstream::auth::{AuthCreds, AuthState, BoundIdentity};
use async_trait::async_trait;
use tokio::sync::mpsc;

pub mod auth;
pub mod sim;

/// 连接状态
/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
  Connecting,
  Open,
  Close,
}

/// 断开信息
/// Disconnect info
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisconnectInfo {
  /// 上游给出的状态码；401 表示已登出
  /// Upstream status code; 401 means logged out
  pub status_code: Option<u16>,
  pub message: Option<String>,
}

/// 多态的连接更新值；监督器按字段是否存在分派
/// Polymorphic connection update; the supervisor dispatches on field presence
#[derive(Debug, Clone, Default)]
pub struct ConnectionUpdate {
  pub connection: Option<ConnectionState>,
  pub qr: Option<String>,
  pub last_disconnect: Option<DisconnectInfo>,
}

/// 套接字事件流中的一项
/// One item of the socket event stream
#[derive(Debug, Clone)]
pub enum SocketUpdate {
  /// 凭证轮换（`creds.update`）
  /// Credential rotation (`creds.update`)
  Creds(AuthCreds),
  /// 连接更新（`connection.update`）
  /// Connection update (`connection.update`)
  Connection(ConnectionUpdate),
}

/// 套接字构造选项
/// Socket construction options
#[derive(Debug, Clone, Default)]
pub struct SocketOptions {
  /// 配对界面上显示的名称
  /// Name shown on the pairing screen
  pub display_name: Option<String>,
  /// 连接后是否立即标记在线
  /// Whether to mark the account online right after connecting
  pub mark_online: bool,
}

/// 发送回执
/// Send receipt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
  /// 上游返回的消息 ID，可能为空字符串
  /// Upstream message id, may be the empty string
  pub message_id: String,
}

/// 上游门面：创建套接字并解析协议版本
/// Upstream facade: creates sockets and resolves the protocol version
#[async_trait]
pub trait Upstream: Send + Sync {
  /// 解析当前协议版本；实现必须按进程记忆结果并在失败时退回常量
  /// Resolve the current protocol version; implementations must memoise per
  /// process and fall back to the constant on failure
  async fn resolve_version(&self) -> [u32; 3];

  /// 创建新的套接字
  /// Create a new socket
  async fn new_socket(
    &self,
    auth: AuthState,
    version: [u32; 3],
    options: SocketOptions,
  ) -> Result<std::sync::Arc<dyn Socket>>;
}

/// 单个 WhatsApp Web 套接字
/// A single WhatsApp Web socket
#[async_trait]
pub trait Socket: Send + Sync {
  /// 取走事件接收器；只允许一个消费者，再次调用返回 None
  /// Take the event receiver; only one consumer is allowed, later calls return None
  fn take_updates(&self) -> Option<mpsc::Receiver<SocketUpdate>>;

  /// 当前绑定的账号身份；open 之前为 None
  /// Currently bound account identity; None before open
  fn bound_user(&self) -> Option<BoundIdentity>;

  /// 发送文本消息
  /// Send a text message
  async fn send_text(&self, jid: &str, text: &str) -> Result<SendReceipt>;

  /// 请求上游登出
  /// Request an upstream logout
  async fn logout(&self) -> Result<()>;

  /// 强制关闭底层连接
  /// Forcefully close the underlying connection
  async fn close(&self) -> Result<()>;
}
