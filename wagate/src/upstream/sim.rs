//! 模拟上游模块
//! Simulated upstream module
//!
//! 使用内存数据结构实现上游门面，供测试和无传输模式使用。
//! Implements the upstream facade with in-memory structures, used by tests and
//! the transport-less mode.
//!
//! 测试通过 `emit_*` 方法注入二维码、打开与关闭事件，并检查已发送的消息。
//! Tests inject qr/open/close events through the `emit_*` methods and inspect
//! the messages that were sent.

use crate::base::constants::FALLBACK_WA_VERSION;
use crate::error::{Error, Result};
use crate::upstream::auth::{AuthState, BoundIdentity};
use crate::upstream::{
  ConnectionState, ConnectionUpdate, DisconnectInfo, SendReceipt, Socket, SocketOptions,
  SocketUpdate, Upstream,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

/// 每个套接字事件通道的容量
/// Capacity of each socket's event channel
const EVENT_BUFFER: usize = 64;

/// 模拟上游
/// Simulated upstream
#[derive(Default)]
pub struct SimUpstream {
  sockets: Mutex<Vec<Arc<SimSocket>>>,
  fail_next: AtomicBool,
}

impl SimUpstream {
  /// 创建新的模拟上游
  /// Create a new simulated upstream
  pub fn new() -> Self {
    Self::default()
  }

  /// 让下一次套接字构造失败（测试 ERROR 路径）
  /// Make the next socket construction fail (tests the ERROR path)
  pub fn fail_next_connect(&self) {
    self.fail_next.store(true, Ordering::SeqCst);
  }

  /// 迄今创建的套接字数量
  /// Number of sockets created so far
  pub fn socket_count(&self) -> usize {
    self.sockets.lock().unwrap().len()
  }

  /// 最近创建的套接字
  /// The most recently created socket
  pub fn last_socket(&self) -> Option<Arc<SimSocket>> {
    self.sockets.lock().unwrap().last().cloned()
  }
}

#[async_trait]
impl Upstream for SimUpstream {
  /// 模拟环境下版本始终已知，直接返回常量
  /// The version is always known in the simulator, return the constant
  async fn resolve_version(&self) -> [u32; 3] {
    FALLBACK_WA_VERSION
  }

  async fn new_socket(
    &self,
    _auth: AuthState,
    _version: [u32; 3],
    _options: SocketOptions,
  ) -> Result<Arc<dyn Socket>> {
    if self.fail_next.swap(false, Ordering::SeqCst) {
      return Err(Error::upstream("simulated socket construction failure"));
    }
    let socket = Arc::new(SimSocket::new());
    self.sockets.lock().unwrap().push(socket.clone());
    Ok(socket)
  }
}

/// 模拟套接字
/// Simulated socket
pub struct SimSocket {
  tx: Mutex<Option<mpsc::Sender<SocketUpdate>>>,
  rx: Mutex<Option<mpsc::Receiver<SocketUpdate>>>,
  bound: Mutex<Option<BoundIdentity>>,
  sent: Mutex<Vec<(String, String)>>,
  closed: AtomicBool,
  logged_out: AtomicBool,
}

impl SimSocket {
  fn new() -> Self {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    Self {
      tx: Mutex::new(Some(tx)),
      rx: Mutex::new(Some(rx)),
      bound: Mutex::new(None),
      sent: Mutex::new(Vec::new()),
      closed: AtomicBool::new(false),
      logged_out: AtomicBool::new(false),
    }
  }

  async fn emit(&self, update: SocketUpdate) {
    let tx = self.tx.lock().unwrap().clone();
    if let Some(tx) = tx {
      let _ = tx.send(update).await;
    }
  }

  /// 注入一条二维码事件
  /// Inject a qr event
  pub async fn emit_qr<S: Into<String>>(&self, qr: S) {
    self
      .emit(SocketUpdate::Connection(ConnectionUpdate {
        qr: Some(qr.into()),
        ..Default::default()
      }))
      .await;
  }

  /// 注入 open 事件并绑定账号身份
  /// Inject an open event and bind the account identity
  pub async fn emit_open<S: Into<String>>(&self, jid: S) {
    *self.bound.lock().unwrap() = Some(BoundIdentity {
      jid: jid.into(),
      name: None,
    });
    self
      .emit(SocketUpdate::Connection(ConnectionUpdate {
        connection: Some(ConnectionState::Open),
        ..Default::default()
      }))
      .await;
  }

  /// 注入带状态码的 close 事件
  /// Inject a close event with a status code
  pub async fn emit_close(&self, status_code: u16) {
    *self.bound.lock().unwrap() = None;
    self
      .emit(SocketUpdate::Connection(ConnectionUpdate {
        connection: Some(ConnectionState::Close),
        last_disconnect: Some(DisconnectInfo {
          status_code: Some(status_code),
          message: None,
        }),
        ..Default::default()
      }))
      .await;
  }

  /// 注入凭证轮换事件
  /// Inject a credential rotation event
  pub async fn emit_creds(&self, creds: crate::upstream::auth::AuthCreds) {
    self.emit(SocketUpdate::Creds(creds)).await;
  }

  /// 已发送消息的副本（JID 与正文）
  /// Copies of the sent messages (jid and body)
  pub fn sent_messages(&self) -> Vec<(String, String)> {
    self.sent.lock().unwrap().clone()
  }

  /// 是否已被强制关闭
  /// Whether the socket was forcefully closed
  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::SeqCst)
  }

  /// 是否收到过登出请求
  /// Whether a logout was requested
  pub fn logout_requested(&self) -> bool {
    self.logged_out.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Socket for SimSocket {
  fn take_updates(&self) -> Option<mpsc::Receiver<SocketUpdate>> {
    self.rx.lock().unwrap().take()
  }

  fn bound_user(&self) -> Option<BoundIdentity> {
    self.bound.lock().unwrap().clone()
  }

  async fn send_text(&self, jid: &str, text: &str) -> Result<SendReceipt> {
    if self.closed.load(Ordering::SeqCst) {
      return Err(Error::upstream("Connection Closed"));
    }
    self
      .sent
      .lock()
      .unwrap()
      .push((jid.to_string(), text.to_string()));
    Ok(SendReceipt {
      message_id: Uuid::new_v4().to_string().replace('-', "").to_uppercase(),
    })
  }

  async fn logout(&self) -> Result<()> {
    if self.closed.load(Ordering::SeqCst) {
      return Err(Error::upstream("Connection Closed"));
    }
    self.logged_out.store(true, Ordering::SeqCst);
    Ok(())
  }

  async fn close(&self) -> Result<()> {
    self.closed.store(true, Ordering::SeqCst);
    *self.bound.lock().unwrap() = None;
    // 丢弃发送端，事件循环随之结束
    // Drop the sender so the event loop terminates
    self.tx.lock().unwrap().take();
    Ok(())
  }
}
