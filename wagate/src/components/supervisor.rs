//! 会话监督器模块
//! Session supervisor module
//!
//! 引擎的核心：驱动 配对 → 已连接 → 重连退避 → 已登出 的状态机
//! The heart of the engine: drives the pairing → connected → reconnect-backoff
//! → logged-out state machine
//!
//! ## 职责 / Responsibilities
//!
//! - 每个进程内同一租户密钥至多一个活动套接字
//!   - At most one live socket per tenant key per process
//! - 构造套接字前先取得持久化会话锁
//!   - The durable session lock is acquired before socket construction
//! - 并发的连接请求共享同一个在途 future
//!   - Concurrent connect calls share one in-flight future
//! - 连接事件串行处理，驱动状态转换、事件发布与持久化
//!   - Connection events are handled serially and drive transitions,
//!     publishes and persistence
//! - 非登出的断开按带抖动的指数退避重连
//!   - Non-logout closes reconnect with jittered exponential backoff

use crate::base::constants::{
  DISCONNECT_LOGGED_OUT, JID_USER_DOMAIN, MAX_BACKOFF_EXP, RECONNECT_BASE_DELAY_MS,
  RECONNECT_JITTER_MS, RECONNECT_MAX_DELAY_MS,
};
use crate::base::Store;
use crate::components::event_bus::EventBus;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::registry::KeyRegistry;
use crate::session::{ConnectionInfo, SessionStatus};
use crate::upstream::auth::{init_auth_creds, AuthState, SessionKeys};
use crate::upstream::{
  ConnectionState, ConnectionUpdate, SendReceipt, Socket, SocketOptions, SocketUpdate, Upstream,
};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 共享的在途连接尝试；错误通过字符串传递以便克隆
/// Shared in-flight connect attempt; errors travel as strings so the result clones
type ConnectShared = Shared<BoxFuture<'static, std::result::Result<bool, String>>>;

/// 等待者被拒绝时使用的原因
/// Reason used when waiters are rejected
const CLOSED_REASON: &str = "WhatsApp connection closed";

/// 一次性的等待者：要么收到结果，要么超时后被移除
/// One-shot waiter: either receives its result or is removed on timeout
struct Waiter<T> {
  id: u64,
  tx: oneshot::Sender<std::result::Result<T, String>>,
}

/// 单个租户密钥的内存投影
/// In-memory projection of one tenant key
struct ManagedSession {
  session_id: i64,
  status: SessionStatus,
  last_qr: Option<String>,
  socket: Option<Arc<dyn Socket>>,
  connecting: Option<ConnectShared>,
  qr_waiters: Vec<Waiter<String>>,
  conn_waiters: Vec<Waiter<()>>,
  lock_held: bool,
  reconnect_attempts: u32,
  reconnect_timer: Option<JoinHandle<()>>,
  event_loop: Option<JoinHandle<()>>,
  next_waiter_id: u64,
}

impl ManagedSession {
  fn new(session_id: i64) -> Self {
    Self {
      session_id,
      status: SessionStatus::Disconnected,
      last_qr: None,
      socket: None,
      connecting: None,
      qr_waiters: Vec::new(),
      conn_waiters: Vec::new(),
      lock_held: false,
      reconnect_attempts: 0,
      reconnect_timer: None,
      event_loop: None,
      next_waiter_id: 0,
    }
  }

  fn register_qr_waiter(&mut self) -> (u64, oneshot::Receiver<std::result::Result<String, String>>) {
    self.next_waiter_id += 1;
    let id = self.next_waiter_id;
    let (tx, rx) = oneshot::channel();
    self.qr_waiters.push(Waiter { id, tx });
    (id, rx)
  }

  fn register_conn_waiter(&mut self) -> (u64, oneshot::Receiver<std::result::Result<(), String>>) {
    self.next_waiter_id += 1;
    let id = self.next_waiter_id;
    let (tx, rx) = oneshot::channel();
    self.conn_waiters.push(Waiter { id, tx });
    (id, rx)
  }

  /// 以同一原因拒绝全部等待者
  /// Reject every waiter with one reason
  fn reject_waiters(&mut self, reason: &str) {
    for waiter in self.qr_waiters.drain(..) {
      let _ = waiter.tx.send(Err(reason.to_string()));
    }
    for waiter in self.conn_waiters.drain(..) {
      let _ = waiter.tx.send(Err(reason.to_string()));
    }
  }

  fn cancel_reconnect(&mut self) {
    if let Some(timer) = self.reconnect_timer.take() {
      timer.abort();
    }
  }
}

/// `get_qr` 的结果
/// Result of `get_qr`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrResponse {
  pub api_key: String,
  pub status: SessionStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub qr: Option<String>,
}

/// 预热报告
/// Warm-up report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WarmReport {
  pub total: usize,
  pub attempted: usize,
  pub connected: usize,
  pub failed: usize,
}

/// 会话监督器；廉价克隆的句柄，所有克隆共享同一份进程级状态
/// Session supervisor; a cheap-clone handle, every clone shares the same
/// process-wide state
#[derive(Clone)]
pub struct Supervisor {
  store: Arc<dyn Store>,
  upstream: Arc<dyn Upstream>,
  bus: Arc<EventBus>,
  registry: KeyRegistry,
  config: EngineConfig,
  owner_id: String,
  sessions: Arc<StdMutex<HashMap<String, Arc<Mutex<ManagedSession>>>>>,
}

impl Supervisor {
  /// 创建新的监督器
  /// Create a new supervisor
  pub fn new(
    store: Arc<dyn Store>,
    upstream: Arc<dyn Upstream>,
    bus: Arc<EventBus>,
    config: EngineConfig,
  ) -> Result<Self> {
    config.validate()?;
    let registry = KeyRegistry::new(store.clone(), &config);
    Ok(Self {
      store,
      upstream,
      bus,
      registry,
      config,
      owner_id: owner_identity(),
      sessions: Arc::new(StdMutex::new(HashMap::new())),
    })
  }

  /// 本进程的锁持有者标识（`<hostname>-<pid>`）
  /// Lock owner identity of this process (`<hostname>-<pid>`)
  pub fn owner_id(&self) -> &str {
    &self.owner_id
  }

  /// 共享的密钥注册表
  /// The shared key registry
  pub fn registry(&self) -> KeyRegistry {
    self.registry.clone()
  }

  // === 核心操作 ===
  // === Core operations ===

  /// 请求配对二维码
  /// Request a pairing QR code
  pub async fn get_qr(&self, api_key: &str, display_name: Option<String>) -> Result<QrResponse> {
    self.registry.assert_active(api_key).await?;
    let row = self
      .store
      .upsert_session(api_key, display_name.as_deref())
      .await?;

    // 已登出的会话在新的配对请求前保持终态，不创建套接字
    // A logged-out session stays terminal and gets no socket
    if row.status == SessionStatus::LoggedOut {
      return Ok(QrResponse {
        api_key: api_key.to_string(),
        status: SessionStatus::LoggedOut,
        qr: None,
      });
    }

    let entry = self
      .initialize_socket(api_key, row.id, display_name)
      .await?;

    let (waiter_id, rx) = {
      let mut managed = entry.lock().await;
      if managed.status == SessionStatus::Connected {
        return Ok(QrResponse {
          api_key: api_key.to_string(),
          status: SessionStatus::Connected,
          qr: None,
        });
      }
      if let Some(qr) = managed.last_qr.clone() {
        return Ok(QrResponse {
          api_key: api_key.to_string(),
          status: SessionStatus::Qr,
          qr: Some(qr),
        });
      }
      managed.register_qr_waiter()
    };

    match tokio::time::timeout(self.config.qr_timeout, rx).await {
      Ok(Ok(Ok(qr))) => Ok(QrResponse {
        api_key: api_key.to_string(),
        status: SessionStatus::Qr,
        qr: Some(qr),
      }),
      Ok(Ok(Err(reason))) => Err(Error::upstream(reason)),
      Ok(Err(_)) => Err(Error::upstream(CLOSED_REASON)),
      Err(_) => {
        if let Some(entry) = self.managed_lookup(api_key) {
          let mut managed = entry.lock().await;
          managed.qr_waiters.retain(|w| w.id != waiter_id);
        }
        Err(Error::QrTimeout)
      }
    }
  }

  /// 登出并清除凭证；会话行保留，状态转为 LOGGED_OUT
  /// Log out and wipe credentials; the row survives with status LOGGED_OUT
  pub async fn logout(&self, api_key: &str) -> Result<()> {
    let row = self
      .store
      .find_session(api_key)
      .await?
      .ok_or(Error::SessionNotFound)?;

    let entry = self.sessions.lock().unwrap().remove(api_key);
    if let Some(entry) = entry {
      let mut managed = entry.lock().await;
      managed.cancel_reconnect();
      managed.reject_waiters("Session is logged out");
      managed.connecting = None;
      if let Some(socket) = managed.socket.take() {
        // 先尝试优雅登出，再强制关闭；二者的失败都只记录
        // Attempt a graceful logout, then force close; both failures are only logged
        if let Err(e) = socket.logout().await {
          warn!(api_key, error = %e, "upstream logout failed");
        }
        if let Err(e) = socket.close().await {
          warn!(api_key, error = %e, "upstream close failed");
        }
      }
    }

    self.store.clear_session_data(row.id).await?;
    self
      .store
      .set_session_status(row.id, SessionStatus::LoggedOut)
      .await?;

    self.bus.publish_qr(api_key, None);
    self.bus.publish_status(&ConnectionInfo {
      api_key: api_key.to_string(),
      status: SessionStatus::LoggedOut,
      connected: false,
    });

    if let Err(e) = self.store.release_lock(api_key, &self.owner_id).await {
      warn!(api_key, error = %e, "failed to release session lock on logout");
    }
    info!(api_key, "session logged out");
    Ok(())
  }

  /// 合并内存与持久化状态的连接信息
  /// Connection info merging memory and the durable row
  ///
  /// 只有活动套接字绑定了账号身份才算 connected；持久化的行总是滞后于
  /// 最新事件，因此仅作兜底
  /// `connected` holds only when a live socket has a bound identity; the
  /// durable row trails the latest event and is only the fallback
  pub async fn connection_status(&self, api_key: &str) -> Result<ConnectionInfo> {
    self.registry.assert_active(api_key).await?;

    if let Some(entry) = self.managed_lookup(api_key) {
      let managed = entry.lock().await;
      let connected = managed
        .socket
        .as_ref()
        .is_some_and(|s| s.bound_user().is_some());
      let status = if connected {
        SessionStatus::Connected
      } else {
        managed.status
      };
      return Ok(ConnectionInfo {
        api_key: api_key.to_string(),
        status,
        connected,
      });
    }

    let row = self
      .store
      .find_session(api_key)
      .await?
      .ok_or(Error::SessionNotFound)?;
    Ok(ConnectionInfo {
      api_key: api_key.to_string(),
      status: row.status,
      connected: false,
    })
  }

  /// 内存中最近的二维码，用于给新订阅者回放
  /// Last in-memory qr, used to seed new subscribers
  pub async fn current_qr(&self, api_key: &str) -> Option<String> {
    let entry = self.managed_lookup(api_key)?;
    let managed = entry.lock().await;
    managed.last_qr.clone()
  }

  /// 发送文本消息
  /// Send a text message
  pub async fn send_text(&self, api_key: &str, to: &str, text: &str) -> Result<SendReceipt> {
    self.registry.assert_active(api_key).await?;
    let row = self
      .store
      .find_session(api_key)
      .await?
      .ok_or(Error::SessionNotFound)?;
    if row.status == SessionStatus::LoggedOut {
      return Err(Error::SessionLoggedOut);
    }

    let msisdn = normalize_msisdn(to, &self.config.country_prefix)?;
    if text.is_empty() || text.chars().count() > self.config.max_text_length {
      return Err(Error::validation("Invalid 'text' (1-1000 chars)"));
    }

    let entry = self.initialize_socket(api_key, row.id, None).await?;

    // 锁在他处且本地没有绑定身份：把当前持有者告诉调用方以便路由
    // Lock elsewhere and no local bound identity: report the owner so the
    // caller can route sticky
    {
      let managed = entry.lock().await;
      let bound = managed
        .socket
        .as_ref()
        .is_some_and(|s| s.bound_user().is_some());
      if !managed.lock_held && !bound {
        let owner = self
          .store
          .lock_owner(api_key)
          .await?
          .unwrap_or_else(|| "unknown".to_string());
        return Err(Error::SessionLocked { owner });
      }
    }

    if !self.wait_connected(&entry, self.config.connect_timeout).await {
      return Err(Error::NotConnected);
    }

    let socket = {
      let managed = entry.lock().await;
      managed.socket.clone().ok_or(Error::NotConnected)?
    };
    let jid = format!("{msisdn}@{JID_USER_DOMAIN}");
    let receipt = socket.send_text(&jid, text).await?;

    if let Err(e) = self.store.touch_lock(api_key, &self.owner_id).await {
      warn!(api_key, error = %e, "failed to refresh session lock after send");
    }
    Ok(receipt)
  }

  /// 进程启动时预热既有会话
  /// Warm previously paired sessions at process start
  ///
  /// 只预热 CONNECTED 与 DISCONNECTED 且已有凭证的行；绝不触发二维码
  /// Warms only CONNECTED and DISCONNECTED rows with stored credentials;
  /// never triggers a QR
  pub async fn warm_sessions(&self) -> Result<WarmReport> {
    let rows = self.store.list_sessions().await?;
    let candidates: Vec<_> = rows
      .into_iter()
      .filter(|row| {
        matches!(
          row.status,
          SessionStatus::Connected | SessionStatus::Disconnected
        )
      })
      .collect();

    let mut report = WarmReport {
      total: candidates.len(),
      attempted: 0,
      connected: 0,
      failed: 0,
    };

    for row in candidates {
      if self.store.load_creds(row.id).await?.is_none() {
        debug!(api_key = %row.api_key, "skipping warm-up, no stored credentials");
        continue;
      }
      report.attempted += 1;
      match self.initialize_socket(&row.api_key, row.id, None).await {
        Ok(entry) => {
          if self.wait_connected(&entry, self.config.warm_timeout).await {
            report.connected += 1;
          } else {
            report.failed += 1;
          }
        }
        Err(e) => {
          warn!(api_key = %row.api_key, error = %e, "warm-up socket construction failed");
          report.failed += 1;
        }
      }
    }
    Ok(report)
  }

  /// 优雅关闭：关闭全部套接字并释放本进程的所有锁
  /// Graceful shutdown: close every socket and release all locks of this process
  pub async fn shutdown(&self) {
    let entries: Vec<(String, Arc<Mutex<ManagedSession>>)> = {
      let mut sessions = self.sessions.lock().unwrap();
      sessions.drain().collect()
    };
    for (api_key, entry) in entries {
      let mut managed = entry.lock().await;
      managed.cancel_reconnect();
      managed.reject_waiters(CLOSED_REASON);
      if let Some(loop_handle) = managed.event_loop.take() {
        loop_handle.abort();
      }
      if let Some(socket) = managed.socket.take() {
        if let Err(e) = socket.close().await {
          warn!(api_key, error = %e, "failed to close socket during shutdown");
        }
      }
    }
    if let Err(e) = self.store.release_all_locks(&self.owner_id).await {
      warn!(error = %e, "failed to release session locks during shutdown");
    }
    info!(owner_id = %self.owner_id, "supervisor shut down");
  }

  // === 套接字构造 ===
  // === Socket construction ===

  /// 幂等的套接字初始化；同一密钥的并发调用共享一个在途尝试
  /// Idempotent socket initialisation; concurrent calls for one key share a
  /// single in-flight attempt
  ///
  /// 锁被其他进程持有时返回没有套接字的投影，调用方必须按
  /// “会话由其他实例负责”处理
  /// When another process holds the lock, the returned projection has no
  /// socket and the caller must treat the session as owned elsewhere
  pub(crate) async fn initialize_socket(
    &self,
    api_key: &str,
    session_id: i64,
    display_name: Option<String>,
  ) -> Result<Arc<Mutex<ManagedSession>>> {
    let entry = self.managed_entry(api_key, session_id);
    let shared = {
      let mut managed = entry.lock().await;
      if managed.socket.is_some() {
        return Ok(entry.clone());
      }
      if let Some(shared) = managed.connecting.clone() {
        shared
      } else {
        let sup = self.clone();
        let key = api_key.to_string();
        let name = display_name.clone();
        let shared: ConnectShared = async move {
          let result = sup.connect(&key, session_id, name).await;
          // 尝试已定案，释放共享槽
          // The attempt has settled, release the shared slot
          if let Some(entry) = sup.managed_lookup(&key) {
            entry.lock().await.connecting = None;
          }
          result.map_err(|e| e.to_string())
        }
        .boxed()
        .shared();
        managed.connecting = Some(shared.clone());
        // 独立驱动该尝试，调用方中途取消也不会让它悬停
        // Drive the attempt independently so caller cancellation cannot stall it
        tokio::spawn(shared.clone().map(|_| ()));
        shared
      }
    };

    match shared.await {
      Ok(_lock_acquired) => Ok(entry),
      Err(reason) => Err(Error::upstream(reason)),
    }
  }

  /// 一次完整的连接尝试：取锁、装配认证材料、构造套接字、接管事件流
  /// One full connect attempt: take the lock, assemble auth material,
  /// construct the socket, adopt the event stream
  async fn connect(
    &self,
    api_key: &str,
    session_id: i64,
    display_name: Option<String>,
  ) -> Result<bool> {
    // 投影在尝试启动后被丢弃（登出）即放弃本次尝试
    // The projection was discarded (logout) after this attempt started: give up
    let Some(entry) = self.managed_lookup(api_key) else {
      return Ok(false);
    };

    let acquired = self
      .store
      .acquire_lock(api_key, &self.owner_id, self.config.lock_ttl)
      .await?;
    if !acquired {
      entry.lock().await.lock_held = false;
      info!(api_key, "session lock held elsewhere, not constructing a socket");
      return Ok(false);
    }
    entry.lock().await.lock_held = true;

    let creds = match self.store.load_creds(session_id).await? {
      Some(creds) => creds,
      None => {
        let fresh = init_auth_creds();
        self.store.save_creds(session_id, &fresh).await?;
        fresh
      }
    };
    let auth = AuthState {
      creds,
      keys: Arc::new(SessionKeys::new(self.store.clone(), session_id)),
    };
    let version = self.upstream.resolve_version().await;
    let options = SocketOptions {
      display_name,
      mark_online: false,
    };

    match self.upstream.new_socket(auth, version, options).await {
      Ok(socket) => {
        // 构造期间发生登出：关闭这只套接字并交回锁
        // A logout happened during construction: close this socket and hand back the lock
        let still_current = self
          .managed_lookup(api_key)
          .is_some_and(|current| Arc::ptr_eq(&current, &entry));
        if !still_current {
          let _ = socket.close().await;
          if let Err(e) = self.store.release_lock(api_key, &self.owner_id).await {
            warn!(api_key, error = %e, "failed to release lock after abandoned connect");
          }
          return Ok(false);
        }
        let updates = socket.take_updates();
        let mut managed = entry.lock().await;
        managed.status = SessionStatus::Connecting;
        managed.socket = Some(socket);
        if let Some(rx) = updates {
          managed.event_loop = Some(self.spawn_event_loop(api_key, rx));
        }
        debug!(api_key, "socket constructed, awaiting connection events");
        Ok(true)
      }
      Err(e) => {
        self
          .persist_status(api_key, session_id, SessionStatus::Error)
          .await;
        {
          let mut managed = entry.lock().await;
          managed.status = SessionStatus::Error;
          for waiter in managed.qr_waiters.drain(..) {
            let _ = waiter.tx.send(Err(e.to_string()));
          }
          managed.lock_held = false;
        }
        if let Err(re) = self.store.release_lock(api_key, &self.owner_id).await {
          warn!(api_key, error = %re, "failed to release lock after construction failure");
        }
        self.bus.publish_status(&ConnectionInfo {
          api_key: api_key.to_string(),
          status: SessionStatus::Error,
          connected: false,
        });
        Err(e)
      }
    }
  }

  /// 事件循环：事件一次一个，按到达顺序处理
  /// Event loop: one event at a time, in arrival order
  fn spawn_event_loop(&self, api_key: &str, mut rx: mpsc::Receiver<SocketUpdate>) -> JoinHandle<()> {
    let sup = self.clone();
    let key = api_key.to_string();
    tokio::spawn(async move {
      while let Some(update) = rx.recv().await {
        sup.handle_update(&key, update).await;
      }
      debug!(api_key = %key, "socket event stream ended");
    })
  }

  async fn handle_update(&self, api_key: &str, update: SocketUpdate) {
    match update {
      SocketUpdate::Creds(creds) => {
        let Some(entry) = self.managed_lookup(api_key) else {
          return;
        };
        let session_id = entry.lock().await.session_id;
        // 凭证持久化失败不打断会话，下一次轮换可能成功
        // A failed credential persist never interrupts the session; the next
        // rotation may succeed
        if let Err(e) = self.store.save_creds(session_id, &creds).await {
          warn!(api_key, error = %e, "failed to persist rotated credentials");
        }
      }
      SocketUpdate::Connection(update) => self.handle_connection_update(api_key, update).await,
    }
  }

  async fn handle_connection_update(&self, api_key: &str, update: ConnectionUpdate) {
    let Some(entry) = self.managed_lookup(api_key) else {
      return;
    };
    let mut managed = entry.lock().await;
    let session_id = managed.session_id;

    if let Some(qr) = &update.qr {
      managed.last_qr = Some(qr.clone());
      managed.status = SessionStatus::Qr;
      self.bus.publish_qr(api_key, Some(qr));
      self
        .persist_status(api_key, session_id, SessionStatus::Qr)
        .await;
      for waiter in managed.qr_waiters.drain(..) {
        let _ = waiter.tx.send(Ok(qr.clone()));
      }
    }

    match update.connection {
      Some(ConnectionState::Open) => {
        managed.last_qr = None;
        self.bus.publish_qr(api_key, None);
        managed.status = SessionStatus::Connected;
        self
          .persist_status(api_key, session_id, SessionStatus::Connected)
          .await;
        managed.cancel_reconnect();
        for waiter in managed.conn_waiters.drain(..) {
          let _ = waiter.tx.send(Ok(()));
        }
        managed.reconnect_attempts = 0;
        if let Err(e) = self.store.touch_lock(api_key, &self.owner_id).await {
          warn!(api_key, error = %e, "failed to refresh session lock on open");
        }
        self.bus.publish_status(&ConnectionInfo {
          api_key: api_key.to_string(),
          status: SessionStatus::Connected,
          connected: true,
        });
        info!(api_key, "session connected");
      }
      Some(ConnectionState::Close) => {
        let status_code = update
          .last_disconnect
          .as_ref()
          .and_then(|info| info.status_code);
        let logged_out = status_code == Some(DISCONNECT_LOGGED_OUT);
        managed.cancel_reconnect();
        if let Some(socket) = managed.socket.take() {
          if let Err(e) = socket.close().await {
            warn!(api_key, error = %e, "failed to force-close old socket");
          }
        }

        if logged_out {
          // 终态：清除凭证、释放锁、丢弃内存投影
          // Terminal: wipe credentials, release the lock, drop the projection
          if let Err(e) = self.store.clear_session_data(session_id).await {
            warn!(api_key, error = %e, "failed to clear session data on logout");
          }
          self
            .persist_status(api_key, session_id, SessionStatus::LoggedOut)
            .await;
          managed.status = SessionStatus::LoggedOut;
          managed.last_qr = None;
          managed.reconnect_attempts = 0;
          managed.lock_held = false;
          managed.reject_waiters(CLOSED_REASON);
          drop(managed);
          if let Err(e) = self.store.release_lock(api_key, &self.owner_id).await {
            warn!(api_key, error = %e, "failed to release lock on upstream logout");
          }
          self.sessions.lock().unwrap().remove(api_key);
          self.bus.publish_qr(api_key, None);
          self.bus.publish_status(&ConnectionInfo {
            api_key: api_key.to_string(),
            status: SessionStatus::LoggedOut,
            connected: false,
          });
          info!(api_key, ?status_code, "session logged out by upstream");
        } else {
          managed.status = SessionStatus::Disconnected;
          self
            .persist_status(api_key, session_id, SessionStatus::Disconnected)
            .await;
          managed.reject_waiters(CLOSED_REASON);
          self.schedule_reconnect_locked(api_key, &mut managed);
          self.bus.publish_status(&ConnectionInfo {
            api_key: api_key.to_string(),
            status: SessionStatus::Disconnected,
            connected: false,
          });
          info!(api_key, ?status_code, "session disconnected, reconnect scheduled");
        }
      }
      Some(ConnectionState::Connecting) | None => {}
    }
  }

  // === 重连 ===
  // === Reconnection ===

  /// 安排一次重连；每个密钥同一时刻至多一个定时器
  /// Arm one reconnect; at most one timer per key at any time
  fn schedule_reconnect_locked(&self, api_key: &str, managed: &mut ManagedSession) {
    managed.cancel_reconnect();
    managed.reconnect_attempts += 1;
    let attempt = managed.reconnect_attempts;
    let delay = reconnect_delay(attempt);
    debug!(api_key, attempt, delay_ms = delay.as_millis() as u64, "reconnect armed");
    let sup = self.clone();
    let key = api_key.to_string();
    managed.reconnect_timer = Some(tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      sup.run_reconnect(&key).await;
    }));
  }

  async fn run_reconnect(&self, api_key: &str) {
    let Some(entry) = self.managed_lookup(api_key) else {
      return;
    };
    let session_id = {
      let mut managed = entry.lock().await;
      // 套接字已恢复或另一次尝试在途：本次定时器作废
      // Socket already back or another attempt in flight: this timer is void
      if managed.socket.is_some() || managed.connecting.is_some() {
        return;
      }
      managed.reconnect_timer = None;
      managed.session_id
    };

    match self.initialize_socket(api_key, session_id, None).await {
      Ok(entry) => {
        let managed = entry.lock().await;
        if managed.socket.is_none() && !managed.lock_held {
          info!(api_key, "reconnect abandoned, session owned by another process");
        }
      }
      Err(e) => {
        warn!(api_key, error = %e, "reconnect attempt failed");
        let mut managed = entry.lock().await;
        self.schedule_reconnect_locked(api_key, &mut managed);
      }
    }
  }

  // === 辅助 ===
  // === Helpers ===

  /// 等待连接绑定账号身份，直到给定期限
  /// Wait for the connection to bind an identity, up to the deadline
  async fn wait_connected(&self, entry: &Arc<Mutex<ManagedSession>>, deadline: Duration) -> bool {
    let ready = {
      let managed = entry.lock().await;
      managed
        .socket
        .as_ref()
        .is_some_and(|s| s.bound_user().is_some())
    };
    if ready {
      return true;
    }

    let (waiter_id, rx) = {
      let mut managed = entry.lock().await;
      managed.register_conn_waiter()
    };
    match tokio::time::timeout(deadline, rx).await {
      Ok(Ok(Ok(()))) => true,
      Ok(_) => false,
      Err(_) => {
        let mut managed = entry.lock().await;
        managed.conn_waiters.retain(|w| w.id != waiter_id);
        false
      }
    }
  }

  async fn persist_status(&self, api_key: &str, session_id: i64, status: SessionStatus) {
    // 状态持久化失败只记录；内存中的状态机照常前进
    // A failed status persist is only logged; the in-memory machine advances
    if let Err(e) = self.store.set_session_status(session_id, status).await {
      warn!(api_key, status = %status, error = %e, "failed to persist session status");
    }
  }

  fn managed_lookup(&self, api_key: &str) -> Option<Arc<Mutex<ManagedSession>>> {
    self.sessions.lock().unwrap().get(api_key).cloned()
  }

  fn managed_entry(&self, api_key: &str, session_id: i64) -> Arc<Mutex<ManagedSession>> {
    self
      .sessions
      .lock()
      .unwrap()
      .entry(api_key.to_string())
      .or_insert_with(|| Arc::new(Mutex::new(ManagedSession::new(session_id))))
      .clone()
  }
}

/// 本进程的锁持有者标识
/// Lock owner identity of this process
fn owner_identity() -> String {
  let host = hostname::get()
    .unwrap_or_default()
    .to_string_lossy()
    .to_string();
  format!("{}-{}", host, std::process::id())
}

/// 第 n 次重连的延迟：`min(30_000, 1000 · 2^min(n−1, 5)) + rand[0, 500)` 毫秒
/// Delay of reconnect attempt n: `min(30_000, 1000 · 2^min(n−1, 5)) + rand[0, 500)` ms
fn reconnect_delay(attempt: u32) -> Duration {
  let exp = attempt.saturating_sub(1).min(MAX_BACKOFF_EXP);
  let base = RECONNECT_BASE_DELAY_MS.saturating_mul(1u64 << exp);
  let capped = base.min(RECONNECT_MAX_DELAY_MS);
  let jitter = rand::random::<u64>() % RECONNECT_JITTER_MS;
  Duration::from_millis(capped + jitter)
}

/// 规整 MSISDN：去掉空格/横线/括号，去掉前导 `+`，前导 `0` 换成国家区号
/// Normalise an MSISDN: strip spaces/dashes/parens, drop a leading `+`,
/// swap a leading `0` for the country prefix
fn normalize_msisdn(raw: &str, country_prefix: &str) -> Result<String> {
  let cleaned: String = raw
    .chars()
    .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
    .collect();
  let cleaned = cleaned.strip_prefix('+').unwrap_or(&cleaned);
  let normalised = match cleaned.strip_prefix('0') {
    Some(rest) => format!("{country_prefix}{rest}"),
    None => cleaned.to_string(),
  };
  let valid = (8..=15).contains(&normalised.len())
    && normalised.chars().all(|c| c.is_ascii_digit());
  if !valid {
    return Err(Error::validation(
      "Invalid 'to' (use digits, 8-15, with country code)",
    ));
  }
  Ok(normalised)
}
