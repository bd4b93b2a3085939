//! 监督器生命周期集成测试
//! Supervisor lifecycle integration tests
//!
//! 使用内存存储与模拟上游驱动完整的 配对 → 连接 → 断开 → 登出 流程
//! Drives the full pairing → connect → disconnect → logout flow with the
//! memory store and the simulated upstream

use std::sync::Arc;
use std::time::Duration;
use wagate::backend::MemoryStore;
use wagate::components::event_bus::EventBus;
use wagate::components::supervisor::Supervisor;
use wagate::config::EngineConfig;
use wagate::error::Error;
use wagate::session::SessionStatus;
use wagate::upstream::sim::{SimSocket, SimUpstream};
use wagate::Store;

struct Harness {
  supervisor: Supervisor,
  store: Arc<MemoryStore>,
  upstream: Arc<SimUpstream>,
  bus: Arc<EventBus>,
}

fn harness() -> Harness {
  let store = Arc::new(MemoryStore::new());
  let upstream = Arc::new(SimUpstream::new());
  let bus = Arc::new(EventBus::new());
  let supervisor = Supervisor::new(
    store.clone(),
    upstream.clone(),
    bus.clone(),
    EngineConfig::default(),
  )
  .unwrap();
  Harness {
    supervisor,
    store,
    upstream,
    bus,
  }
}

impl Harness {
  async fn registered_key(&self) -> String {
    self
      .supervisor
      .registry()
      .generate(Some("test tenant"))
      .await
      .unwrap()
      .key
  }

  /// 等待第 n 个套接字出现
  /// Wait until the n-th socket exists
  async fn wait_socket(&self, n: usize) -> Arc<SimSocket> {
    for _ in 0..1000 {
      if self.upstream.socket_count() >= n {
        return self.upstream.last_socket().unwrap();
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("socket {n} never appeared");
  }

  /// 等待持久化状态到达期望值
  /// Wait until the persisted status reaches the expectation
  async fn wait_status(&self, api_key: &str, expected: SessionStatus) {
    for _ in 0..1000 {
      let row = self.store.find_session(api_key).await.unwrap();
      if row.is_some_and(|r| r.status == expected) {
        return;
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("session never reached {expected}");
  }

  /// 配对并打开连接，返回活动的模拟套接字
  /// Pair and open the connection, returning the live simulated socket
  async fn pair_and_open(&self, api_key: &str) -> Arc<SimSocket> {
    let supervisor = self.supervisor.clone();
    let key = api_key.to_string();
    let qr_task = tokio::spawn(async move { supervisor.get_qr(&key, Some("Bot".into())).await });

    let socket = self.wait_socket(self.upstream.socket_count() + 1).await;
    socket.emit_qr("qr-payload").await;
    let response = qr_task.await.unwrap().unwrap();
    assert_eq!(response.status, SessionStatus::Qr);
    assert_eq!(response.qr.as_deref(), Some("qr-payload"));

    socket.emit_open("628123456789@s.whatsapp.net").await;
    self.wait_status(api_key, SessionStatus::Connected).await;
    socket
  }
}

#[tokio::test]
async fn test_qr_then_connect_reports_connected() {
  let h = harness();
  let key = h.registered_key().await;
  h.pair_and_open(&key).await;

  let info = h.supervisor.connection_status(&key).await.unwrap();
  assert_eq!(info.status, SessionStatus::Connected);
  assert!(info.connected);
  assert_eq!(h.upstream.socket_count(), 1);

  // 连接后二维码缓冲被清空
  // The qr buffer is cleared after connecting
  assert!(h.supervisor.current_qr(&key).await.is_none());
}

#[tokio::test]
async fn test_buffered_qr_is_returned_without_second_socket() {
  let h = harness();
  let key = h.registered_key().await;

  let supervisor = h.supervisor.clone();
  let k = key.clone();
  let qr_task = tokio::spawn(async move { supervisor.get_qr(&k, None).await });
  let socket = h.wait_socket(1).await;
  socket.emit_qr("qr-one").await;
  qr_task.await.unwrap().unwrap();

  // 第二次请求直接命中缓冲，不再创建套接字
  // The second request hits the buffer and creates no socket
  let again = h.supervisor.get_qr(&key, None).await.unwrap();
  assert_eq!(again.qr.as_deref(), Some("qr-one"));
  assert_eq!(h.upstream.socket_count(), 1);
}

#[tokio::test]
async fn test_concurrent_qr_requests_share_one_socket() {
  let h = harness();
  let key = h.registered_key().await;

  let mut tasks = Vec::new();
  for _ in 0..3 {
    let supervisor = h.supervisor.clone();
    let k = key.clone();
    tasks.push(tokio::spawn(async move { supervisor.get_qr(&k, None).await }));
  }

  let socket = h.wait_socket(1).await;
  // 留出时间让全部等待者注册后再发布二维码
  // Give every waiter time to register before publishing the qr
  tokio::time::sleep(Duration::from_millis(50)).await;
  socket.emit_qr("qr-shared").await;

  for task in tasks {
    let response = task.await.unwrap().unwrap();
    assert_eq!(response.qr.as_deref(), Some("qr-shared"));
  }
  // 进程内同一密钥至多一个套接字
  // At most one socket per key per process
  assert_eq!(h.upstream.socket_count(), 1);
}

#[tokio::test]
async fn test_logout_clears_credentials_and_is_terminal() {
  let h = harness();
  let key = h.registered_key().await;
  let socket = h.pair_and_open(&key).await;

  let row = h.store.find_session(&key).await.unwrap().unwrap();
  assert!(h.store.load_creds(row.id).await.unwrap().is_some());

  h.supervisor.logout(&key).await.unwrap();
  assert!(socket.logout_requested());
  assert!(socket.is_closed());
  assert!(h.store.load_creds(row.id).await.unwrap().is_none());
  assert!(h.store.lock_owner(&key).await.unwrap().is_none());
  h.wait_status(&key, SessionStatus::LoggedOut).await;

  // 登出后的配对请求返回终态且不打开新套接字
  // A pairing request after logout reports the terminal state and opens no socket
  let sockets_before = h.upstream.socket_count();
  let response = h.supervisor.get_qr(&key, None).await.unwrap();
  assert_eq!(response.status, SessionStatus::LoggedOut);
  assert!(response.qr.is_none());
  assert_eq!(h.upstream.socket_count(), sockets_before);
}

#[tokio::test]
async fn test_logout_without_session_row_fails_not_found() {
  let h = harness();
  let key = h.registered_key().await;
  let err = h.supervisor.logout(&key).await.unwrap_err();
  assert!(matches!(err, Error::SessionNotFound));
  assert_eq!(err.to_string(), "Whatsapp session not found");
}

#[tokio::test]
async fn test_upstream_logout_is_terminal_without_reconnect() {
  let h = harness();
  let key = h.registered_key().await;
  let socket = h.pair_and_open(&key).await;
  let row = h.store.find_session(&key).await.unwrap().unwrap();

  socket.emit_close(401).await;
  h.wait_status(&key, SessionStatus::LoggedOut).await;

  assert!(h.store.load_creds(row.id).await.unwrap().is_none());
  assert!(h.store.lock_owner(&key).await.unwrap().is_none());
  assert!(h.supervisor.current_qr(&key).await.is_none());

  // 留出重连窗口并确认没有新的套接字
  // Leave a reconnect window open and confirm no new socket appears
  tokio::time::sleep(Duration::from_millis(100)).await;
  assert_eq!(h.upstream.socket_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_schedules_reconnect() {
  let h = harness();
  let key = h.registered_key().await;
  let socket = h.pair_and_open(&key).await;

  socket.emit_close(515).await;
  h.wait_status(&key, SessionStatus::Disconnected).await;

  // 首次重连延迟最多 1500 毫秒
  // The first reconnect delay is at most 1500 ms
  tokio::time::sleep(Duration::from_millis(1600)).await;
  let second = h.wait_socket(2).await;
  second.emit_open("628123456789@s.whatsapp.net").await;
  h.wait_status(&key, SessionStatus::Connected).await;

  let info = h.supervisor.connection_status(&key).await.unwrap();
  assert!(info.connected);
}

#[tokio::test(start_paused = true)]
async fn test_qr_wait_times_out() {
  let h = harness();
  let key = h.registered_key().await;

  // 上游始终不产生二维码
  // The upstream never produces a qr
  let err = h.supervisor.get_qr(&key, None).await.unwrap_err();
  assert!(matches!(err, Error::QrTimeout));
  assert_eq!(err.to_string(), "QR code generation timeout");
}

#[tokio::test]
async fn test_construction_failure_is_recoverable() {
  let h = harness();
  let key = h.registered_key().await;
  h.upstream.fail_next_connect();

  let err = h.supervisor.get_qr(&key, None).await.unwrap_err();
  assert!(matches!(err, Error::Upstream { .. }));
  h.wait_status(&key, SessionStatus::Error).await;
  assert!(h.store.lock_owner(&key).await.unwrap().is_none());

  // 下一次配对请求重新进入 CONNECTING
  // The next pairing request re-enters CONNECTING
  let supervisor = h.supervisor.clone();
  let k = key.clone();
  let qr_task = tokio::spawn(async move { supervisor.get_qr(&k, None).await });
  let socket = h.wait_socket(1).await;
  socket.emit_qr("qr-after-error").await;
  let response = qr_task.await.unwrap().unwrap();
  assert_eq!(response.qr.as_deref(), Some("qr-after-error"));
}

#[tokio::test]
async fn test_send_text_normalises_and_delivers() {
  let h = harness();
  let key = h.registered_key().await;
  let socket = h.pair_and_open(&key).await;

  let receipt = h
    .supervisor
    .send_text(&key, "0812-345-6789", "hi")
    .await
    .unwrap();
  assert!(!receipt.message_id.is_empty());

  let sent = socket.sent_messages();
  assert_eq!(sent.len(), 1);
  assert_eq!(sent[0].0, "628123456789@s.whatsapp.net");
  assert_eq!(sent[0].1, "hi");

  // 发送后锁被续租
  // The lock is refreshed after sending
  assert_eq!(
    h.store.lock_owner(&key).await.unwrap().as_deref(),
    Some(h.supervisor.owner_id())
  );
}

#[tokio::test]
async fn test_send_text_validation_messages() {
  let h = harness();
  let key = h.registered_key().await;
  h.pair_and_open(&key).await;

  let err = h.supervisor.send_text(&key, "abc", "hi").await.unwrap_err();
  assert_eq!(
    err.to_string(),
    "Invalid 'to' (use digits, 8-15, with country code)"
  );

  let err = h
    .supervisor
    .send_text(&key, "628123456789", "")
    .await
    .unwrap_err();
  assert_eq!(err.to_string(), "Invalid 'text' (1-1000 chars)");

  let long_text = "x".repeat(1001);
  let err = h
    .supervisor
    .send_text(&key, "628123456789", &long_text)
    .await
    .unwrap_err();
  assert_eq!(err.to_string(), "Invalid 'text' (1-1000 chars)");
}

#[tokio::test]
async fn test_send_text_on_logged_out_session() {
  let h = harness();
  let key = h.registered_key().await;
  h.pair_and_open(&key).await;
  h.supervisor.logout(&key).await.unwrap();

  let err = h
    .supervisor
    .send_text(&key, "628123456789", "hi")
    .await
    .unwrap_err();
  assert!(matches!(err, Error::SessionLoggedOut));
}

#[tokio::test]
async fn test_send_text_when_lock_held_elsewhere() {
  let h = harness();
  let key = h.registered_key().await;
  h.store.upsert_session(&key, None).await.unwrap();

  // 另一个进程持有锁
  // Another process holds the lock
  assert!(h
    .store
    .acquire_lock(&key, "other-host-4711", Duration::from_secs(300))
    .await
    .unwrap());

  let err = h
    .supervisor
    .send_text(&key, "628123456789", "hi")
    .await
    .unwrap_err();
  match err {
    Error::SessionLocked { ref owner } => assert_eq!(owner, "other-host-4711"),
    other => panic!("unexpected error: {other}"),
  }
  assert!(err.to_string().contains("handled by another instance"));
  // 对方持有期间不会构造套接字
  // No socket is constructed while the lock is foreign
  assert_eq!(h.upstream.socket_count(), 0);
}

#[tokio::test]
async fn test_credential_rotation_is_persisted() {
  let h = harness();
  let key = h.registered_key().await;
  let socket = h.pair_and_open(&key).await;
  let row = h.store.find_session(&key).await.unwrap().unwrap();

  let mut rotated = h.store.load_creds(row.id).await.unwrap().unwrap();
  rotated.next_pre_key_id = 99;
  socket.emit_creds(rotated.clone()).await;

  for _ in 0..1000 {
    let current = h.store.load_creds(row.id).await.unwrap().unwrap();
    if current.next_pre_key_id == 99 {
      return;
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
  panic!("rotated credentials never persisted");
}

#[tokio::test]
async fn test_warm_sessions_skips_rows_without_credentials() {
  let h = harness();
  let with_creds = h.registered_key().await;
  let without_creds = h.registered_key().await;

  let row = h.store.upsert_session(&with_creds, None).await.unwrap();
  h.store
    .save_creds(row.id, &wagate::upstream::auth::init_auth_creds())
    .await
    .unwrap();
  h.store.upsert_session(&without_creds, None).await.unwrap();

  let supervisor = h.supervisor.clone();
  let warm_task = tokio::spawn(async move { supervisor.warm_sessions().await });

  let socket = h.wait_socket(1).await;
  socket.emit_open("628123456789@s.whatsapp.net").await;

  let report = warm_task.await.unwrap().unwrap();
  assert_eq!(report.total, 2);
  assert_eq!(report.attempted, 1);
  assert_eq!(report.connected, 1);
  assert_eq!(report.failed, 0);
  // 缺少凭证的会话绝不触发二维码
  // Sessions without credentials never trigger a QR
  assert_eq!(h.upstream.socket_count(), 1);
}

#[tokio::test]
async fn test_shutdown_releases_locks_and_closes_sockets() {
  let h = harness();
  let key = h.registered_key().await;
  let socket = h.pair_and_open(&key).await;
  assert!(h.store.lock_owner(&key).await.unwrap().is_some());

  h.supervisor.shutdown().await;
  assert!(socket.is_closed());
  assert!(h.store.lock_owner(&key).await.unwrap().is_none());
}

#[tokio::test]
async fn test_event_bus_receives_status_and_qr() {
  let h = harness();
  let key = h.registered_key().await;
  let mut rx = h.bus.subscribe(&key, None, None);
  // 附加时的冲刷帧
  // Attach-time flush frame
  assert!(matches!(
    rx.recv().await.unwrap(),
    wagate::StreamFrame::Comment("connected")
  ));

  h.pair_and_open(&key).await;

  let mut saw_qr = false;
  let mut saw_connected = false;
  for _ in 0..10 {
    match rx.recv().await.unwrap() {
      wagate::StreamFrame::Event { name: "qr", data } => {
        if data["qr"] == "qr-payload" {
          saw_qr = true;
        }
      }
      wagate::StreamFrame::Event { name: "status", data } => {
        if data["status"] == "CONNECTED" && data["connected"] == true {
          saw_connected = true;
        }
      }
      _ => {}
    }
    if saw_qr && saw_connected {
      break;
    }
  }
  assert!(saw_qr && saw_connected);
}
