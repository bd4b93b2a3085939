//! 事件总线模块
//! Event bus module
//!
//! 按租户密钥做状态与二维码事件的发布/订阅扇出，并携带心跳
//! Per-tenant publish/subscribe fan-out of status and qr events, with heartbeats
//!
//! 每个订阅者有自己的有界通道；写入失败即视为订阅者死亡并移除，
//! 因此慢订阅者永远不会阻塞发布方。
//! Every subscriber owns a bounded channel; a failed write marks the
//! subscriber dead and removes it, so a slow subscriber never blocks a
//! publisher.

use crate::components::ComponentLifecycle;
use crate::session::ConnectionInfo;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// 每个订阅者通道的容量
/// Capacity of each subscriber channel
const SUBSCRIBER_BUFFER: usize = 64;

/// 推送给订阅者的一帧
/// One frame pushed to a subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
  /// 命名事件与 JSON 载荷
  /// Named event with a JSON payload
  Event {
    name: &'static str,
    data: serde_json::Value,
  },
  /// 注释帧（首帧冲刷与心跳）
  /// Comment frame (header flush and heartbeats)
  Comment(&'static str),
}

struct BusSubscriber {
  id: u64,
  tx: mpsc::Sender<StreamFrame>,
}

/// 进程级事件总线
/// Process-wide event bus
#[derive(Default)]
pub struct EventBus {
  subscribers: Mutex<HashMap<String, Vec<BusSubscriber>>>,
  next_id: AtomicU64,
}

impl EventBus {
  /// 创建新的事件总线
  /// Create a new event bus
  pub fn new() -> Self {
    Self::default()
  }

  /// 注册订阅者并回放已知状态
  /// Register a subscriber and replay the known state
  ///
  /// 先推送注释帧以冲刷响应头，随后是可选的初始 status 与最近的 qr
  /// A comment frame flushes the response headers first, then the optional
  /// initial status and the last known qr
  pub fn subscribe(
    &self,
    api_key: &str,
    initial: Option<ConnectionInfo>,
    last_qr: Option<String>,
  ) -> mpsc::Receiver<StreamFrame> {
    let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
    let _ = tx.try_send(StreamFrame::Comment("connected"));
    if let Some(info) = initial {
      let _ = tx.try_send(StreamFrame::Event {
        name: "status",
        data: serde_json::json!({
          "apiKey": info.api_key,
          "status": info.status,
          "connected": info.connected,
        }),
      });
    }
    if let Some(qr) = last_qr {
      let _ = tx.try_send(StreamFrame::Event {
        name: "qr",
        data: serde_json::json!({ "apiKey": api_key, "qr": qr }),
      });
    }

    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    self
      .subscribers
      .lock()
      .unwrap()
      .entry(api_key.to_string())
      .or_default()
      .push(BusSubscriber { id, tx });
    debug!(api_key, subscriber = id, "event stream subscriber attached");
    rx
  }

  /// 广播最新的二维码；None 表示二维码已失效
  /// Broadcast the latest qr; None means the qr is gone
  pub fn publish_qr(&self, api_key: &str, qr: Option<&str>) {
    self.broadcast(
      api_key,
      StreamFrame::Event {
        name: "qr",
        data: serde_json::json!({ "apiKey": api_key, "qr": qr }),
      },
    );
  }

  /// 广播连接状态
  /// Broadcast the connection status
  pub fn publish_status(&self, info: &ConnectionInfo) {
    self.broadcast(
      &info.api_key,
      StreamFrame::Event {
        name: "status",
        data: serde_json::json!({
          "apiKey": info.api_key,
          "status": info.status,
          "connected": info.connected,
        }),
      },
    );
  }

  /// 给所有订阅者发一帧心跳注释并剔除死亡订阅者
  /// Send one heartbeat comment to every subscriber and prune the dead ones
  pub fn heartbeat(&self) {
    let mut subscribers = self.subscribers.lock().unwrap();
    for subs in subscribers.values_mut() {
      subs.retain(|sub| match sub.tx.try_send(StreamFrame::Comment("heartbeat")) {
        Ok(()) => true,
        Err(_) => {
          debug!(subscriber = sub.id, "removing dead event stream subscriber");
          false
        }
      });
    }
    subscribers.retain(|_, subs| !subs.is_empty());
  }

  /// 当前某个密钥的订阅者数量
  /// Current subscriber count of one key
  pub fn subscriber_count(&self, api_key: &str) -> usize {
    self
      .subscribers
      .lock()
      .unwrap()
      .get(api_key)
      .map_or(0, Vec::len)
  }

  /// 单次调用内的帧按调用顺序投递；跨订阅者不做同步
  /// Frames of one call are delivered in call order; no cross-subscriber sync
  fn broadcast(&self, api_key: &str, frame: StreamFrame) {
    let mut subscribers = self.subscribers.lock().unwrap();
    let Some(subs) = subscribers.get_mut(api_key) else {
      return;
    };
    subs.retain(|sub| match sub.tx.try_send(frame.clone()) {
      Ok(()) => true,
      Err(_) => {
        debug!(subscriber = sub.id, "removing dead event stream subscriber");
        false
      }
    });
    if subs.is_empty() {
      subscribers.remove(api_key);
    }
  }
}

/// 心跳器，周期性地冲刷事件总线
/// Heartbeat, periodically flushes the event bus
pub struct Heartbeat {
  bus: Arc<EventBus>,
  interval: Duration,
  shutting_down: Arc<AtomicBool>,
}

impl Heartbeat {
  pub fn new(bus: Arc<EventBus>, interval: Duration) -> Self {
    Self {
      bus,
      interval,
      shutting_down: Arc::new(AtomicBool::new(false)),
    }
  }

  /// 启动心跳循环
  /// Start the heartbeat loop
  pub fn start(self: Arc<Self>) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(self.interval);
      // 第一个滴答立即返回，跳过以免提早发心跳
      // The first tick fires immediately; skip it so no early heartbeat is sent
      ticker.tick().await;
      loop {
        ticker.tick().await;
        if self.shutting_down.load(Ordering::Relaxed) {
          break;
        }
        self.bus.heartbeat();
      }
    })
  }

  /// 请求心跳循环终止
  /// Request the termination of the heartbeat loop
  pub fn shutdown(&self) {
    self.shutting_down.store(true, Ordering::Relaxed);
  }

  /// 检查是否已停止
  /// Check if it has stopped
  pub fn is_done(&self) -> bool {
    self.shutting_down.load(Ordering::Relaxed)
  }
}

impl ComponentLifecycle for Heartbeat {
  fn start(self: Arc<Self>) -> JoinHandle<()> {
    Heartbeat::start(self)
  }

  fn shutdown(&self) {
    Heartbeat::shutdown(self)
  }

  fn is_done(&self) -> bool {
    Heartbeat::is_done(self)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::session::SessionStatus;

  fn info(api_key: &str, status: SessionStatus, connected: bool) -> ConnectionInfo {
    ConnectionInfo {
      api_key: api_key.to_string(),
      status,
      connected,
    }
  }

  #[tokio::test]
  async fn test_subscribe_replays_state() {
    let bus = EventBus::new();
    let mut rx = bus.subscribe(
      "k1",
      Some(info("k1", SessionStatus::Qr, false)),
      Some("qr-payload".into()),
    );

    assert_eq!(rx.recv().await.unwrap(), StreamFrame::Comment("connected"));
    match rx.recv().await.unwrap() {
      StreamFrame::Event { name, data } => {
        assert_eq!(name, "status");
        assert_eq!(data["status"], "QR");
      }
      other => panic!("unexpected frame: {other:?}"),
    }
    match rx.recv().await.unwrap() {
      StreamFrame::Event { name, data } => {
        assert_eq!(name, "qr");
        assert_eq!(data["qr"], "qr-payload");
      }
      other => panic!("unexpected frame: {other:?}"),
    }
  }

  #[tokio::test]
  async fn test_publish_reaches_every_subscriber_of_key() {
    let bus = EventBus::new();
    let mut rx1 = bus.subscribe("k1", None, None);
    let mut rx2 = bus.subscribe("k1", None, None);
    let mut other = bus.subscribe("k2", None, None);
    // 清掉附加时的冲刷帧
    // Drain the attach-time flush frames
    rx1.recv().await.unwrap();
    rx2.recv().await.unwrap();
    other.recv().await.unwrap();

    bus.publish_status(&info("k1", SessionStatus::Connected, true));

    for rx in [&mut rx1, &mut rx2] {
      match rx.recv().await.unwrap() {
        StreamFrame::Event { name, data } => {
          assert_eq!(name, "status");
          assert_eq!(data["connected"], true);
        }
        other => panic!("unexpected frame: {other:?}"),
      }
    }
    assert!(other.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_qr_null_is_broadcast() {
    let bus = EventBus::new();
    let mut rx = bus.subscribe("k1", None, None);
    rx.recv().await.unwrap();

    bus.publish_qr("k1", None);
    match rx.recv().await.unwrap() {
      StreamFrame::Event { name, data } => {
        assert_eq!(name, "qr");
        assert!(data["qr"].is_null());
      }
      other => panic!("unexpected frame: {other:?}"),
    }
  }

  #[tokio::test]
  async fn test_heartbeat_prunes_dead_subscribers() {
    let bus = EventBus::new();
    let rx = bus.subscribe("k1", None, None);
    let mut alive = bus.subscribe("k1", None, None);
    alive.recv().await.unwrap();
    assert_eq!(bus.subscriber_count("k1"), 2);

    drop(rx);
    bus.heartbeat();
    assert_eq!(bus.subscriber_count("k1"), 1);
    assert_eq!(alive.recv().await.unwrap(), StreamFrame::Comment("heartbeat"));
  }

  #[tokio::test]
  async fn test_heartbeat_component_lifecycle() {
    let bus = Arc::new(EventBus::new());
    let heartbeat = Arc::new(Heartbeat::new(bus, Duration::from_millis(10)));
    assert!(!heartbeat.is_done());
    let handle = heartbeat.clone().start();
    heartbeat.shutdown();
    assert!(heartbeat.is_done());
    let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
  }
}
