//! 常量定义
//! Constant definitions

use std::time::Duration;

/// 会话锁的租约时长
/// Lease duration of the session lock
pub const LOCK_TTL: Duration = Duration::from_secs(5 * 60);

/// 等待配对二维码的最长时间
/// Maximum time to wait for a pairing QR code
pub const QR_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// 发送消息前等待连接建立的最长时间
/// Maximum time to wait for the connection before sending
pub const CONNECT_WAIT_TIMEOUT: Duration = Duration::from_secs(20);

/// 预热时每个会话等待连接的最长时间
/// Per-session connection wait during warm-up
pub const WARM_WAIT_TIMEOUT: Duration = Duration::from_secs(15);

/// 事件流心跳间隔
/// Event stream heartbeat interval
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// 重连退避基数（毫秒）
/// Reconnect backoff base (milliseconds)
pub const RECONNECT_BASE_DELAY_MS: u64 = 1_000;

/// 重连退避上限（毫秒）
/// Reconnect backoff cap (milliseconds)
pub const RECONNECT_MAX_DELAY_MS: u64 = 30_000;

/// 重连抖动范围（毫秒，半开区间）
/// Reconnect jitter range (milliseconds, half-open)
pub const RECONNECT_JITTER_MS: u64 = 500;

/// 退避指数的最大值，2^5 = 32 秒（封顶前）
/// Maximum backoff exponent, 2^5 = 32 s (before the cap)
pub const MAX_BACKOFF_EXP: u32 = 5;

/// API 密钥前缀
/// API key prefix
pub const API_KEY_PREFIX: &str = "wg_";

/// API 密钥随机部分的字节数（192 位熵）
/// Random bytes in an API key (192 bits of entropy)
pub const API_KEY_ENTROPY_BYTES: usize = 24;

/// 密钥生成唯一性冲突的最大重试次数
/// Maximum retries on key uniqueness collision
pub const MAX_KEY_GENERATION_ATTEMPTS: usize = 5;

/// 去掉前导 0 时补上的默认国家区号
/// Default country prefix substituted for a leading 0
pub const DEFAULT_COUNTRY_PREFIX: &str = "62";

/// 文本消息的最大字符数
/// Maximum characters in a text message
pub const MAX_TEXT_LENGTH: usize = 1_000;

/// 上游断开状态码：已登出（终态）
/// Upstream disconnect status code: logged out (terminal)
pub const DISCONNECT_LOGGED_OUT: u16 = 401;

/// 上游断开状态码：要求重启（可重连）
/// Upstream disconnect status code: restart required (reconnectable)
pub const DISCONNECT_RESTART_REQUIRED: u16 = 515;

/// 无法解析时使用的协议版本
/// Protocol version used when resolution is unavailable
pub const FALLBACK_WA_VERSION: [u32; 3] = [2, 3000, 1023223821];

/// WhatsApp 个人账号的 JID 域
/// JID domain of personal WhatsApp accounts
pub const JID_USER_DOMAIN: &str = "s.whatsapp.net";
