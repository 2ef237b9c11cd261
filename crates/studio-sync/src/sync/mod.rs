/// 离线同步模块
///
/// 职责：
/// - 回放本地待同步队列（create → update → delete）
/// - 本地标识 → 服务端 ID 的引用改写
/// - 定时 / 重新联网时自动同步，支持手动触发

pub mod reconciler;
pub mod references;

pub use reconciler::{SyncOptions, SyncReconciler};
pub use references::resolve_references;
