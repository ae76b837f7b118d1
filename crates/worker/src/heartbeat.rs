//! 租约心跳
//!
//! 每个执行中的分配配一个后台心跳任务，按固定间隔为租约续约。
//! 心跳失败不中断执行：网络抖动下一轮会重试，租约已失效时循环
//! 自行退出，迟到的结果由控制面拒收。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::CoordinatorClient;

/// 心跳任务的停止开关
pub struct HeartbeatGuard {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl HeartbeatGuard {
    /// 通知心跳循环退出并等待它结束
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.handle.await;
    }
}

/// 为一个租约启动后台心跳循环
pub fn start_heartbeat(
    client: Arc<CoordinatorClient>,
    lease_id: String,
    interval_seconds: u64,
) -> HeartbeatGuard {
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds));
        // 首次tick立即完成，真正的心跳从一个间隔之后开始
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match client.send_heartbeat(&lease_id).await {
                        Ok(payload) => {
                            debug!("心跳成功: lease={} 新到期={}", lease_id, payload.new_expiry);
                        }
                        Err(e) if e.is_lease_race() => {
                            warn!("租约已失效，停止心跳: lease={}", lease_id);
                            break;
                        }
                        Err(e) => {
                            warn!("心跳失败: lease={}: {}", lease_id, e);
                        }
                    }
                }
                _ = stop_rx.changed() => {
                    debug!("心跳循环收到停止信号: lease={}", lease_id);
                    break;
                }
            }
        }
    });
    HeartbeatGuard { stop_tx, handle }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    async fn spawn_stub(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_stop_interrupts_waiting_heartbeat() {
        let base = spawn_stub(Router::new()).await;
        let client = Arc::new(CoordinatorClient::new(&base, "worker-1"));

        let guard = start_heartbeat(client, "lease-1".to_string(), 3600);
        tokio::time::timeout(Duration::from_secs(1), guard.stop())
            .await
            .expect("heartbeat loop did not stop promptly");
    }

    #[tokio::test]
    async fn test_heartbeats_renew_periodically() {
        let count: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
        let router = Router::new()
            .route(
                "/heartbeat/{lease_id}",
                post(|State(count): State<Arc<Mutex<u32>>>| async move {
                    *count.lock().unwrap() += 1;
                    Json(json!({"new_expiry": "2026-01-01T00:05:00Z"}))
                }),
            )
            .with_state(count.clone());
        let base = spawn_stub(router).await;
        let client = Arc::new(CoordinatorClient::new(&base, "worker-1"));

        let guard = start_heartbeat(client, "lease-1".to_string(), 1);
        tokio::time::sleep(Duration::from_millis(1300)).await;
        guard.stop().await;

        assert!(*count.lock().unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_expired_lease_stops_heartbeat_loop() {
        let count: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
        let router = Router::new()
            .route(
                "/heartbeat/{lease_id}",
                post(|State(count): State<Arc<Mutex<u32>>>| async move {
                    *count.lock().unwrap() += 1;
                    StatusCode::GONE
                }),
            )
            .with_state(count.clone());
        let base = spawn_stub(router).await;
        let client = Arc::new(CoordinatorClient::new(&base, "worker-1"));

        let guard = start_heartbeat(client, "lease-1".to_string(), 1);
        tokio::time::sleep(Duration::from_millis(2500)).await;
        guard.stop().await;

        // 第一次410后循环退出，不再发第二次
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
