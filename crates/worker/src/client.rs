//! 协调器HTTP客户端
//!
//! Worker与运行器之间的全部通信都走这三个端点：领取分配、
//! 心跳续约、上报结果。404与410分别映射回未知租约与租约失效，
//! 让调用方能区分可重试的网络故障和不可挽回的租约竞争结果。

use reqwest::StatusCode;
use tracing::debug;

use conductor_core::models::{
    AssignRequest, AssignmentPayload, HeartbeatPayload, ResultAccepted, ResultSubmission,
};
use conductor_core::{ConductorError, ConductorResult};

pub struct CoordinatorClient {
    base_url: String,
    worker_id: String,
    http: reqwest::Client,
}

impl CoordinatorClient {
    pub fn new(runner_url: &str, worker_id: &str) -> Self {
        Self {
            base_url: runner_url.trim_end_matches('/').to_string(),
            worker_id: worker_id.to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// 尝试领取一次分配；队列为空时返回 `None`
    pub async fn request_assignment(
        &self,
        capabilities: &[String],
    ) -> ConductorResult<Option<AssignmentPayload>> {
        let request = AssignRequest {
            worker_id: self.worker_id.clone(),
            capabilities: capabilities.to_vec(),
        };
        let url = format!("{}/assign", self.base_url);

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ConductorError::Internal(format!("协调器连接失败: {e}")))?;

        match response.status() {
            StatusCode::NO_CONTENT => {
                debug!("队列为空，本轮未领取到分配");
                Ok(None)
            }
            status if status.is_success() => {
                let payload = response.json::<AssignmentPayload>().await.map_err(|e| {
                    ConductorError::Serialization(format!("解析分配响应失败: {e}"))
                })?;
                Ok(Some(payload))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ConductorError::Internal(format!(
                    "领取分配失败: HTTP {status}: {body}"
                )))
            }
        }
    }

    /// 为持有的租约续约，返回新的到期时间
    pub async fn send_heartbeat(&self, lease_id: &str) -> ConductorResult<HeartbeatPayload> {
        let url = format!("{}/heartbeat/{}", self.base_url, lease_id);

        let response = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| ConductorError::Internal(format!("协调器连接失败: {e}")))?;

        if response.status().is_success() {
            response
                .json::<HeartbeatPayload>()
                .await
                .map_err(|e| ConductorError::Serialization(format!("解析心跳响应失败: {e}")))
        } else {
            Err(lease_error(lease_id, response).await)
        }
    }

    /// 上报终态结果
    pub async fn submit_result(
        &self,
        lease_id: &str,
        submission: &ResultSubmission,
    ) -> ConductorResult<ResultAccepted> {
        let url = format!("{}/result/{}", self.base_url, lease_id);

        let response = self
            .http
            .post(&url)
            .json(submission)
            .send()
            .await
            .map_err(|e| ConductorError::Internal(format!("协调器连接失败: {e}")))?;

        if response.status().is_success() {
            response
                .json::<ResultAccepted>()
                .await
                .map_err(|e| ConductorError::Serialization(format!("解析结果回执失败: {e}")))
        } else {
            Err(lease_error(lease_id, response).await)
        }
    }
}

/// 把租约端点的错误状态映射回领域错误
async fn lease_error(lease_id: &str, response: reqwest::Response) -> ConductorError {
    match response.status() {
        StatusCode::NOT_FOUND => ConductorError::UnknownLease {
            lease_id: lease_id.to_string(),
        },
        StatusCode::GONE => ConductorError::LeaseExpired {
            lease_id: lease_id.to_string(),
        },
        status => {
            let body = response.text().await.unwrap_or_default();
            ConductorError::Internal(format!("协调器返回 HTTP {status}: {body}"))
        }
    }
}
