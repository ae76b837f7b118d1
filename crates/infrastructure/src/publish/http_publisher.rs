use async_trait::async_trait;
use conductor_core::{
    models::{ProposalStatus, PublishMode},
    traits::{PublishMechanism, PublishReceipt, PublishRequest},
    ConductorError, ConductorResult,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

/// 发布网关的成功响应体
#[derive(Debug, Deserialize)]
struct PublishResponse {
    url: String,
    /// 网关实际执行的发布方式
    mode: PublishMode,
    #[serde(default)]
    description: Option<String>,
}

/// 发布网关的失败响应体
#[derive(Debug, Deserialize)]
struct PublishErrorBody {
    code: String,
    description: String,
}

/// 提案状态查询的响应体
#[derive(Debug, Deserialize)]
struct ProposalStatusResponse {
    status: ProposalStatus,
}

/// 经由 HTTP 发布网关的发布机制
///
/// 网关持有托管方凭据并执行推送/开提案，本端只翻译请求与结果。
/// 失败结果码原样透传给状态机，`permission-denied` 的降级决策
/// 不在这一层做。
pub struct HttpPublishMechanism {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpPublishMechanism {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl PublishMechanism for HttpPublishMechanism {
    async fn publish(&self, request: &PublishRequest) -> ConductorResult<PublishReceipt> {
        let url = format!("{}/publish", self.base_url);
        debug!(
            "发布请求: {}/{} mode={:?} run={}",
            request.campaign, request.target, request.mode, request.run_id
        );

        let response = self
            .http_client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                warn!("发布网关不可达: {e}");
                ConductorError::Publish {
                    code: "publisher-unreachable".to_string(),
                    description: format!("publish gateway request failed: {e}"),
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return match serde_json::from_str::<PublishErrorBody>(&body) {
                Ok(error) => Err(ConductorError::Publish {
                    code: error.code,
                    description: error.description,
                }),
                Err(_) => Err(ConductorError::Publish {
                    code: "publisher-invalid-response".to_string(),
                    description: format!("HTTP {status} - {body}"),
                }),
            };
        }

        let body: PublishResponse =
            response
                .json()
                .await
                .map_err(|e| ConductorError::Publish {
                    code: "publisher-invalid-response".to_string(),
                    description: format!("malformed publish response: {e}"),
                })?;

        // 直接推送的变更已落在主分支上，等价于已合并的提案
        let status = match body.mode {
            PublishMode::Push => ProposalStatus::Merged,
            _ => ProposalStatus::Open,
        };

        info!(
            "发布完成: {}/{} mode={:?} url={}",
            request.campaign, request.target, body.mode, body.url
        );
        Ok(PublishReceipt {
            url: body.url,
            status,
            mode: body.mode,
            description: body.description,
        })
    }

    async fn check_proposal(&self, proposal_url: &str) -> ConductorResult<ProposalStatus> {
        let url = format!("{}/proposal", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .query(&[("url", proposal_url)])
            .send()
            .await
            .map_err(|e| {
                warn!("发布网关不可达: {e}");
                ConductorError::Publish {
                    code: "publisher-unreachable".to_string(),
                    description: format!("proposal status request failed: {e}"),
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ConductorError::Publish {
                code: "proposal-status-unavailable".to_string(),
                description: format!("HTTP {status} - {body}"),
            });
        }

        let body: ProposalStatusResponse =
            response
                .json()
                .await
                .map_err(|e| ConductorError::Publish {
                    code: "publisher-invalid-response".to_string(),
                    description: format!("malformed proposal status response: {e}"),
                })?;

        debug!("提案状态核对: {} -> {:?}", proposal_url, body.status);
        Ok(body.status)
    }
}
