use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::{DashboardError, DashboardResult};
use crate::model::{
    AccountListQuery, AccountPage, AccountRef, AccountStatus, Ack, BackendConfig, TaskStatus,
    UsageReport, VerificationRequest,
};
use crate::setting::ConfigSaveMethod;

/// 后端 REST 接口。所有失败都以 `DashboardError` 返回，不会 panic 越过边界。
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    async fn list_accounts(&self, query: &AccountListQuery) -> DashboardResult<AccountPage>;
    async fn task_status(&self) -> DashboardResult<TaskStatus>;
    async fn start_task(&self) -> DashboardResult<Ack>;
    async fn stop_task(&self) -> DashboardResult<Ack>;
    async fn register_custom(&self, email: &str) -> DashboardResult<Ack>;
    async fn pending_verifications(&self) -> DashboardResult<Vec<VerificationRequest>>;
    async fn clear_verifications(&self) -> DashboardResult<Ack>;
    async fn submit_verification(&self, id: &str, code: &str) -> DashboardResult<Ack>;
    async fn update_account_status(
        &self,
        target: &AccountRef,
        status: AccountStatus,
    ) -> DashboardResult<Ack>;
    async fn delete_account(&self, target: &AccountRef, hard_delete: bool) -> DashboardResult<Ack>;
    async fn account_usage(&self, email: &str) -> DashboardResult<UsageReport>;
    async fn update_usage_limit(&self, email: &str, usage_limit: i64) -> DashboardResult<Ack>;
    async fn use_token(&self, id: i64) -> DashboardResult<Ack>;
    async fn load_config(&self) -> DashboardResult<BackendConfig>;
    async fn save_config(&self, config: &BackendConfig) -> DashboardResult<Ack>;
    async fn export_accounts(&self) -> DashboardResult<Vec<u8>>;
    async fn import_accounts(&self, file_name: &str, content: Vec<u8>) -> DashboardResult<Ack>;
    async fn restart(&self) -> DashboardResult<Ack>;
    async fn reset_machine(&self) -> DashboardResult<Ack>;
}

/// 统一后的应答：`success` 缺省时按 HTTP 状态判断
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub success: bool,
    pub message: Option<String>,
    pub body: Value,
}

impl ApiResponse {
    fn from_body(http_ok: bool, body: Value) -> Self {
        let success = body
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(http_ok);
        let message = body
            .get("message")
            .or_else(|| body.get("detail"))
            .and_then(Value::as_str)
            .map(str::to_string);
        Self {
            success,
            message,
            body,
        }
    }

    pub fn into_result(self) -> DashboardResult<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(DashboardError::application(self.message))
        }
    }

    pub fn ack(self) -> DashboardResult<Ack> {
        let response = self.into_result()?;
        Ok(Ack {
            message: response.message,
        })
    }

    /// 取 `data` 字段
    pub fn data<T: DeserializeOwned>(self) -> DashboardResult<T> {
        let mut response = self.into_result()?;
        let data = response
            .body
            .get_mut("data")
            .map(Value::take)
            .ok_or_else(|| DashboardError::application(Some("response has no data".into())))?;
        Ok(serde_json::from_value(data)?)
    }

    /// 整个响应体就是结果
    pub fn whole<T: DeserializeOwned>(self) -> DashboardResult<T> {
        let response = self.into_result()?;
        Ok(serde_json::from_value(response.body)?)
    }
}

pub struct HttpGateway {
    base: Url,
    client: Client,
    config_method: Method,
}

impl HttpGateway {
    pub fn new(base_url: &str) -> DashboardResult<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| DashboardError::validation(format!("invalid base url {}: {}", base_url, e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(HttpGateway {
            base,
            client: Client::new(),
            config_method: Method::POST,
        })
    }

    pub fn with_config_method(mut self, method: ConfigSaveMethod) -> Self {
        self.config_method = match method {
            ConfigSaveMethod::Post => Method::POST,
            ConfigSaveMethod::Put => Method::PUT,
        };
        self
    }

    fn url(&self, path: &str) -> DashboardResult<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| DashboardError::validation(format!("invalid path {}: {}", path, e)))
    }

    fn account_path(target: &AccountRef) -> String {
        match target {
            AccountRef::Id(id) => format!("account/id/{}", id),
            AccountRef::Email(email) => format!("account/{}", urlencoding::encode(email)),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> DashboardResult<ApiResponse> {
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        let body = match serde_json::from_str::<Value>(&text) {
            Ok(body) => body,
            Err(_) if !status.is_success() => {
                return Err(DashboardError::application(Some(format!("HTTP {}", status))));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(ApiResponse::from_body(status.is_success(), body))
    }

    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> DashboardResult<ApiResponse> {
        let url = self.url(path)?;
        log::debug!("{} {}", method, url);
        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        self.send(request).await
    }

    async fn get(&self, path: &str) -> DashboardResult<ApiResponse> {
        self.call(Method::GET, path, None).await
    }
}

#[async_trait]
impl Backend for HttpGateway {
    async fn list_accounts(&self, query: &AccountListQuery) -> DashboardResult<AccountPage> {
        let mut url = self.url("accounts")?;
        {
            let mut query_pairs = url.query_pairs_mut();
            query_pairs.append_pair("page", &query.page.to_string());
            query_pairs.append_pair("per_page", &query.per_page.to_string());
            query_pairs.append_pair("sort_by", query.sort_field.as_str());
            query_pairs.append_pair("order", query.sort_order.as_str());
            if !query.search.is_empty() {
                query_pairs.append_pair("search", &query.search);
            }
        }
        self.send(self.client.get(url)).await?.whole()
    }

    async fn task_status(&self) -> DashboardResult<TaskStatus> {
        self.get("registration/status").await?.whole()
    }

    async fn start_task(&self) -> DashboardResult<Ack> {
        self.get("registration/start").await?.ack()
    }

    async fn stop_task(&self) -> DashboardResult<Ack> {
        self.get("registration/stop").await?.ack()
    }

    async fn register_custom(&self, email: &str) -> DashboardResult<Ack> {
        self.call(Method::POST, "registration/custom", Some(json!({ "email": email })))
            .await?
            .ack()
    }

    async fn pending_verifications(&self) -> DashboardResult<Vec<VerificationRequest>> {
        self.get("verification/pending").await?.data()
    }

    async fn clear_verifications(&self) -> DashboardResult<Ack> {
        self.get("verification/clear").await?.ack()
    }

    async fn submit_verification(&self, id: &str, code: &str) -> DashboardResult<Ack> {
        self.call(
            Method::POST,
            "verification/submit",
            Some(json!({ "id": id, "code": code })),
        )
        .await?
        .ack()
    }

    async fn update_account_status(
        &self,
        target: &AccountRef,
        status: AccountStatus,
    ) -> DashboardResult<Ack> {
        let path = format!("{}/status", Self::account_path(target));
        self.call(Method::PUT, &path, Some(json!({ "status": status.as_str() })))
            .await?
            .ack()
    }

    async fn delete_account(&self, target: &AccountRef, hard_delete: bool) -> DashboardResult<Ack> {
        let mut url = self.url(&Self::account_path(target))?;
        if hard_delete {
            url.query_pairs_mut().append_pair("hard_delete", "true");
        }
        self.send(self.client.delete(url)).await?.ack()
    }

    async fn account_usage(&self, email: &str) -> DashboardResult<UsageReport> {
        let path = format!("account/{}/usage", urlencoding::encode(email));
        self.get(&path).await?.whole()
    }

    async fn update_usage_limit(&self, email: &str, usage_limit: i64) -> DashboardResult<Ack> {
        let path = format!("account/{}/update-usage", urlencoding::encode(email));
        self.call(Method::PUT, &path, Some(json!({ "usage_limit": usage_limit })))
            .await?
            .ack()
    }

    async fn use_token(&self, id: i64) -> DashboardResult<Ack> {
        let path = format!("account/use-token/{}", id);
        self.call(Method::POST, &path, None).await?.ack()
    }

    async fn load_config(&self) -> DashboardResult<BackendConfig> {
        self.get("config").await?.data()
    }

    async fn save_config(&self, config: &BackendConfig) -> DashboardResult<Ack> {
        let body = serde_json::to_value(config)?;
        self.call(self.config_method.clone(), "config", Some(body))
            .await?
            .ack()
    }

    async fn export_accounts(&self) -> DashboardResult<Vec<u8>> {
        let url = self.url("accounts/export")?;
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .map(|body| ApiResponse::from_body(false, body))
                .and_then(|r| r.message)
                .unwrap_or_else(|| format!("HTTP {}", status));
            return Err(DashboardError::application(Some(message)));
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn import_accounts(&self, file_name: &str, content: Vec<u8>) -> DashboardResult<Ack> {
        let url = self.url("accounts/import")?;
        let part = reqwest::multipart::Part::bytes(content).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        self.send(self.client.post(url).multipart(form)).await?.ack()
    }

    async fn restart(&self) -> DashboardResult<Ack> {
        self.call(Method::POST, "restart", None).await?.ack()
    }

    async fn reset_machine(&self) -> DashboardResult<Ack> {
        self.get("reset-machine").await?.ack()
    }
}
