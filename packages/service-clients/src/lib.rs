//! HTTP clients for the services an account merge reaches out to.
//!
//! - [`AuthorizationClient`] - roles/permissions owned by each account
//! - [`SecondaryDataClient`] - domain data kept by the secondary-data service
//! - [`NotificationClient`] - out-of-band confirmation mail
//!
//! Every call takes the timeout to apply to that single request, so callers
//! decide how long each remote hop may take.

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

pub mod error;
pub mod models;

pub use error::ClientError;
use models::{
    AuthorizationState, MergeConfirmationEmail, MergeRolesRequest, MergeUserDataRequest,
    RollbackRoleMergeRequest, RollbackUserDataRequest,
};

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub base_url: String,
    /// Sent as a bearer token when present
    pub api_key: Option<String>,
}

impl ServiceOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }
}

/// Shared request plumbing for the three clients.
#[derive(Debug, Clone)]
struct HttpService {
    client: Client,
    options: ServiceOptions,
}

impl HttpService {
    fn new(options: ServiceOptions) -> Self {
        Self {
            client: Client::new(),
            options,
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.options.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn request(&self, method: Method, url: &str, timeout: Duration) -> RequestBuilder {
        let builder = self.client.request(method, url).timeout(timeout);
        match &self.options.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, url: &str) -> Result<Response, ClientError> {
        let response = builder.send().await.map_err(|source| {
            if source.is_timeout() {
                ClientError::Timeout {
                    url: url.to_string(),
                }
            } else {
                ClientError::Transport {
                    url: url.to_string(),
                    source,
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(%url, status = status.as_u16(), "remote service returned an error");
            return Err(ClientError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        timeout: Duration,
    ) -> Result<T, ClientError> {
        let url = self.url(path);
        let response = self
            .send(self.request(Method::GET, &url, timeout), &url)
            .await?;
        response
            .json::<T>()
            .await
            .map_err(|source| ClientError::Decode { url, source })
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        let url = self.url(path);
        self.send(self.request(Method::POST, &url, timeout).json(body), &url)
            .await?;
        Ok(())
    }
}

// =============================================================================
// Authorization service
// =============================================================================

#[derive(Debug, Clone)]
pub struct AuthorizationClient {
    http: HttpService,
}

impl AuthorizationClient {
    pub fn new(options: ServiceOptions) -> Self {
        Self {
            http: HttpService::new(options),
        }
    }

    /// Roles and permissions currently granted to `user_id`.
    pub async fn get_authorization_state(
        &self,
        user_id: Uuid,
        timeout: Duration,
    ) -> Result<AuthorizationState, ClientError> {
        self.http
            .get_json(&format!("v1/users/{user_id}/authorization"), timeout)
            .await
    }

    /// Copy every grant held by the source account onto the target account.
    pub async fn merge_roles(
        &self,
        request: &MergeRolesRequest,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        self.http.post("v1/roles/merge", request, timeout).await
    }

    pub async fn rollback_role_merge(
        &self,
        request: &RollbackRoleMergeRequest,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        self.http
            .post("v1/roles/merge/rollback", request, timeout)
            .await
    }
}

// =============================================================================
// Secondary-data service
// =============================================================================

#[derive(Debug, Clone)]
pub struct SecondaryDataClient {
    http: HttpService,
}

impl SecondaryDataClient {
    pub fn new(options: ServiceOptions) -> Self {
        Self {
            http: HttpService::new(options),
        }
    }

    /// Re-home the source account's records onto the target account. The
    /// service keeps its own pre-merge copy for [`Self::rollback_merge`].
    pub async fn merge_user_data(
        &self,
        request: &MergeUserDataRequest,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        self.http.post("v1/user-data/merge", request, timeout).await
    }

    pub async fn rollback_merge(
        &self,
        request: &RollbackUserDataRequest,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        self.http
            .post("v1/user-data/merge/rollback", request, timeout)
            .await
    }
}

// =============================================================================
// Notification service
// =============================================================================

#[derive(Debug, Clone)]
pub struct NotificationClient {
    http: HttpService,
}

impl NotificationClient {
    pub fn new(options: ServiceOptions) -> Self {
        Self {
            http: HttpService::new(options),
        }
    }

    pub async fn send_merge_confirmation(
        &self,
        email: &MergeConfirmationEmail,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        self.http
            .post("v1/notifications/merge-confirmation", email, timeout)
            .await
    }
}
