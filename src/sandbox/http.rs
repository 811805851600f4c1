//! HTTP client for the remote sandbox service
//!
//! Two surfaces are involved:
//!
//! ```text
//! control plane   {api_url}/sandboxes[/{id}]          X-API-Key
//!                   POST   → {"sandboxID": ...}
//!                   GET    → 200 | 404
//!                   DELETE → 204 | 404
//!
//! in-sandbox agent https://{agent_port}-{id}.{domain}  X-API-Key
//!                   GET/POST /files?path=...
//!                   POST     /commands      CommandSpec → CommandOutput
//!                   POST     /execute       {"code"}    → CodeExecution
//!                   GET      /processes                 → [ProcessInfo]
//!                   DELETE   /processes/{pid}           → 204 | 404
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info};

use super::handle::preview_host;
use super::{CodeExecution, CommandOutput, CommandSpec, ProcessInfo, Sandbox, SandboxError, SandboxProvider};

const API_KEY_HEADER: &str = "X-API-Key";

/// Settings for [`HttpSandboxProvider`]
#[derive(Debug, Clone)]
pub struct HttpSandboxSettings {
    /// Control plane root, e.g. `https://api.e2b.app`
    pub api_url: String,
    pub api_key: Option<String>,
    /// Domain serving sandbox ports, e.g. `e2b.app`
    pub domain: String,
    /// Sandbox image/template to boot
    pub template: String,
    /// Port of the in-sandbox agent
    pub agent_port: u16,
    /// Idle lifetime requested for new sandboxes
    pub sandbox_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for HttpSandboxSettings {
    fn default() -> Self {
        Self {
            api_url: "https://api.e2b.app".to_string(),
            api_key: None,
            domain: "e2b.app".to_string(),
            template: "code-interpreter-v1".to_string(),
            agent_port: 49983,
            sandbox_timeout: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(300),
        }
    }
}

/// Sandbox provider backed by the remote REST service
pub struct HttpSandboxProvider {
    settings: HttpSandboxSettings,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct CreatedSandbox {
    #[serde(rename = "sandboxID", alias = "sandbox_id", alias = "id")]
    sandbox_id: String,
}

impl HttpSandboxProvider {
    /// Create a provider; fails when no API key is configured
    pub fn new(settings: HttpSandboxSettings) -> Result<Self, SandboxError> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or(SandboxError::MissingCredential("SANDBOX_API_KEY"))?;
        let client = reqwest::Client::builder().timeout(settings.request_timeout).build()?;
        Ok(Self {
            settings: HttpSandboxSettings {
                api_url: settings.api_url.trim_end_matches('/').to_string(),
                ..settings
            },
            api_key,
            client,
        })
    }

    fn sandbox_url(&self, id: &str) -> String {
        format!("{}/sandboxes/{}", self.settings.api_url, id)
    }

    fn attach(&self, id: String) -> Arc<dyn Sandbox> {
        let agent_url = format!(
            "https://{}",
            preview_host(&id, self.settings.agent_port, &self.settings.domain)
        );
        Arc::new(HttpSandbox {
            id,
            agent_url,
            api_key: self.api_key.clone(),
            client: self.client.clone(),
        })
    }
}

#[async_trait]
impl SandboxProvider for HttpSandboxProvider {
    async fn create(&self) -> Result<Arc<dyn Sandbox>, SandboxError> {
        let response = self
            .client
            .post(format!("{}/sandboxes", self.settings.api_url))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&serde_json::json!({
                "templateID": self.settings.template,
                "timeout": self.settings.sandbox_timeout.as_secs(),
            }))
            .send()
            .await?;
        let body = check(response).await?;
        let created: CreatedSandbox = serde_json::from_str(&body)?;
        info!(sandbox_id = %created.sandbox_id, template = %self.settings.template, "Sandbox created");
        Ok(self.attach(created.sandbox_id))
    }

    async fn connect(&self, id: &str) -> Result<Arc<dyn Sandbox>, SandboxError> {
        let response = self
            .client
            .get(self.sandbox_url(id))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(SandboxError::NotFound(id.to_string()));
        }
        check(response).await?;
        debug!(sandbox_id = %id, "Reconnected to sandbox");
        Ok(self.attach(id.to_string()))
    }

    async fn kill(&self, id: &str) -> Result<bool, SandboxError> {
        let response = self
            .client
            .delete(self.sandbox_url(id))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check(response).await?;
        Ok(true)
    }

    fn domain(&self) -> &str {
        &self.settings.domain
    }
}

/// Connection to the agent running inside one sandbox
struct HttpSandbox {
    id: String,
    agent_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpSandbox {
    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.agent_url, path))
            .header(API_KEY_HEADER, &self.api_key)
    }
}

#[async_trait]
impl Sandbox for HttpSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        let response = self
            .request(reqwest::Method::POST, "/files")
            .query(&[("path", path)])
            .body(content.to_string())
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<Option<String>, SandboxError> {
        let response = self
            .request(reqwest::Method::GET, "/files")
            .query(&[("path", path)])
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(check(response).await?))
    }

    async fn run_command(&self, spec: &CommandSpec) -> Result<CommandOutput, SandboxError> {
        let mut request = self.request(reqwest::Method::POST, "/commands").json(spec);
        // Let the command's own timeout fire before the HTTP one
        if let Some(timeout) = spec.timeout {
            request = request.timeout(timeout + Duration::from_secs(5));
        }
        let body = check(request.send().await?).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn run_code(&self, code: &str) -> Result<CodeExecution, SandboxError> {
        let response = self
            .request(reqwest::Method::POST, "/execute")
            .json(&serde_json::json!({ "code": code, "language": "python" }))
            .send()
            .await?;
        let body = check(response).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn list_processes(&self) -> Result<Vec<ProcessInfo>, SandboxError> {
        let response = self.request(reqwest::Method::GET, "/processes").send().await?;
        let body = check(response).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn kill_process(&self, pid: u32) -> Result<bool, SandboxError> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/processes/{}", pid))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check(response).await?;
        Ok(true)
    }
}

/// Read the body, turning non-2xx statuses into `SandboxError::Api`
async fn check(response: reqwest::Response) -> Result<String, SandboxError> {
    let status = response.status();
    let body = response.text().await?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(SandboxError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_api_key_is_fatal() {
        let result = HttpSandboxProvider::new(HttpSandboxSettings::default());
        assert!(matches!(result, Err(SandboxError::MissingCredential("SANDBOX_API_KEY"))));

        let blank = HttpSandboxSettings {
            api_key: Some("  ".into()),
            ..Default::default()
        };
        assert!(matches!(
            HttpSandboxProvider::new(blank),
            Err(SandboxError::MissingCredential(_))
        ));
    }

    #[test]
    fn test_agent_url_uses_preview_addressing() {
        let provider = HttpSandboxProvider::new(HttpSandboxSettings {
            api_url: "https://api.example.test/".into(),
            api_key: Some("key".into()),
            domain: "example.test".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(provider.sandbox_url("abc"), "https://api.example.test/sandboxes/abc");
        let sandbox = provider.attach("abc".into());
        assert_eq!(sandbox.id(), "abc");
        assert_eq!(provider.domain(), "example.test");
    }

    #[test]
    fn test_created_sandbox_id_aliases() {
        let a: CreatedSandbox = serde_json::from_str(r#"{"sandboxID": "x1"}"#).unwrap();
        let b: CreatedSandbox = serde_json::from_str(r#"{"id": "x2"}"#).unwrap();
        assert_eq!(a.sandbox_id, "x1");
        assert_eq!(b.sandbox_id, "x2");
    }
}
