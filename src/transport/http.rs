//! HTTP binding of the session service

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use super::{Feedback, Reply, Resume, SessionId, SessionStart, SessionTransport};
use crate::error::TransportError;
use crate::{Error, Result};

#[derive(serde::Deserialize)]
struct StartResponse {
    session_id: SessionId,
    message: String,
}

#[derive(serde::Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
}

#[derive(serde::Deserialize)]
struct ChatResponse {
    response: String,
}

#[derive(serde::Deserialize)]
struct EndResponse {
    #[serde(default)]
    feedback: Feedback,
}

/// Talks to the interview service over JSON/multipart HTTP
pub struct HttpTransport {
    client: reqwest::Client,
    base: Url,
    token: Option<SecretString>,
}

impl HttpTransport {
    /// Create a transport rooted at `base_url` (e.g. `http://localhost:8000/api/v1`)
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid or the HTTP client cannot be built
    pub fn new(base_url: &str, token: Option<SecretString>, timeout: Duration) -> Result<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid api url {base_url}: {e}")))?;

        // Url::join replaces the last segment unless the path ends with a slash
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base,
            token,
        })
    }

    fn endpoint(&self, path: &str) -> std::result::Result<Url, TransportError> {
        self.base
            .join(path)
            .map_err(|e| TransportError::Service(format!("invalid endpoint {path}: {e}")))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }
}

/// Turn a non-success response into the matching transport error
async fn reject(response: reqwest::Response, session_id: Option<&SessionId>) -> TransportError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    tracing::warn!(status = %status, body = %body, "session service error");

    match (status, session_id) {
        (StatusCode::NOT_FOUND, Some(id)) => TransportError::SessionNotFound(id.to_string()),
        (StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY, _) => {
            TransportError::Validation(body)
        }
        _ => TransportError::Service(format!("{status}: {body}")),
    }
}

#[async_trait]
impl SessionTransport for HttpTransport {
    async fn start_session(
        &self,
        job_description: &str,
        resume: Option<&Resume>,
    ) -> std::result::Result<SessionStart, TransportError> {
        if job_description.trim().is_empty() {
            return Err(TransportError::Validation(
                "job description is required".to_string(),
            ));
        }

        let mut form =
            reqwest::multipart::Form::new().text("job_description", job_description.to_string());

        if let Some(resume) = resume {
            let part = reqwest::multipart::Part::bytes(resume.bytes.clone())
                .file_name(resume.file_name.clone())
                .mime_str(&resume.mime_type)
                .map_err(|e| TransportError::Validation(format!("resume: {e}")))?;
            form = form.part("resume", part);
        }

        tracing::debug!(
            resume = ?resume.map(|r| &r.file_name),
            "starting interview session"
        );

        let response = self
            .authorize(self.client.post(self.endpoint("interview/start")?))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(reject(response, None).await);
        }

        let body: StartResponse = response.json().await?;
        tracing::info!(session_id = %body.session_id, "interview session started");

        Ok(SessionStart {
            session_id: body.session_id,
            first_message: body.message,
        })
    }

    async fn send_message(
        &self,
        session_id: &SessionId,
        text: &str,
    ) -> std::result::Result<Reply, TransportError> {
        let url = self.endpoint(&format!("interview/{session_id}/chat"))?;
        tracing::debug!(session_id = %session_id, chars = text.len(), "sending message");

        let response = self
            .authorize(self.client.post(url))
            .json(&ChatRequest { message: text })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(reject(response, Some(session_id)).await);
        }

        let body: ChatResponse = response.json().await?;
        Ok(Reply {
            text: body.response,
        })
    }

    async fn end_session(
        &self,
        session_id: &SessionId,
    ) -> std::result::Result<Feedback, TransportError> {
        let url = self.endpoint(&format!("interview/{session_id}/end"))?;
        tracing::debug!(session_id = %session_id, "ending session");

        let response = self.authorize(self.client.post(url)).send().await?;

        if !response.status().is_success() {
            return Err(reject(response, Some(session_id)).await);
        }

        let body: EndResponse = response.json().await?;
        tracing::info!(session_id = %session_id, score = body.feedback.score, "session feedback received");
        Ok(body.feedback)
    }
}
