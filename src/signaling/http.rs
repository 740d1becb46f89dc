//! HTTP signaling against the realtime API

use async_trait::async_trait;
use chrono::DateTime;
use serde::{Deserialize, Serialize};

use super::{EphemeralCredential, Signaling};
use crate::config::ClientConfig;
use crate::error::SignalingError;
use crate::transport::{SdpType, SessionDescription};

#[derive(Serialize)]
struct SessionRequest<'a> {
    model: &'a str,
    modalities: [&'static str; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice: Option<&'a str>,
}

#[derive(Deserialize)]
struct SessionResponse {
    client_secret: ClientSecret,
}

#[derive(Deserialize)]
struct ClientSecret {
    value: String,
    /// Unix seconds
    #[serde(default)]
    expires_at: Option<i64>,
}

/// Signaling client for the OpenAI realtime endpoints
pub struct OpenAiSignaling {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    instructions: Option<String>,
    voice: Option<String>,
}

impl OpenAiSignaling {
    pub fn new(config: &ClientConfig) -> Result<Self, SignalingError> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(SignalingError::MissingApiKey)?
            .to_string();

        let client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base().to_string(),
            api_key,
            model: config.model.clone(),
            instructions: config.instructions.clone(),
            voice: config.voice.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, SignalingError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SignalingError::Http {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Signaling for OpenAiSignaling {
    async fn obtain_credential(&self) -> Result<EphemeralCredential, SignalingError> {
        let url = format!("{}/realtime/sessions", self.api_base);
        let body = SessionRequest {
            model: &self.model,
            modalities: ["audio", "text"],
            instructions: self.instructions.as_deref(),
            voice: self.voice.as_deref(),
        };

        tracing::debug!("Requesting ephemeral credential for model {}", self.model);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let text = Self::check(response).await?.text().await?;

        let parsed: SessionResponse = serde_json::from_str(&text)
            .map_err(|e| SignalingError::MalformedResponse(format!("session response: {}", e)))?;

        let expires_at = match parsed.client_secret.expires_at {
            Some(secs) => Some(DateTime::from_timestamp(secs, 0).ok_or_else(|| {
                SignalingError::MalformedResponse(format!("expires_at out of range: {}", secs))
            })?),
            None => None,
        };

        Ok(EphemeralCredential::new(parsed.client_secret.value, expires_at))
    }

    async fn exchange_description(
        &self,
        credential: &EphemeralCredential,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, SignalingError> {
        if credential.is_expired() {
            return Err(SignalingError::CredentialExpired);
        }
        if offer.kind != SdpType::Offer {
            return Err(SignalingError::MalformedResponse(
                "local description must be an offer".into(),
            ));
        }

        let url = format!("{}/realtime", self.api_base);
        tracing::debug!("Exchanging session description ({} bytes)", offer.sdp.len());
        let response = self
            .client
            .post(&url)
            .query(&[("model", self.model.as_str())])
            .bearer_auth(credential.value())
            .header(reqwest::header::CONTENT_TYPE, "application/sdp")
            .body(offer.sdp.clone())
            .send()
            .await?;
        let answer = Self::check(response).await?.text().await?;

        if answer.trim().is_empty() {
            return Err(SignalingError::MalformedResponse("empty answer".into()));
        }
        Ok(SessionDescription::answer(answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    /// Answer a single HTTP request with a canned response; yields the raw request
    async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            request
        });
        (format!("http://{}", addr), handle)
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let headers = String::from_utf8_lossy(&buf[..end]).to_lowercase();
                let body_len = headers
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|value| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + body_len {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn signaling(api_base: &str) -> OpenAiSignaling {
        let mut config = ClientConfig::with_api_key("sk-test");
        config.api_base = api_base.to_string();
        config.model = "rt-model".into();
        config.instructions = Some("Be brief.".into());
        OpenAiSignaling::new(&config).unwrap()
    }

    #[test]
    fn test_missing_api_key() {
        let config = ClientConfig::default();
        assert!(matches!(
            OpenAiSignaling::new(&config),
            Err(SignalingError::MissingApiKey)
        ));
    }

    #[tokio::test]
    async fn test_obtain_credential() {
        let (base, server) = serve_once(
            "200 OK",
            r#"{"client_secret":{"value":"ek_abc","expires_at":4102444800}}"#,
        )
        .await;

        let credential = signaling(&base).obtain_credential().await.unwrap();
        assert_eq!(credential.value(), "ek_abc");
        assert_eq!(credential.expires_at().map(|t| t.timestamp()), Some(4102444800));

        let request = server.await.unwrap();
        let lower = request.to_lowercase();
        assert!(request.starts_with("POST /realtime/sessions "));
        assert!(lower.contains("authorization: bearer sk-test"));
        assert!(request.contains(r#""model":"rt-model""#));
        assert!(request.contains(r#""modalities":["audio","text"]"#));
        assert!(request.contains(r#""instructions":"Be brief.""#));
        assert!(!request.contains("voice"));
    }

    #[tokio::test]
    async fn test_http_error_carries_status_and_body() {
        let (base, _server) = serve_once("401 Unauthorized", "bad key").await;
        match signaling(&base).obtain_credential().await {
            Err(SignalingError::Http { status, body }) => {
                assert_eq!(status, 401);
                assert_eq!(body, "bad key");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_session_response() {
        let (base, _server) = serve_once("200 OK", r#"{"unexpected":true}"#).await;
        assert!(matches!(
            signaling(&base).obtain_credential().await,
            Err(SignalingError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_exchange_description() {
        let (base, server) = serve_once("201 Created", "v=0\r\no=answer").await;
        let credential = EphemeralCredential::new("ek_live", None);
        let answer = signaling(&base)
            .exchange_description(&credential, &SessionDescription::offer("v=0\r\no=offer"))
            .await
            .unwrap();
        assert_eq!(answer, SessionDescription::answer("v=0\r\no=answer"));

        let request = server.await.unwrap();
        let lower = request.to_lowercase();
        assert!(request.starts_with("POST /realtime?model=rt-model "));
        assert!(lower.contains("authorization: bearer ek_live"));
        assert!(lower.contains("content-type: application/sdp"));
        assert!(request.ends_with("v=0\r\no=offer"));
    }

    #[tokio::test]
    async fn test_expired_credential_is_refused_before_request() {
        let signaling = signaling("http://127.0.0.1:9");
        let expired = EphemeralCredential::new("ek_old", DateTime::from_timestamp(1, 0));
        assert!(matches!(
            signaling
                .exchange_description(&expired, &SessionDescription::offer("v=0"))
                .await,
            Err(SignalingError::CredentialExpired)
        ));
    }
}
