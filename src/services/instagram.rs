//! Instagram Graph API content publishing client
//!
//! Thin protocol client for the three-step publish flow: create a media
//! container, poll its processing status, publish the finished container.
//! The client performs no retries of its own - retry policy belongs to the
//! publish pipeline. Every failure is surfaced as a [`RawError`] carrying
//! the platform's error code/subcode so the caller can classify it.

use reqwest::Client;
use serde::Deserialize;

use crate::constants::GRAPH_API_BASE_URL;

/// Reserved code for failures that never reached the platform (timeouts,
/// DNS, connection resets, unparseable bodies). Always classified transient.
pub const NETWORK_ERROR_CODE: i64 = -1;

/// Subcode the platform uses for media-processing failures; also attached
/// to container ERROR polls so they classify the same way.
pub const MEDIA_PROCESSING_SUBCODE: i64 = 2_207_001;

#[derive(Clone)]
pub struct InstagramClient {
    base_url: String,
    http: Client,
}

/// Media payload for a container create, resolved from the scheduled post.
#[derive(Debug, Clone)]
pub enum MediaPayload {
    Image { url: String },
    Video { url: String },
    Carousel { children: Vec<CarouselChild> },
}

#[derive(Debug, Clone)]
pub struct CarouselChild {
    pub url: String,
    pub is_video: bool,
}

/// Everything needed to create the container(s) for one post.
#[derive(Debug, Clone)]
pub struct ContainerRequest {
    pub media: MediaPayload,
    pub caption: String,
    pub location_id: Option<String>,
    pub user_tags: Option<serde_json::Value>,
}

impl InstagramClient {
    pub fn new() -> Self {
        Self::with_base_url(GRAPH_API_BASE_URL)
    }

    /// Client against a non-default Graph API endpoint (version pinning, tests)
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: Client::new(),
        }
    }

    /// Create the media container for a post.
    ///
    /// For image/video posts this is a single `POST /{ig-user-id}/media`.
    /// For carousels a child container is created per item, then a parent
    /// CAROUSEL container referencing the children ids. Returns the id of
    /// the container to poll and publish.
    pub async fn create_container(
        &self,
        access_token: &str,
        ig_user_id: &str,
        request: &ContainerRequest,
    ) -> Result<String, RawError> {
        match &request.media {
            MediaPayload::Image { url } => {
                let mut params = vec![
                    ("image_url", url.clone()),
                    ("caption", request.caption.clone()),
                ];
                push_common_params(&mut params, request);
                self.create_single_container(access_token, ig_user_id, params)
                    .await
            }
            MediaPayload::Video { url } => {
                let mut params = vec![
                    ("video_url", url.clone()),
                    ("media_type", "VIDEO".to_string()),
                    ("caption", request.caption.clone()),
                ];
                push_common_params(&mut params, request);
                self.create_single_container(access_token, ig_user_id, params)
                    .await
            }
            MediaPayload::Carousel { children } => {
                let mut child_ids = Vec::with_capacity(children.len());
                for child in children {
                    let mut params = vec![("is_carousel_item", "true".to_string())];
                    if child.is_video {
                        params.push(("video_url", child.url.clone()));
                        params.push(("media_type", "VIDEO".to_string()));
                    } else {
                        params.push(("image_url", child.url.clone()));
                        if let Some(tags) = &request.user_tags {
                            params.push(("user_tags", tags.to_string()));
                        }
                    }
                    let id = self
                        .create_single_container(access_token, ig_user_id, params)
                        .await?;
                    child_ids.push(id);
                }

                let mut params = vec![
                    ("media_type", "CAROUSEL".to_string()),
                    ("children", child_ids.join(",")),
                    ("caption", request.caption.clone()),
                ];
                if let Some(location_id) = &request.location_id {
                    params.push(("location_id", location_id.clone()));
                }
                self.create_single_container(access_token, ig_user_id, params)
                    .await
            }
        }
    }

    async fn create_single_container(
        &self,
        access_token: &str,
        ig_user_id: &str,
        params: Vec<(&str, String)>,
    ) -> Result<String, RawError> {
        let url = format!("{}/{}/media", self.base_url, ig_user_id);

        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", access_token))
            .form(&params)
            .send()
            .await
            .map_err(RawError::from_transport)?;

        let body: CreatedObject = parse_response(resp).await?;
        Ok(body.id)
    }

    /// Poll a container's processing status. Read-only, never a mutation.
    pub async fn container_status(
        &self,
        access_token: &str,
        container_id: &str,
    ) -> Result<ContainerStatus, RawError> {
        let url = format!(
            "{}/{}?fields=status_code,status",
            self.base_url, container_id
        );

        let resp = self
            .http
            .get(&url)
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await
            .map_err(RawError::from_transport)?;

        let body: ContainerStatusBody = parse_response(resp).await?;
        let raw_code = body.status_code.unwrap_or_default();
        Ok(ContainerStatus {
            status_code: ContainerStatusCode::from_wire(&raw_code),
            status: body.status.unwrap_or(raw_code),
        })
    }

    /// Publish a FINISHED container. Returns the published media id.
    pub async fn publish_container(
        &self,
        access_token: &str,
        ig_user_id: &str,
        creation_id: &str,
    ) -> Result<String, RawError> {
        let url = format!("{}/{}/media_publish", self.base_url, ig_user_id);
        let params = [("creation_id", creation_id.to_string())];

        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", access_token))
            .form(&params)
            .send()
            .await
            .map_err(RawError::from_transport)?;

        let body: CreatedObject = parse_response(resp).await?;
        Ok(body.id)
    }
}

fn push_common_params(params: &mut Vec<(&str, String)>, request: &ContainerRequest) {
    if let Some(location_id) = &request.location_id {
        params.push(("location_id", location_id.clone()));
    }
    if let Some(tags) = &request.user_tags {
        params.push(("user_tags", tags.to_string()));
    }
}

/// Decode a Graph API response, turning the shared `{"error": {...}}`
/// envelope (and anything unparseable) into a [`RawError`].
async fn parse_response<T: for<'de> Deserialize<'de>>(
    resp: reqwest::Response,
) -> Result<T, RawError> {
    let status = resp.status();
    let text = resp.text().await.map_err(RawError::from_transport)?;

    let value: serde_json::Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(_) => return Err(RawError::unexpected(status.as_u16(), &text)),
    };

    if let Some(err) = value.get("error") {
        let body: GraphErrorBody =
            serde_json::from_value(err.clone()).unwrap_or_default();
        return Err(RawError {
            code: body.code,
            subcode: body.error_subcode,
            message: body.message,
            user_title: body.error_user_title,
            user_message: body.error_user_msg,
            fbtrace_id: body.fbtrace_id,
        });
    }

    if !status.is_success() {
        return Err(RawError::unexpected(status.as_u16(), &text));
    }

    serde_json::from_value(value).map_err(|_| RawError::unexpected(status.as_u16(), &text))
}

#[derive(Debug, Deserialize)]
struct CreatedObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ContainerStatusBody {
    status_code: Option<String>,
    status: Option<String>,
}

/// Error envelope shared by every Graph API failure response
#[derive(Debug, Default, Deserialize)]
struct GraphErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: i64,
    error_subcode: Option<i64>,
    error_user_title: Option<String>,
    error_user_msg: Option<String>,
    fbtrace_id: Option<String>,
}

/// Processing state of a media container
#[derive(Debug, Clone)]
pub struct ContainerStatus {
    pub status_code: ContainerStatusCode,
    /// Last raw status string from the platform, kept for diagnostics
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatusCode {
    NotStarted,
    InProgress,
    Finished,
    Error,
    /// A status string this client does not know about
    Other,
}

impl ContainerStatusCode {
    pub fn from_wire(s: &str) -> Self {
        match s {
            "NOT_STARTED" => ContainerStatusCode::NotStarted,
            "IN_PROGRESS" => ContainerStatusCode::InProgress,
            "FINISHED" => ContainerStatusCode::Finished,
            "ERROR" => ContainerStatusCode::Error,
            _ => ContainerStatusCode::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatusCode::NotStarted => "NOT_STARTED",
            ContainerStatusCode::InProgress => "IN_PROGRESS",
            ContainerStatusCode::Finished => "FINISHED",
            ContainerStatusCode::Error => "ERROR",
            ContainerStatusCode::Other => "OTHER",
        }
    }
}

/// A failure from the publishing protocol, in the platform's own terms.
///
/// This is data, not control flow - classification into transient/permanent
/// happens in [`crate::services::instagram_errors`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", format_raw(.code, .subcode, .message, .user_title, .user_message))]
pub struct RawError {
    pub code: i64,
    pub subcode: Option<i64>,
    pub message: String,
    pub user_title: Option<String>,
    pub user_message: Option<String>,
    pub fbtrace_id: Option<String>,
}

impl RawError {
    /// Failure below the protocol: the request never got a platform answer
    pub fn from_transport(err: reqwest::Error) -> Self {
        Self::network(format!("network error: {}", err))
    }

    pub fn network(message: String) -> Self {
        Self {
            code: NETWORK_ERROR_CODE,
            subcode: None,
            message,
            user_title: None,
            user_message: None,
            fbtrace_id: None,
        }
    }

    /// Non-2xx or malformed body without a parseable error envelope
    pub fn unexpected(http_status: u16, body: &str) -> Self {
        let snippet: String = body.chars().take(200).collect();
        Self::network(format!(
            "unexpected response (status {}): {}",
            http_status, snippet
        ))
    }

    /// A container the platform reported as ERROR during processing
    pub fn media_processing(status_text: String) -> Self {
        Self {
            code: NETWORK_ERROR_CODE,
            subcode: Some(MEDIA_PROCESSING_SUBCODE),
            message: status_text,
            user_title: None,
            user_message: None,
            fbtrace_id: None,
        }
    }

    /// Synthesized when a stored credential is already past its expiry
    pub fn token_expired() -> Self {
        Self {
            code: 190,
            subcode: Some(463),
            message: "Access token has expired".to_string(),
            user_title: None,
            user_message: None,
            fbtrace_id: None,
        }
    }
}

fn format_raw(
    code: &i64,
    subcode: &Option<i64>,
    message: &str,
    user_title: &Option<String>,
    user_message: &Option<String>,
) -> String {
    let mut out = match subcode {
        Some(sub) => format!("{} (code {}, subcode {})", message, code, sub),
        None => format!("{} (code {})", message, code),
    };
    if let Some(title) = user_title {
        out.push_str(&format!(" - {}", title));
    }
    if let Some(user_message) = user_message {
        out.push_str(&format!(": {}", user_message));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(media: MediaPayload) -> ContainerRequest {
        ContainerRequest {
            media,
            caption: "caption".to_string(),
            location_id: None,
            user_tags: None,
        }
    }

    #[tokio::test]
    async fn create_image_container_returns_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/17841400000/media"))
            .and(body_string_contains("image_url"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "1789"})))
            .mount(&server)
            .await;

        let client = InstagramClient::with_base_url(server.uri());
        let id = client
            .create_container(
                "token",
                "17841400000",
                &request(MediaPayload::Image {
                    url: "https://cdn.example.com/a.jpg".to_string(),
                }),
            )
            .await
            .unwrap();

        assert_eq!(id, "1789");
    }

    #[tokio::test]
    async fn carousel_creates_children_then_parent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/17841400000/media"))
            .and(body_string_contains("is_carousel_item"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "child"})))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/17841400000/media"))
            .and(body_string_contains("CAROUSEL"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "parent"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = InstagramClient::with_base_url(server.uri());
        let id = client
            .create_container(
                "token",
                "17841400000",
                &request(MediaPayload::Carousel {
                    children: vec![
                        CarouselChild {
                            url: "https://cdn.example.com/a.jpg".to_string(),
                            is_video: false,
                        },
                        CarouselChild {
                            url: "https://cdn.example.com/b.mp4".to_string(),
                            is_video: true,
                        },
                    ],
                }),
            )
            .await
            .unwrap();

        assert_eq!(id, "parent");
    }

    #[tokio::test]
    async fn error_envelope_becomes_raw_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/178/media_publish"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {
                    "message": "Error validating access token",
                    "type": "OAuthException",
                    "code": 190,
                    "error_subcode": 463,
                    "fbtrace_id": "AbCdEf"
                }
            })))
            .mount(&server)
            .await;

        let client = InstagramClient::with_base_url(server.uri());
        let err = client
            .publish_container("token", "178", "1789")
            .await
            .unwrap_err();

        assert_eq!(err.code, 190);
        assert_eq!(err.subcode, Some(463));
        assert_eq!(err.fbtrace_id.as_deref(), Some("AbCdEf"));
        assert!(err.to_string().contains("code 190"));
    }

    #[tokio::test]
    async fn container_status_parses_wire_codes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1789"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status_code": "IN_PROGRESS",
                "status": "Transcoding video",
                "id": "1789"
            })))
            .mount(&server)
            .await;

        let client = InstagramClient::with_base_url(server.uri());
        let status = client.container_status("token", "1789").await.unwrap();

        assert_eq!(status.status_code, ContainerStatusCode::InProgress);
        assert_eq!(status.status, "Transcoding video");
    }

    #[tokio::test]
    async fn malformed_body_is_a_network_class_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1789"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
            .mount(&server)
            .await;

        let client = InstagramClient::with_base_url(server.uri());
        let err = client.container_status("token", "1789").await.unwrap_err();

        assert_eq!(err.code, NETWORK_ERROR_CODE);
        assert!(err.message.contains("502"));
    }
}
