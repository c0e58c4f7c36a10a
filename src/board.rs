use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::model::{Page, PostId, WireRecord};

pub const DEFAULT_BASE_URL: &str = "http://localhost:1759/";
pub const SESSION_COOKIE: &str = "userSessionToken";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{}", http_message(.status, .message))]
    Http { status: StatusCode, message: String },
    #[error("network request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

fn http_message(status: &StatusCode, message: &str) -> String {
    if message.is_empty() {
        status
            .canonical_reason()
            .map(str::to_string)
            .unwrap_or_else(|| status.to_string())
    } else {
        message.to_string()
    }
}

/// Text to show a user for a failed call: the server's response body when it
/// sent one, the HTTP status text otherwise.
pub fn user_message(err: &anyhow::Error) -> String {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<Error>())
        .map(|err| err.to_string())
        .unwrap_or_else(|| err.to_string())
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: format!("board-tui/{}", crate::VERSION),
            timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub redirect: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Announcement {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub content: String,
    pub image: Option<Attachment>,
    pub anonymous: bool,
    pub pinned: bool,
    pub locked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewComment {
    pub parent: PostId,
    pub content: String,
    pub image: Option<Attachment>,
    pub anonymous: bool,
}

#[derive(Serialize)]
struct IdBody<'a> {
    id: &'a PostId,
}

pub struct Client {
    http: HttpClient,
    jar: Arc<Jar>,
    user_agent: String,
    base_url: Url,
}

impl Client {
    pub fn new(config: ClientConfig) -> anyhow::Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("board client user agent required");
        }
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;
        let jar = Arc::new(Jar::default());
        let http = HttpClient::builder()
            .timeout(config.timeout)
            .cookie_provider(jar.clone())
            .build()?;

        Ok(Client {
            http,
            jar,
            user_agent: config.user_agent,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    fn post(&self, path: &str) -> Result<RequestBuilder, Error> {
        Ok(self
            .http
            .post(self.endpoint(path)?)
            .header(USER_AGENT, &self.user_agent))
    }

    fn get(&self, path: &str) -> Result<RequestBuilder, Error> {
        Ok(self
            .http
            .get(self.endpoint(path)?)
            .header(USER_AGENT, &self.user_agent))
    }

    pub fn restore_session(&self, token: &str) {
        let cookie = format!("{SESSION_COOKIE}={token}; Path=/");
        self.jar.add_cookie_str(&cookie, &self.base_url);
    }

    pub fn session_token(&self) -> Option<String> {
        let header = self.jar.cookies(&self.base_url)?;
        let raw = header.to_str().ok()?;
        raw.split(';').find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == SESSION_COOKIE && !value.is_empty()).then(|| value.to_string())
        })
    }

    /// Logs in and returns the session token the server handed out.
    pub fn login(&self, username: &str, password: &str) -> Result<Option<String>, Error> {
        let response = self
            .post("api/login")?
            .json(&json!({ "username": username, "password": password }))
            .send()?;
        let ack: Ack = decode(response)?;
        debug!(status = ?ack.status, redirect = ?ack.redirect, "login acknowledged");
        Ok(self.session_token())
    }

    pub fn logout(&self) -> Result<(), Error> {
        let response = self
            .post("api/logout")?
            .header(CONTENT_TYPE, "application/json")
            .send()?;
        let ack: Ack = decode(response)?;
        debug!(status = ?ack.status, "logout acknowledged");
        Ok(())
    }

    pub fn request_posts(&self, page: Page) -> Result<Vec<WireRecord>, Error> {
        let form = Form::new()
            .text("displayfrompostnumber", page.start.to_string())
            .text("amountofpostsrequested", page.count.to_string());
        let response = self.post("api/requestPost")?.multipart(form).send()?;
        let records: Option<Vec<WireRecord>> = decode(response)?;
        Ok(records.unwrap_or_default())
    }

    pub fn request_comments(&self, parent: &PostId) -> Result<Vec<WireRecord>, Error> {
        let response = self
            .post("api/requestComment")?
            .json(&json!({ "parentpostid": parent }))
            .send()?;
        let records: Option<Vec<WireRecord>> = decode(response)?;
        Ok(records.unwrap_or_default())
    }

    pub fn add_post(&self, post: &NewPost) -> Result<Ack, Error> {
        let mut form = Form::new()
            .text("postcontent", post.content.clone())
            .text("locked", post.locked.to_string())
            .text("pinned", post.pinned.to_string())
            .text("isanonymous", post.anonymous.to_string());
        if let Some(image) = &post.image {
            form = form.part("image", attachment_part(image)?);
        }
        let response = self.post("api/addPost")?.multipart(form).send()?;
        decode(response)
    }

    pub fn add_comment(&self, comment: &NewComment) -> Result<Ack, Error> {
        let mut form = Form::new()
            .text("postcontent", comment.content.clone())
            .text("parentpostid", comment.parent.to_string())
            .text("isanonymous", comment.anonymous.to_string());
        if let Some(image) = &comment.image {
            form = form.part("image", attachment_part(image)?);
        }
        let response = self.post("api/addComment")?.multipart(form).send()?;
        decode(response)
    }

    pub fn delete_post(&self, id: &PostId) -> Result<Ack, Error> {
        self.post_json("api/deletePost", &IdBody { id })
    }

    pub fn delete_comment(&self, id: &PostId) -> Result<Ack, Error> {
        self.post_json("api/deleteComment", &IdBody { id })
    }

    pub fn pin_post(&self, id: &PostId, pinned: bool) -> Result<Ack, Error> {
        self.post_json("api/pinPost", &json!({ "id": id, "pinned": pinned }))
    }

    pub fn lock_post(&self, id: &PostId, locked: bool) -> Result<Ack, Error> {
        self.post_json("api/lockPost", &json!({ "id": id, "locked": locked }))
    }

    pub fn request_announcement(&self) -> Result<Announcement, Error> {
        let response = self.get("api/requestAnnouncement")?.send()?;
        decode(response)
    }

    pub fn add_announcement(&self, content: &str) -> Result<Ack, Error> {
        let form = Form::new().text("content", content.to_string());
        let response = self.post("api/addAnnouncement")?.multipart(form).send()?;
        decode(response)
    }

    pub fn remove_announcement(&self) -> Result<Ack, Error> {
        let response = self.get("api/removeAnnouncement")?.send()?;
        decode(response)
    }

    pub fn add_emoticon(&self, name: &str) -> Result<Ack, Error> {
        self.post_emoticon("api/addEmoticon", name)
    }

    pub fn delete_emoticon(&self, name: &str) -> Result<Ack, Error> {
        self.post_emoticon("api/deleteEmoticon", name)
    }

    /// Downloads an uploaded image. `path` is what the server put in
    /// `imagepath`, resolved against the board's base URL.
    pub fn fetch_image(&self, path: &str) -> Result<Vec<u8>, Error> {
        let response = check(self.get(path)?.send()?)?;
        Ok(response.bytes()?.to_vec())
    }

    pub fn image_url(&self, path: &str) -> Result<Url, Error> {
        self.endpoint(path)
    }

    fn post_emoticon(&self, path: &str, name: &str) -> Result<Ack, Error> {
        let form = Form::new().text("emoticon-name", name.to_string());
        let response = self.post(path)?.multipart(form).send()?;
        decode(response)
    }

    fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Ack, Error> {
        let response = self.post(path)?.json(body).send()?;
        decode(response)
    }
}

fn attachment_part(attachment: &Attachment) -> Result<Part, Error> {
    Ok(Part::bytes(attachment.bytes.clone())
        .file_name(attachment.file_name.clone())
        .mime_str(&attachment.mime)?)
}

fn check(response: Response) -> Result<Response, Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().unwrap_or_default().trim().to_string();
    Err(Error::Http { status, message })
}

fn decode<T: DeserializeOwned>(response: Response) -> Result<T, Error> {
    let body = check(response)?.text()?;
    Ok(serde_json::from_str(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_prefers_server_text() {
        let err = Error::Http {
            status: StatusCode::FORBIDDEN,
            message: "Cannot comment under post, locked!".into(),
        };
        assert_eq!(err.to_string(), "Cannot comment under post, locked!");
    }

    #[test]
    fn http_error_falls_back_to_status_text() {
        let err = Error::Http {
            status: StatusCode::UNSUPPORTED_MEDIA_TYPE,
            message: String::new(),
        };
        assert_eq!(err.to_string(), "Unsupported Media Type");
    }

    #[test]
    fn user_message_sees_through_context() {
        let err = anyhow::Error::new(Error::Http {
            status: StatusCode::FORBIDDEN,
            message: "No permission to upload post!".into(),
        })
        .context("submit post");
        assert_eq!(user_message(&err), "No permission to upload post!");
    }

    #[test]
    fn endpoints_resolve_under_base_path() {
        let client = Client::new(ClientConfig {
            base_url: "http://example.test/board".into(),
            ..ClientConfig::default()
        })
        .unwrap();
        assert_eq!(
            client.endpoint("/api/requestPost").unwrap().as_str(),
            "http://example.test/board/api/requestPost"
        );
        assert_eq!(
            client.image_url("uploads/1_cat.png").unwrap().as_str(),
            "http://example.test/board/uploads/1_cat.png"
        );
    }

    #[test]
    fn restored_session_is_readable() {
        let client = Client::new(ClientConfig::default()).unwrap();
        assert_eq!(client.session_token(), None);
        client.restore_session("abc-123");
        assert_eq!(client.session_token().as_deref(), Some("abc-123"));
    }
}
