use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use reqwest::StatusCode;

use crate::board;
use crate::form::Submission;
use crate::model::{Page, PostId, Record, RecordKind, Timestamp, WireRecord};
use crate::moderation::ModRequest;

pub trait FeedService: Send + Sync {
    fn load_posts(&self, page: Page) -> Result<Vec<Record>>;
    fn load_comments(&self, root: &PostId) -> Result<Vec<Record>>;
    fn load_announcement(&self) -> Result<String>;
}

pub trait SubmissionService: Send + Sync {
    fn submit(&self, submission: &Submission) -> Result<()>;
}

pub trait ModerationService: Send + Sync {
    fn moderate(&self, request: &ModRequest) -> Result<()>;
}

pub trait AdminService: Send + Sync {
    fn publish_announcement(&self, content: &str) -> Result<()>;
    fn remove_announcement(&self) -> Result<()>;
    fn add_emoticon(&self, name: &str) -> Result<()>;
    fn delete_emoticon(&self, name: &str) -> Result<()>;
}

pub trait SessionService: Send + Sync {
    /// Returns the session token issued for the new login, if any.
    fn login(&self, username: &str, password: &str) -> Result<Option<String>>;
    fn logout(&self) -> Result<()>;
    fn restore(&self, token: &str);
}

pub struct BoardFeedService {
    client: Arc<board::Client>,
}

impl BoardFeedService {
    pub fn new(client: Arc<board::Client>) -> Self {
        Self { client }
    }
}

impl FeedService for BoardFeedService {
    fn load_posts(&self, page: Page) -> Result<Vec<Record>> {
        let wire = self
            .client
            .request_posts(page)
            .context("request posts")?;
        Ok(wire.into_iter().filter_map(Record::root).collect())
    }

    fn load_comments(&self, root: &PostId) -> Result<Vec<Record>> {
        let wire = self
            .client
            .request_comments(root)
            .context("request comments")?;
        Ok(wire
            .into_iter()
            .filter_map(|record| Record::comment(record, root))
            .collect())
    }

    fn load_announcement(&self) -> Result<String> {
        let announcement = self
            .client
            .request_announcement()
            .context("request announcement")?;
        Ok(announcement.content)
    }
}

pub struct BoardSubmissionService {
    client: Arc<board::Client>,
}

impl BoardSubmissionService {
    pub fn new(client: Arc<board::Client>) -> Self {
        Self { client }
    }
}

impl SubmissionService for BoardSubmissionService {
    fn submit(&self, submission: &Submission) -> Result<()> {
        match submission {
            Submission::Post(post) => {
                self.client.add_post(post).context("add post")?;
            }
            Submission::Comment(comment) => {
                self.client.add_comment(comment).context("add comment")?;
            }
        }
        Ok(())
    }
}

pub struct BoardModerationService {
    client: Arc<board::Client>,
}

impl BoardModerationService {
    pub fn new(client: Arc<board::Client>) -> Self {
        Self { client }
    }
}

impl ModerationService for BoardModerationService {
    fn moderate(&self, request: &ModRequest) -> Result<()> {
        let ack = match request {
            ModRequest::Delete { id, comment: true } => self.client.delete_comment(id),
            ModRequest::Delete { id, comment: false } => self.client.delete_post(id),
            ModRequest::Pin { id, pinned } => self.client.pin_post(id, *pinned),
            ModRequest::Lock { id, locked } => self.client.lock_post(id, *locked),
        };
        ack.with_context(|| format!("moderate via {}", request.endpoint()))?;
        Ok(())
    }
}

pub struct BoardAdminService {
    client: Arc<board::Client>,
}

impl BoardAdminService {
    pub fn new(client: Arc<board::Client>) -> Self {
        Self { client }
    }
}

impl AdminService for BoardAdminService {
    fn publish_announcement(&self, content: &str) -> Result<()> {
        self.client
            .add_announcement(content)
            .context("add announcement")?;
        Ok(())
    }

    fn remove_announcement(&self) -> Result<()> {
        self.client
            .remove_announcement()
            .context("remove announcement")?;
        Ok(())
    }

    fn add_emoticon(&self, name: &str) -> Result<()> {
        self.client.add_emoticon(name).context("add emoticon")?;
        Ok(())
    }

    fn delete_emoticon(&self, name: &str) -> Result<()> {
        self.client
            .delete_emoticon(name)
            .context("delete emoticon")?;
        Ok(())
    }
}

pub struct BoardSessionService {
    client: Arc<board::Client>,
}

impl BoardSessionService {
    pub fn new(client: Arc<board::Client>) -> Self {
        Self { client }
    }
}

impl SessionService for BoardSessionService {
    fn login(&self, username: &str, password: &str) -> Result<Option<String>> {
        self.client.login(username, password).context("login")
    }

    fn logout(&self) -> Result<()> {
        self.client.logout().context("logout")
    }

    fn restore(&self, token: &str) {
        self.client.restore_session(token);
    }
}

/// Calls seen by [`MockBoard`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    LoadPosts(Page),
    LoadComments(PostId),
    LoadAnnouncement,
    Submit(Submission),
    Moderate(ModRequest),
    PublishAnnouncement(String),
    RemoveAnnouncement,
    AddEmoticon(String),
    DeleteEmoticon(String),
    Login(String),
    Logout,
    Restore(String),
}

/// In-memory board implementing every service. Mutating calls change the
/// stored records so follow-up fetches see the effect.
#[derive(Default)]
pub struct MockBoard {
    posts: Mutex<Vec<Record>>,
    comments: Mutex<HashMap<PostId, Vec<Record>>>,
    announcement: Mutex<String>,
    failure: Mutex<Option<(StatusCode, String)>>,
    calls: Mutex<Vec<Call>>,
    next_id: Mutex<u64>,
}

impl MockBoard {
    pub fn with_posts(posts: Vec<Record>) -> Self {
        let board = Self::default();
        *board.next_id.lock() = 1000;
        *board.posts.lock() = posts;
        board
    }

    pub fn set_comments(&self, parent: PostId, comments: Vec<Record>) {
        self.comments.lock().insert(parent, comments);
    }

    pub fn set_announcement(&self, content: &str) {
        *self.announcement.lock() = content.to_string();
    }

    /// Makes the next call fail with `status` and `message` as body.
    pub fn fail_next(&self, status: u16, message: &str) {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        *self.failure.lock() = Some((status, message.to_string()));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: Call) -> Result<()> {
        self.calls.lock().push(call);
        match self.failure.lock().take() {
            Some((status, message)) => Err(board::Error::Http { status, message }.into()),
            None => Ok(()),
        }
    }

    fn allocate_id(&self) -> PostId {
        let mut next = self.next_id.lock();
        *next += 1;
        PostId::from(*next)
    }

    fn new_record(&self, content: &str, kind: RecordKind, pinned: bool, locked: bool) -> Record {
        Record {
            id: self.allocate_id(),
            kind,
            author: "mock".into(),
            content: content.to_string(),
            image: None,
            created_at: Timestamp::Raw("now".into()),
            pinned,
            locked,
            caps: Default::default(),
        }
    }
}

impl FeedService for MockBoard {
    fn load_posts(&self, page: Page) -> Result<Vec<Record>> {
        self.record(Call::LoadPosts(page))?;
        Ok(self.posts.lock().clone())
    }

    fn load_comments(&self, root: &PostId) -> Result<Vec<Record>> {
        self.record(Call::LoadComments(root.clone()))?;
        Ok(self.comments.lock().get(root).cloned().unwrap_or_default())
    }

    fn load_announcement(&self) -> Result<String> {
        self.record(Call::LoadAnnouncement)?;
        Ok(self.announcement.lock().clone())
    }
}

impl SubmissionService for MockBoard {
    fn submit(&self, submission: &Submission) -> Result<()> {
        self.record(Call::Submit(submission.clone()))?;
        match submission {
            Submission::Post(post) => {
                let record = self.new_record(
                    &post.content,
                    RecordKind::Root {
                        reply_count: Some(0),
                    },
                    post.pinned,
                    post.locked,
                );
                self.posts.lock().insert(0, record);
            }
            Submission::Comment(comment) => {
                let record = self.new_record(
                    &comment.content,
                    RecordKind::Comment {
                        parent: comment.parent.clone(),
                    },
                    false,
                    false,
                );
                self.comments
                    .lock()
                    .entry(comment.parent.clone())
                    .or_default()
                    .push(record);
            }
        }
        Ok(())
    }
}

impl ModerationService for MockBoard {
    fn moderate(&self, request: &ModRequest) -> Result<()> {
        self.record(Call::Moderate(request.clone()))?;
        match request {
            ModRequest::Delete { id, comment: false } => {
                self.posts.lock().retain(|post| &post.id != id);
                self.comments.lock().remove(id);
            }
            ModRequest::Delete { id, comment: true } => {
                for comments in self.comments.lock().values_mut() {
                    comments.retain(|comment| &comment.id != id);
                }
            }
            ModRequest::Pin { id, pinned } => {
                if let Some(post) = self.posts.lock().iter_mut().find(|p| &p.id == id) {
                    post.pinned = *pinned;
                }
            }
            ModRequest::Lock { id, locked } => {
                if let Some(post) = self.posts.lock().iter_mut().find(|p| &p.id == id) {
                    post.locked = *locked;
                }
            }
        }
        Ok(())
    }
}

impl AdminService for MockBoard {
    fn publish_announcement(&self, content: &str) -> Result<()> {
        self.record(Call::PublishAnnouncement(content.to_string()))?;
        *self.announcement.lock() = content.to_string();
        Ok(())
    }

    fn remove_announcement(&self) -> Result<()> {
        self.record(Call::RemoveAnnouncement)?;
        self.announcement.lock().clear();
        Ok(())
    }

    fn add_emoticon(&self, name: &str) -> Result<()> {
        self.record(Call::AddEmoticon(name.to_string()))
    }

    fn delete_emoticon(&self, name: &str) -> Result<()> {
        self.record(Call::DeleteEmoticon(name.to_string()))
    }
}

impl SessionService for MockBoard {
    fn login(&self, username: &str, _password: &str) -> Result<Option<String>> {
        self.record(Call::Login(username.to_string()))?;
        Ok(Some(format!("mock-session-{username}")))
    }

    fn logout(&self) -> Result<()> {
        self.record(Call::Logout)
    }

    fn restore(&self, token: &str) {
        self.calls.lock().push(Call::Restore(token.to_string()));
    }
}

/// Builds a root record from a JSON literal in the wire shape.
pub fn root_from_json(json: &str) -> Result<Record> {
    let wire: WireRecord = serde_json::from_str(json).context("parse record")?;
    Record::root(wire).context("record without id")
}
