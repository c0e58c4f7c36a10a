use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::data::FeedService;
use crate::model::{Page, PostId, Record, RecordKind, RecordMap, View};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchTarget {
    Listing(Page),
    Thread(Record),
}

impl FetchTarget {
    pub fn view(&self) -> View {
        match self {
            FetchTarget::Listing(_) => View::Listing,
            FetchTarget::Thread(root) => View::Thread {
                root: root.id.clone(),
            },
        }
    }
}

/// One fetch cycle. Only the ticket with the latest generation may land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub generation: u64,
    pub target: FetchTarget,
}

#[derive(Debug, Clone)]
pub enum Fetched {
    Listing(Vec<Record>),
    Thread { root: Record, comments: Vec<Record> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Replaced,
    Stale,
    Failed,
}

/// Runs the request a ticket describes. Called off the UI thread.
pub fn fetch(feed: &dyn FeedService, target: &FetchTarget) -> Result<Fetched> {
    match target {
        FetchTarget::Listing(page) => {
            let posts = feed.load_posts(*page).context("fetch listing")?;
            Ok(Fetched::Listing(posts))
        }
        FetchTarget::Thread(root) => {
            let comments = feed.load_comments(&root.id).context("fetch thread")?;
            Ok(Fetched::Thread {
                root: root.clone(),
                comments,
            })
        }
    }
}

/// Owns what is on screen: the view, its records and the fetch generation.
#[derive(Debug, Default)]
pub struct Navigator {
    view: View,
    records: RecordMap,
    page: Page,
    generation: u64,
    pending: Option<u64>,
}

impl Navigator {
    pub fn new(page: Page) -> Self {
        Self {
            page,
            ..Self::default()
        }
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn records(&self) -> &RecordMap {
        &self.records
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    fn issue(&mut self, target: FetchTarget) -> FetchTicket {
        self.generation += 1;
        self.pending = Some(self.generation);
        FetchTicket {
            generation: self.generation,
            target,
        }
    }

    pub fn show_listing(&mut self) -> FetchTicket {
        info!(start = self.page.start, count = self.page.count, "loading listing");
        self.issue(FetchTarget::Listing(self.page))
    }

    /// Enters the thread of a listed post. Comments and thread roots are not
    /// navigable, so this returns `None` for them.
    pub fn enter_thread(&mut self, id: &PostId) -> Option<FetchTicket> {
        let root = self.records.get(id)?;
        if !self.is_navigable(root) {
            return None;
        }
        let root = root.clone();
        info!(id = %root.id, "entering thread");
        Some(self.issue(FetchTarget::Thread(root)))
    }

    /// Re-runs the fetch for whatever is displayed.
    pub fn refresh(&mut self) -> FetchTicket {
        let target = match &self.view {
            View::Thread { root } => match self.records.get(root) {
                Some(record) => FetchTarget::Thread(record.clone()),
                None => FetchTarget::Listing(self.page),
            },
            View::Listing => FetchTarget::Listing(self.page),
        };
        self.issue(target)
    }

    /// Forgets everything on screen. Fetches still in flight become stale.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.pending = None;
        self.view = View::Listing;
        self.records.clear();
    }

    pub fn is_navigable(&self, record: &Record) -> bool {
        self.view == View::Listing && !record.is_comment()
    }

    pub fn apply(&mut self, generation: u64, result: Result<Fetched>) -> Applied {
        if generation != self.generation {
            debug!(generation, latest = self.generation, "discarding stale response");
            return Applied::Stale;
        }
        self.pending = None;

        let fetched = match result {
            Ok(fetched) => fetched,
            Err(err) => {
                warn!(error = ?err, "fetch failed; keeping current view");
                return Applied::Failed;
            }
        };

        match fetched {
            Fetched::Listing(posts) => {
                debug!(count = posts.len(), "listing loaded");
                self.view = View::Listing;
                self.records.replace(posts);
            }
            Fetched::Thread { mut root, comments } => {
                debug!(id = %root.id, comments = comments.len(), "thread loaded");
                root.kind = RecordKind::Root {
                    reply_count: Some(comments.len() as u64),
                };
                self.view = View::Thread {
                    root: root.id.clone(),
                };
                self.records
                    .replace(std::iter::once(root).chain(comments));
            }
        }
        Applied::Replaced
    }
}
