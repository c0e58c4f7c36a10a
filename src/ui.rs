use std::collections::{HashMap, HashSet};
use std::io::{self, Stdout};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use tracing::{debug, info, warn};

use crate::admin::{AdminCommand, AdminField, AdminPanel};
use crate::board;
use crate::content;
use crate::data::{AdminService, FeedService, ModerationService, SubmissionService};
use crate::form::{Field, FormMode, FormState};
use crate::media::{self, Preview};
use crate::model::{Page, PostId, View};
use crate::moderation::{Dropdown, FollowUp, ModAction, ModRequest};
use crate::navigator::{self, Applied, FetchTarget, FetchTicket, Fetched, Navigator};
use crate::render::{self, CardOptions, Hit};
use crate::session;

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_PANEL_FOCUSED_BG: Color = Color::Rgb(49, 50, 68);
const COLOR_PANEL_SELECTED_BG: Color = Color::Rgb(69, 71, 90);
const COLOR_BORDER_IDLE: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_FOCUSED: Color = Color::Rgb(137, 180, 250);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_SUCCESS: Color = Color::Rgb(166, 227, 161);
const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);
const COLOR_BANNER: Color = Color::Rgb(249, 226, 175);

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const LOGIN_FAILED: &str = "Login failed: Invalid username or password.";
const CONTENT_ROWS: u16 = 6;

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let percent_x = percent_x.min(100);
    let percent_y = percent_y.min(100);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage(100 - percent_x - (100 - percent_x) / 2),
        ])
        .split(area);
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage(100 - percent_y - (100 - percent_y) / 2),
        ])
        .split(horizontal[1]);
    vertical[1]
}

fn fixed_rect(width: u16, height: u16, area: Rect) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect::new(
        area.x + (area.width - width) / 2,
        area.y + (area.height - height) / 2,
        width,
        height,
    )
}

fn contains(area: Rect, column: u16, row: u16) -> bool {
    column >= area.x && column < area.x + area.width && row >= area.y && row < area.y + area.height
}

fn popup_block(title: &str) -> Block<'static> {
    Block::default()
        .title(Span::styled(
            title.to_string(),
            Style::default()
                .fg(COLOR_ACCENT)
                .add_modifier(Modifier::BOLD),
        ))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(COLOR_ACCENT))
        .style(Style::default().bg(COLOR_PANEL_BG))
}

fn field_style(active: bool) -> Style {
    if active {
        Style::default()
            .fg(COLOR_TEXT_PRIMARY)
            .bg(COLOR_PANEL_SELECTED_BG)
    } else {
        Style::default().fg(COLOR_TEXT_PRIMARY)
    }
}

fn indicator(active: bool) -> Span<'static> {
    if active {
        Span::styled(
            "> ",
            Style::default()
                .fg(COLOR_ACCENT)
                .add_modifier(Modifier::BOLD),
        )
    } else {
        Span::raw("  ")
    }
}

fn checkbox(checked: bool) -> &'static str {
    if checked {
        "[x]"
    } else {
        "[ ]"
    }
}

/// The four services the board screen talks to.
#[derive(Clone)]
pub struct Services {
    pub feed: Arc<dyn FeedService>,
    pub submissions: Arc<dyn SubmissionService>,
    pub moderation: Arc<dyn ModerationService>,
    pub admin: Arc<dyn AdminService>,
}

impl Services {
    /// All four backed by one implementation, as the mock board is.
    pub fn from_board<T>(board: Arc<T>) -> Self
    where
        T: FeedService + SubmissionService + ModerationService + AdminService + 'static,
    {
        Self {
            feed: board.clone(),
            submissions: board.clone(),
            moderation: board.clone(),
            admin: board,
        }
    }
}

pub struct Options {
    pub services: Services,
    pub session: Arc<session::Manager>,
    pub media: Option<media::Handle>,
    pub page: Page,
    pub thumbnail_cols: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Screen {
    Login,
    Board,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoginField {
    Username,
    Password,
}

#[derive(Debug)]
struct LoginForm {
    username: String,
    password: String,
    focus: LoginField,
    pending: bool,
}

impl LoginForm {
    fn new() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            focus: LoginField::Username,
            pending: false,
        }
    }

    fn field_mut(&mut self) -> &mut String {
        match self.focus {
            LoginField::Username => &mut self.username,
            LoginField::Password => &mut self.password,
        }
    }

    fn switch_field(&mut self) {
        self.focus = match self.focus {
            LoginField::Username => LoginField::Password,
            LoginField::Password => LoginField::Username,
        };
    }
}

struct LinkMenu {
    links: Vec<String>,
    selected: usize,
}

enum PreviewState {
    Loading,
    Ready(Preview),
    Failed,
}

/// Screen placement of one card from the last draw.
struct CardRegion {
    id: PostId,
    area: Rect,
    inner: Rect,
    card: render::Card,
}

enum AsyncResponse {
    Fetch {
        generation: u64,
        result: Result<Fetched>,
    },
    Announcement {
        result: Result<String>,
    },
    Submitted {
        epoch: u64,
        result: Result<()>,
    },
    Moderated {
        epoch: u64,
        request: ModRequest,
        result: Result<()>,
    },
    Admin {
        epoch: u64,
        command: AdminCommand,
        result: Result<()>,
    },
    Login {
        username: String,
        result: Result<()>,
    },
    Logout {
        result: Result<()>,
    },
    Preview {
        path: String,
        result: Result<Preview>,
    },
}

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= Duration::from_millis(120) {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

pub struct Model {
    screen: Screen,
    services: Services,
    session: Arc<session::Manager>,
    media: Option<media::Handle>,
    thumbnail_cols: u16,
    navigator: Navigator,
    selected: usize,
    offset: usize,
    regions: Vec<CardRegion>,
    board_area: Rect,
    dropdown: Option<Dropdown>,
    form: FormState,
    expanded: HashSet<PostId>,
    previews: HashMap<String, PreviewState>,
    links: Option<LinkMenu>,
    admin: Option<AdminPanel>,
    login: LoginForm,
    alert: Option<String>,
    announcement: Option<String>,
    status_message: String,
    spinner: Spinner,
    in_flight: usize,
    /// Bumped on logout; writes started before it must not trigger fetches.
    epoch: u64,
    needs_redraw: bool,
    response_tx: Sender<AsyncResponse>,
    response_rx: Receiver<AsyncResponse>,
}

impl Model {
    pub fn new(options: Options) -> Self {
        let (response_tx, response_rx) = unbounded();
        let screen = if options.session.active_user().is_some() {
            Screen::Board
        } else {
            Screen::Login
        };
        Self {
            screen,
            services: options.services,
            session: options.session,
            media: options.media,
            thumbnail_cols: options.thumbnail_cols.max(1),
            navigator: Navigator::new(options.page),
            selected: 0,
            offset: 0,
            regions: Vec::new(),
            board_area: Rect::default(),
            dropdown: None,
            form: FormState::new(FormMode::NewPost),
            expanded: HashSet::new(),
            previews: HashMap::new(),
            links: None,
            admin: None,
            login: LoginForm::new(),
            alert: None,
            announcement: None,
            status_message: String::new(),
            spinner: Spinner::new(),
            in_flight: 0,
            epoch: 0,
            needs_redraw: true,
            response_tx,
            response_rx,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        stdout.execute(EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        self.start();
        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(DisableMouseCapture)?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    /// Kicks off the first loads once a session is in place.
    fn start(&mut self) {
        match self.screen {
            Screen::Board => {
                let ticket = self.navigator.show_listing();
                self.start_fetch(ticket);
                self.load_announcement();
            }
            Screen::Login => {
                self.status_message = format!("Sign in to {}", self.session.server());
            }
        }
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        let tick_rate = Duration::from_millis(120);

        loop {
            if self.poll_async() {
                self.needs_redraw = true;
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        match self.handle_key(key) {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(err) => {
                                self.status_message = format!("Error: {}", err);
                            }
                        }
                        self.needs_redraw = true;
                    }
                    Event::Mouse(mouse) => {
                        if let Err(err) = self.handle_mouse(mouse) {
                            self.status_message = format!("Error: {}", err);
                        }
                        self.needs_redraw = true;
                    }
                    Event::Resize(_, _) => self.needs_redraw = true,
                    _ => {}
                }
            }

            if last_tick.elapsed() >= tick_rate {
                last_tick = Instant::now();
                if self.is_loading() {
                    if self.spinner.advance() {
                        self.needs_redraw = true;
                    }
                } else {
                    self.spinner.reset();
                }
            }
        }

        Ok(())
    }

    fn is_loading(&self) -> bool {
        self.in_flight > 0
    }

    fn spawn<F>(&mut self, job: F)
    where
        F: FnOnce() -> AsyncResponse + Send + 'static,
    {
        self.in_flight += 1;
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let _ = tx.send(job());
        });
    }

    fn poll_async(&mut self) -> bool {
        let mut changed = false;
        while let Ok(message) = self.response_rx.try_recv() {
            self.handle_async_response(message);
            changed = true;
        }
        changed
    }

    fn handle_async_response(&mut self, message: AsyncResponse) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if let AsyncResponse::Submitted { epoch, .. }
        | AsyncResponse::Moderated { epoch, .. }
        | AsyncResponse::Admin { epoch, .. } = &message
        {
            if *epoch != self.epoch {
                debug!(epoch = *epoch, current = self.epoch, "dropping response from before logout");
                return;
            }
        }
        match message {
            AsyncResponse::Fetch { generation, result } => {
                let failure = result.as_ref().err().map(board::user_message);
                let before = self.navigator.view().clone();
                match self.navigator.apply(generation, result) {
                    Applied::Stale => {}
                    Applied::Failed => {
                        self.status_message =
                            format!("Failed to load: {}", failure.unwrap_or_default());
                    }
                    Applied::Replaced => self.on_records_replaced(&before),
                }
            }
            AsyncResponse::Announcement { result } => match result {
                Ok(content) => {
                    let content = content.trim().to_string();
                    self.announcement = (!content.is_empty()).then_some(content);
                }
                Err(err) => warn!(error = ?err, "failed to load announcement"),
            },
            AsyncResponse::Submitted { result, .. } => match result {
                Ok(()) => {
                    info!(mode = ?self.form.mode(), "submission accepted");
                    self.form.succeeded();
                    self.form.hide();
                    self.status_message = "Submitted.".into();
                    let ticket = self.navigator.refresh();
                    self.start_fetch(ticket);
                }
                Err(err) => {
                    warn!(error = ?err, "submission failed");
                    self.form.failed(board::user_message(&err));
                }
            },
            AsyncResponse::Moderated {
                request, result, ..
            } => match result {
                Ok(()) => {
                    info!(id = %request.id(), endpoint = request.endpoint(), "moderation applied");
                    self.dropdown = None;
                    let ticket = match request.follow_up() {
                        FollowUp::RefreshView => self.navigator.refresh(),
                        FollowUp::Listing => self.navigator.show_listing(),
                    };
                    self.start_fetch(ticket);
                }
                Err(err) => {
                    warn!(id = %request.id(), error = ?err, "moderation failed");
                    if let Some(dropdown) = self.dropdown.as_mut() {
                        dropdown.pending = false;
                    }
                    self.status_message = format!("Action failed: {}", board::user_message(&err));
                }
            },
            AsyncResponse::Admin {
                command, result, ..
            } => {
                let error = match &result {
                    Ok(()) => None,
                    Err(err) => {
                        warn!(command = ?command, error = ?err, "admin action failed");
                        Some(board::user_message(err))
                    }
                };
                if let Some(panel) = self.admin.as_mut() {
                    panel.finish(&command, error);
                }
                if result.is_ok() && command.changes_announcement() {
                    self.load_announcement();
                }
            }
            AsyncResponse::Login { username, result } => {
                self.login.pending = false;
                match result {
                    Ok(()) => {
                        self.login = LoginForm::new();
                        self.screen = Screen::Board;
                        self.status_message = format!("Signed in as {username}");
                        let ticket = self.navigator.show_listing();
                        self.start_fetch(ticket);
                        self.load_announcement();
                    }
                    Err(err) => {
                        warn!(user = %username, error = ?err, "login failed");
                        self.login.password.clear();
                        self.alert = Some(LOGIN_FAILED.to_string());
                    }
                }
            }
            AsyncResponse::Logout { result } => match result {
                Ok(()) => self.reset_to_login(),
                Err(err) => {
                    warn!(error = ?err, "logout failed");
                    self.alert = Some(format!("Logout failed: {}", board::user_message(&err)));
                }
            },
            AsyncResponse::Preview { path, result } => {
                let state = match result {
                    Ok(preview) => PreviewState::Ready(preview),
                    Err(err) => {
                        debug!(path, error = ?err, "image preview unavailable");
                        PreviewState::Failed
                    }
                };
                // Pruned paths stay pruned.
                if let Some(slot) = self.previews.get_mut(&path) {
                    *slot = state;
                }
            }
        }
    }

    /// Per-view state resets whenever a fetch lands.
    fn on_records_replaced(&mut self, before: &View) {
        let view = self.navigator.view().clone();
        if &view == before {
            self.selected = self
                .selected
                .min(self.navigator.records().len().saturating_sub(1));
        } else {
            self.selected = 0;
            self.offset = 0;
        }
        self.expanded.clear();
        self.dropdown = None;
        self.links = None;

        let mode = match &view {
            View::Listing => FormMode::NewPost,
            View::Thread { root } => FormMode::NewComment {
                parent: root.clone(),
            },
        };
        self.form.set_mode(mode);

        let count = self.navigator.records().len();
        self.status_message = match &view {
            View::Listing => format!("{count} posts"),
            View::Thread { root } => {
                format!("Thread #{root} · {} comments", count.saturating_sub(1))
            }
        };

        let images: HashSet<String> = self
            .navigator
            .records()
            .iter()
            .filter_map(|record| record.image.clone())
            .collect();
        // Failed previews get another try on each rebuild.
        self.previews.retain(|path, state| {
            images.contains(path) && !matches!(state, PreviewState::Failed)
        });
        for path in images {
            self.queue_preview(path);
        }
    }

    fn reset_to_login(&mut self) {
        info!("signed out");
        self.epoch += 1;
        self.navigator.reset();
        self.form = FormState::new(FormMode::NewPost);
        self.dropdown = None;
        self.links = None;
        self.admin = None;
        self.expanded.clear();
        self.previews.clear();
        self.announcement = None;
        self.selected = 0;
        self.offset = 0;
        self.screen = Screen::Login;
        self.status_message = format!("Sign in to {}", self.session.server());
    }

    fn start_fetch(&mut self, ticket: FetchTicket) {
        let feed = self.services.feed.clone();
        let FetchTicket { generation, target } = ticket;
        self.status_message = match &target {
            FetchTarget::Listing(_) => "Loading posts…".to_string(),
            FetchTarget::Thread(root) => format!("Loading thread #{}…", root.id),
        };
        self.spawn(move || AsyncResponse::Fetch {
            generation,
            result: navigator::fetch(feed.as_ref(), &target),
        });
    }

    fn load_announcement(&mut self) {
        let feed = self.services.feed.clone();
        self.spawn(move || AsyncResponse::Announcement {
            result: feed.load_announcement(),
        });
    }

    fn queue_preview(&mut self, path: String) {
        if self.previews.contains_key(&path) {
            return;
        }
        let Some(handle) = self.media.clone() else {
            return;
        };
        self.previews.insert(path.clone(), PreviewState::Loading);
        self.spawn(move || {
            let rx = handle.enqueue(media::Request {
                path: path.clone(),
                ..Default::default()
            });
            let result = rx
                .recv()
                .map_err(|_| anyhow!("media: worker dropped {path}"))
                .and_then(|entry| entry.result)
                .and_then(|entry| Preview::load(Path::new(&entry.file)));
            AsyncResponse::Preview { path, result }
        });
    }

    fn selected_id(&self) -> Option<PostId> {
        self.navigator
            .records()
            .at(self.selected)
            .map(|record| record.id.clone())
    }

    fn move_selection(&mut self, delta: isize) {
        let len = self.navigator.records().len();
        if len == 0 {
            return;
        }
        let next = (self.selected as isize + delta).clamp(0, len as isize - 1);
        self.selected = next as usize;
    }

    fn open_thread(&mut self, id: &PostId) {
        if let Some(ticket) = self.navigator.enter_thread(id) {
            self.start_fetch(ticket);
        }
    }

    fn return_to_listing(&mut self) {
        if matches!(self.navigator.view(), View::Thread { .. }) {
            let ticket = self.navigator.show_listing();
            self.start_fetch(ticket);
        }
    }

    fn toggle_image(&mut self, id: &PostId) {
        let has_image = self
            .navigator
            .records()
            .get(id)
            .is_some_and(|record| record.image.is_some());
        if !has_image {
            return;
        }
        if !self.expanded.remove(id) {
            self.expanded.insert(id.clone());
        }
    }

    /// Opens the moderation menu of `id`, anchored to its ☰ if the card has
    /// been drawn.
    fn open_dropdown(&mut self, id: &PostId) {
        let Some(record) = self.navigator.records().get(id) else {
            return;
        };
        let options = render::dropdown_options(record);
        if options.is_empty() {
            self.status_message = "No actions available for this post.".into();
            return;
        }
        let trigger = self
            .regions
            .iter()
            .find(|region| &region.id == id)
            .map(|region| {
                Rect::new(
                    region.inner.x + region.card.trigger.x,
                    region.inner.y + region.card.trigger.y,
                    region.card.trigger.width,
                    region.card.trigger.height,
                )
            })
            .unwrap_or_else(|| {
                Rect::new(
                    self.board_area.x + self.board_area.width.saturating_sub(2),
                    self.board_area.y,
                    1,
                    1,
                )
            });
        let area = render::anchor_dropdown(trigger, &options, self.board_area);
        self.dropdown = Dropdown::new(record, area);
    }

    fn run_moderation(&mut self, action: ModAction) {
        let Some(dropdown) = self.dropdown.as_mut() else {
            return;
        };
        if dropdown.pending {
            return;
        }
        let Some(record) = self.navigator.records().get(&dropdown.target) else {
            self.dropdown = None;
            return;
        };
        let request = ModRequest::for_record(action, record);
        dropdown.pending = true;
        info!(id = %request.id(), endpoint = request.endpoint(), "moderation requested");
        let service = self.services.moderation.clone();
        let epoch = self.epoch;
        self.spawn(move || {
            let result = service.moderate(&request);
            AsyncResponse::Moderated {
                epoch,
                request,
                result,
            }
        });
    }

    fn submit_form(&mut self) {
        if self.form.submitting {
            return;
        }
        let submission = match self.form.submission() {
            Ok(submission) => submission,
            Err(err) => {
                self.form.failed(format!("{err:#}"));
                return;
            }
        };
        self.form.submitting = true;
        self.form.error = None;
        info!(endpoint = submission.endpoint(), "submitting");
        let service = self.services.submissions.clone();
        let epoch = self.epoch;
        self.spawn(move || AsyncResponse::Submitted {
            epoch,
            result: service.submit(&submission),
        });
    }

    fn run_admin(&mut self, command: AdminCommand) {
        let Some(panel) = self.admin.as_mut() else {
            return;
        };
        if panel.pending {
            return;
        }
        panel.begin();
        info!(command = ?command, "admin action");
        let service = self.services.admin.clone();
        let epoch = self.epoch;
        self.spawn(move || {
            let result = command.run(service.as_ref());
            AsyncResponse::Admin {
                epoch,
                command,
                result,
            }
        });
    }

    fn submit_login(&mut self) {
        if self.login.pending {
            return;
        }
        let username = self.login.username.trim().to_string();
        if username.is_empty() {
            self.login.focus = LoginField::Username;
            return;
        }
        let password = self.login.password.clone();
        self.login.pending = true;
        let session = self.session.clone();
        self.spawn(move || {
            let result = session.login(&username, &password);
            AsyncResponse::Login { username, result }
        });
    }

    fn logout(&mut self) {
        let session = self.session.clone();
        self.status_message = "Signing out…".into();
        self.spawn(move || AsyncResponse::Logout {
            result: session.logout(),
        });
    }

    fn open_links(&mut self) {
        let Some(record) = self.navigator.records().at(self.selected) else {
            return;
        };
        let links = content::parse(&record.content).links;
        self.links = Some(LinkMenu {
            links,
            selected: 0,
        });
    }

    fn open_selected_link(&mut self) -> Result<()> {
        let Some(url) = self.current_link() else {
            return Ok(());
        };
        webbrowser::open(&url).with_context(|| format!("open {url}"))?;
        self.status_message = format!("Opened {url}");
        Ok(())
    }

    fn copy_selected_link(&mut self) -> Result<()> {
        let Some(url) = self.current_link() else {
            return Ok(());
        };
        let mut clipboard =
            arboard::Clipboard::new().map_err(|err| anyhow!("open clipboard: {}", err))?;
        clipboard
            .set_text(url.clone())
            .map_err(|err| anyhow!("copy link: {}", err))?;
        self.status_message = format!("Copied {url}");
        Ok(())
    }

    fn current_link(&self) -> Option<String> {
        let menu = self.links.as_ref()?;
        menu.links.get(menu.selected).cloned()
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            return Ok(true);
        }

        if self.alert.is_some() {
            if matches!(key.code, KeyCode::Enter | KeyCode::Esc | KeyCode::Char(' ')) {
                self.alert = None;
            }
            return Ok(false);
        }

        if self.screen == Screen::Login {
            return Ok(self.handle_login_key(key));
        }
        if self.admin.is_some() {
            self.handle_admin_key(key);
            return Ok(false);
        }
        if self.form.is_visible() {
            self.handle_form_key(key);
            return Ok(false);
        }
        if self.links.is_some() {
            return self.handle_links_key(key).map(|_| false);
        }
        if self.dropdown.is_some() {
            self.handle_dropdown_key(key);
            return Ok(false);
        }

        match key.code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Char('j') | KeyCode::Down => self.move_selection(1),
            KeyCode::Char('k') | KeyCode::Up => self.move_selection(-1),
            KeyCode::PageDown => self.move_selection(5),
            KeyCode::PageUp => self.move_selection(-5),
            KeyCode::Enter => {
                if let Some(id) = self.selected_id() {
                    self.open_thread(&id);
                }
            }
            KeyCode::Backspace | KeyCode::Esc | KeyCode::Left | KeyCode::Char('h') => {
                self.return_to_listing()
            }
            KeyCode::Char('m') => {
                if let Some(id) = self.selected_id() {
                    self.open_dropdown(&id);
                }
            }
            KeyCode::Char('i') => {
                if let Some(id) = self.selected_id() {
                    self.toggle_image(&id);
                }
            }
            KeyCode::Char('n') => self.form.toggle(),
            KeyCode::Char('o') => self.open_links(),
            KeyCode::Char('r') => {
                let ticket = self.navigator.refresh();
                self.start_fetch(ticket);
                self.load_announcement();
            }
            KeyCode::Char('D') => self.admin = Some(AdminPanel::default()),
            KeyCode::Char('L') => self.logout(),
            _ => {}
        }
        Ok(false)
    }

    fn handle_login_key(&mut self, key: KeyEvent) -> bool {
        match key.code {
            KeyCode::Esc => return true,
            KeyCode::Tab | KeyCode::BackTab | KeyCode::Down | KeyCode::Up => {
                self.login.switch_field()
            }
            KeyCode::Enter => match self.login.focus {
                LoginField::Username => self.login.focus = LoginField::Password,
                LoginField::Password => self.submit_login(),
            },
            KeyCode::Backspace => {
                self.login.field_mut().pop();
            }
            KeyCode::Char(ch) => self.login.field_mut().push(ch),
            _ => {}
        }
        false
    }

    fn handle_admin_key(&mut self, key: KeyEvent) {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let command = {
            let Some(panel) = self.admin.as_mut() else {
                return;
            };
            match key.code {
                KeyCode::Esc => {
                    self.admin = None;
                    return;
                }
                KeyCode::Tab | KeyCode::BackTab => {
                    panel.switch_field();
                    None
                }
                KeyCode::Enter => panel.submit(),
                KeyCode::Char('r') if ctrl => Some(AdminCommand::RemoveAnnouncement),
                KeyCode::Char('d') if ctrl => panel.delete_emoticon(),
                KeyCode::Backspace => {
                    panel.backspace();
                    None
                }
                KeyCode::Char(ch) if !ctrl => {
                    panel.insert_char(ch);
                    None
                }
                _ => None,
            }
        };
        if let Some(command) = command {
            self.run_admin(command);
        }
    }

    fn handle_form_key(&mut self, key: KeyEvent) {
        if key.code == KeyCode::Char('s') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.submit_form();
            return;
        }
        match key.code {
            KeyCode::Esc => self.form.hide(),
            KeyCode::Tab | KeyCode::Down => self.form.focus_next(),
            KeyCode::BackTab | KeyCode::Up => self.form.focus_prev(),
            KeyCode::Enter => match self.form.focus() {
                Field::Content => self.form.newline(),
                Field::Image => self.form.focus_next(),
                Field::Submit => self.submit_form(),
                _ => self.form.toggle_checkbox(),
            },
            KeyCode::Backspace => self.form.backspace(),
            KeyCode::Char(ch) => self.form.insert_char(ch),
            _ => {}
        }
    }

    fn handle_links_key(&mut self, key: KeyEvent) -> Result<()> {
        let Some(menu) = self.links.as_mut() else {
            return Ok(());
        };
        match key.code {
            KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('o') => self.links = None,
            KeyCode::Char('j') | KeyCode::Down => {
                if menu.selected + 1 < menu.links.len() {
                    menu.selected += 1;
                }
            }
            KeyCode::Char('k') | KeyCode::Up => {
                menu.selected = menu.selected.saturating_sub(1);
            }
            KeyCode::Enter => self.open_selected_link()?,
            KeyCode::Char('c') => self.copy_selected_link()?,
            _ => {}
        }
        Ok(())
    }

    fn handle_dropdown_key(&mut self, key: KeyEvent) {
        let Some(dropdown) = self.dropdown.as_mut() else {
            return;
        };
        match key.code {
            KeyCode::Esc | KeyCode::Char('m') | KeyCode::Char('q') => self.dropdown = None,
            KeyCode::Char('j') | KeyCode::Down => dropdown.move_selection(1),
            KeyCode::Char('k') | KeyCode::Up => dropdown.move_selection(-1),
            KeyCode::Enter => {
                if let Some(action) = dropdown.current() {
                    self.run_moderation(action);
                }
            }
            _ => {}
        }
    }

    fn handle_mouse(&mut self, mouse: MouseEvent) -> Result<()> {
        if self.alert.is_some() || self.screen == Screen::Login || self.admin.is_some() {
            return Ok(());
        }
        let (column, row) = (mouse.column, mouse.row);
        match mouse.kind {
            MouseEventKind::Down(MouseButton::Left) => self.handle_click(column, row),
            MouseEventKind::Drag(MouseButton::Left) => {
                if self.form.is_dragging() {
                    self.form.drag_to(self.board_area, column, row);
                }
            }
            MouseEventKind::Up(MouseButton::Left) => self.form.end_drag(),
            MouseEventKind::ScrollDown => {
                if self.dropdown.is_none() && self.links.is_none() {
                    self.move_selection(1);
                }
            }
            MouseEventKind::ScrollUp => {
                if self.dropdown.is_none() && self.links.is_none() {
                    self.move_selection(-1);
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Resolves a click to the topmost target. Overlays swallow clicks on
    /// themselves; a click outside an open dropdown only closes it.
    fn handle_click(&mut self, column: u16, row: u16) {
        if self.links.is_some() {
            self.links = None;
            return;
        }

        if let Some(dropdown) = self.dropdown.as_ref() {
            if contains(dropdown.area, column, row) {
                if let Some(index) = dropdown.option_at(column, row) {
                    if let Some(dropdown) = self.dropdown.as_mut() {
                        dropdown.selected = index;
                    }
                    if let Some(action) = self.dropdown.as_ref().and_then(|d| d.current()) {
                        self.run_moderation(action);
                    }
                }
            } else {
                self.dropdown = None;
            }
            return;
        }

        if self.form.is_visible() {
            if self.form.begin_drag(self.board_area, column, row) {
                return;
            }
            if contains(self.form.area(self.board_area), column, row) {
                return;
            }
        }

        let Some(index) = self
            .regions
            .iter()
            .position(|region| contains(region.area, column, row))
        else {
            return;
        };
        let region = &self.regions[index];
        let id = region.id.clone();
        let hit = if contains(region.inner, column, row) {
            region
                .card
                .hit(column - region.inner.x, row - region.inner.y)
        } else {
            Hit::Body
        };
        let navigable = region.card.navigable;
        if let Some(position) = self.navigator.records().position(&id) {
            self.selected = position;
        }
        match hit {
            Hit::Trigger => self.open_dropdown(&id),
            Hit::Image => self.toggle_image(&id),
            Hit::Body if navigable => self.open_thread(&id),
            Hit::Body => {}
        }
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(COLOR_BG)), full);

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(full);

        let status_text = if self.is_loading() {
            format!("{} {}", self.spinner.frame(), self.status_message)
                .trim()
                .to_string()
        } else {
            self.status_message.clone()
        };
        let status_line = Paragraph::new(status_text).style(
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .bg(COLOR_PANEL_FOCUSED_BG)
                .add_modifier(Modifier::BOLD),
        );
        frame.render_widget(status_line, layout[0]);

        match self.screen {
            Screen::Login => {
                self.regions.clear();
                self.draw_login(frame, layout[1]);
            }
            Screen::Board => {
                let main = self.draw_banner(frame, layout[1]);
                self.board_area = main;
                self.draw_board(frame, main);
                if self.form.is_visible() {
                    self.draw_form(frame, main);
                }
                if self.links.is_some() {
                    self.draw_links(frame, main);
                }
                if self.dropdown.is_some() {
                    self.draw_dropdown(frame);
                }
                if self.admin.is_some() {
                    self.draw_admin(frame, main);
                }
            }
        }

        let footer = Paragraph::new(self.footer_text())
            .style(
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .bg(COLOR_PANEL_BG)
                    .add_modifier(Modifier::ITALIC),
            )
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        frame.render_widget(footer, layout[2]);

        if self.alert.is_some() {
            self.draw_alert(frame, full);
        }
    }

    /// Draws the announcement over the top of `area` and returns the rest.
    fn draw_banner(&self, frame: &mut Frame<'_>, area: Rect) -> Rect {
        let Some(text) = self.announcement.as_deref() else {
            return area;
        };
        let width = area.width.saturating_sub(4).max(1) as usize;
        let lines: Vec<Line> = textwrap::wrap(text, width)
            .into_iter()
            .take(3)
            .map(|line| Line::from(line.into_owned()))
            .collect();
        let height = (lines.len() as u16 + 2).min(area.height);
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(height), Constraint::Min(0)])
            .split(area);
        let banner = Paragraph::new(lines)
            .style(Style::default().fg(COLOR_BANNER).bg(COLOR_PANEL_BG))
            .block(
                Block::default()
                    .title("Announcement")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(COLOR_BANNER)),
            );
        frame.render_widget(banner, chunks[0]);
        chunks[1]
    }

    fn draw_board(&mut self, frame: &mut Frame<'_>, area: Rect) {
        let title = match self.navigator.view() {
            View::Listing => " Posts ".to_string(),
            View::Thread { root } => format!(" Thread #{root} · Backspace returns "),
        };
        let block = Block::default()
            .title(Span::styled(
                title,
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_BORDER_IDLE))
            .style(Style::default().bg(COLOR_PANEL_BG));
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let records = self.navigator.records();
        if records.is_empty() {
            self.regions.clear();
            let text = if self.navigator.is_loading() {
                "Loading…"
            } else {
                "Nothing here yet. Press n to write something."
            };
            let empty = Paragraph::new(text)
                .style(
                    Style::default()
                        .fg(COLOR_TEXT_SECONDARY)
                        .add_modifier(Modifier::ITALIC),
                )
                .alignment(Alignment::Center);
            frame.render_widget(empty, inner);
            return;
        }

        let card_width = inner.width.saturating_sub(2);
        let cards: Vec<(PostId, render::Card)> = records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                let preview = record
                    .image
                    .as_ref()
                    .and_then(|path| match self.previews.get(path) {
                        Some(PreviewState::Ready(preview)) => Some(preview),
                        _ => None,
                    });
                let card = render::render_card(
                    record,
                    CardOptions {
                        navigable: self.navigator.is_navigable(record),
                        selected: index == self.selected,
                        image_expanded: self.expanded.contains(&record.id),
                        width: card_width,
                        thumbnail_cols: self.thumbnail_cols,
                        preview,
                    },
                );
                (record.id.clone(), card)
            })
            .collect();

        self.selected = self.selected.min(cards.len() - 1);
        self.offset = self.offset.min(self.selected);
        // Advance the window until the selected card fits.
        while self.offset < self.selected {
            let used: u16 = cards[self.offset..=self.selected]
                .iter()
                .map(|(_, card)| card.height() + 2)
                .sum();
            if used <= inner.height {
                break;
            }
            self.offset += 1;
        }

        let mut regions = Vec::new();
        let mut y = inner.y;
        let bottom = inner.y + inner.height;
        for (index, (id, card)) in cards.into_iter().enumerate().skip(self.offset) {
            if y >= bottom {
                break;
            }
            let height = (card.height() + 2).min(bottom - y);
            let card_area = Rect::new(inner.x, y, inner.width, height);
            let selected = index == self.selected;
            let block = Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(if selected {
                    COLOR_BORDER_FOCUSED
                } else {
                    COLOR_BORDER_IDLE
                }))
                .style(Style::default().bg(if selected {
                    COLOR_PANEL_FOCUSED_BG
                } else {
                    COLOR_PANEL_BG
                }));
            let card_inner = block.inner(card_area);
            frame.render_widget(Paragraph::new(card.lines.clone()).block(block), card_area);
            regions.push(CardRegion {
                id,
                area: card_area,
                inner: card_inner,
                card,
            });
            y += height;
        }
        self.regions = regions;
    }

    fn draw_form(&self, frame: &mut Frame<'_>, bounds: Rect) {
        let area = self.form.area(bounds);
        frame.render_widget(Clear, area);
        let title = format!(" {} · drag to move ", self.form.mode().title());
        let block = popup_block(&title);
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let focus = self.form.focus();
        let mut lines: Vec<Line> = Vec::new();

        lines.push(Line::from(vec![
            indicator(focus == Field::Content),
            Span::styled(
                Field::Content.label(),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            ),
        ]));
        let text_width = inner.width.saturating_sub(4).max(1) as usize;
        let mut content_lines: Vec<String> = self
            .form
            .content
            .split('\n')
            .flat_map(|paragraph| {
                if paragraph.is_empty() {
                    vec![String::new()]
                } else {
                    textwrap::wrap(paragraph, text_width)
                        .into_iter()
                        .map(|line| line.into_owned())
                        .collect()
                }
            })
            .collect();
        if focus == Field::Content {
            if let Some(last) = content_lines.last_mut() {
                last.push('▏');
            }
        }
        let skip = content_lines.len().saturating_sub(CONTENT_ROWS as usize);
        for row in 0..CONTENT_ROWS as usize {
            let text = content_lines.get(skip + row).cloned().unwrap_or_default();
            lines.push(Line::from(vec![
                Span::raw("  "),
                Span::styled(
                    format!("{text:<text_width$}"),
                    field_style(focus == Field::Content),
                ),
            ]));
        }

        let image_text = if self.form.image_path.is_empty() && focus != Field::Image {
            "(path to an image, optional)".to_string()
        } else {
            self.form.image_path.clone()
        };
        lines.push(Line::from(vec![
            indicator(focus == Field::Image),
            Span::styled(
                format!("{}: ", Field::Image.label()),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            ),
            Span::styled(image_text, field_style(focus == Field::Image)),
        ]));

        for field in self.form.fields() {
            let checked = match field {
                Field::Anonymous => self.form.anonymous,
                Field::Pinned => self.form.pinned,
                Field::Locked => self.form.locked,
                _ => continue,
            };
            lines.push(Line::from(vec![
                indicator(focus == field),
                Span::styled(
                    format!("{} {}", checkbox(checked), field.label()),
                    field_style(focus == field),
                ),
            ]));
        }

        let button_style = if focus == Field::Submit {
            Style::default()
                .fg(COLOR_ACCENT)
                .add_modifier(Modifier::BOLD | Modifier::REVERSED)
        } else {
            Style::default().fg(COLOR_ACCENT)
        };
        let button = if self.form.submitting {
            "Sending…".to_string()
        } else {
            format!("[ {} ]", self.form.mode().button())
        };
        lines.push(Line::from(vec![
            indicator(focus == Field::Submit),
            Span::styled(button, button_style),
        ]));

        if let Some(error) = &self.form.error {
            lines.push(Line::from(Span::styled(
                error.clone(),
                Style::default().fg(COLOR_ERROR),
            )));
        }

        frame.render_widget(
            Paragraph::new(lines).wrap(Wrap { trim: false }),
            inner,
        );
    }

    fn draw_dropdown(&self, frame: &mut Frame<'_>) {
        let Some(dropdown) = self.dropdown.as_ref() else {
            return;
        };
        frame.render_widget(Clear, dropdown.area);
        let items: Vec<ListItem> = dropdown
            .options
            .iter()
            .map(|option| ListItem::new(Line::from(format!(" {} ", option.label()))))
            .collect();
        let title = if dropdown.pending { "…" } else { "" };
        let list = List::new(items)
            .block(
                Block::default()
                    .title(title)
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(COLOR_ACCENT))
                    .style(Style::default().bg(COLOR_PANEL_BG).fg(COLOR_TEXT_PRIMARY)),
            )
            .highlight_style(
                Style::default()
                    .fg(COLOR_TEXT_PRIMARY)
                    .bg(COLOR_PANEL_SELECTED_BG)
                    .add_modifier(Modifier::BOLD),
            );
        let mut state = ListState::default();
        state.select(Some(dropdown.selected));
        frame.render_stateful_widget(list, dropdown.area, &mut state);
    }

    fn draw_links(&self, frame: &mut Frame<'_>, area: Rect) {
        let Some(menu) = self.links.as_ref() else {
            return;
        };
        let popup_area = centered_rect(70, 50, area);
        frame.render_widget(Clear, popup_area);

        let items: Vec<ListItem> = if menu.links.is_empty() {
            vec![ListItem::new(Line::from(Span::styled(
                "No links in this post",
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .add_modifier(Modifier::ITALIC),
            )))]
        } else {
            menu.links
                .iter()
                .map(|url| {
                    ListItem::new(Line::from(Span::styled(
                        url.clone(),
                        Style::default().fg(content::COLOR_LINK),
                    )))
                })
                .collect()
        };

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(1)])
            .split(popup_area);

        let list = List::new(items)
            .block(popup_block("Links"))
            .highlight_style(
                Style::default()
                    .fg(COLOR_TEXT_PRIMARY)
                    .bg(COLOR_PANEL_SELECTED_BG)
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("▶ ");
        let mut state = ListState::default();
        if !menu.links.is_empty() {
            state.select(Some(menu.selected.min(menu.links.len() - 1)));
        }
        frame.render_stateful_widget(list, chunks[0], &mut state);

        let instructions = Paragraph::new("j/k move · Enter open · c copy · Esc close")
            .alignment(Alignment::Center)
            .style(
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .bg(COLOR_PANEL_BG)
                    .add_modifier(Modifier::ITALIC),
            );
        frame.render_widget(instructions, chunks[1]);
    }

    fn draw_admin(&self, frame: &mut Frame<'_>, area: Rect) {
        let Some(panel) = self.admin.as_ref() else {
            return;
        };
        let popup_area = fixed_rect(64, 12, area);
        frame.render_widget(Clear, popup_area);

        let field_line = |field: AdminField, label: &str, value: &str| {
            let active = panel.focus == field;
            Line::from(vec![
                indicator(active),
                Span::styled(
                    format!("{label}: "),
                    Style::default().fg(COLOR_TEXT_SECONDARY),
                ),
                Span::styled(
                    if active {
                        format!("{value}▏")
                    } else {
                        value.to_string()
                    },
                    field_style(active),
                ),
            ])
        };

        let mut lines = vec![
            field_line(AdminField::Announcement, "Announcement", &panel.announcement),
            Line::from(Span::styled(
                "    Enter publish · Ctrl-R remove current announcement",
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )),
            Line::default(),
            field_line(AdminField::Emoticon, "Emoticon", &panel.emoticon),
            Line::from(Span::styled(
                "    Enter add · Ctrl-D delete",
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )),
            Line::default(),
        ];
        if panel.pending {
            lines.push(Line::from(Span::styled(
                format!("{} Working…", self.spinner.frame()),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )));
        } else if let Some(error) = &panel.error {
            lines.push(Line::from(Span::styled(
                error.clone(),
                Style::default().fg(COLOR_ERROR),
            )));
        } else if let Some(notice) = &panel.notice {
            lines.push(Line::from(Span::styled(
                notice.clone(),
                Style::default().fg(COLOR_SUCCESS),
            )));
        }

        let paragraph = Paragraph::new(lines)
            .block(popup_block("Admin Dashboard"))
            .wrap(Wrap { trim: false });
        frame.render_widget(paragraph, popup_area);
    }

    fn draw_login(&self, frame: &mut Frame<'_>, area: Rect) {
        let popup_area = fixed_rect(52, 10, area);
        frame.render_widget(Clear, popup_area);
        let masked = "•".repeat(self.login.password.chars().count());
        let field = |active: bool, label: &str, value: String| {
            Line::from(vec![
                indicator(active),
                Span::styled(
                    format!("{label:<9}"),
                    Style::default().fg(COLOR_TEXT_SECONDARY),
                ),
                Span::styled(
                    if active { format!("{value}▏") } else { value },
                    field_style(active),
                ),
            ])
        };
        let mut lines = vec![
            Line::from(Span::styled(
                self.session.server().to_string(),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )),
            Line::default(),
            field(
                self.login.focus == LoginField::Username,
                "Username",
                self.login.username.clone(),
            ),
            field(
                self.login.focus == LoginField::Password,
                "Password",
                masked,
            ),
            Line::default(),
        ];
        lines.push(Line::from(Span::styled(
            if self.login.pending {
                format!("{} Signing in…", self.spinner.frame())
            } else {
                "Enter to sign in".to_string()
            },
            Style::default().fg(COLOR_ACCENT),
        )));
        let paragraph = Paragraph::new(lines).block(popup_block("Login"));
        frame.render_widget(paragraph, popup_area);
    }

    fn draw_alert(&self, frame: &mut Frame<'_>, area: Rect) {
        let Some(message) = self.alert.as_deref() else {
            return;
        };
        let width = 48.min(area.width);
        let text_width = width.saturating_sub(4).max(1) as usize;
        let mut lines: Vec<Line> = textwrap::wrap(message, text_width)
            .into_iter()
            .map(|line| {
                Line::from(Span::styled(
                    line.into_owned(),
                    Style::default().fg(COLOR_TEXT_PRIMARY),
                ))
            })
            .collect();
        lines.push(Line::default());
        lines.push(Line::from(Span::styled(
            "Enter to dismiss",
            Style::default()
                .fg(COLOR_TEXT_SECONDARY)
                .add_modifier(Modifier::ITALIC),
        )));
        let popup_area = fixed_rect(width, lines.len() as u16 + 2, area);
        frame.render_widget(Clear, popup_area);
        let paragraph = Paragraph::new(lines)
            .alignment(Alignment::Center)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(COLOR_ERROR))
                    .style(Style::default().bg(COLOR_PANEL_BG)),
            );
        frame.render_widget(paragraph, popup_area);
    }

    fn footer_text(&self) -> String {
        if self.alert.is_some() {
            return "Enter dismiss".to_string();
        }
        if self.screen == Screen::Login {
            return "Tab switch field · Enter sign in · Esc quit".to_string();
        }
        if self.admin.is_some() {
            return "Tab switch field · Esc close dashboard".to_string();
        }
        if self.form.is_visible() {
            return "Tab next field · Space toggle · Ctrl-S send · Esc hide · drag title to move"
                .to_string();
        }
        if self.links.is_some() {
            return "j/k move · Enter open · c copy · Esc close".to_string();
        }
        if self.dropdown.is_some() {
            return "j/k choose · Enter apply · Esc close".to_string();
        }
        let mut parts = vec!["j/k move"];
        match self.navigator.view() {
            View::Listing => {
                parts.push("Enter open thread");
                parts.push("n new post");
            }
            View::Thread { .. } => {
                parts.push("Backspace listing");
                parts.push("n comment");
            }
        }
        parts.extend(["m actions", "i image", "o links", "r refresh", "D admin", "L logout", "q quit"]);
        parts.join(" · ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Call, MockBoard};
    use crate::form::Submission;
    use crate::model::{Record, RecordKind, Timestamp};
    use crate::storage;
    use ratatui::backend::TestBackend;
    use tempfile::TempDir;

    fn post(id: u64, pinned: bool) -> Record {
        Record {
            id: PostId::from(id),
            kind: RecordKind::Root {
                reply_count: Some(0),
            },
            author: format!("user{id}"),
            content: format!("post {id}"),
            image: None,
            created_at: Timestamp::Raw("t".into()),
            pinned,
            locked: false,
            caps: crate::model::Capabilities {
                can_pin: true,
                can_lock: true,
                has_ownership: true,
            },
        }
    }

    fn comment(id: u64, parent: u64) -> Record {
        Record {
            kind: RecordKind::Comment {
                parent: PostId::from(parent),
            },
            ..post(id, false)
        }
    }

    struct Harness {
        model: Model,
        board: Arc<MockBoard>,
        _dir: TempDir,
    }

    fn harness(posts: Vec<Record>, logged_in: bool) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            storage::Store::open(storage::Options {
                path: Some(dir.path().join("state.db")),
            })
            .unwrap(),
        );
        let board = Arc::new(MockBoard::with_posts(posts));
        let session = Arc::new(session::Manager::new(store, "http://board.test/", board.clone()));
        if logged_in {
            session.login("admin", "secret").unwrap();
        }
        board.clear_calls();
        let model = Model::new(Options {
            services: Services::from_board(board.clone()),
            session,
            media: None,
            page: Page::default(),
            thumbnail_cols: 24,
        });
        Harness {
            model,
            board,
            _dir: dir,
        }
    }

    impl Model {
        /// Handles responses until nothing is in flight.
        fn settle(&mut self) {
            while self.in_flight > 0 {
                let message = self
                    .response_rx
                    .recv_timeout(Duration::from_secs(5))
                    .expect("async response");
                self.handle_async_response(message);
            }
        }

        fn ids(&self) -> Vec<String> {
            self.navigator
                .records()
                .iter()
                .map(|record| record.id.to_string())
                .collect()
        }

        fn render(&mut self) -> String {
            let mut terminal = Terminal::new(TestBackend::new(100, 40)).unwrap();
            terminal.draw(|frame| self.draw(frame)).unwrap();
            let buffer = terminal.backend().buffer().clone();
            let mut out = String::new();
            for y in 0..buffer.area.height {
                for x in 0..buffer.area.width {
                    out.push_str(buffer.get(x, y).symbol());
                }
                out.push('\n');
            }
            out
        }
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn click(model: &mut Model, column: u16, row: u16) {
        model
            .handle_mouse(MouseEvent {
                kind: MouseEventKind::Down(MouseButton::Left),
                column,
                row,
                modifiers: KeyModifiers::NONE,
            })
            .unwrap();
    }

    fn started(posts: Vec<Record>) -> Harness {
        let mut h = harness(posts, true);
        h.model.start();
        h.model.settle();
        h.board.clear_calls();
        h
    }

    #[test]
    fn listing_loads_in_server_order() {
        let mut h = harness(vec![post(3, true), post(7, false), post(5, false)], true);
        h.board.set_announcement("Welcome back");
        h.model.start();
        h.model.settle();
        assert_eq!(h.model.ids(), vec!["3", "7", "5"]);
        assert_eq!(h.model.announcement.as_deref(), Some("Welcome back"));
        let screen = h.model.render();
        assert!(screen.contains("Welcome back"));
        assert!(screen.contains("#3 user3"));
    }

    #[test]
    fn signed_out_start_shows_login() {
        let mut h = harness(vec![post(1, false)], false);
        h.model.start();
        assert_eq!(h.model.screen, Screen::Login);
        assert!(h.board.calls().is_empty());
        assert!(h.model.render().contains("Login"));
    }

    #[test]
    fn failed_login_raises_alert() {
        let mut h = harness(vec![post(1, false)], false);
        h.board.fail_next(401, "");
        for ch in "admin".chars() {
            h.model.handle_key(key(KeyCode::Char(ch))).unwrap();
        }
        h.model.handle_key(key(KeyCode::Enter)).unwrap();
        for ch in "nope".chars() {
            h.model.handle_key(key(KeyCode::Char(ch))).unwrap();
        }
        h.model.handle_key(key(KeyCode::Enter)).unwrap();
        h.model.settle();
        assert_eq!(h.model.alert.as_deref(), Some(LOGIN_FAILED));
        assert_eq!(h.model.screen, Screen::Login);

        h.model.handle_key(key(KeyCode::Enter)).unwrap();
        assert!(h.model.alert.is_none());
    }

    #[test]
    fn successful_login_loads_the_board() {
        let mut h = harness(vec![post(1, false)], false);
        h.model.login.username = "admin".into();
        h.model.login.password = "secret".into();
        h.model.login.focus = LoginField::Password;
        h.model.handle_key(key(KeyCode::Enter)).unwrap();
        h.model.settle();
        assert_eq!(h.model.screen, Screen::Board);
        assert_eq!(h.model.ids(), vec!["1"]);
        assert!(h.board.calls().contains(&Call::Login("admin".into())));
    }

    #[test]
    fn enter_opens_the_selected_thread() {
        let mut h = started(vec![post(3, false), post(5, false)]);
        h.board.set_comments(PostId::from(5), vec![comment(9, 5), comment(10, 5)]);
        h.model.handle_key(key(KeyCode::Char('j'))).unwrap();
        h.model.handle_key(key(KeyCode::Enter)).unwrap();
        h.model.settle();
        assert_eq!(h.board.calls(), vec![Call::LoadComments(PostId::from(5))]);
        assert_eq!(h.model.ids(), vec!["5", "9", "10"]);
        assert_eq!(
            h.model.form.mode(),
            &FormMode::NewComment {
                parent: PostId::from(5)
            }
        );
        let root = h.model.navigator.records().at(0).unwrap();
        assert_eq!(root.reply_count(), Some(2));

        // Thread records are not navigable.
        h.board.clear_calls();
        h.model.handle_key(key(KeyCode::Enter)).unwrap();
        assert_eq!(h.model.in_flight, 0);

        h.model.handle_key(key(KeyCode::Backspace)).unwrap();
        h.model.settle();
        assert_eq!(h.model.ids(), vec!["3", "5"]);
        assert_eq!(h.model.form.mode(), &FormMode::NewPost);
    }

    #[test]
    fn stale_listing_does_not_override_thread() {
        let mut h = started(vec![post(3, false), post(5, false)]);
        let listing = h.model.navigator.show_listing();
        h.model.start_fetch(listing);
        h.model.open_thread(&PostId::from(5));
        h.model.settle();
        assert_eq!(
            h.model.navigator.view(),
            &View::Thread {
                root: PostId::from(5)
            }
        );
    }

    #[test]
    fn failed_fetch_keeps_the_view() {
        let mut h = started(vec![post(3, false)]);
        h.board.fail_next(500, "database is down");
        let ticket = h.model.navigator.refresh();
        h.model.start_fetch(ticket);
        h.model.settle();
        assert_eq!(h.model.ids(), vec!["3"]);
        assert!(h.model.status_message.contains("database is down"));
    }

    #[test]
    fn form_submission_refetches_once() {
        let mut h = started(vec![post(3, false)]);
        h.model.handle_key(key(KeyCode::Char('n'))).unwrap();
        assert!(h.model.form.is_visible());
        for ch in "hello board".chars() {
            h.model.handle_key(key(KeyCode::Char(ch))).unwrap();
        }
        h.model
            .handle_key(KeyEvent::new(KeyCode::Char('s'), KeyModifiers::CONTROL))
            .unwrap();
        h.model.settle();

        let calls = h.board.calls();
        assert!(matches!(&calls[0], Call::Submit(Submission::Post(p)) if p.content == "hello board"));
        assert_eq!(
            calls
                .iter()
                .filter(|call| matches!(call, Call::LoadPosts(_)))
                .count(),
            1
        );
        assert_eq!(h.model.ids().len(), 2);
        assert!(h.model.form.content.is_empty());
    }

    #[test]
    fn failed_submission_keeps_inputs() {
        let mut h = started(vec![post(3, false)]);
        h.model.form.toggle();
        h.model.form.content = "draft".into();
        h.board.fail_next(403, "Post is locked");
        h.model.submit_form();
        h.model.settle();
        assert_eq!(h.model.form.content, "draft");
        assert_eq!(h.model.form.error.as_deref(), Some("Post is locked"));
        assert!(!h
            .board
            .calls()
            .iter()
            .any(|call| matches!(call, Call::LoadPosts(_))));
    }

    #[test]
    fn unreadable_image_is_reported_without_a_request() {
        let mut h = started(vec![post(3, false)]);
        h.model.form.toggle();
        h.model.form.image_path = "/definitely/not/here.png".into();
        h.model.submit_form();
        assert_eq!(h.model.in_flight, 0);
        assert!(h.model.form.error.is_some());
        assert!(h.board.calls().is_empty());
    }

    #[test]
    fn pin_sends_the_inverted_local_flag_and_reloads() {
        let mut h = started(vec![post(3, true)]);
        h.model.render();
        h.model.handle_key(key(KeyCode::Char('m'))).unwrap();
        let dropdown = h.model.dropdown.as_ref().unwrap();
        assert_eq!(
            dropdown.options,
            vec![ModAction::Delete, ModAction::Pin, ModAction::Lock]
        );
        h.model.handle_key(key(KeyCode::Char('j'))).unwrap();
        h.model.handle_key(key(KeyCode::Enter)).unwrap();
        h.model.settle();
        assert_eq!(
            h.board.calls()[0],
            Call::Moderate(ModRequest::Pin {
                id: PostId::from(3),
                pinned: false
            })
        );
        assert!(matches!(h.board.calls()[1], Call::LoadPosts(_)));
        assert!(h.model.dropdown.is_none());
        assert!(!h.model.navigator.records().at(0).unwrap().pinned);
    }

    #[test]
    fn failed_moderation_keeps_the_menu() {
        let mut h = started(vec![post(3, false)]);
        h.model.render();
        h.model.handle_key(key(KeyCode::Char('m'))).unwrap();
        h.board.fail_next(403, "");
        h.model.handle_key(key(KeyCode::Enter)).unwrap();
        h.model.settle();
        let dropdown = h.model.dropdown.as_ref().unwrap();
        assert!(!dropdown.pending);
        assert_eq!(h.board.calls().len(), 1);
    }

    #[test]
    fn clicking_the_menu_glyph_does_not_navigate() {
        let mut h = started(vec![post(3, false), post(5, false)]);
        h.model.render();
        let region = &h.model.regions[1];
        let column = region.inner.x + region.card.trigger.x;
        let row = region.inner.y + region.card.trigger.y;
        click(&mut h.model, column, row);
        assert!(h.model.dropdown.is_some());
        assert_eq!(h.model.in_flight, 0);
        assert_eq!(h.model.selected, 1);

        // A click elsewhere only closes the menu.
        click(&mut h.model, 2, 30);
        assert!(h.model.dropdown.is_none());
        assert_eq!(h.model.in_flight, 0);
    }

    #[test]
    fn clicking_a_card_body_opens_its_thread() {
        let mut h = started(vec![post(3, false), post(5, false)]);
        h.model.render();
        let region = &h.model.regions[1];
        let (column, row) = (region.inner.x + 2, region.inner.y + 1);
        click(&mut h.model, column, row);
        h.model.settle();
        assert_eq!(h.board.calls(), vec![Call::LoadComments(PostId::from(5))]);
    }

    #[test]
    fn dragging_the_form_title_moves_it() {
        let mut h = started(vec![post(3, false)]);
        h.model.form.toggle();
        h.model.render();
        let before = h.model.form.area(h.model.board_area);
        click(&mut h.model, before.x + 3, before.y);
        assert!(h.model.form.is_dragging());
        h.model
            .handle_mouse(MouseEvent {
                kind: MouseEventKind::Drag(MouseButton::Left),
                column: before.x + 13,
                row: before.y + 4,
                modifiers: KeyModifiers::NONE,
            })
            .unwrap();
        h.model
            .handle_mouse(MouseEvent {
                kind: MouseEventKind::Up(MouseButton::Left),
                column: before.x + 13,
                row: before.y + 4,
                modifiers: KeyModifiers::NONE,
            })
            .unwrap();
        let after = h.model.form.area(h.model.board_area);
        assert_eq!((after.x, after.y), (before.x + 10, before.y + 4));
        assert!(!h.model.form.is_dragging());
    }

    #[test]
    fn admin_publish_reloads_the_banner() {
        let mut h = started(vec![post(3, false)]);
        h.model.handle_key(key(KeyCode::Char('D'))).unwrap();
        for ch in "Maintenance".chars() {
            h.model.handle_key(key(KeyCode::Char(ch))).unwrap();
        }
        h.model.handle_key(key(KeyCode::Enter)).unwrap();
        h.model.settle();
        assert_eq!(h.model.announcement.as_deref(), Some("Maintenance"));
        let panel = h.model.admin.as_ref().unwrap();
        assert_eq!(panel.notice.as_deref(), Some("Announcement published"));

        h.model
            .handle_key(KeyEvent::new(KeyCode::Char('r'), KeyModifiers::CONTROL))
            .unwrap();
        h.model.settle();
        assert!(h.model.announcement.is_none());
    }

    #[test]
    fn logout_returns_to_login() {
        let mut h = started(vec![post(3, false)]);
        h.model.handle_key(key(KeyCode::Char('L'))).unwrap();
        h.model.settle();
        assert_eq!(h.model.screen, Screen::Login);
        assert!(h.model.navigator.records().is_empty());
        assert!(h.board.calls().contains(&Call::Logout));
    }

    #[test]
    fn image_toggle_is_dropped_on_rebuild() {
        let mut with_image = post(3, false);
        with_image.image = Some("uploads/3_cat.png".into());
        let mut h = started(vec![with_image]);
        h.model.handle_key(key(KeyCode::Char('i'))).unwrap();
        assert!(h.model.expanded.contains(&PostId::from(3)));
        h.model.handle_key(key(KeyCode::Char('r'))).unwrap();
        h.model.settle();
        assert!(h.model.expanded.is_empty());
    }

    #[test]
    fn deleting_a_comment_reloads_the_thread() {
        let mut h = started(vec![post(3, false), post(5, false)]);
        h.board.set_comments(PostId::from(5), vec![comment(9, 5), comment(10, 5)]);
        h.model.open_thread(&PostId::from(5));
        h.model.settle();
        h.board.clear_calls();

        h.model.render();
        h.model.handle_key(key(KeyCode::Char('j'))).unwrap();
        h.model.handle_key(key(KeyCode::Char('m'))).unwrap();
        assert_eq!(h.model.dropdown.as_ref().unwrap().target, PostId::from(9));
        h.model.handle_key(key(KeyCode::Enter)).unwrap();
        h.model.settle();

        assert_eq!(
            h.board.calls(),
            vec![
                Call::Moderate(ModRequest::Delete {
                    id: PostId::from(9),
                    comment: true
                }),
                Call::LoadComments(PostId::from(5)),
            ]
        );
        assert_eq!(
            h.model.navigator.view(),
            &View::Thread {
                root: PostId::from(5)
            }
        );
        assert_eq!(h.model.ids(), vec!["5", "10"]);
        assert!(h.model.dropdown.is_none());
    }

    #[test]
    fn locking_a_root_in_its_thread_returns_to_the_listing() {
        let mut h = started(vec![post(3, false), post(5, false)]);
        h.board.set_comments(PostId::from(5), vec![comment(9, 5)]);
        h.model.open_thread(&PostId::from(5));
        h.model.settle();
        h.board.clear_calls();

        h.model.render();
        h.model.handle_key(key(KeyCode::Char('m'))).unwrap();
        h.model.handle_key(key(KeyCode::Char('j'))).unwrap();
        h.model.handle_key(key(KeyCode::Char('j'))).unwrap();
        h.model.handle_key(key(KeyCode::Enter)).unwrap();
        h.model.settle();

        let calls = h.board.calls();
        assert_eq!(
            calls[0],
            Call::Moderate(ModRequest::Lock {
                id: PostId::from(5),
                locked: true
            })
        );
        assert!(matches!(calls[1], Call::LoadPosts(_)));
        assert_eq!(calls.len(), 2);
        assert_eq!(h.model.navigator.view(), &View::Listing);
        assert!(h.model.dropdown.is_none());
        let locked = h.model.navigator.records().get(&PostId::from(5)).unwrap();
        assert!(locked.locked);
    }

    #[test]
    fn writes_finishing_after_logout_start_no_fetch() {
        let mut h = started(vec![post(3, false)]);
        let before_logout = h.model.epoch;
        h.model.handle_key(key(KeyCode::Char('L'))).unwrap();
        h.model.settle();
        h.board.clear_calls();

        h.model.in_flight += 2;
        h.model.handle_async_response(AsyncResponse::Moderated {
            epoch: before_logout,
            request: ModRequest::Lock {
                id: PostId::from(3),
                locked: true,
            },
            result: Ok(()),
        });
        h.model.handle_async_response(AsyncResponse::Submitted {
            epoch: before_logout,
            result: Ok(()),
        });

        assert_eq!(h.model.in_flight, 0);
        assert!(h.board.calls().is_empty());
        assert_eq!(h.model.screen, Screen::Login);
        assert!(h.model.navigator.records().is_empty());
    }

    #[test]
    fn previews_follow_the_current_records() {
        let mut with_image = post(3, false);
        with_image.image = Some("uploads/3_cat.png".into());
        let mut h = started(vec![with_image]);
        h.model
            .previews
            .insert("uploads/old.png".into(), PreviewState::Loading);
        h.model
            .previews
            .insert("uploads/3_cat.png".into(), PreviewState::Failed);

        h.model.handle_key(key(KeyCode::Char('r'))).unwrap();
        h.model.settle();
        assert!(h.model.previews.is_empty());

        // A late result for a pruned path is discarded.
        h.model.in_flight += 1;
        h.model.handle_async_response(AsyncResponse::Preview {
            path: "uploads/old.png".into(),
            result: Err(anyhow!("gone")),
        });
        assert!(h.model.previews.is_empty());
    }
}
