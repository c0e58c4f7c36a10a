use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use image::imageops::FilterType;
use image::{ImageFormat, RgbaImage};
use parking_lot::Mutex;
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};
use sha1::{Digest, Sha1};
use tracing::{debug, warn};

use crate::board;
use crate::storage::{self, CachedImage};

/// Widest decoded preview kept in memory, in pixels.
const MAX_PREVIEW_PX: u32 = 320;
/// Approximate pixel width of one terminal column.
const CELL_WIDTH_PX: u32 = 8;
pub const MAX_NATURAL_COLS: u16 = 120;

/// Where image bytes come from. The board client resolves `imagepath`
/// values against its base URL and sends the session cookie.
pub trait ImageSource: Send + Sync {
    fn cache_key(&self, path: &str) -> String;
    fn fetch(&self, path: &str) -> Result<Vec<u8>>;
}

impl ImageSource for board::Client {
    fn cache_key(&self, path: &str) -> String {
        self.image_url(path)
            .map(|url| url.to_string())
            .unwrap_or_else(|_| path.to_string())
    }

    fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        self.fetch_image(path)
            .with_context(|| format!("media: download {path}"))
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub cache_dir: Option<PathBuf>,
    pub max_size_bytes: i64,
    pub default_ttl: Duration,
    pub workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: None,
            max_size_bytes: 200 * 1024 * 1024,
            default_ttl: Duration::from_secs(6 * 60 * 60),
            workers: 2,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Request {
    pub path: String,
    pub ttl: Option<Duration>,
    pub force: bool,
}

#[derive(Debug)]
pub struct ResultEntry {
    pub path: String,
    pub result: Result<CachedImage>,
}

struct Job {
    request: Request,
    tx: Sender<ResultEntry>,
}

struct Inner {
    store: Arc<storage::Store>,
    cfg: Config,
    cache_dir: PathBuf,
    source: Arc<dyn ImageSource>,
    jobs: Sender<Job>,
    stop: Sender<()>,
    pruning: Mutex<()>,
}

/// Cheap handle the UI keeps to queue downloads.
#[derive(Clone)]
pub struct Handle {
    inner: Arc<Inner>,
}

impl Handle {
    pub fn enqueue(&self, request: Request) -> Receiver<ResultEntry> {
        let (tx, rx) = unbounded();
        self.enqueue_to(request, tx);
        rx
    }

    /// Queues a download whose result is delivered on `tx`.
    pub fn enqueue_to(&self, request: Request, tx: Sender<ResultEntry>) {
        let path = request.path.clone();
        if let Err(err) = self.inner.jobs.send(Job { request, tx }) {
            warn!(path, error = %err, "media: worker pool is gone");
        }
    }
}

pub struct Manager {
    inner: Arc<Inner>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl Manager {
    pub fn new(
        store: Arc<storage::Store>,
        cfg: Config,
        source: Arc<dyn ImageSource>,
    ) -> Result<Self> {
        let mut cfg = cfg;
        if cfg.workers == 0 {
            cfg.workers = 2;
        }
        let cache_dir = cfg
            .cache_dir
            .clone()
            .or_else(default_cache_dir)
            .context("media: cache dir not configured")?;
        fs::create_dir_all(&cache_dir)
            .with_context(|| format!("media: create {}", cache_dir.display()))?;

        let (job_tx, job_rx) = unbounded();
        let (stop_tx, stop_rx) = unbounded();

        let inner = Arc::new(Inner {
            store,
            cfg,
            cache_dir,
            source,
            jobs: job_tx,
            stop: stop_tx,
            pruning: Mutex::new(()),
        });

        if let Err(err) = inner.purge_expired() {
            warn!(error = ?err, "media: purge of expired entries failed");
        }

        let mut handles = Vec::new();
        for _ in 0..inner.cfg.workers {
            let rx_jobs = job_rx.clone();
            let rx_stop = stop_rx.clone();
            let worker_inner = inner.clone();
            handles.push(thread::spawn(move || worker_inner.worker(rx_jobs, rx_stop)));
        }

        Ok(Self { inner, handles })
    }

    pub fn handle(&self) -> Handle {
        Handle {
            inner: self.inner.clone(),
        }
    }

    fn shutdown(&mut self) {
        for _ in &self.handles {
            let _ = self.inner.stop.send(());
        }
        while let Some(handle) = self.handles.pop() {
            let _ = handle.join();
        }
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn worker(&self, jobs: Receiver<Job>, stop: Receiver<()>) {
        loop {
            crossbeam_channel::select! {
                recv(stop) -> _ => break,
                recv(jobs) -> msg => {
                    match msg {
                        Ok(job) => self.process(job),
                        Err(_) => break,
                    }
                }
            }
        }
    }

    fn process(&self, job: Job) {
        let path = job.request.path.clone();
        let result = self.fetch(job.request);
        if let Err(err) = &result {
            warn!(path, error = ?err, "media: fetch failed");
        }
        let _ = job.tx.send(ResultEntry { path, result });
    }

    fn fetch(&self, request: Request) -> Result<CachedImage> {
        if request.path.is_empty() {
            return Err(anyhow!("media: image path required"));
        }
        let key = self.source.cache_key(&request.path);

        if let Some(entry) = self.store.image(&key)? {
            if !request.force
                && self.is_fresh(&entry, request.ttl)
                && Path::new(&entry.file).exists()
            {
                debug!(key, "media: cache hit");
                return Ok(entry);
            }
        }

        let bytes = self.source.fetch(&request.path)?;
        let (width, height) = image_dimensions(&bytes);
        let file = self.write_file(&key, &bytes)?;
        let ttl = request.ttl.unwrap_or(self.cfg.default_ttl);
        let expires_at = SystemTime::now().checked_add(ttl);

        let mut cached = CachedImage {
            id: 0,
            url: key,
            format: detect_mime(&bytes),
            file,
            width,
            height,
            bytes: bytes.len() as i64,
            stored_at: Utc::now(),
            expires_at: expires_at.map(DateTime::<Utc>::from),
            sha1: sha1_hex(&bytes),
        };

        self.prune_if_needed(cached.bytes)?;
        cached.id = self.store.put_image(&cached)?;
        Ok(cached)
    }

    fn is_fresh(&self, entry: &CachedImage, ttl: Option<Duration>) -> bool {
        let ttl = ttl.unwrap_or(self.cfg.default_ttl);
        if ttl.is_zero() {
            return false;
        }
        let expiry = entry.stored_at.checked_add_signed(
            chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(0)),
        );
        match expiry {
            Some(expiry) => Utc::now() < expiry,
            None => false,
        }
    }

    /// One file per resolved url, so evicting a row never removes bytes
    /// another row still points at.
    fn write_file(&self, key: &str, data: &[u8]) -> Result<String> {
        let filename = format!("{}.bin", sha1_hex(key.as_bytes()));
        let path = self.cache_dir.join(filename);
        fs::write(&path, data).context("media: write")?;
        Ok(path.to_string_lossy().to_string())
    }

    fn purge_expired(&self) -> Result<()> {
        let expired = self.store.expired_images(Utc::now(), 500)?;
        if expired.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = expired.iter().map(|entry| entry.id).collect();
        self.store.forget_images(&ids)?;
        for entry in expired {
            let _ = fs::remove_file(entry.file);
        }
        debug!(count = ids.len(), "media: purged expired entries");
        Ok(())
    }

    fn prune_if_needed(&self, new_bytes: i64) -> Result<()> {
        let _guard = self.pruning.lock();
        let mut total = self.store.image_bytes()? + new_bytes;
        if total <= self.cfg.max_size_bytes {
            return Ok(());
        }

        let mut ids = Vec::new();
        let mut paths = Vec::new();

        for entry in self.store.images_by_age(100)? {
            total -= entry.bytes;
            ids.push(entry.id);
            paths.push(entry.file);
            if total <= self.cfg.max_size_bytes {
                break;
            }
        }

        debug!(count = ids.len(), "media: pruning cache");
        self.store.forget_images(&ids)?;
        for path in paths {
            let _ = fs::remove_file(path);
        }
        Ok(())
    }
}

/// Pixel size of an encoded image, or zeros when it cannot be read.
fn image_dimensions(bytes: &[u8]) -> (i64, i64) {
    image::load_from_memory(bytes)
        .map(|img| (i64::from(img.width()), i64::from(img.height())))
        .unwrap_or((0, 0))
}

fn default_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("board-tui").join("media"))
}

fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn detect_mime(bytes: &[u8]) -> String {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => "image/jpeg".into(),
        Ok(ImageFormat::Png) => "image/png".into(),
        Ok(ImageFormat::Gif) => "image/gif".into(),
        Ok(ImageFormat::WebP) => "image/webp".into(),
        _ => tree_magic_mini::from_u8(bytes).to_string(),
    }
}

/// Decoded image ready to be drawn with half-block cells.
#[derive(Debug, Clone)]
pub struct Preview {
    pixels: RgbaImage,
    source_width: u32,
}

impl Preview {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let decoded = image::load_from_memory(bytes).context("media: decode image")?;
        let source_width = decoded.width();
        let pixels = if decoded.width() > MAX_PREVIEW_PX {
            decoded
                .resize(MAX_PREVIEW_PX, u32::MAX, FilterType::Triangle)
                .to_rgba8()
        } else {
            decoded.to_rgba8()
        };
        Ok(Self {
            pixels,
            source_width,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("media: read {}", path.display()))?;
        Self::decode(&bytes)
    }

    /// Columns the image takes at its natural size.
    pub fn natural_cols(&self) -> u16 {
        let cols = (self.source_width / CELL_WIDTH_PX).max(1);
        cols.min(u32::from(MAX_NATURAL_COLS)) as u16
    }

    pub fn rows_for(&self, cols: u16) -> u16 {
        let (w, h) = self.pixels.dimensions();
        if w == 0 || h == 0 || cols == 0 {
            return 0;
        }
        let pixel_rows = (u64::from(h) * u64::from(cols) / u64::from(w)).max(1);
        pixel_rows.div_ceil(2) as u16
    }

    /// One line per cell row. The upper pixel is the foreground of `▀`, the
    /// lower one its background.
    pub fn lines(&self, cols: u16) -> Vec<Line<'static>> {
        let rows = self.rows_for(cols);
        if rows == 0 {
            return Vec::new();
        }
        let scaled = image::imageops::resize(
            &self.pixels,
            u32::from(cols),
            u32::from(rows) * 2,
            FilterType::Triangle,
        );
        (0..u32::from(rows))
            .map(|row| {
                let spans: Vec<Span<'static>> = (0..u32::from(cols))
                    .map(|col| {
                        let top = scaled.get_pixel(col, row * 2);
                        let bottom = scaled.get_pixel(col, row * 2 + 1);
                        Span::styled(
                            "▀",
                            Style::default().fg(to_color(top.0)).bg(to_color(bottom.0)),
                        )
                    })
                    .collect();
                Line::from(spans)
            })
            .collect()
    }
}

fn to_color([r, g, b, a]: [u8; 4]) -> Color {
    // Blend transparency against the panel background.
    let blend = |c: u8, bg: u8| -> u8 {
        ((u16::from(c) * u16::from(a) + u16::from(bg) * (255 - u16::from(a))) / 255) as u8
    };
    Color::Rgb(blend(r, 24), blend(g, 24), blend(b, 36))
}
