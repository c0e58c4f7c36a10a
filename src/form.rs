use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use image::ImageFormat;
use ratatui::layout::Rect;

use crate::board::{Attachment, NewComment, NewPost};
use crate::model::PostId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormMode {
    NewPost,
    NewComment { parent: PostId },
}

impl FormMode {
    pub fn title(&self) -> &'static str {
        match self {
            FormMode::NewPost => "New Post",
            FormMode::NewComment { .. } => "Add Comment",
        }
    }

    pub fn button(&self) -> &'static str {
        match self {
            FormMode::NewPost => "Post",
            FormMode::NewComment { .. } => "Comment",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Content,
    Image,
    Anonymous,
    Pinned,
    Locked,
    Submit,
}

impl Field {
    pub fn label(self) -> &'static str {
        match self {
            Field::Content => "Content",
            Field::Image => "Image",
            Field::Anonymous => "Anonymous",
            Field::Pinned => "Pinned",
            Field::Locked => "Locked",
            Field::Submit => "Submit",
        }
    }

    pub fn is_checkbox(self) -> bool {
        matches!(self, Field::Anonymous | Field::Pinned | Field::Locked)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Post(NewPost),
    Comment(NewComment),
}

impl Submission {
    pub fn endpoint(&self) -> &'static str {
        match self {
            Submission::Post(_) => "/api/addPost",
            Submission::Comment(_) => "/api/addComment",
        }
    }
}

/// The floating submission form. Visibility and position are independent:
/// hiding the form keeps where it was dragged to.
#[derive(Debug, Clone)]
pub struct FormState {
    mode: FormMode,
    visible: bool,
    origin: (u16, u16),
    grab: Option<(u16, u16)>,
    pub content: String,
    pub image_path: String,
    pub anonymous: bool,
    pub pinned: bool,
    pub locked: bool,
    focus: Field,
    pub error: Option<String>,
    pub submitting: bool,
}

impl FormState {
    pub const WIDTH: u16 = 56;
    pub const HEIGHT: u16 = 16;

    pub fn new(mode: FormMode) -> Self {
        Self {
            mode,
            visible: false,
            origin: (4, 3),
            grab: None,
            content: String::new(),
            image_path: String::new(),
            anonymous: false,
            pinned: false,
            locked: false,
            focus: Field::Content,
            error: None,
            submitting: false,
        }
    }

    pub fn mode(&self) -> &FormMode {
        &self.mode
    }

    /// Rebinds the form to another target. Inputs belong to the old target
    /// and are dropped when it changes.
    pub fn set_mode(&mut self, mode: FormMode) {
        if self.mode != mode {
            self.mode = mode;
            self.clear();
            self.focus = Field::Content;
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn toggle(&mut self) {
        self.visible = !self.visible;
        if !self.visible {
            self.grab = None;
        }
    }

    pub fn hide(&mut self) {
        self.visible = false;
        self.grab = None;
    }

    pub fn fields(&self) -> Vec<Field> {
        match self.mode {
            FormMode::NewPost => vec![
                Field::Content,
                Field::Image,
                Field::Anonymous,
                Field::Pinned,
                Field::Locked,
                Field::Submit,
            ],
            FormMode::NewComment { .. } => {
                vec![Field::Content, Field::Image, Field::Anonymous, Field::Submit]
            }
        }
    }

    pub fn focus(&self) -> Field {
        self.focus
    }

    pub fn focus_next(&mut self) {
        self.shift_focus(1);
    }

    pub fn focus_prev(&mut self) {
        self.shift_focus(-1);
    }

    fn shift_focus(&mut self, delta: isize) {
        let fields = self.fields();
        let current = fields.iter().position(|f| *f == self.focus).unwrap_or(0) as isize;
        let next = (current + delta).rem_euclid(fields.len() as isize) as usize;
        self.focus = fields[next];
    }

    pub fn insert_char(&mut self, ch: char) {
        match self.focus {
            Field::Content => self.content.push(ch),
            Field::Image => self.image_path.push(ch),
            field if field.is_checkbox() && ch == ' ' => self.toggle_checkbox(),
            _ => {}
        }
    }

    pub fn newline(&mut self) {
        if self.focus == Field::Content {
            self.content.push('\n');
        }
    }

    pub fn backspace(&mut self) {
        match self.focus {
            Field::Content => {
                self.content.pop();
            }
            Field::Image => {
                self.image_path.pop();
            }
            _ => {}
        }
    }

    pub fn toggle_checkbox(&mut self) {
        match self.focus {
            Field::Anonymous => self.anonymous = !self.anonymous,
            Field::Pinned => self.pinned = !self.pinned,
            Field::Locked => self.locked = !self.locked,
            _ => {}
        }
    }

    pub fn area(&self, bounds: Rect) -> Rect {
        let width = Self::WIDTH.min(bounds.width);
        let height = Self::HEIGHT.min(bounds.height);
        let max_x = bounds.x + bounds.width.saturating_sub(width);
        let max_y = bounds.y + bounds.height.saturating_sub(height);
        Rect::new(
            self.origin.0.clamp(bounds.x, max_x),
            self.origin.1.clamp(bounds.y, max_y),
            width,
            height,
        )
    }

    pub fn on_grab_bar(&self, bounds: Rect, column: u16, row: u16) -> bool {
        let area = self.area(bounds);
        self.visible && row == area.y && column >= area.x && column < area.x + area.width
    }

    /// Starts a drag; the pointer keeps its offset into the form while moving.
    pub fn begin_drag(&mut self, bounds: Rect, column: u16, row: u16) -> bool {
        if !self.on_grab_bar(bounds, column, row) {
            return false;
        }
        let area = self.area(bounds);
        self.origin = (area.x, area.y);
        self.grab = Some((column - area.x, row - area.y));
        true
    }

    pub fn drag_to(&mut self, bounds: Rect, column: u16, row: u16) {
        let Some((dx, dy)) = self.grab else {
            return;
        };
        self.origin = (column.saturating_sub(dx), row.saturating_sub(dy));
        let area = self.area(bounds);
        self.origin = (area.x, area.y);
    }

    pub fn end_drag(&mut self) {
        self.grab = None;
    }

    pub fn is_dragging(&self) -> bool {
        self.grab.is_some()
    }

    /// Packages the inputs for the current target. Empty text is allowed.
    pub fn submission(&self) -> Result<Submission> {
        let image = match self.image_path.trim() {
            "" => None,
            path => Some(read_attachment(Path::new(path))?),
        };
        Ok(match &self.mode {
            FormMode::NewPost => Submission::Post(NewPost {
                content: self.content.clone(),
                image,
                anonymous: self.anonymous,
                pinned: self.pinned,
                locked: self.locked,
            }),
            FormMode::NewComment { parent } => Submission::Comment(NewComment {
                parent: parent.clone(),
                content: self.content.clone(),
                image,
                anonymous: self.anonymous,
            }),
        })
    }

    pub fn succeeded(&mut self) {
        self.submitting = false;
        self.clear();
    }

    pub fn failed(&mut self, message: String) {
        self.submitting = false;
        self.error = Some(message);
    }

    fn clear(&mut self) {
        self.content.clear();
        self.image_path.clear();
        self.anonymous = false;
        self.pinned = false;
        self.locked = false;
        self.error = None;
    }
}

pub fn read_attachment(path: &Path) -> Result<Attachment> {
    let bytes =
        fs::read(path).with_context(|| format!("cannot read image {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    let mime = match image::guess_format(&bytes) {
        Ok(ImageFormat::Jpeg) => "image/jpeg".to_string(),
        Ok(ImageFormat::Png) => "image/png".to_string(),
        Ok(ImageFormat::Gif) => "image/gif".to_string(),
        Ok(ImageFormat::WebP) => "image/webp".to_string(),
        _ => tree_magic_mini::from_u8(&bytes).to_string(),
    };
    Ok(Attachment {
        file_name,
        mime,
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    #[test]
    fn comment_mode_hides_moderation_checkboxes() {
        let form = FormState::new(FormMode::NewComment {
            parent: PostId::from(5),
        });
        assert!(!form.fields().contains(&Field::Pinned));
        assert!(!form.fields().contains(&Field::Locked));
        assert_eq!(form.mode().title(), "Add Comment");
        assert_eq!(form.mode().button(), "Comment");
    }

    #[test]
    fn image_only_submission_is_accepted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cat.png");
        fs::write(&path, PNG_MAGIC).unwrap();

        let mut form = FormState::new(FormMode::NewComment {
            parent: PostId::from(5),
        });
        form.image_path = path.display().to_string();
        let Submission::Comment(comment) = form.submission().unwrap() else {
            panic!("expected a comment submission");
        };
        assert_eq!(comment.content, "");
        assert_eq!(comment.parent, PostId::from(5));
        let image = comment.image.unwrap();
        assert_eq!(image.file_name, "cat.png");
        assert_eq!(image.mime, "image/png");
    }

    #[test]
    fn unreadable_image_fails_before_any_request() {
        let mut form = FormState::new(FormMode::NewPost);
        form.image_path = "/definitely/not/here.png".into();
        let err = form.submission().unwrap_err();
        assert!(err.to_string().contains("cannot read image"));
    }

    #[test]
    fn failure_keeps_inputs_and_success_clears_them() {
        let mut form = FormState::new(FormMode::NewPost);
        form.content = "hello".into();
        form.pinned = true;
        form.failed("No permission to upload post!".into());
        assert_eq!(form.content, "hello");
        assert!(form.pinned);
        assert_eq!(form.error.as_deref(), Some("No permission to upload post!"));

        form.succeeded();
        assert!(form.content.is_empty());
        assert!(!form.pinned);
        assert!(form.error.is_none());
    }

    #[test]
    fn changing_target_clears_inputs() {
        let mut form = FormState::new(FormMode::NewPost);
        form.content = "draft".into();
        form.set_mode(FormMode::NewPost);
        assert_eq!(form.content, "draft");
        form.set_mode(FormMode::NewComment {
            parent: PostId::from(1),
        });
        assert!(form.content.is_empty());
    }

    #[test]
    fn drag_moves_by_pointer_delta_within_bounds() {
        let bounds = Rect::new(0, 0, 100, 40);
        let mut form = FormState::new(FormMode::NewPost);
        form.toggle();
        let start = form.area(bounds);
        assert!(form.begin_drag(bounds, start.x + 3, start.y));
        form.drag_to(bounds, start.x + 13, start.y + 5);
        form.end_drag();
        let moved = form.area(bounds);
        assert_eq!((moved.x, moved.y), (start.x + 10, start.y + 5));

        assert!(form.begin_drag(bounds, moved.x, moved.y));
        form.drag_to(bounds, 99, 39);
        let clamped = form.area(bounds);
        assert_eq!(clamped.x + clamped.width, 100);
        assert_eq!(clamped.y + clamped.height, 40);
    }

    #[test]
    fn press_outside_grab_bar_does_not_drag() {
        let bounds = Rect::new(0, 0, 100, 40);
        let mut form = FormState::new(FormMode::NewPost);
        form.toggle();
        let area = form.area(bounds);
        assert!(!form.begin_drag(bounds, area.x + 1, area.y + 2));
        assert!(!form.is_dragging());
    }
}
