use ratatui::layout::Rect;

use crate::model::{PostId, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModAction {
    Delete,
    Pin,
    Lock,
}

impl ModAction {
    pub fn label(self) -> &'static str {
        match self {
            ModAction::Delete => "Delete",
            ModAction::Pin => "Pin",
            ModAction::Lock => "Lock",
        }
    }
}

/// Options the viewer is entitled to on `record`, in menu order.
pub fn options_for(record: &Record) -> Vec<ModAction> {
    let mut options = Vec::with_capacity(3);
    if record.caps.has_ownership {
        options.push(ModAction::Delete);
    }
    if record.caps.can_pin {
        options.push(ModAction::Pin);
    }
    if record.caps.can_lock {
        options.push(ModAction::Lock);
    }
    options
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModRequest {
    Delete { id: PostId, comment: bool },
    Pin { id: PostId, pinned: bool },
    Lock { id: PostId, locked: bool },
}

/// What to re-fetch once a moderation call succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
    RefreshView,
    Listing,
}

impl ModRequest {
    /// The toggles send the inverse of the flag held in the local record. The
    /// local copy is never flipped; the follow-up fetch brings the real state.
    pub fn for_record(action: ModAction, record: &Record) -> Self {
        let id = record.id.clone();
        match action {
            ModAction::Delete => ModRequest::Delete {
                id,
                comment: record.is_comment(),
            },
            ModAction::Pin => ModRequest::Pin {
                id,
                pinned: !record.pinned,
            },
            ModAction::Lock => ModRequest::Lock {
                id,
                locked: !record.locked,
            },
        }
    }

    pub fn id(&self) -> &PostId {
        match self {
            ModRequest::Delete { id, .. } | ModRequest::Pin { id, .. } | ModRequest::Lock { id, .. } => {
                id
            }
        }
    }

    pub fn endpoint(&self) -> &'static str {
        match self {
            ModRequest::Delete { comment: true, .. } => "/api/deleteComment",
            ModRequest::Delete { comment: false, .. } => "/api/deletePost",
            ModRequest::Pin { .. } => "/api/pinPost",
            ModRequest::Lock { .. } => "/api/lockPost",
        }
    }

    pub fn follow_up(&self) -> FollowUp {
        match self {
            ModRequest::Delete { comment: true, .. } => FollowUp::RefreshView,
            _ => FollowUp::Listing,
        }
    }
}

/// Open moderation menu attached to one card.
#[derive(Debug, Clone)]
pub struct Dropdown {
    pub target: PostId,
    pub options: Vec<ModAction>,
    pub selected: usize,
    pub area: Rect,
    pub pending: bool,
}

impl Dropdown {
    pub fn new(record: &Record, area: Rect) -> Option<Self> {
        let options = options_for(record);
        if options.is_empty() {
            return None;
        }
        Some(Self {
            target: record.id.clone(),
            options,
            selected: 0,
            area,
            pending: false,
        })
    }

    pub fn move_selection(&mut self, delta: isize) {
        let len = self.options.len() as isize;
        if len == 0 {
            return;
        }
        self.selected = (self.selected as isize + delta).rem_euclid(len) as usize;
    }

    pub fn current(&self) -> Option<ModAction> {
        self.options.get(self.selected).copied()
    }

    /// Option under a screen cell, if any. Row 0 of `area` is the border.
    pub fn option_at(&self, column: u16, row: u16) -> Option<usize> {
        let inner_top = self.area.y.saturating_add(1);
        if column <= self.area.x
            || column >= self.area.x + self.area.width.saturating_sub(1)
            || row < inner_top
        {
            return None;
        }
        let index = (row - inner_top) as usize;
        (index < self.options.len()).then_some(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WireRecord;

    fn record(json: &str) -> Record {
        let wire: WireRecord = serde_json::from_str(json).unwrap();
        Record::root(wire).unwrap()
    }

    #[test]
    fn options_follow_capabilities_in_order() {
        let all = record(r#"{"id":"1","hasownership":true,"canpin":true,"canlock":true}"#);
        assert_eq!(
            options_for(&all),
            vec![ModAction::Delete, ModAction::Pin, ModAction::Lock]
        );

        let no_owner = record(r#"{"id":"1","canlock":true}"#);
        assert_eq!(options_for(&no_owner), vec![ModAction::Lock]);
        assert!(Dropdown::new(&record(r#"{"id":"1"}"#), Rect::default()).is_none());
    }

    #[test]
    fn toggles_invert_the_local_flag() {
        let pinned = record(r#"{"id":"5","pinned":true,"locked":false}"#);
        assert_eq!(
            ModRequest::for_record(ModAction::Pin, &pinned),
            ModRequest::Pin {
                id: PostId::from(5),
                pinned: false
            }
        );
        assert_eq!(
            ModRequest::for_record(ModAction::Lock, &pinned),
            ModRequest::Lock {
                id: PostId::from(5),
                locked: true
            }
        );
        assert!(pinned.pinned);
    }

    #[test]
    fn delete_routes_on_record_kind() {
        let root = record(r#"{"id":"5"}"#);
        let wire: WireRecord = serde_json::from_str(r#"{"id":"6"}"#).unwrap();
        let comment = Record::comment(wire, &root.id).unwrap();

        let delete_root = ModRequest::for_record(ModAction::Delete, &root);
        let delete_comment = ModRequest::for_record(ModAction::Delete, &comment);
        assert_eq!(delete_root.endpoint(), "/api/deletePost");
        assert_eq!(delete_comment.endpoint(), "/api/deleteComment");
        assert_eq!(delete_root.follow_up(), FollowUp::Listing);
        assert_eq!(delete_comment.follow_up(), FollowUp::RefreshView);
        assert_eq!(
            ModRequest::for_record(ModAction::Pin, &root).follow_up(),
            FollowUp::Listing
        );
    }

    #[test]
    fn dropdown_selection_wraps_and_hit_tests() {
        let all = record(r#"{"id":"1","hasownership":true,"canpin":true,"canlock":true}"#);
        let mut dropdown = Dropdown::new(&all, Rect::new(10, 4, 12, 5)).unwrap();
        dropdown.move_selection(-1);
        assert_eq!(dropdown.current(), Some(ModAction::Lock));
        dropdown.move_selection(1);
        assert_eq!(dropdown.current(), Some(ModAction::Delete));

        assert_eq!(dropdown.option_at(12, 5), Some(0));
        assert_eq!(dropdown.option_at(12, 7), Some(2));
        assert_eq!(dropdown.option_at(12, 4), None);
        assert_eq!(dropdown.option_at(10, 5), None);
    }
}
