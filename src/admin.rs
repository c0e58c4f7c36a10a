use anyhow::Result;

use crate::data::AdminService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminField {
    Announcement,
    Emoticon,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    PublishAnnouncement(String),
    RemoveAnnouncement,
    AddEmoticon(String),
    DeleteEmoticon(String),
}

impl AdminCommand {
    pub fn run(&self, service: &dyn AdminService) -> Result<()> {
        match self {
            AdminCommand::PublishAnnouncement(content) => service.publish_announcement(content),
            AdminCommand::RemoveAnnouncement => service.remove_announcement(),
            AdminCommand::AddEmoticon(name) => service.add_emoticon(name),
            AdminCommand::DeleteEmoticon(name) => service.delete_emoticon(name),
        }
    }

    /// Remove failures are only logged; the others are shown in the panel.
    pub fn reports_inline(&self) -> bool {
        !matches!(self, AdminCommand::RemoveAnnouncement)
    }

    pub fn changes_announcement(&self) -> bool {
        matches!(
            self,
            AdminCommand::PublishAnnouncement(_) | AdminCommand::RemoveAnnouncement
        )
    }

    pub fn describe(&self) -> String {
        match self {
            AdminCommand::PublishAnnouncement(_) => "Announcement published".into(),
            AdminCommand::RemoveAnnouncement => "Announcement removed".into(),
            AdminCommand::AddEmoticon(name) => format!("Emoticon {name} added"),
            AdminCommand::DeleteEmoticon(name) => format!("Emoticon {name} deleted"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdminPanel {
    pub announcement: String,
    pub emoticon: String,
    pub focus: AdminField,
    pub error: Option<String>,
    pub notice: Option<String>,
    pub pending: bool,
}

impl Default for AdminPanel {
    fn default() -> Self {
        Self {
            announcement: String::new(),
            emoticon: String::new(),
            focus: AdminField::Announcement,
            error: None,
            notice: None,
            pending: false,
        }
    }
}

impl AdminPanel {
    pub fn switch_field(&mut self) {
        self.focus = match self.focus {
            AdminField::Announcement => AdminField::Emoticon,
            AdminField::Emoticon => AdminField::Announcement,
        };
    }

    pub fn insert_char(&mut self, ch: char) {
        match self.focus {
            AdminField::Announcement => self.announcement.push(ch),
            AdminField::Emoticon => self.emoticon.push(ch),
        }
    }

    pub fn backspace(&mut self) {
        match self.focus {
            AdminField::Announcement => {
                self.announcement.pop();
            }
            AdminField::Emoticon => {
                self.emoticon.pop();
            }
        }
    }

    /// Command for Enter on the focused field.
    pub fn submit(&self) -> Option<AdminCommand> {
        match self.focus {
            AdminField::Announcement => Some(AdminCommand::PublishAnnouncement(
                self.announcement.clone(),
            )),
            AdminField::Emoticon => {
                let name = self.emoticon.trim();
                (!name.is_empty()).then(|| AdminCommand::AddEmoticon(name.to_string()))
            }
        }
    }

    pub fn delete_emoticon(&self) -> Option<AdminCommand> {
        let name = self.emoticon.trim();
        (!name.is_empty()).then(|| AdminCommand::DeleteEmoticon(name.to_string()))
    }

    pub fn begin(&mut self) {
        self.pending = true;
        self.error = None;
        self.notice = None;
    }

    pub fn finish(&mut self, command: &AdminCommand, error: Option<String>) {
        self.pending = false;
        match error {
            Some(message) if command.reports_inline() => self.error = Some(message),
            Some(_) => {}
            None => {
                self.notice = Some(command.describe());
                if matches!(
                    command,
                    AdminCommand::AddEmoticon(_) | AdminCommand::DeleteEmoticon(_)
                ) {
                    self.emoticon.clear();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Call, MockBoard};

    #[test]
    fn enter_dispatches_on_focused_field() {
        let mut panel = AdminPanel::default();
        panel.announcement = "Maintenance tonight".into();
        assert_eq!(
            panel.submit(),
            Some(AdminCommand::PublishAnnouncement("Maintenance tonight".into()))
        );
        panel.switch_field();
        assert_eq!(panel.submit(), None);
        panel.emoticon = " wave ".into();
        assert_eq!(panel.submit(), Some(AdminCommand::AddEmoticon("wave".into())));
        assert_eq!(
            panel.delete_emoticon(),
            Some(AdminCommand::DeleteEmoticon("wave".into()))
        );
    }

    #[test]
    fn commands_reach_the_service() {
        let board = MockBoard::default();
        AdminCommand::PublishAnnouncement("hi".into())
            .run(&board)
            .unwrap();
        AdminCommand::RemoveAnnouncement.run(&board).unwrap();
        AdminCommand::DeleteEmoticon("wave".into()).run(&board).unwrap();
        assert_eq!(
            board.calls(),
            vec![
                Call::PublishAnnouncement("hi".into()),
                Call::RemoveAnnouncement,
                Call::DeleteEmoticon("wave".into()),
            ]
        );
    }

    #[test]
    fn remove_failure_is_not_shown_inline() {
        let mut panel = AdminPanel::default();
        panel.begin();
        panel.finish(&AdminCommand::RemoveAnnouncement, Some("boom".into()));
        assert!(panel.error.is_none());

        panel.begin();
        panel.finish(
            &AdminCommand::AddEmoticon("wave".into()),
            Some("Emoticon already exists".into()),
        );
        assert_eq!(panel.error.as_deref(), Some("Emoticon already exists"));
    }
}
