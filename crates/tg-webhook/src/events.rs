// SPDX-License-Identifier: MIT OR Apache-2.0
//! Jira webhook event types.

use std::fmt;

/// The Jira webhook events the receiver recognizes. Unknown events are
/// acknowledged and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WebhookEventType {
    /// `jira:issue_created`
    IssueCreated,
    /// `jira:issue_updated`
    IssueUpdated,
    /// `jira:issue_deleted`
    IssueDeleted,
    /// `comment_created`
    CommentCreated,
    /// `comment_updated`
    CommentUpdated,
    /// `comment_deleted`
    CommentDeleted,
    /// `project_created`
    ProjectCreated,
    /// `project_updated`
    ProjectUpdated,
    /// `project_deleted`
    ProjectDeleted,
    /// `user_created`
    UserCreated,
    /// `user_updated`
    UserUpdated,
    /// `user_deleted`
    UserDeleted,
    /// `sprint_created`
    SprintCreated,
    /// `sprint_updated`
    SprintUpdated,
    /// `sprint_deleted`
    SprintDeleted,
    /// `sprint_started`
    SprintStarted,
    /// `sprint_closed`
    SprintClosed,
    /// `jira:version_created`
    VersionCreated,
    /// `jira:version_updated`
    VersionUpdated,
    /// `jira:version_deleted`
    VersionDeleted,
    /// `jira:version_released`
    VersionReleased,
    /// `jira:version_unreleased`
    VersionUnreleased,
}

impl WebhookEventType {
    /// The wire string Jira sends in `webhookEvent`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IssueCreated => "jira:issue_created",
            Self::IssueUpdated => "jira:issue_updated",
            Self::IssueDeleted => "jira:issue_deleted",
            Self::CommentCreated => "comment_created",
            Self::CommentUpdated => "comment_updated",
            Self::CommentDeleted => "comment_deleted",
            Self::ProjectCreated => "project_created",
            Self::ProjectUpdated => "project_updated",
            Self::ProjectDeleted => "project_deleted",
            Self::UserCreated => "user_created",
            Self::UserUpdated => "user_updated",
            Self::UserDeleted => "user_deleted",
            Self::SprintCreated => "sprint_created",
            Self::SprintUpdated => "sprint_updated",
            Self::SprintDeleted => "sprint_deleted",
            Self::SprintStarted => "sprint_started",
            Self::SprintClosed => "sprint_closed",
            Self::VersionCreated => "jira:version_created",
            Self::VersionUpdated => "jira:version_updated",
            Self::VersionDeleted => "jira:version_deleted",
            Self::VersionReleased => "jira:version_released",
            Self::VersionUnreleased => "jira:version_unreleased",
        }
    }

    /// Parse the `webhookEvent` field.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "jira:issue_created" => Some(Self::IssueCreated),
            "jira:issue_updated" => Some(Self::IssueUpdated),
            "jira:issue_deleted" => Some(Self::IssueDeleted),
            "comment_created" => Some(Self::CommentCreated),
            "comment_updated" => Some(Self::CommentUpdated),
            "comment_deleted" => Some(Self::CommentDeleted),
            "project_created" => Some(Self::ProjectCreated),
            "project_updated" => Some(Self::ProjectUpdated),
            "project_deleted" => Some(Self::ProjectDeleted),
            "user_created" => Some(Self::UserCreated),
            "user_updated" => Some(Self::UserUpdated),
            "user_deleted" => Some(Self::UserDeleted),
            "sprint_created" => Some(Self::SprintCreated),
            "sprint_updated" => Some(Self::SprintUpdated),
            "sprint_deleted" => Some(Self::SprintDeleted),
            "sprint_started" => Some(Self::SprintStarted),
            "sprint_closed" => Some(Self::SprintClosed),
            "jira:version_created" => Some(Self::VersionCreated),
            "jira:version_updated" => Some(Self::VersionUpdated),
            "jira:version_deleted" => Some(Self::VersionDeleted),
            "jira:version_released" => Some(Self::VersionReleased),
            "jira:version_unreleased" => Some(Self::VersionUnreleased),
            _ => None,
        }
    }
}

impl fmt::Display for WebhookEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_strings_round_trip() {
        for event in [
            WebhookEventType::IssueCreated,
            WebhookEventType::CommentCreated,
            WebhookEventType::SprintClosed,
            WebhookEventType::VersionReleased,
        ] {
            assert_eq!(WebhookEventType::parse(event.as_str()), Some(event));
        }
        assert_eq!(WebhookEventType::parse("made_up_event"), None);
    }
}
