use std::sync::Arc;

use tracing::warn;

use crate::models::{Comment, Id, NewComment};
use crate::notify::{Notification, Notifier};
use crate::repo::{Repo, RepoError, RepoResult};

#[derive(Debug, Clone, PartialEq)]
pub enum PostOutcome {
    Posted(Comment),
    /// Blank after trimming; nothing sent.
    Empty,
    SignInRequired,
    Failed(RepoError),
}

/// Top-level comments of one video, newest first, with local prepend on post.
pub struct CommentThread {
    video: Id,
    viewer: Option<Id>,
    repo: Arc<dyn Repo>,
    notifier: Arc<dyn Notifier>,
    comments: Vec<Comment>,
}

impl CommentThread {
    pub fn new(video: Id, viewer: Option<Id>, repo: Arc<dyn Repo>, notifier: Arc<dyn Notifier>) -> Self {
        Self { video, viewer, repo, notifier, comments: Vec::new() }
    }

    pub async fn load(&mut self) -> RepoResult<&[Comment]> {
        match self.repo.top_level_comments(self.video).await {
            Ok(list) => {
                self.comments = list;
                Ok(&self.comments)
            }
            Err(e) => {
                warn!(video = %self.video, error = %e, "loading comments failed");
                Err(e)
            }
        }
    }

    pub async fn post(&mut self, content: &str) -> PostOutcome {
        let Some(viewer) = self.viewer else {
            self.notifier.notify(Notification::sign_in_required("comment"));
            return PostOutcome::SignInRequired;
        };
        let content = content.trim();
        if content.is_empty() {
            return PostOutcome::Empty;
        }
        let new = NewComment { video_id: self.video, user_id: viewer, content: content.to_string(), parent_id: None };
        match self.repo.insert_comment(new).await {
            Ok(comment) => {
                self.comments.insert(0, comment.clone());
                self.notifier.notify(Notification::info("Comment posted", "Your comment has been added successfully."));
                PostOutcome::Posted(comment)
            }
            Err(e) => {
                warn!(video = %self.video, error = %e, "posting comment failed");
                self.notifier.notify(Notification::error("Error", "Failed to post comment. Please try again."));
                PostOutcome::Failed(e)
            }
        }
    }

    pub fn comments(&self) -> &[Comment] {
        &self.comments
    }

    pub fn into_comments(self) -> Vec<Comment> {
        self.comments
    }
}
