//! Status messages and the redirects that carry them to the static pages.

use axum::response::Redirect;
use pubsub_gateway_backend::outcome::{
    PublishSummary, PullOutcome, SubscribeOutcome, UnsubscribeOutcome,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusPage {
    /// Topic and subscription administration.
    Admin,
    /// Publishing, pulling and subscribing.
    PushPull,
}

impl StatusPage {
    pub const fn path(self) -> &'static str {
        match self {
            StatusPage::Admin => "/admin-index.html",
            StatusPage::PushPull => "/push-pull-messages.html",
        }
    }

    pub fn location(self, status_message: &str) -> String {
        format!(
            "{}?statusMessage={}",
            self.path(),
            urlencoding::encode(status_message)
        )
    }

    pub fn redirect(self, status_message: &str) -> Redirect {
        Redirect::to(&self.location(status_message))
    }
}

pub fn publish_status(summary: &PublishSummary) -> String {
    if summary.failed() == 0 {
        format!("Published {} message(s).", summary.published)
    } else {
        format!(
            "Published {} of {} message(s); {} failed.",
            summary.published,
            summary.requested,
            summary.failed()
        )
    }
}

pub fn pull_status(outcome: PullOutcome) -> String {
    match outcome {
        PullOutcome::Empty => "No messages available for retrieval.".to_string(),
        PullOutcome::Acked(count) => format!("Pulled and acked {count} message(s)"),
        PullOutcome::AckFailed => "Acking failed".to_string(),
    }
}

pub fn subscribe_status(outcome: SubscribeOutcome) -> &'static str {
    match outcome {
        SubscribeOutcome::Subscribed => "Subscribed.",
        SubscribeOutcome::AlreadySubscribed => "Already subscribed.",
    }
}

pub fn unsubscribe_status(outcome: UnsubscribeOutcome) -> &'static str {
    match outcome {
        UnsubscribeOutcome::Unsubscribed => "Unsubscribed.",
        UnsubscribeOutcome::NotSubscribed => "Not subscribed.",
    }
}
