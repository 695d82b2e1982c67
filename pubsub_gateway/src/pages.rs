use axum::response::{Html, Redirect};

use crate::status::StatusPage;

const ADMIN_INDEX: &str = include_str!("../static/admin-index.html");
const PUSH_PULL_MESSAGES: &str = include_str!("../static/push-pull-messages.html");

pub async fn index() -> Redirect {
    Redirect::to(StatusPage::PushPull.path())
}

// The pages read `statusMessage` from the query string themselves.
pub async fn admin_index() -> Html<&'static str> {
    Html(ADMIN_INDEX)
}

pub async fn push_pull_messages() -> Html<&'static str> {
    Html(PUSH_PULL_MESSAGES)
}
