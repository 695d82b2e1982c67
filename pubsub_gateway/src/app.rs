use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use pubsub_gateway_backend::Backend;

use crate::{handlers, pages, status::StatusPage};

pub fn router(backend: Arc<Backend>) -> Router {
    Router::new()
        .route("/", get(pages::index))
        .route(StatusPage::Admin.path(), get(pages::admin_index))
        .route(StatusPage::PushPull.path(), get(pages::push_pull_messages))
        .route("/createTopic", post(handlers::create_topic))
        .route("/createSubscription", post(handlers::create_subscription))
        .route("/postMessage", get(handlers::post_message))
        .route("/pull", get(handlers::pull))
        .route("/multipull", get(handlers::multipull))
        .route("/subscribe", get(handlers::subscribe))
        .route("/unsubscribe", get(handlers::unsubscribe))
        .route("/deleteTopic", post(handlers::delete_topic))
        .route("/deleteSubscription", post(handlers::delete_subscription))
        .route("/health", get(handlers::health))
        .route("/subscriptions", get(handlers::subscriptions))
        .with_state(backend)
}
