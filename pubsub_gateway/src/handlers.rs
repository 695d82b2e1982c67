//! One handler per endpoint. Each delegates to [`Backend`] and redirects to a status page.

use std::sync::Arc;

use axum::{extract::State, response::Redirect, Json};
use pubsub_gateway_backend::{
    model::{SubscriptionName, TopicName},
    outcome::PublishSummary,
    Backend,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::AppError,
    params::Params,
    status::{self, StatusPage},
};

type AppState = State<Arc<Backend>>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTopicParams {
    topic_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriptionParams {
    topic_name: String,
    subscription_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageParams {
    topic_name: String,
    message: String,
    count: u32,
}

#[derive(Debug, Deserialize)]
pub struct PullParams {
    subscription1: String,
}

#[derive(Debug, Deserialize)]
pub struct MultipullParams {
    subscription1: String,
    subscription2: String,
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionParams {
    subscription: String,
}

#[derive(Debug, Deserialize)]
pub struct TopicParams {
    topic: String,
}

pub async fn create_topic(
    State(backend): AppState,
    Params(params): Params<CreateTopicParams>,
) -> Result<Redirect, AppError> {
    backend
        .create_topic(&TopicName(params.topic_name))
        .await
        .map_err(AppError::admin("Topic creation"))?;

    Ok(StatusPage::Admin.redirect("Topic creation successful."))
}

pub async fn create_subscription(
    State(backend): AppState,
    Params(params): Params<CreateSubscriptionParams>,
) -> Result<Redirect, AppError> {
    backend
        .create_subscription(
            &TopicName(params.topic_name),
            &SubscriptionName(params.subscription_name),
        )
        .await
        .map_err(AppError::admin("Subscription creation"))?;

    Ok(StatusPage::Admin.redirect("Subscription creation successful."))
}

pub async fn post_message(
    State(backend): AppState,
    Params(params): Params<PostMessageParams>,
) -> Redirect {
    let topic_name = TopicName(params.topic_name);
    let results = backend
        .publish_batch(&topic_name, &params.message, params.count)
        .await;

    let summary = PublishSummary::from_results(&results);
    if let Some(err) = &summary.first_error {
        log::warn!(
            "{} of {} message(s) to {} failed to publish, first error: {}",
            summary.failed(),
            summary.requested,
            topic_name,
            err
        );
    }

    StatusPage::PushPull.redirect(&status::publish_status(&summary))
}

pub async fn pull(
    State(backend): AppState,
    Params(params): Params<PullParams>,
) -> Result<Redirect, AppError> {
    let outcome = backend
        .pull(&SubscriptionName(params.subscription1))
        .await
        .map_err(AppError::push_pull("Pull"))?;

    Ok(StatusPage::PushPull.redirect(&status::pull_status(outcome)))
}

pub async fn multipull(
    State(backend): AppState,
    Params(params): Params<MultipullParams>,
) -> Result<Redirect, AppError> {
    let outcome = backend
        .multipull(
            &SubscriptionName(params.subscription1),
            &SubscriptionName(params.subscription2),
        )
        .await
        .map_err(AppError::push_pull("Pull"))?;

    Ok(StatusPage::PushPull.redirect(&status::pull_status(outcome)))
}

pub async fn subscribe(
    State(backend): AppState,
    Params(params): Params<SubscriptionParams>,
) -> Result<Redirect, AppError> {
    let outcome = backend
        .subscribe(&SubscriptionName(params.subscription))
        .await
        .map_err(AppError::push_pull("Subscribe"))?;

    Ok(StatusPage::PushPull.redirect(status::subscribe_status(outcome)))
}

pub async fn unsubscribe(
    State(backend): AppState,
    Params(params): Params<SubscriptionParams>,
) -> Redirect {
    let outcome = backend
        .unsubscribe(&SubscriptionName(params.subscription))
        .await;

    StatusPage::PushPull.redirect(status::unsubscribe_status(outcome))
}

pub async fn delete_topic(
    State(backend): AppState,
    Params(params): Params<TopicParams>,
) -> Result<Redirect, AppError> {
    backend
        .delete_topic(&TopicName(params.topic))
        .await
        .map_err(AppError::admin("Topic deletion"))?;

    Ok(StatusPage::Admin.redirect("Topic deleted successfully."))
}

pub async fn delete_subscription(
    State(backend): AppState,
    Params(params): Params<SubscriptionParams>,
) -> Result<Redirect, AppError> {
    backend
        .delete_subscription(&SubscriptionName(params.subscription))
        .await
        .map_err(AppError::admin("Subscription deletion"))?;

    Ok(StatusPage::Admin.redirect("Subscription deleted successfully."))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Debug, Serialize)]
pub struct SubscriptionsResponse {
    pub subscriptions: Vec<SubscriptionName>,
}

/// Subscriptions with an active push subscriber in this process.
pub async fn subscriptions(State(backend): AppState) -> Json<SubscriptionsResponse> {
    Json(SubscriptionsResponse {
        subscriptions: backend.subscriptions(),
    })
}
