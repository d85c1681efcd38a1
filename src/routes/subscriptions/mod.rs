use crate::app_state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use lifecycle::{cancel_subscription, pause_subscription, resume_subscription, uncancel_subscription};
use manage::{create_subscription, deactivate_subscription, update_subscription};
use query::{list_subscriptions, own_subscription};
use usage::usage_subscription;

mod lifecycle;
mod manage;
mod query;
mod usage;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/subscriptions",
            get(list_subscriptions)
                .post(create_subscription)
                .put(update_subscription)
                .delete(deactivate_subscription),
        )
        .route("/subscriptions/single", get(own_subscription))
        .route("/subscriptions/pause/:subscription_id", post(pause_subscription))
        .route("/subscriptions/resume/:subscription_id", post(resume_subscription))
        .route("/subscriptions/cancel/:subscription_id", post(cancel_subscription))
        .route("/subscriptions/uncancel/:subscription_id", post(uncancel_subscription))
        .route("/subscriptions/usage/:user_id", get(usage_subscription))
}
