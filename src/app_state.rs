use crate::{context::BillingContext, notification_worker::NotificationQueue};
use axum::extract::FromRef;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub billing: Arc<BillingContext>,
    pub notifications: NotificationQueue,
}

impl FromRef<AppState> for Arc<BillingContext> {
    fn from_ref(state: &AppState) -> Self {
        state.billing.clone()
    }
}
