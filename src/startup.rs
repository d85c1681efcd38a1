use crate::{
    app_state::AppState,
    configuration::{DatabaseSettings, Settings},
    context::BillingContext,
    notification_worker::{self, NotificationQueue},
    routes::{health_check, subscriptions},
    store::{PgSubscriptionStore, SubscriptionStore},
    telemetry::{request_span, RequestUuid, REQUEST_ID_HEADER},
};
use axum::Router;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

pub struct Application {
    listener: TcpListener,
    router: Router,
    address: SocketAddr,
}

impl Application {
    pub async fn build(config: Settings) -> Result<Self, anyhow::Error> {
        let store = PgSubscriptionStore::new(get_connection_pool(&config.database));
        Self::build_with_store(config, Arc::new(store)).await
    }

    /// Wires the API around any [`SubscriptionStore`] and starts the
    /// notification worker that serves it.
    pub async fn build_with_store(
        config: Settings,
        store: Arc<dyn SubscriptionStore>,
    ) -> Result<Self, anyhow::Error> {
        let billing = Arc::new(BillingContext::build(&config, store)?);

        let (notifications, receiver) = NotificationQueue::channel();
        tokio::spawn(notification_worker::run_worker_until_stopped(
            receiver,
            billing.clone(),
        ));

        let listener = TcpListener::bind(format!(
            "{}:{}",
            config.application.host, config.application.port
        ))
        .await?;
        let address = listener.local_addr()?;

        let router = Router::new()
            .merge(health_check::router())
            .merge(subscriptions::router())
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::new(REQUEST_ID_HEADER, RequestUuid))
                    .layer(TraceLayer::new_for_http().make_span_with(request_span))
                    .layer(PropagateRequestIdLayer::new(REQUEST_ID_HEADER)),
            )
            .with_state(AppState {
                billing,
                notifications,
            });

        Ok(Self {
            listener,
            router,
            address,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.address.port()
    }

    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        tracing::info!("Listening on {}", self.address);
        axum::serve(self.listener, self.router).await
    }
}

pub fn get_connection_pool(config: &DatabaseSettings) -> PgPool {
    PgPoolOptions::new().connect_lazy_with(config.with_db())
}
