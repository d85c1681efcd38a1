use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde_json::json;
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use subscription_billing::{
    authentication::API_TOKEN_HEADER,
    configuration::get_configuration,
    context::BillingContext,
    domain::{
        BillingDuration, NewSubscription, NewTransaction, Subscription, SubscriptionLink,
        SubscriptionName, SubscriptionStatus, SubscriptionUpdate, UsageSubscription,
    },
    startup::Application,
    store::SubscriptionStore,
    telemetry::{get_subscriber, init_subscriber},
};
use time::OffsetDateTime;
use uuid::Uuid;
use wiremock::{
    matchers::{header, method, path, path_regex},
    Mock, MockServer, ResponseTemplate,
};

static TRACING: Lazy<()> = Lazy::new(|| {
    let name = "test";
    let default_env_filter = "info";
    if std::env::var("TEST_LOG").is_ok() {
        let subscriber = get_subscriber(name.into(), default_env_filter.into(), std::io::stdout);
        init_subscriber(subscriber).expect("Failed to init subscriber");
    } else {
        let subscriber = get_subscriber(name.into(), default_env_filter.into(), std::io::sink);
        init_subscriber(subscriber).expect("Failed to init subscriber");
    }
});

static FAILED_TO_EXECUTE_REQUEST: &str = "Failed to execute request";

pub const OWNER_ID: i64 = 7;
pub const OWNER_EMAIL: &str = "owner@example.com";
pub const OWNER_TOKEN: &str = "owner-token";
pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const OPERATIONS_EMAIL: &str = "operations@example.com";

pub struct TestApp {
    pub address: SocketAddr,
    pub store: Arc<InMemoryStore>,
    pub billing: BillingContext,
    pub email_server: MockServer,
    pub payment_server: MockServer,
    pub directory_server: MockServer,
    pub usage_server: MockServer,
    client: Client,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Lazy::force(&TRACING);

        let email_server = MockServer::start().await;
        let payment_server = MockServer::start().await;
        let directory_server = MockServer::start().await;
        let usage_server = MockServer::start().await;

        let mut config = get_configuration().expect("Failed to read configuration");
        config.application.port = 0;
        config.email_client.base_url = email_server.uri();
        config.email_client.enabled = true;
        config.payments.base_url = payment_server.uri();
        config.directory.base_url = directory_server.uri();
        config.usage_api.base_url = usage_server.uri();

        let store = Arc::new(InMemoryStore::default());
        let billing =
            BillingContext::build(&config, store.clone()).expect("Failed to build billing context");

        let app = Application::build_with_store(config, store.clone())
            .await
            .expect("Failed to build application");
        let address = app.local_addr();

        tokio::spawn(app.run_until_stopped());

        Self {
            address,
            store,
            billing,
            email_server,
            payment_server,
            directory_server,
            usage_server,
            client: Client::new(),
        }
    }

    pub async fn get_health_check(&self) -> Response {
        self.client
            .get(self.url("/health_check"))
            .send()
            .await
            .expect(FAILED_TO_EXECUTE_REQUEST)
    }

    /// Sends a request with `token` in the API token header, when given.
    pub fn request(&self, method: Method, endpoint: &str, token: Option<&str>) -> RequestBuilder {
        let request = self.client.request(method, self.url(endpoint));
        match token {
            Some(token) => request.header(API_TOKEN_HEADER, token),
            None => request,
        }
    }

    pub async fn post_lifecycle(
        &self,
        action: &str,
        subscription_id: Uuid,
        token: &str,
    ) -> serde_json::Value {
        let response = self
            .request(
                Method::POST,
                &format!("/subscriptions/{action}/{subscription_id}"),
                Some(token),
            )
            .send()
            .await
            .expect(FAILED_TO_EXECUTE_REQUEST);

        envelope(response).await
    }

    fn url(&self, endpoint: &str) -> String {
        format!("http://{}{endpoint}", self.address)
    }

    /// Makes `token` resolve to `user_id` holding `capabilities`.
    pub async fn mock_caller(&self, token: &str, user_id: i64, capabilities: &[&str]) {
        Mock::given(method("GET"))
            .and(path("/users/me"))
            .and(header(API_TOKEN_HEADER, token))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": "success",
                "data": { "user_id": user_id, "active": 1, "capabilities": capabilities }
            })))
            .mount(&self.directory_server)
            .await;
    }

    pub async fn mock_user(&self, user_id: i64, email: Option<&str>) {
        Mock::given(method("GET"))
            .and(path(format!("/users/{user_id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": "success",
                "data": {
                    "user_id": user_id,
                    "name": "Jane Owner",
                    "email": email,
                    "active": 1,
                    "api_token": OWNER_TOKEN
                }
            })))
            .mount(&self.directory_server)
            .await;
    }

    pub async fn mock_activation_succeeds(&self) {
        Mock::given(method("PUT"))
            .and(path_regex(r"^/users/\d+$"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "success": "success", "data": {} })),
            )
            .mount(&self.directory_server)
            .await;
    }

    pub async fn mock_payment(&self, status: &str) {
        Mock::given(method("POST"))
            .and(path("/payments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "payment": { "id": "pay_123", "status": status }
            })))
            .mount(&self.payment_server)
            .await;
    }

    pub async fn mock_emails_accepted(&self) {
        Mock::given(path("/email"))
            .and(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&self.email_server)
            .await;
    }

    pub async fn sent_emails(&self) -> Vec<serde_json::Value> {
        self.email_server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|request| request.body_json().expect("Email body is not JSON"))
            .collect()
    }

    pub async fn directory_requests(&self) -> usize {
        self.directory_server
            .received_requests()
            .await
            .map_or(0, |requests| requests.len())
    }
}

pub async fn envelope(response: Response) -> serde_json::Value {
    assert_eq!(response.status().as_u16(), 200);
    response.json().await.expect("Response is not JSON")
}

/// An active individual subscription for [`OWNER_ID`] worth 1000 every 30
/// days, due now.
pub fn subscription() -> Subscription {
    let now = OffsetDateTime::now_utc();
    Subscription {
        subscription_id: Uuid::new_v4(),
        user_id: OWNER_ID,
        product_id: None,
        subscription_name: SubscriptionName::parse("Premium".into()).unwrap(),
        amount: 1000,
        duration: BillingDuration::Days(30),
        status: SubscriptionStatus::Active,
        cancel_on_renewal: false,
        renewal_date: now,
        next_renewal_attempt: None,
        suspension_date: None,
        link: SubscriptionLink::Individual,
        created_at: now,
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    subscriptions: Mutex<Vec<Subscription>>,
    transactions: Mutex<Vec<NewTransaction>>,
    usage_subscriptions: Mutex<Vec<UsageSubscription>>,
    writes: AtomicUsize,
}

impl InMemoryStore {
    pub fn insert(&self, subscription: Subscription) {
        self.subscriptions.lock().unwrap().push(subscription);
    }

    pub fn insert_usage_subscription(&self, usage_subscription: UsageSubscription) {
        self.usage_subscriptions
            .lock()
            .unwrap()
            .push(usage_subscription);
    }

    pub fn get(&self, subscription_id: Uuid) -> Subscription {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.subscription_id == subscription_id)
            .cloned()
            .expect("Subscription is missing from the store")
    }

    pub fn transactions(&self) -> Vec<NewTransaction> {
        self.transactions.lock().unwrap().clone()
    }

    /// Number of subscription writes, excluding audit records.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    fn modify(
        &self,
        subscription_id: Uuid,
        change: impl FnOnce(&mut Subscription),
    ) -> Result<(), anyhow::Error> {
        self.touch();
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let stored = subscriptions
            .iter_mut()
            .find(|s| s.subscription_id == subscription_id)
            .ok_or_else(|| anyhow::anyhow!("No such subscription"))?;
        change(stored);
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryStore {
    async fn find(&self, subscription_id: Uuid) -> Result<Option<Subscription>, anyhow::Error> {
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.subscription_id == subscription_id)
            .cloned())
    }

    async fn find_by_user(&self, user_id: i64) -> Result<Option<Subscription>, anyhow::Error> {
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.user_id == user_id)
            .cloned())
    }

    async fn list(
        &self,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<Subscription>, i64), anyhow::Error> {
        let mut subscriptions = self.subscriptions.lock().unwrap().clone();
        subscriptions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = subscriptions.len() as i64;
        let page = subscriptions
            .into_iter()
            .skip(((page - 1) * limit) as usize)
            .take(limit as usize)
            .collect();

        Ok((page, total))
    }

    async fn upsert_by_user(
        &self,
        new: NewSubscription,
    ) -> Result<Subscription, anyhow::Error> {
        self.touch();
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let existing = subscriptions.iter_mut().find(|s| s.user_id == new.user_id);

        let subscription = match existing {
            Some(existing) => {
                existing.product_id = new.product_id;
                existing.subscription_name = new.subscription_name;
                existing.amount = new.amount;
                existing.duration = new.duration;
                existing.renewal_date = new.renewal_date;
                existing.status = SubscriptionStatus::Active;
                existing.cancel_on_renewal = false;
                existing.next_renewal_attempt = None;
                existing.suspension_date = None;
                existing.clone()
            }
            None => {
                let subscription = Subscription {
                    subscription_id: Uuid::new_v4(),
                    user_id: new.user_id,
                    product_id: new.product_id,
                    subscription_name: new.subscription_name,
                    amount: new.amount,
                    duration: new.duration,
                    status: SubscriptionStatus::Active,
                    cancel_on_renewal: false,
                    renewal_date: new.renewal_date,
                    next_renewal_attempt: None,
                    suspension_date: None,
                    link: SubscriptionLink::Individual,
                    created_at: OffsetDateTime::now_utc(),
                };
                subscriptions.push(subscription.clone());
                subscription
            }
        };

        Ok(subscription)
    }

    async fn update_by_user(
        &self,
        user_id: i64,
        update: &SubscriptionUpdate,
    ) -> Result<u64, anyhow::Error> {
        self.touch();
        let mut touched = 0;
        for subscription in self
            .subscriptions
            .lock()
            .unwrap()
            .iter_mut()
            .filter(|s| s.user_id == user_id)
        {
            if let Some(name) = &update.subscription_name {
                subscription.subscription_name = name.clone();
            }
            if let Some(amount) = update.amount {
                subscription.amount = amount;
            }
            if let Some(duration) = update.duration {
                subscription.duration = duration;
            }
            if let Some(status) = update.status {
                subscription.status = status;
            }
            touched += 1;
        }

        Ok(touched)
    }

    async fn deactivate_by_user(&self, user_id: i64) -> Result<u64, anyhow::Error> {
        self.update_by_user(
            user_id,
            &SubscriptionUpdate {
                status: Some(SubscriptionStatus::Inactive),
                ..Default::default()
            },
        )
        .await
    }

    async fn set_renewal(
        &self,
        subscription_id: Uuid,
        renewal_date: OffsetDateTime,
        next_renewal_attempt: OffsetDateTime,
    ) -> Result<(), anyhow::Error> {
        self.modify(subscription_id, |s| {
            s.renewal_date = renewal_date;
            s.next_renewal_attempt = Some(next_renewal_attempt);
        })
    }

    async fn set_next_attempt(
        &self,
        subscription_id: Uuid,
        next_renewal_attempt: OffsetDateTime,
    ) -> Result<(), anyhow::Error> {
        self.modify(subscription_id, |s| {
            s.next_renewal_attempt = Some(next_renewal_attempt)
        })
    }

    async fn set_status(
        &self,
        subscription_id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<(), anyhow::Error> {
        let current = self
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.subscription_id == subscription_id)
            .map(|s| s.status);
        if current.is_some_and(|current| current.is_terminal() && !status.is_terminal()) {
            return Err(anyhow::anyhow!("Subscription is inactive"));
        }
        self.modify(subscription_id, |s| s.status = status)
    }

    async fn set_suspension(
        &self,
        subscription_id: Uuid,
        suspended_at: OffsetDateTime,
    ) -> Result<(), anyhow::Error> {
        self.modify(subscription_id, |s| s.suspension_date = Some(suspended_at))
    }

    async fn end_suspension(
        &self,
        subscription_id: Uuid,
        renewal_date: OffsetDateTime,
    ) -> Result<(), anyhow::Error> {
        self.modify(subscription_id, |s| {
            s.renewal_date = renewal_date;
            s.suspension_date = None;
        })
    }

    async fn set_cancel_on_renewal(
        &self,
        subscription_id: Uuid,
        cancel_on_renewal: bool,
    ) -> Result<(), anyhow::Error> {
        self.modify(subscription_id, |s| s.cancel_on_renewal = cancel_on_renewal)
    }

    async fn due_for_renewal(
        &self,
        now: OffsetDateTime,
    ) -> Result<Vec<Subscription>, anyhow::Error> {
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.status.is_billable() && s.due_at() <= now)
            .cloned()
            .collect())
    }

    async fn find_usage_subscription(
        &self,
        user_id: i64,
    ) -> Result<Option<UsageSubscription>, anyhow::Error> {
        Ok(self
            .usage_subscriptions
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.user_id == user_id)
            .cloned())
    }

    async fn record_transaction(&self, transaction: NewTransaction) -> Result<(), anyhow::Error> {
        self.transactions.lock().unwrap().push(transaction);
        Ok(())
    }
}
