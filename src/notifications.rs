use crate::{
    domain::{DesiredStatus, EmailAddress, SubscriptionName},
    email_client::EmailClient,
};
use time::OffsetDateTime;

/// A rendered transactional email. `template` names the layout the provider
/// groups deliveries under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub subject: String,
    pub text: String,
    pub html: String,
    pub template: &'static str,
}

impl EmailMessage {
    fn new(subject: &str, text: String, template: &'static str, fields: &[(&str, String)]) -> Self {
        let mut html = format!("<p>{}</p>", escape_html(&text));
        for (label, value) in fields {
            html.push_str(&format!(
                "<p><strong>{}:</strong> {}</p>",
                escape_html(label),
                escape_html(value)
            ));
        }

        Self {
            subject: subject.to_string(),
            text,
            html,
            template,
        }
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Minor currency units as dollars, e.g. `1050` -> `$10.50`.
pub fn format_amount(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let amount = amount.unsigned_abs();
    format!("{sign}${}.{:02}", amount / 100, amount % 100)
}

/// Self-service page where an owner can update their payment details.
pub fn manage_link(frontend_url: &str, email: &EmailAddress) -> String {
    reqwest::Url::parse_with_params(
        &format!("{}/manage", frontend_url.trim_end_matches('/')),
        &[("email", email.as_ref())],
    )
    .map(String::from)
    .unwrap_or_else(|_| format!("{frontend_url}/manage?email={email}"))
}

/// Message for the owner after a toggle. Cancellation sends nothing.
pub fn status_changed(
    status: DesiredStatus,
    subscription: &SubscriptionName,
    manage_link: &str,
) -> Option<EmailMessage> {
    match status {
        DesiredStatus::Pause => Some(EmailMessage::new(
            "Subscription Paused",
            format!("Your subscription ({subscription}) has been paused"),
            "subscriptionPaused",
            &[("Subscription", subscription.to_string())],
        )),
        DesiredStatus::Suspend => Some(EmailMessage::new(
            "Subscription Suspended",
            format!("Your subscription ({subscription}) has been suspended"),
            "subscriptionSuspended",
            &[
                ("Subscription", subscription.to_string()),
                ("Manage your subscription", manage_link.to_string()),
            ],
        )),
        DesiredStatus::Active => Some(EmailMessage::new(
            "Subscription Resumed",
            format!("Your subscription ({subscription}) has been resumed"),
            "main",
            &[],
        )),
        DesiredStatus::Cancel => None,
    }
}

pub fn orphaned_toggle(subscription: &SubscriptionName) -> EmailMessage {
    EmailMessage::new(
        "Subscription Toggle Error",
        format!("Subscription {subscription} was toggled, but no user email was found"),
        "main",
        &[],
    )
}

pub fn subscription_created(
    subscription: &SubscriptionName,
    amount: i64,
    charged_at: OffsetDateTime,
) -> EmailMessage {
    EmailMessage::new(
        "Subscription Created",
        format!("You have been subscribed to {subscription}"),
        "subscriptionCreated",
        &[
            ("Subscription", subscription.to_string()),
            ("Amount", format_amount(amount)),
            ("Date", charged_at.date().to_string()),
        ],
    )
}

pub fn subscription_renewed(
    subscription: &SubscriptionName,
    amount: i64,
    renewal_date: OffsetDateTime,
) -> EmailMessage {
    EmailMessage::new(
        "Subscription Renewal",
        format!("Subscription {subscription} was renewed"),
        "subscriptionRenewal",
        &[
            ("Subscription", subscription.to_string()),
            ("Amount", format_amount(amount)),
            ("Next renewal", renewal_date.date().to_string()),
        ],
    )
}

pub fn renewal_failed(
    subscription: &SubscriptionName,
    failed_at: OffsetDateTime,
    manage_link: &str,
) -> EmailMessage {
    EmailMessage::new(
        "Subscription Renewal Failed",
        format!("Subscription {subscription} failed to renew"),
        "subscriptionRenewalFailed",
        &[
            ("Subscription", subscription.to_string()),
            ("Date", failed_at.date().to_string()),
            ("Manage your subscription", manage_link.to_string()),
        ],
    )
}

pub fn cancellation_requested(
    subscription: &SubscriptionName,
    owner_name: Option<&str>,
    owner_email: Option<&EmailAddress>,
) -> EmailMessage {
    EmailMessage::new(
        "Subscription Set to Cancel",
        format!("Subscription {subscription} is set to cancel at its next renewal"),
        "subscriptionCancelled",
        &[
            ("Name", owner_name.unwrap_or("unknown").to_string()),
            (
                "Email",
                owner_email.map_or_else(|| "unknown".to_string(), ToString::to_string),
            ),
        ],
    )
}

/// Sends transactional email without ever failing the caller.
#[derive(Clone)]
pub struct Notifier {
    email_client: EmailClient,
    enabled: bool,
}

impl Notifier {
    pub fn new(email_client: EmailClient, enabled: bool) -> Self {
        Self {
            email_client,
            enabled,
        }
    }

    /// Returns whether the provider accepted the message.
    #[tracing::instrument(
        name = "Send notification",
        skip(self, message),
        fields(subject = %message.subject)
    )]
    pub async fn send(&self, recipient: &EmailAddress, message: &EmailMessage) -> bool {
        if !self.enabled {
            tracing::info!("Emails are disabled, skipping delivery");
            return false;
        }

        match self
            .email_client
            .send_email(
                recipient,
                &message.subject,
                &message.html,
                &message.text,
                message.template,
            )
            .await
        {
            Ok(()) => {
                tracing::info!("Email sent");
                true
            }
            Err(e) => {
                tracing::error!(
                    error.cause_chain = ?e,
                    error.message = %e,
                    "Failed to send email"
                );
                false
            }
        }
    }
}
