use crate::error::{Error, Result};
use crate::settings::settings;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeError,
}

#[derive(Debug, Deserialize)]
struct StripeError {
    message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    pub id: String,
}

/// Form fields for `POST /v1/customers`. The payment method becomes the default for invoices.
pub fn customer_form(
    email: &str,
    name: Option<&str>,
    payment_method: &str,
) -> Vec<(&'static str, String)> {
    let mut form = vec![
        ("email", email.to_string()),
        ("payment_method", payment_method.to_string()),
        (
            "invoice_settings[default_payment_method]",
            payment_method.to_string(),
        ),
        ("metadata[source]", "pledge".to_string()),
    ];
    if let Some(name) = name {
        form.push(("name", name.to_string()));
    }
    form
}

pub struct StripeClient {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl StripeClient {
    pub fn new(base_url: &str, secret_key: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
        })
    }

    pub fn from_env() -> Result<Self> {
        let key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| Error::MissingEnv("STRIPE_SECRET_KEY"))?;
        Self::new(&settings().pledge.stripe_base_url, &key)
    }

    pub async fn create_customer(
        &self,
        email: &str,
        name: Option<&str>,
        payment_method: &str,
    ) -> Result<Customer> {
        let response = self
            .http
            .post(format!("{}/customers", self.base_url))
            .basic_auth(&self.secret_key, Some(""))
            .form(&customer_form(email, name, payment_method))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        read_customer(status, &body)
    }
}

/// Any failure here is Stripe's, never the caller's, so it surfaces as `Error::Payment`.
fn read_customer(status: reqwest::StatusCode, body: &str) -> Result<Customer> {
    if !status.is_success() {
        let message = serde_json::from_str::<StripeErrorBody>(body)
            .ok()
            .and_then(|b| b.error.message)
            .unwrap_or_else(|| format!("Stripe returned {status}"));
        return Err(Error::Payment(message));
    }

    serde_json::from_str(body)
        .map_err(|e| Error::Payment(format!("unreadable Stripe customer response: {e}")))
}
