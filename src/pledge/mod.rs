mod stripe;

pub use stripe::{customer_form, Customer, StripeClient};

use crate::db::{self, NewPledge, Pledge};
use crate::error::{Error, Result};
use crate::settings::{self, settings};
use chrono::Utc;
use diesel::sqlite::SqliteConnection;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePledgeRequest {
    pub payment_method_id: String,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub amount_per_post_cents: i64,
    #[serde(default)]
    pub monthly_cap_cents: Option<i64>,
    #[serde(default)]
    pub is_public: bool,
}

impl CreatePledgeRequest {
    pub fn validate(&self, limits: &settings::Pledge) -> Result<()> {
        if self.payment_method_id.trim().is_empty() {
            return Err(Error::Validation("missing payment method".into()));
        }
        if !EMAIL_PATTERN.is_match(self.email.trim()) {
            return Err(Error::Validation(format!("invalid email '{}'", self.email)));
        }
        if self.amount_per_post_cents < limits.min_amount_cents
            || self.amount_per_post_cents > limits.max_amount_cents
        {
            return Err(Error::Validation(format!(
                "amount per post must be between {} and {} cents",
                limits.min_amount_cents, limits.max_amount_cents
            )));
        }
        if let Some(cap) = self.monthly_cap_cents {
            if cap < self.amount_per_post_cents {
                return Err(Error::Validation(
                    "monthly cap is lower than the amount per post".into(),
                ));
            }
        }
        Ok(())
    }

    fn display_name(&self) -> Option<String> {
        self.display_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
    }

    pub fn to_row(&self, customer_id: &str, currency: &str, created_at: i64) -> NewPledge {
        NewPledge {
            display_name: self.display_name(),
            email: self.email.trim().to_string(),
            is_public: self.is_public,
            amount_per_post_cents: self.amount_per_post_cents,
            monthly_cap_cents: self.monthly_cap_cents,
            currency: currency.to_string(),
            stripe_customer_id: customer_id.to_string(),
            stripe_payment_method_id: self.payment_method_id.trim().to_string(),
            status: "active".to_string(),
            created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedPledge {
    pub id: i32,
    pub amount_per_post_cents: i64,
    pub currency: String,
}

impl From<Pledge> for CreatedPledge {
    fn from(p: Pledge) -> Self {
        Self {
            id: p.id,
            amount_per_post_cents: p.amount_per_post_cents,
            currency: p.currency,
        }
    }
}

/// Validates, registers the card with Stripe, then stores the pledge.
pub async fn create_pledge(
    pool: &db::DbPool,
    stripe: &StripeClient,
    request: CreatePledgeRequest,
) -> Result<CreatedPledge> {
    let limits = &settings().pledge;
    request.validate(limits)?;

    let customer = stripe
        .create_customer(
            request.email.trim(),
            request.display_name().as_deref(),
            request.payment_method_id.trim(),
        )
        .await?;

    let row = request.to_row(&customer.id, &limits.currency, Utc::now().timestamp());
    let pool = pool.clone();
    let stored = tokio::task::spawn_blocking(move || -> Result<Pledge> {
        let mut conn = pool.get()?;
        Ok(db::insert_pledge(&mut conn, &row)?)
    })
    .await
    .map_err(Error::from)
    .and_then(|inserted| inserted);

    let pledge = match stored {
        Ok(pledge) => pledge,
        Err(e) => {
            tracing::error!(customer = %customer.id, "stripe customer created but pledge not stored: {e}");
            return Err(e);
        }
    };

    tracing::info!(pledge = pledge.id, "pledge created");
    Ok(pledge.into())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PledgeStats {
    pub pledger_count: i64,
    pub total_per_post_cents: i64,
    pub flagged_post_count: i64,
    pub projected_total_cents: i64,
}

pub fn pledge_stats(conn: &mut SqliteConnection) -> Result<PledgeStats> {
    let amounts = db::active_pledge_amounts(conn)?;
    let flagged = db::count_flagged_posts(conn)?;
    let total: i64 = amounts.iter().sum();

    Ok(PledgeStats {
        pledger_count: amounts.len() as i64,
        total_per_post_cents: total,
        flagged_post_count: flagged,
        projected_total_cents: total.saturating_mul(flagged),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicPledger {
    pub name: String,
    pub amount_per_post_cents: i64,
    pub created_at: i64,
}

pub fn recent_public_pledgers(conn: &mut SqliteConnection, limit: i64) -> Result<Vec<PublicPledger>> {
    Ok(db::recent_public_pledgers(conn, limit)?
        .into_iter()
        .map(|p| PublicPledger {
            name: p.display_name.unwrap_or_else(|| "Anonymous".to_string()),
            amount_per_post_cents: p.amount_per_post_cents,
            created_at: p.created_at,
        })
        .collect())
}
