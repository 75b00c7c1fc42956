use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;
use zap_live_db::{LiveStore, PaymentDetails, PayoutRequest, PayoutStatus};

/// Diamonds exchanged per [CASH_PER_PAYOUT_UNIT]
pub const DIAMONDS_PER_PAYOUT_UNIT: f64 = 1000.0;

/// INR paid per [DIAMONDS_PER_PAYOUT_UNIT] diamonds
pub const CASH_PER_PAYOUT_UNIT: f64 = 20.0;

pub fn diamonds_to_cash(diamonds: f64) -> f64 {
    diamonds * CASH_PER_PAYOUT_UNIT / DIAMONDS_PER_PAYOUT_UNIT
}

/// Request a payout of the hosts full earnings
pub async fn request_payout(
    store: &dyn LiveStore,
    host_id: &str,
    min_diamonds: f64,
    now: DateTime<Utc>,
) -> Result<PayoutRequest> {
    let host = store
        .get_host(host_id)
        .await?
        .ok_or_else(|| anyhow!("Not a host"))?;
    let Some(upi_id) = host
        .payment_details
        .upi_id
        .as_ref()
        .filter(|u| !u.trim().is_empty())
    else {
        bail!("Add a UPI id before requesting a payout");
    };
    if host.earnings < min_diamonds {
        bail!(
            "Minimum payout is {} diamonds, you have {}",
            min_diamonds,
            host.earnings
        );
    }
    if store
        .list_payouts(Some(PayoutStatus::Pending))
        .await?
        .iter()
        .any(|p| p.host_id == host_id)
    {
        bail!("A payout request is already pending");
    }

    let amount = host.earnings;
    let payout = PayoutRequest {
        id: Uuid::new_v4().to_string(),
        host_id: host.id.clone(),
        host_name: host.name.clone(),
        amount_diamonds: amount,
        amount_cash: diamonds_to_cash(amount),
        status: PayoutStatus::Pending,
        payment_details: PaymentDetails {
            upi_id: Some(upi_id.clone()),
        },
        requested_at: now,
        paid_at: None,
    };
    store.create_payout(&payout).await?;
    store.increment_host_earnings(host_id, -amount).await?;
    info!(
        "Payout {} requested by {}: {} diamonds = {} INR",
        payout.id, host_id, payout.amount_diamonds, payout.amount_cash
    );
    Ok(payout)
}

pub async fn mark_paid(
    store: &dyn LiveStore,
    payout_id: &str,
    now: DateTime<Utc>,
) -> Result<PayoutRequest> {
    let payout = store
        .get_payout(payout_id)
        .await?
        .ok_or_else(|| anyhow!("Payout not found"))?;
    if payout.status == PayoutStatus::Paid {
        bail!("Payout already paid");
    }
    store.mark_payout_paid(payout_id, now).await?;
    info!("Payout {} marked paid", payout_id);
    Ok(PayoutRequest {
        status: PayoutStatus::Paid,
        paid_at: Some(now),
        ..payout
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use zap_live_db::{Host, MemoryStore};

    async fn host(store: &MemoryStore, earnings: f64, upi: Option<&str>) -> Result<()> {
        let mut h = Host::new("h1", "Host", Utc::now());
        h.earnings = earnings;
        h.payment_details.upi_id = upi.map(String::from);
        store.upsert_host(&h).await?;
        Ok(())
    }

    #[test]
    fn test_cash_rate() {
        assert_eq!(diamonds_to_cash(1000.0), 20.0);
        assert_eq!(diamonds_to_cash(2500.0), 50.0);
        assert_eq!(diamonds_to_cash(50.0), 1.0);
    }

    #[tokio::test]
    async fn test_request_payout() -> Result<()> {
        let store = MemoryStore::new();
        host(&store, 1500.0, Some("host@upi")).await?;
        let p = request_payout(&store, "h1", 1000.0, Utc::now()).await?;
        assert_eq!(p.amount_diamonds, 1500.0);
        assert_eq!(p.amount_cash, 30.0);
        assert_eq!(store.get_host("h1").await?.unwrap().earnings, 0.0);
        assert_eq!(store.list_payouts(Some(PayoutStatus::Pending)).await?.len(), 1);

        let paid = mark_paid(&store, &p.id, Utc::now()).await?;
        assert_eq!(paid.status, PayoutStatus::Paid);
        assert!(mark_paid(&store, &p.id, Utc::now()).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_payout_requirements() -> Result<()> {
        let store = MemoryStore::new();
        host(&store, 1500.0, None).await?;
        assert!(request_payout(&store, "h1", 1000.0, Utc::now()).await.is_err());

        host(&store, 999.0, Some("host@upi")).await?;
        assert!(request_payout(&store, "h1", 1000.0, Utc::now()).await.is_err());
        assert!(store.list_payouts(None).await?.is_empty());
        Ok(())
    }
}
