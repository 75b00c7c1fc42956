use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;
use zap_live_db::{
    LiveStore, PaymentType, PermissionError, SessionStatus, StreamSession, Transaction,
    WriteError, WriteResult,
};

/// Share of the gifted amount paid to the referrer
pub const REFERRAL_RATE: f64 = 0.01;

/// Length of access granted by a private session payment
pub const PRIVATE_SESSION_MINUTES: i64 = 30;

/// Fixed coin amount of a zap
pub const ZAP_AMOUNT: u64 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct Payment {
    pub kind: PaymentType,
    /// Coins paid, the host receives the full amount
    pub amount: u64,
    pub user_id: String,
    pub host_id: String,
    pub referrer_id: Option<String>,
}

impl Payment {
    pub fn host_cut(&self) -> f64 {
        self.amount as f64
    }

    pub fn referral_cut(&self) -> f64 {
        self.amount as f64 * REFERRAL_RATE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStep {
    DebitPayer,
    CreditHost,
    CreditReferrer,
    UpsertSession,
    AppendTransaction,
}

impl PaymentStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStep::DebitPayer => "debit_payer",
            PaymentStep::CreditHost => "credit_host",
            PaymentStep::CreditReferrer => "credit_referrer",
            PaymentStep::UpsertSession => "upsert_session",
            PaymentStep::AppendTransaction => "append_transaction",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    pub step: PaymentStep,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WriteError>,
}

/// Outcome of every side effect issued by [process_payment]
#[derive(Debug, Clone, Serialize)]
pub struct PaymentReport {
    pub transaction_id: String,
    pub steps: Vec<StepReport>,
    /// All issued steps were applied
    pub success: bool,
}

impl PaymentReport {
    fn new(transaction_id: String, results: Vec<(PaymentStep, WriteResult)>) -> Self {
        let steps: Vec<StepReport> = results
            .into_iter()
            .map(|(step, r)| StepReport {
                step,
                error: r.err(),
            })
            .collect();
        Self {
            transaction_id,
            success: steps.iter().all(|s| s.error.is_none()),
            steps,
        }
    }

    pub fn step(&self, step: PaymentStep) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.step == step)
    }

    pub fn failed(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|s| s.error.is_some())
    }

    /// Rejected writes, callers escalate these as fatal
    pub fn permission_denials(&self) -> impl Iterator<Item = &PermissionError> {
        self.steps
            .iter()
            .filter_map(|s| s.error.as_ref().and_then(|e| e.permission()))
    }
}

/// Apply the monetary side effects of a payment.
///
/// Every side effect is issued at once and awaited together, there is no ordering between
/// them and no rollback: a failed step leaves the others applied. The transaction record is
/// always attempted.
pub async fn process_payment(
    store: &dyn LiveStore,
    payment: &Payment,
    now: DateTime<Utc>,
) -> Result<PaymentReport> {
    if payment.amount == 0 {
        bail!("Payment amount must be positive");
    }
    if payment.user_id.is_empty() || payment.host_id.is_empty() {
        bail!("Payment requires a payer and a payee");
    }
    if payment.user_id == payment.host_id {
        bail!("Cannot pay yourself");
    }

    let host_cut = payment.host_cut();
    let referral_cut = payment.referral_cut();
    let tx = Transaction {
        id: Uuid::new_v4().to_string(),
        from: payment.user_id.clone(),
        to: payment.host_id.clone(),
        amount: payment.amount as f64,
        payment_type: payment.kind,
        timestamp: now,
    };
    let referrer = payment
        .referrer_id
        .as_deref()
        .filter(|r| !r.is_empty() && *r != payment.user_id);

    let debit = store.increment_user_coins(&payment.user_id, -(payment.amount as f64));
    let credit = store.increment_host_earnings(&payment.host_id, host_cut);
    // credits both coins and referralEarnings of the referrer
    let referrer_credit = async {
        match referrer {
            Some(r) => Some(store.increment_referral_earnings(r, referral_cut).await),
            None => None,
        }
    };
    let session = async {
        if payment.kind != PaymentType::PrivateSession {
            return None;
        }
        let session = StreamSession {
            id: StreamSession::session_id(&payment.user_id, &payment.host_id),
            user_id: payment.user_id.clone(),
            host_id: payment.host_id.clone(),
            expires_at: now + chrono::Duration::minutes(PRIVATE_SESSION_MINUTES),
            status: SessionStatus::Active,
            updated_at: now,
        };
        Some(store.upsert_session(&session).await)
    };
    let append = store.append_transaction(&tx);

    let (debit, credit, referrer_credit, session, append) =
        futures_util::join!(debit, credit, referrer_credit, session, append);

    let mut results = vec![
        (PaymentStep::DebitPayer, debit),
        (PaymentStep::CreditHost, credit),
    ];
    if let Some(r) = referrer_credit {
        results.push((PaymentStep::CreditReferrer, r));
    }
    if let Some(r) = session {
        results.push((PaymentStep::UpsertSession, r));
    }
    results.push((PaymentStep::AppendTransaction, append));

    let report = PaymentReport::new(tx.id, results);
    for s in report.failed() {
        if let Some(e) = &s.error {
            warn!(
                "Payment {} step {} failed: {}",
                report.transaction_id,
                s.step.as_str(),
                e
            );
        }
    }
    info!(
        "Payment {} {} {} -> {} amount={} success={}",
        report.transaction_id,
        payment.kind,
        payment.user_id,
        payment.host_id,
        payment.amount,
        report.success
    );
    Ok(report)
}
