use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Utc};
use tracing::info;
use zap_live_api_common::{BecomeHostRequest, HostInfo, PatchHost};
use zap_live_db::{Host, HostPatch, LiveStore, PaymentDetails, StreamType, User};

/// Placeholder host shown when the marketplace has no real entry
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedHost {
    pub id: String,
    pub name: String,
    pub bio: String,
    pub tags: Vec<String>,
    pub rating: f64,
}

const SIMULATED: [(&str, &str, &str, &[&str], f64); 6] = [
    ("sim-aanya", "Aanya", "Late night lofi and chill chats", &["music", "chill"], 4.9),
    ("sim-kabir", "Kabir", "Street food tours across Mumbai", &["food", "travel"], 4.8),
    ("sim-meera", "Meera", "Classical vocals, requests open", &["music", "classical"], 4.7),
    ("sim-rohan", "Rohan", "Ranked grind, come say hi", &["gaming"], 4.6),
    ("sim-isha", "Isha", "Morning yoga and breathing", &["fitness", "wellness"], 4.5),
    ("sim-dev", "Dev", "Stand-up practice sets", &["comedy"], 4.3),
];

impl SimulatedHost {
    pub fn catalog() -> Vec<SimulatedHost> {
        SIMULATED
            .iter()
            .map(|(id, name, bio, tags, rating)| SimulatedHost {
                id: id.to_string(),
                name: name.to_string(),
                bio: bio.to_string(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                rating: *rating,
            })
            .collect()
    }

    pub fn find(id: &str) -> Option<SimulatedHost> {
        Self::catalog().into_iter().find(|h| h.id == id)
    }
}

/// A host as seen by viewers, resolved once per flow
#[derive(Debug, Clone, PartialEq)]
pub enum HostView {
    Real(Host),
    Simulated(SimulatedHost),
}

impl HostView {
    pub fn id(&self) -> &str {
        match self {
            HostView::Real(h) => &h.id,
            HostView::Simulated(s) => &s.id,
        }
    }

    pub fn is_live(&self) -> bool {
        match self {
            HostView::Real(h) => h.is_live,
            HostView::Simulated(_) => true,
        }
    }

    pub fn rating(&self) -> f64 {
        match self {
            HostView::Real(h) => h.rating,
            HostView::Simulated(s) => s.rating,
        }
    }

    /// The real host document, payments and requests need one
    pub fn real(&self) -> Result<&Host> {
        match self {
            HostView::Real(h) => Ok(h),
            HostView::Simulated(s) => bail!("{} is a preview host", s.name),
        }
    }

    pub fn info(&self) -> HostInfo {
        match self {
            HostView::Real(h) => HostInfo {
                id: h.id.clone(),
                name: h.name.clone(),
                bio: h.bio.clone(),
                avatar: h.avatar.clone(),
                tags: h.tag_list(),
                is_live: h.is_live,
                verified: h.verified,
                stream_type: h.stream_type,
                manual_blur: h.manual_blur,
                rating: h.rating,
                simulated: false,
            },
            HostView::Simulated(s) => HostInfo {
                id: s.id.clone(),
                name: s.name.clone(),
                bio: Some(s.bio.clone()),
                avatar: None,
                tags: s.tags.clone(),
                is_live: true,
                verified: false,
                stream_type: StreamType::Public,
                manual_blur: false,
                rating: s.rating,
                simulated: true,
            },
        }
    }
}

/// Resolve [id] to a real host, falling back to the simulated catalog
pub async fn resolve_host(store: &dyn LiveStore, id: &str) -> Result<Option<HostView>> {
    if let Some(h) = store.get_host(id).await? {
        if h.is_banned {
            return Ok(None);
        }
        return Ok(Some(HostView::Real(h)));
    }
    Ok(SimulatedHost::find(id).map(HostView::Simulated))
}

/// Live hosts ordered by rating, the simulated catalog is shown when nobody is live
pub async fn marketplace(store: &dyn LiveStore) -> Result<Vec<HostView>> {
    Ok(marketplace_from(store.list_live_hosts().await?))
}

/// Build the marketplace listing from the live host documents
pub fn marketplace_from(live: Vec<Host>) -> Vec<HostView> {
    let mut hosts: Vec<HostView> = live
        .into_iter()
        .filter(|h| !h.is_banned)
        .map(HostView::Real)
        .collect();
    if hosts.is_empty() {
        hosts = SimulatedHost::catalog()
            .into_iter()
            .map(HostView::Simulated)
            .collect();
    }
    hosts.sort_by(|a, b| b.rating().total_cmp(&a.rating()));
    hosts
}

fn join_tags(tags: &[String]) -> Option<String> {
    let tags: Vec<&str> = tags
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();
    if tags.is_empty() {
        None
    } else {
        Some(tags.join(","))
    }
}

/// Create the host profile for user [uid], crediting the referrer when a code is given
pub async fn become_host(
    store: &dyn LiveStore,
    uid: &str,
    req: &BecomeHostRequest,
    now: DateTime<Utc>,
) -> Result<Host> {
    let name = req.name.trim();
    if name.is_empty() {
        bail!("Host name is required");
    }
    if store.get_host(uid).await?.is_some() {
        bail!("Already a host");
    }
    if store.get_user(uid).await?.is_none() {
        store.upsert_user(&User::new(uid, now)).await?;
    }
    let referrer = match req.referral_code.as_deref().map(str::trim) {
        Some(code) if !code.is_empty() => {
            if code == uid {
                bail!("Cannot refer yourself");
            }
            let r = store
                .get_host(code)
                .await?
                .ok_or_else(|| anyhow!("Unknown referral code"))?;
            Some(r.id)
        }
        _ => None,
    };

    let mut host = Host::new(uid, name, now);
    host.bio = req.bio.clone();
    host.avatar = req.avatar.clone();
    host.tags = join_tags(&req.tags);
    host.referred_by = referrer.clone();
    host.payment_details = PaymentDetails {
        upi_id: req.upi_id.clone().filter(|u| !u.trim().is_empty()),
    };
    store.upsert_host(&host).await?;
    if let Some(r) = &referrer {
        store.increment_referral_count(r).await?;
    }
    info!("New host {} ({}), referred by {:?}", host.id, host.name, referrer);
    Ok(host)
}

/// Apply host editable settings
pub async fn update_stream_settings(
    store: &dyn LiveStore,
    uid: &str,
    req: &PatchHost,
) -> Result<Host> {
    if store.get_host(uid).await?.is_none() {
        bail!("Not a host");
    }
    let patch = HostPatch {
        stream_type: req.stream_type,
        manual_blur: req.manual_blur,
        bio: req.bio.clone(),
        tags: req.tags.as_deref().map(|t| join_tags(t).unwrap_or_default()),
        upi_id: req.upi_id.clone(),
        ..Default::default()
    };
    if patch.is_empty() {
        bail!("Nothing to update");
    }
    store.update_host(uid, &patch).await?;
    store
        .get_host(uid)
        .await?
        .ok_or_else(|| anyhow!("Host not found"))
}
