//! Role resolution
//!
//! Probes contract state in a fixed priority order and stops at the first
//! match. A probe that errors counts as "no match": one unsupported or
//! reverting read must never block role assignment.

use alloy_primitives::Address;
use async_trait::async_trait;
use tracing::{debug, warn, Instrument};

use super::roles::{Authorization, Role};
use crate::metrics::metrics;
use crate::observability::session_span;
use crate::provider::{ProviderResult, ReliefContract};
use crate::rpc_manager::{retry_with_backoff, RetryConfig};
use crate::structured_logging::StructuredLogger;
use crate::types::AccessRole;

/// Inputs shared by every probe of one resolution
pub struct ProbeContext<'a> {
    pub account: Address,
    pub contract: &'a dyn ReliefContract,
    /// Unix seconds, used for voucher expiry
    pub now: u64,
    pub retry: &'a RetryConfig,
}

/// One read-only check for a single candidate role
#[async_trait]
pub trait RoleProbe: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(Some(role))` on a match, `Ok(None)` otherwise
    async fn probe(&self, ctx: &ProbeContext<'_>) -> ProviderResult<Option<Role>>;
}

/// Contract owner is admin
pub struct OwnerProbe;

#[async_trait]
impl RoleProbe for OwnerProbe {
    fn name(&self) -> &'static str {
        "owner"
    }

    async fn probe(&self, ctx: &ProbeContext<'_>) -> ProviderResult<Option<Role>> {
        let owner = retry_with_backoff("owner", ctx.retry, || ctx.contract.owner()).await?;
        Ok((owner == ctx.account).then_some(Role::Admin))
    }
}

/// Explicit administrative role flag
pub struct AccessRoleProbe {
    flag: AccessRole,
}

impl AccessRoleProbe {
    pub fn new(flag: AccessRole) -> Self {
        Self { flag }
    }

    fn role(&self) -> Role {
        match self.flag {
            AccessRole::Admin => Role::Admin,
            AccessRole::Government => Role::Government,
            AccessRole::Treasury => Role::Treasury,
            AccessRole::Oracle => Role::Oracle,
        }
    }
}

#[async_trait]
impl RoleProbe for AccessRoleProbe {
    fn name(&self) -> &'static str {
        self.flag.as_str()
    }

    async fn probe(&self, ctx: &ProbeContext<'_>) -> ProviderResult<Option<Role>> {
        let granted = retry_with_backoff("has_role", ctx.retry, || {
            ctx.contract.has_role(self.flag, ctx.account)
        })
        .await?;
        Ok(granted.then(|| self.role()))
    }
}

/// Registered vendor record
pub struct VendorProbe;

#[async_trait]
impl RoleProbe for VendorProbe {
    fn name(&self) -> &'static str {
        "vendor"
    }

    async fn probe(&self, ctx: &ProbeContext<'_>) -> ProviderResult<Option<Role>> {
        let record =
            retry_with_backoff("vendor", ctx.retry, || ctx.contract.vendor(ctx.account)).await?;
        Ok(record.filter(|r| r.registered).map(|_| Role::Vendor))
    }
}

/// Holder of at least one unredeemed, unexpired voucher
pub struct VoucherProbe;

#[async_trait]
impl RoleProbe for VoucherProbe {
    fn name(&self) -> &'static str {
        "voucher"
    }

    async fn probe(&self, ctx: &ProbeContext<'_>) -> ProviderResult<Option<Role>> {
        let vouchers = retry_with_backoff("vouchers_of", ctx.retry, || {
            ctx.contract.vouchers_of(ctx.account)
        })
        .await?;
        Ok(vouchers
            .iter()
            .any(|v| v.is_active(ctx.now))
            .then_some(Role::Victim))
    }
}

/// Probe order used by [`RoleResolver::new`]
pub fn default_probes() -> Vec<Box<dyn RoleProbe>> {
    vec![
        Box::new(OwnerProbe),
        Box::new(AccessRoleProbe::new(AccessRole::Admin)),
        Box::new(AccessRoleProbe::new(AccessRole::Government)),
        Box::new(AccessRoleProbe::new(AccessRole::Treasury)),
        Box::new(AccessRoleProbe::new(AccessRole::Oracle)),
        Box::new(VendorProbe),
        Box::new(VoucherProbe),
    ]
}

/// Outcome of one resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub authorization: Authorization,
    /// Name of the probe that matched; `None` for the donor/guest defaults
    pub matched_probe: Option<&'static str>,
    pub failed_probes: usize,
}

pub struct RoleResolver {
    probes: Vec<Box<dyn RoleProbe>>,
    retry: RetryConfig,
}

impl RoleResolver {
    pub fn new(retry: RetryConfig) -> Self {
        Self::with_probes(default_probes(), retry)
    }

    pub fn with_probes(probes: Vec<Box<dyn RoleProbe>>, retry: RetryConfig) -> Self {
        Self { probes, retry }
    }

    pub fn probe_names(&self) -> Vec<&'static str> {
        self.probes.iter().map(|p| p.name()).collect()
    }

    /// Resolve against the wall clock
    pub async fn resolve(
        &self,
        account: Option<Address>,
        contract: &dyn ReliefContract,
        logger: &StructuredLogger,
    ) -> Resolution {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        self.resolve_at(account, contract, now, logger).await
    }

    /// First-match fold over the probes; `account == None` is a guest
    pub async fn resolve_at(
        &self,
        account: Option<Address>,
        contract: &dyn ReliefContract,
        now: u64,
        logger: &StructuredLogger,
    ) -> Resolution {
        let span = session_span(logger.context_id());
        self.fold(account, contract, now, logger)
            .instrument(span)
            .await
    }

    async fn fold(
        &self,
        account: Option<Address>,
        contract: &dyn ReliefContract,
        now: u64,
        logger: &StructuredLogger,
    ) -> Resolution {
        let Some(account) = account else {
            return Resolution {
                authorization: Role::Guest.into(),
                matched_probe: None,
                failed_probes: 0,
            };
        };

        let ctx = ProbeContext {
            account,
            contract,
            now,
            retry: &self.retry,
        };
        let mut failed_probes = 0;
        let mut matched: Option<(Role, &'static str)> = None;

        for probe in &self.probes {
            match probe.probe(&ctx).await {
                Ok(Some(role)) => {
                    matched = Some((role, probe.name()));
                    break;
                }
                Ok(None) => debug!(probe = probe.name(), "No match"),
                Err(err) => {
                    failed_probes += 1;
                    metrics().role_probe_failures.inc();
                    warn!(probe = probe.name(), error = %err, "Role probe failed, skipping");
                }
            }
        }

        metrics().role_resolutions.inc();
        let (role, matched_probe) = match matched {
            Some((role, name)) => (role, Some(name)),
            None => (Role::Donor, None),
        };
        logger.log_role_resolved(account, role.as_str(), matched_probe);

        Resolution {
            authorization: role.into(),
            matched_probe,
            failed_probes,
        }
    }
}

impl Default for RoleResolver {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
