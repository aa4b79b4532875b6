//! Cost governance checks.
//!
//! Checked before every billable call with a conservative estimate of that
//! call's cost (one thousand tokens at the endpoint's blended rate). A session
//! sitting exactly at a cap keeps the work already done; the next billable
//! call is the one refused — and a budget too small to fit even the minimum
//! call refuses immediately rather than silently downgrading.

use crate::domain::CostLedger;
use crate::error::CoreError;
use crate::router::{CapabilityProfile, ModelHandle, RouterConfig};

/// Refuses the next billable call when the profile budget or the absolute
/// session cap cannot accommodate it.
pub fn check_budget(
    ledger: &CostLedger,
    profile: CapabilityProfile,
    handle: &ModelHandle,
    config: &RouterConfig,
) -> Result<(), CoreError> {
    // Minimum plausible bill for the upcoming call: 1k tokens blended.
    let estimate = handle.cost_per_1k_tokens_usd;
    if ledger.total_usd >= config.absolute_session_cap_usd
        || ledger.total_usd + estimate > config.absolute_session_cap_usd
    {
        return Err(CoreError::CostCapExceeded {
            scope: "session".to_string(),
            cap_usd: config.absolute_session_cap_usd,
            accrued_usd: ledger.total_usd,
        });
    }
    if let Some(spec) = config.profile(profile) {
        let accrued = ledger.accrued(profile.as_str());
        if accrued >= spec.session_budget_usd || accrued + estimate > spec.session_budget_usd {
            return Err(CoreError::CostCapExceeded {
                scope: profile.as_str().to_string(),
                cap_usd: spec.session_budget_usd,
                accrued_usd: accrued,
            });
        }
    }
    Ok(())
}
