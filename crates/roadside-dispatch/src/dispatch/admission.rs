use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use super::domain::{Membership, MembershipPlan, Requester, RequesterId};
use super::error::DispatchError;
use super::repository::MembershipLedger;

/// Why a requester may not open another request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaDenial {
    /// Free tier with every trial request used.
    TrialExhausted,
    /// No plan, an expired paid plan, or a paid plan with its allowance used.
    NoActivePlan,
}

impl QuotaDenial {
    pub fn code(self) -> &'static str {
        match self {
            QuotaDenial::TrialExhausted => "trial_exhausted",
            QuotaDenial::NoActivePlan => "no_active_plan",
        }
    }
}

impl fmt::Display for QuotaDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaDenial::TrialExhausted => {
                write!(f, "free trial limit reached, subscribe to a plan to continue")
            }
            QuotaDenial::NoActivePlan => {
                write!(f, "request limit exceeded or no active membership")
            }
        }
    }
}

impl MembershipPlan {
    fn exhausted_denial(self) -> QuotaDenial {
        match self {
            MembershipPlan::Free => QuotaDenial::TrialExhausted,
            _ => QuotaDenial::NoActivePlan,
        }
    }
}

impl Membership {
    /// The free tier is a lifetime trial counter, so its expiry is ignored.
    pub fn admission(&self, now: DateTime<Utc>) -> Result<(), QuotaDenial> {
        match self.plan {
            MembershipPlan::Free if self.requests_used < self.max_requests => Ok(()),
            MembershipPlan::Free => Err(QuotaDenial::TrialExhausted),
            MembershipPlan::Unsubscribed => Err(QuotaDenial::NoActivePlan),
            MembershipPlan::Basic | MembershipPlan::Premium => {
                if now <= self.expiry && self.requests_used < self.max_requests {
                    Ok(())
                } else {
                    Err(QuotaDenial::NoActivePlan)
                }
            }
        }
    }

    pub fn can_create_request(&self, now: DateTime<Utc>) -> bool {
        self.admission(now).is_ok()
    }

    pub fn remaining(&self) -> u32 {
        self.max_requests.saturating_sub(self.requests_used)
    }

    /// Start a new allowance window. Called by the payment side on renewal.
    pub fn reset_quota(&mut self, now: DateTime<Utc>) {
        self.requests_used = 0;
        self.last_reset_date = now;
    }
}

/// Gate in front of request creation.
pub struct AdmissionController<L> {
    ledger: Arc<L>,
}

impl<L> AdmissionController<L>
where
    L: MembershipLedger + 'static,
{
    pub fn new(ledger: Arc<L>) -> Self {
        Self { ledger }
    }

    pub fn requester(&self, id: &RequesterId) -> Result<Requester, DispatchError> {
        self.ledger
            .requester(id)?
            .ok_or(DispatchError::NotFound("requester"))
    }

    /// Read-only check used to fail fast before any other work.
    pub fn can_create_request(
        &self,
        id: &RequesterId,
        now: DateTime<Utc>,
    ) -> Result<Requester, DispatchError> {
        let requester = self.requester(id)?;
        requester.membership.admission(now)?;
        Ok(requester)
    }

    /// Consume one request from the requester's allowance.
    ///
    /// The plan and expiry are checked against a fresh read, then the counter moves in a
    /// single write that only lands while `requests_used` is below the allowance. Two
    /// creations racing on the last slot cannot both succeed.
    pub fn admit(&self, id: &RequesterId, now: DateTime<Utc>) -> Result<Membership, DispatchError> {
        let membership = self.requester(id)?.membership;
        if let Err(denial) = membership.admission(now) {
            info!(requester = %id, reason = denial.code(), "request creation denied");
            return Err(denial.into());
        }

        let Some(used) = self
            .ledger
            .increment_requests_below(id, membership.max_requests)?
        else {
            let denial = membership.plan.exhausted_denial();
            info!(
                requester = %id,
                reason = denial.code(),
                "allowance used up by a concurrent request"
            );
            return Err(denial.into());
        };

        debug!(
            requester = %id,
            used,
            max = membership.max_requests,
            "request quota consumed"
        );
        Ok(Membership {
            requests_used: used,
            ..membership
        })
    }

    /// Return a request consumed by [`admit`](Self::admit) whose creation did not complete.
    pub fn release(&self, id: &RequesterId) -> Result<(), DispatchError> {
        self.ledger.release_request(id)?;
        debug!(requester = %id, "request quota released");
        Ok(())
    }
}
