//! Shared proptest generators for all Rust libraries.
//!
//! Generators produce broker *scripts*: plain descriptions of what Vault
//! answers, turned into broker results with [`LoginStep::into_response`] and
//! friends.

use auth_vault_client::{AuthGrant, VaultResult};
use proptest::prelude::*;

use crate::fixtures::grant;
use crate::mocks::rejected;

/// One scripted login answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginStep {
    /// Successful login
    Grant {
        /// Issued token
        token: String,
        /// Whether renew-self is allowed
        renewable: bool,
        /// Lease in seconds
        lease_secs: u64,
    },
    /// Vault refused the proof
    Rejected,
    /// Vault answered without an auth block
    NoAuthInfo,
}

impl LoginStep {
    /// Broker result for this step.
    #[must_use]
    pub fn into_response(self) -> VaultResult<Option<AuthGrant>> {
        match self {
            Self::Grant {
                token,
                renewable,
                lease_secs,
            } => Ok(Some(grant(&token, renewable, lease_secs))),
            Self::Rejected => Err(rejected("permission denied")),
            Self::NoAuthInfo => Ok(None),
        }
    }

    /// Token issued by this step, if any.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Grant { token, .. } => Some(token),
            _ => None,
        }
    }
}

/// One scripted renewal answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalStep {
    /// Lease extended
    Renewed {
        /// New lease in seconds
        lease_secs: u64,
    },
    /// Renewal refused
    Failed,
}

impl RenewalStep {
    /// Broker result for this step, renewing `token`.
    #[must_use]
    pub fn into_response(self, token: &str) -> VaultResult<Option<AuthGrant>> {
        match self {
            Self::Renewed { lease_secs } => Ok(Some(grant(token, true, lease_secs))),
            Self::Failed => Err(rejected("max ttl reached")),
        }
    }
}

/// Generate Vault service tokens.
pub fn token_strategy() -> impl Strategy<Value = String> {
    "hvs\\.[A-Za-z0-9]{24}"
}

/// Generate secret values.
pub fn secret_value_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z0-9!@#$%^&*]{8,64}"
}

/// Generate a single login answer.
pub fn login_step_strategy() -> impl Strategy<Value = LoginStep> {
    prop_oneof![
        3 => (token_strategy(), any::<bool>(), 60u64..7200).prop_map(|(token, renewable, lease_secs)| {
            LoginStep::Grant { token, renewable, lease_secs }
        }),
        1 => Just(LoginStep::Rejected),
        1 => Just(LoginStep::NoAuthInfo),
    ]
}

/// Generate a login script of up to `max` answers.
pub fn login_script_strategy(max: usize) -> impl Strategy<Value = Vec<LoginStep>> {
    prop::collection::vec(login_step_strategy(), 1..=max)
}

/// Generate a renewal script that keeps the lease healthy for `n` steps and
/// then fails.
pub fn renewal_script_strategy(max: usize) -> impl Strategy<Value = Vec<RenewalStep>> {
    prop::collection::vec(
        (600u64..7200).prop_map(|lease_secs| RenewalStep::Renewed { lease_secs }),
        0..max,
    )
    .prop_map(|mut steps| {
        steps.push(RenewalStep::Failed);
        steps
    })
}
