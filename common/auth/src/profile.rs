use std::fmt;

use thiserror::Error;

use crate::error::{AuthError, RegistryError};

/// The two independent writes of a profile update, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileStep {
    Provider,
    Registry,
}

impl fmt::Display for ProfileStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileStep::Provider => f.write_str("identity provider"),
            ProfileStep::Registry => f.write_str("user registry"),
        }
    }
}

/// Error half of a failed profile step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    #[error(transparent)]
    Provider(AuthError),
    #[error(transparent)]
    Registry(RegistryError),
}

/// Outcome of a profile update that did not fully succeed.
///
/// The two writes are not transactional; `Partial` names the half that needs
/// to be retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileUpdateError {
    #[error("no user is signed in")]
    NotSignedIn,
    #[error("profile saved to the {applied} but the {failed} write failed: {source}")]
    Partial {
        applied: ProfileStep,
        failed: ProfileStep,
        #[source]
        source: StepError,
    },
    #[error("profile update failed at both steps (provider: {provider}; registry: {registry})")]
    Failed {
        provider: AuthError,
        registry: RegistryError,
    },
}

impl ProfileUpdateError {
    /// Fold the results of both steps; `Ok` only when both succeeded.
    pub(crate) fn from_steps(
        provider: Result<(), AuthError>,
        registry: Result<(), RegistryError>,
    ) -> Result<(), Self> {
        match (provider, registry) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(err)) => Err(Self::Partial {
                applied: ProfileStep::Provider,
                failed: ProfileStep::Registry,
                source: StepError::Registry(err),
            }),
            (Err(err), Ok(())) => Err(Self::Partial {
                applied: ProfileStep::Registry,
                failed: ProfileStep::Provider,
                source: StepError::Provider(err),
            }),
            (Err(provider), Err(registry)) => Err(Self::Failed { provider, registry }),
        }
    }

    /// Step that must be retried, if any single one is known.
    pub fn failed_step(&self) -> Option<ProfileStep> {
        match self {
            Self::Partial { failed, .. } => Some(*failed),
            _ => None,
        }
    }
}
