pub mod config;
pub mod error;
pub mod extractors;
pub mod guards;
pub mod identity;
pub mod profile;
pub mod provider;
pub mod registry;
pub mod roles;
pub mod snapshot;
pub mod store;
pub mod validation;

pub use config::{ConfigError, SessionConfig};
pub use error::{AuthError, AuthResult, RegistryError, SessionError};
pub use extractors::{CurrentSession, GuardRejection, RequireAdmin, RequireSession};
pub use guards::{from_query, DenialReason, GuardDecision, GuardPolicy, Redirect, RouteGuard};
pub use identity::{Identity, ProfilePatch, ProviderKind};
pub use profile::{ProfileStep, ProfileUpdateError, StepError};
pub use provider::{
    FederatedAuthorizer, FederatedCredential, IdentityChanges, IdentityProvider,
    InMemoryIdentityProvider, ProviderOp, RestIdentityProvider,
};
pub use registry::{HttpUserRegistry, InMemoryUserRegistry, UserRecord, UserRegistry, UserUpsert};
pub use roles::{Role, ROLE_ADMIN, ROLE_USER};
pub use snapshot::{RoleResolution, Session, SessionSnapshot, SessionStatus};
pub use store::{SessionStore, SessionStoreBuilder};
pub use validation::{is_valid_email, PasswordPolicy, PasswordViolation};
