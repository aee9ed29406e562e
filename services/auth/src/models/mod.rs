//! Authentication service models

pub mod reset_token;
pub mod role;
pub mod session;
pub mod user;

// Re-export for convenience
pub use reset_token::{PasswordResetToken, ResetTokenState};
pub use role::{NewRoleGrant, RoleGrant, RoleGrantView, RoleName, Scope, TokenContext};
pub use session::RefreshSession;
pub use user::{ExternalAccount, Identifier, NewUser, User, UserId, UserView};
