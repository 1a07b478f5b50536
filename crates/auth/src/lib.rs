//! `idvault-auth` — credential, session and token lifecycle.
//!
//! A login flows credential check → lockout evaluation → session creation →
//! token issuance, every step writing through the versioned entity store and
//! recording one audit event, parameterized by the tenant's security policy.

pub mod credential;
pub mod lockout;
pub mod login;
pub mod password;
pub mod session;
pub mod sweep;
pub mod token;


pub use credential::{CredentialManager, CredentialOutcome};
pub use lockout::LockoutState;
pub use login::{Authenticator, LoginOutcome};
pub use password::{hash_password, verify_password};
pub use session::{SessionManager, SessionRecord, SessionStatus, SessionValidation};
pub use sweep::{SweepConfig, SweepHandle, SweepStats, Sweeper};
pub use token::{ExtendPolicy, IssuedToken, TokenManager, TokenRecord, TokenValidation};
