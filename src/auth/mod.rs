//! Authentication against an external identity provider.

pub mod callback;
pub mod provider;

pub use callback::auth_callback;
pub use provider::{AuthProvider, AuthSession, AuthUser, GoTrueAuthProvider};

#[cfg(any(test, feature = "test-billing"))]
pub use provider::test::MockAuthProvider;
