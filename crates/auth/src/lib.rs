//! `procura-auth`: pure authentication/authorization boundary.
//!
//! Token issuance belongs to an external identity service; this crate only
//! verifies tokens and decides what a verified principal may do.

pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod permissions;
pub mod principal;
pub mod roles;

pub use authorize::{authorize, permissions_for, AuthzError};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtValidator};
pub use permissions::Permission;
pub use principal::{Principal, UserKind};
pub use roles::Role;
