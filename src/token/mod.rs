//! JWT minting and verification shared by the Auth and App Check services.

pub mod codec;
pub mod factory;
pub mod keys;
pub mod signer;
pub mod verifier;

pub use factory::{AppCheckTokenOptions, CustomClaims, TokenFactory};
pub use keys::{HttpPublicKeySource, PublicKey, PublicKeySource, StaticPublicKeySource};
pub use signer::{CryptoSigner, IamSigner, ServiceAccountId, ServiceAccountSigner};
pub use verifier::{TokenClaims, TokenVerifier, VerifierConfig};
