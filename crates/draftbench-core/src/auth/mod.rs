//! Authentication: token storage, identity providers, session controller.

pub mod identity;
pub mod session;
pub mod store;

pub use identity::{Identity, IdentityProvider, RemoteIdentity, StandInIdentity, UserRecord};
pub use session::{Route, SessionController, SessionEvent, SessionState};
pub use store::{CacheSlot, FileSlot, MemorySlot, TokenSlot, TokenStorage};

/// Returns a masked version of a token for display (first 12 chars + ...).
///
/// Counts characters, not bytes: pasted tokens are arbitrary user input and
/// a byte slice could land inside a multibyte character.
pub fn mask_token(token: &str) -> String {
    if token.chars().count() <= 16 {
        return "***".to_string();
    }
    let prefix: String = token.chars().take(12).collect();
    format!("{prefix}...")
}
