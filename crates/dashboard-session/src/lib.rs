//! Session state for the dashboard client: token claims, credential storage,
//! and refresh coordination. No network I/O lives here.

pub mod codec;
pub mod credentials;
pub mod record;
pub mod single_flight;
pub mod store;

pub use codec::{
    DEFAULT_EXPIRY_THRESHOLD_MINUTES, TokenClaims, decode_claims, is_expired, is_live,
    now_unix_ms,
};
pub use credentials::{CredentialPair, CredentialShapeError, normalize_credentials};
pub use record::{SessionRecord, UserProfile};
pub use single_flight::{FlightAbandoned, SingleFlight};
pub use store::{
    ACCESS_TOKEN_KEY, FileStore, KeyValueStore, MemoryStore, REFRESH_TOKEN_KEY, SESSION_TOKEN_KEY,
    StoreError, TokenStore, USER_DATA_KEY, non_blank,
};
