//! HTTP header names and defaults.

/// Request header carrying the payment transaction id (client → provider).
pub const PAYMENT_TX_HEADER: &str = "X-402-Payment-Tx";

/// Legacy spelling of [`PAYMENT_TX_HEADER`], still accepted by the gate.
pub const LEGACY_PAYMENT_HEADER: &str = "X-402-Payment";

/// Request header carrying the paying account's address (client → provider).
pub const SENDER_HEADER: &str = "X-402-Sender";

/// Default discovery indexer URL.
pub const DEFAULT_INDEXER_URL: &str = "http://localhost:3001";

/// Longest provider error body kept in [`automata::error::ProviderCallFailure`].
pub const MAX_ERROR_BODY: usize = 1024;
