// =============================================================================
// Venue access: signed REST client behind a token-bucket RPC gate
// =============================================================================

pub mod client;
pub mod rate_limit;
