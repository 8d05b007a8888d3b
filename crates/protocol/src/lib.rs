//! Wire protocol types for the chunklift upload session contract.
//!
//! The upload server owns this contract; the engine only consumes it.
//! All payloads serialize as camelCase JSON with chunk bytes carried
//! base64-encoded.

pub mod messages;
pub mod types;
