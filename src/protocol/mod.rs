//! WebSocket wire format: the upgrade handshake and single text frames.

pub mod frame;
pub mod handshake;
pub mod mask;

pub use frame::{mask, mask_client, mask_with_key, unmask, unmask_text};
pub use handshake::{
    HandshakeRequest, HandshakeResponse, WS_GUID, compute_accept_key, perform_handshake,
};
pub use mask::{apply_mask, apply_mask_fast};
