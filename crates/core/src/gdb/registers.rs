//! Register hex encoding for the `g`/`G`/`p` commands.
//!
//! RSP transmits each 32-bit register little-endian: the four raw bytes are
//! hex-encoded in memory order, which for a big-endian-minded reader looks
//! byte-swapped relative to the natural `{:08x}` rendering of the value.

use crate::facade::{EmulatorFacade, REGISTER_COUNT};

/// Hex-encode one register value the way `g`/`p` transmit it: raw bytes in
/// little-endian memory order, two hex digits per byte.
pub fn encode_register(value: u32) -> String {
    hex::encode(value.to_le_bytes())
}

/// Inverse of [`encode_register`]: decode an 8-hex-digit chunk back into a
/// register value. Returns `None` on malformed input (odd length, non-hex,
/// wrong digit count).
pub fn decode_register(hex_chunk: &str) -> Option<u32> {
    let bytes = hex::decode(hex_chunk).ok()?;
    let arr: [u8; 4] = bytes.try_into().ok()?;
    Some(u32::from_le_bytes(arr))
}

/// Build the full `g` reply: all [`REGISTER_COUNT`] registers, in the fixed
/// order the facade exposes, each hex-encoded little-endian and concatenated.
pub fn encode_all(facade: &dyn EmulatorFacade) -> String {
    (0..REGISTER_COUNT as u8)
        .map(|i| encode_register(facade.get_register(i)))
        .collect()
}

/// Apply a `G<hex>` payload: split into 8-hex-digit chunks and write each to
/// the corresponding register. Returns `false` if the payload length isn't a
/// multiple of 8 hex digits per register or any chunk fails to decode; on
/// failure no partial write rollback is attempted, matching a real
/// `gdbserver`'s best-effort behavior for malformed `G` packets.
pub fn decode_all(facade: &dyn EmulatorFacade, hex_payload: &str) -> bool {
    if hex_payload.len() != REGISTER_COUNT * 8 {
        return false;
    }
    for (i, chunk) in hex_payload.as_bytes().chunks(8).enumerate() {
        let chunk = std::str::from_utf8(chunk).unwrap_or_default();
        match decode_register(chunk) {
            Some(value) => facade.set_register(i as u8, value),
            None => return false,
        }
    }
    true
}
