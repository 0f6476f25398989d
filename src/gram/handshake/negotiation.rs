//! Client-side Gram handshake negotiation.

use super::{GramVersion, GRAM_MAGIC, HANDSHAKE_RESPONSE_SIZE, HANDSHAKE_SIZE};
use crate::gram::error::HandshakeError;

/// Build the client handshake message.
///
/// Layout: 4-byte magic + up to 4 version proposals (4 bytes each,
/// big-endian, highest preference first). Unused slots stay zero.
pub fn build_client_handshake(versions: &[GramVersion]) -> [u8; HANDSHAKE_SIZE] {
    let mut data = [0u8; HANDSHAKE_SIZE];

    data[0..4].copy_from_slice(&GRAM_MAGIC);

    for (i, version) in versions.iter().take(4).enumerate() {
        let offset = 4 + (i * 4);
        data[offset..offset + 4].copy_from_slice(&version.to_bytes());
    }

    data
}

/// Parse the server's 4-byte handshake response.
///
/// All zeroes means the server supports none of the proposed versions. A
/// non-zero value the client did not propose is a protocol violation.
pub fn parse_handshake_response(
    response: [u8; HANDSHAKE_RESPONSE_SIZE],
    proposed: &[GramVersion],
) -> Result<GramVersion, HandshakeError> {
    let raw = u32::from_be_bytes(response);

    if raw == 0 {
        return Err(HandshakeError::NoCompatibleVersion);
    }

    let version = GramVersion::from_bytes(response)
        .ok_or(HandshakeError::UnknownVersion(raw))?;

    if !proposed.contains(&version) {
        return Err(HandshakeError::UnsolicitedVersion(raw));
    }

    Ok(version)
}
