/// Sum of all bytes, wrapping at 16 bit. Used by rdm packages and discovery responses.
#[inline]
pub fn calculate_checksum(data: &[u8]) -> u16 {
    data.iter()
        .fold(0u16, |checksum, byte| checksum.wrapping_add(*byte as u16))
}

/// Encodes bytes the way a discovery response transmits them: every byte `x` becomes
/// `x | 0xAA` followed by `x | 0x55`.
///
/// Stops when either the source or the destination is exhausted.
pub fn encode_disc_unique(src: &[u8], dest: &mut [u8]) {
    for (byte, encoded) in src.iter().zip(dest.chunks_exact_mut(2)) {
        encoded[0] = byte | 0xAA;
        encoded[1] = byte | 0x55;
    }
}

/// Reverses [encode_disc_unique]. The destination has to be at least half the source size.
pub fn decode_disc_unique(src: &[u8], dest: &mut [u8]) {
    for (encoded, byte) in src.chunks_exact(2).zip(dest.iter_mut()) {
        *byte = encoded[0] & encoded[1];
    }
}
