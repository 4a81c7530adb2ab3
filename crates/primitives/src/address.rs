//! Program hashes: the 21-byte form a wallet address takes on chain.

use crate::hash::hash160;

pub type ProgramHash = [u8; 21];

pub const PREFIX_STANDARD: u8 = 0x21;
pub const PREFIX_MULTISIG: u8 = 0x12;
pub const PREFIX_CROSSCHAIN: u8 = 0x4b;

/// Program hash of a redeem script: prefix byte followed by HASH160(code).
pub fn program_hash(prefix: u8, code: &[u8]) -> ProgramHash {
    let mut out = [0u8; 21];
    out[0] = prefix;
    out[1..].copy_from_slice(&hash160(code));
    out
}

pub fn program_hash_to_hex(hash: &ProgramHash) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(hash.len() * 2);
    for byte in hash {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_leads_the_hash() {
        let hash = program_hash(PREFIX_STANDARD, &[0x21, 0xac]);
        assert_eq!(hash[0], PREFIX_STANDARD);
        assert_ne!(hash, program_hash(PREFIX_MULTISIG, &[0x21, 0xac]));
        assert!(program_hash_to_hex(&hash).starts_with("21"));
        assert_eq!(program_hash_to_hex(&hash).len(), 42);
    }
}
