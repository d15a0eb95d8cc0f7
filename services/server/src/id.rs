//! Session id generation: a CSPRNG-backed base-36 string with comfortably
//! more than 40 bits of entropy.

use rand::rngs::OsRng;
use rand::RngCore;

/// 30 base-36 digits from a 128-bit draw -- far past the 40-bit floor the
/// session id only needs to clear.
pub fn generate() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    let mut value = u128::from_be_bytes(bytes);
    if value == 0 {
        value = 1;
    }
    to_base36(value)
}

const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn to_base36(mut value: u128) -> String {
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 digits are ASCII")
}
