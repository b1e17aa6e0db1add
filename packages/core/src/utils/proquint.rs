//! Pronounceable Distribution Tokens
//!
//! Proquint-style encoding: each 16-bit word becomes a consonant-vowel
//! quintet, giving tokens that can be read over the phone. A channel's
//! human token is two quintets joined by a hyphen (32 bits), generated
//! randomly and collision-checked against existing tokens by the caller.

use rand::Rng;

const CONSONANTS: [char; 16] = [
    'b', 'd', 'f', 'g', 'h', 'j', 'k', 'l', 'm', 'n', 'p', 'r', 's', 't', 'v', 'z',
];
const VOWELS: [char; 4] = ['a', 'i', 'o', 'u'];

/// Encode one 16-bit word as a five-letter quintet.
pub fn encode_u16(mut word: u16) -> String {
    let mut out = ['\0'; 5];
    // con-vowel-con-vowel-con, consuming 4+2+4+2+4 bits from the top.
    out[4] = CONSONANTS[(word & 0xF) as usize];
    word >>= 4;
    out[3] = VOWELS[(word & 0x3) as usize];
    word >>= 2;
    out[2] = CONSONANTS[(word & 0xF) as usize];
    word >>= 4;
    out[1] = VOWELS[(word & 0x3) as usize];
    word >>= 2;
    out[0] = CONSONANTS[(word & 0xF) as usize];
    out.iter().collect()
}

/// Encode a 32-bit value as two hyphen-joined quintets.
pub fn encode_u32(value: u32) -> String {
    format!(
        "{}-{}",
        encode_u16((value >> 16) as u16),
        encode_u16((value & 0xFFFF) as u16)
    )
}

/// Generate a random token.
pub fn generate<R: Rng>(rng: &mut R) -> String {
    encode_u32(rng.gen())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn encoding_is_deterministic() {
        assert_eq!(encode_u16(0), "babab");
        assert_eq!(encode_u16(0xFFFF), "zuzuz");
        assert_eq!(encode_u32(0x0000_FFFF), "babab-zuzuz");
    }

    #[test]
    fn tokens_use_the_pronounceable_alphabet() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let token = generate(&mut rng);
            assert_eq!(token.len(), 11);
            let (a, b) = token.split_once('-').unwrap();
            for quint in [a, b] {
                let chars: Vec<char> = quint.chars().collect();
                assert_eq!(chars.len(), 5);
                for (i, c) in chars.iter().enumerate() {
                    if i % 2 == 0 {
                        assert!(CONSONANTS.contains(c));
                    } else {
                        assert!(VOWELS.contains(c));
                    }
                }
            }
        }
    }
}
