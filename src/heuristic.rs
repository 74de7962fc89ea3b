//! Brightness-seeded placeholder classifier. Not a real detector: it seeds a
//! Mersenne Twister with the mean pixel value of the preprocessed image and
//! draws a verdict and a confidence from it. The generator and the float
//! construction match CPython's `random` module, so results agree with
//! Python clients that seed `random` the same way.

use crate::preprocess::ImageTensor;
use rand::RngCore;

/// A uniform draw above this is a positive verdict (40% positive rate)
pub const POSITIVE_THRESHOLD: f64 = 0.6;

/// Lowest heuristic confidence
pub const MIN_CONFIDENCE: f64 = 0.70;

/// Width of the heuristic confidence range, `[0.70, 0.95)`
pub const CONFIDENCE_SPAN: f64 = 0.25;

/// Seed derived from a mean pixel value: `mean * 1000` truncated toward zero
pub fn seed_for_mean(mean: f64) -> i64 {
    (mean * 1000.0).trunc() as i64
}

/// Seed for an image mean. The mean is rounded to single precision first, so
/// the seed matches a float32 `torch.mean(..).item()`.
pub fn seed_for_image_mean(mean: f64) -> i64 {
    seed_for_mean(mean as f32 as f64)
}

/// A double in `[0, 1)` built from 53 random bits of two 32-bit draws, the
/// way CPython's `random.random()` does
pub fn random53<R: RngCore>(rng: &mut R) -> f64 {
    let a = (rng.next_u32() >> 5) as f64;
    let b = (rng.next_u32() >> 6) as f64;
    (a * 67_108_864.0 + b) * (1.0 / 9_007_199_254_740_992.0)
}

/// A heuristic verdict
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Guess {
    pub seed: i64,
    pub detected: bool,
    pub confidence: f64,
}

/// Draw a verdict for an already computed seed
pub fn guess_from_seed(seed: i64) -> Guess {
    draw(seed, &mut Mt19937::from_int_seed(seed.unsigned_abs()))
}

/// Verdict then confidence, one uniform draw each
fn draw<R: RngCore>(seed: i64, rng: &mut R) -> Guess {
    let detected = random53(rng) > POSITIVE_THRESHOLD;
    let confidence = MIN_CONFIDENCE + random53(rng) * CONFIDENCE_SPAN;
    Guess {
        seed,
        detected,
        confidence,
    }
}

/// Draw a verdict for a preprocessed image
pub fn guess(image: &ImageTensor) -> Guess {
    guess_from_seed(seed_for_image_mean(image.mean()))
}

const N: usize = 624;
const M: usize = 397;
const MATRIX_A: u32 = 0x9908_b0df;
const UPPER_MASK: u32 = 0x8000_0000;
const LOWER_MASK: u32 = 0x7fff_ffff;

/// 32-bit MT19937, seeded the way CPython seeds it from an integer
#[derive(Clone)]
pub struct Mt19937 {
    state: [u32; N],
    index: usize,
}

impl std::fmt::Debug for Mt19937 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Mt19937 {{ index: {} }}", self.index)
    }
}

impl Mt19937 {
    fn from_u32(seed: u32) -> Self {
        let mut state = [0u32; N];
        state[0] = seed;
        for i in 1..N {
            let prev = state[i - 1];
            state[i] = 1_812_433_253u32
                .wrapping_mul(prev ^ (prev >> 30))
                .wrapping_add(i as u32);
        }
        Mt19937 { state, index: N }
    }

    /// `init_by_array` from the reference implementation
    pub fn from_key(key: &[u32]) -> Self {
        let mut mt = Self::from_u32(19_650_218);
        let s = &mut mt.state;
        let key_len = key.len().max(1);
        let (mut i, mut j) = (1usize, 0usize);

        for _ in 0..N.max(key_len) {
            let prev = s[i - 1];
            let k = key.get(j).copied().unwrap_or(0);
            s[i] = (s[i] ^ (prev ^ (prev >> 30)).wrapping_mul(1_664_525))
                .wrapping_add(k)
                .wrapping_add(j as u32);
            i += 1;
            j += 1;
            if i >= N {
                s[0] = s[N - 1];
                i = 1;
            }
            if j >= key_len {
                j = 0;
            }
        }
        for _ in 0..N - 1 {
            let prev = s[i - 1];
            s[i] = (s[i] ^ (prev ^ (prev >> 30)).wrapping_mul(1_566_083_941))
                .wrapping_sub(i as u32);
            i += 1;
            if i >= N {
                s[0] = s[N - 1];
                i = 1;
            }
        }
        s[0] = UPPER_MASK;
        mt
    }

    /// Seed from a non-negative integer: its 32-bit little-endian words form
    /// the key, with zero encoded as a single zero word
    pub fn from_int_seed(seed: u64) -> Self {
        let lo = seed as u32;
        let hi = (seed >> 32) as u32;
        if hi == 0 {
            Self::from_key(&[lo])
        } else {
            Self::from_key(&[lo, hi])
        }
    }

    fn twist(&mut self) {
        for i in 0..N {
            let y = (self.state[i] & UPPER_MASK) | (self.state[(i + 1) % N] & LOWER_MASK);
            let mut next = self.state[(i + M) % N] ^ (y >> 1);
            if y & 1 != 0 {
                next ^= MATRIX_A;
            }
            self.state[i] = next;
        }
        self.index = 0;
    }

    pub fn genrand_u32(&mut self) -> u32 {
        if self.index >= N {
            self.twist();
        }
        let mut y = self.state[self.index];
        self.index += 1;

        y ^= y >> 11;
        y ^= (y << 7) & 0x9d2c_5680;
        y ^= (y << 15) & 0xefc6_0000;
        y ^ (y >> 18)
    }

    /// A double in `[0, 1)`, see [`random53`]
    pub fn random(&mut self) -> f64 {
        random53(self)
    }
}

impl RngCore for Mt19937 {
    fn next_u32(&mut self) -> u32 {
        self.genrand_u32()
    }

    fn next_u64(&mut self) -> u64 {
        let lo = self.genrand_u32() as u64;
        let hi = self.genrand_u32() as u64;
        (hi << 32) | lo
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let bytes = self.genrand_u32().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}
