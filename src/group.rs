use std::fmt;

use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::RngCore;
use rand_chacha::ChaCha12Rng;
use serde::{Deserialize, Serialize};

/// Default bit-length of the group modulus.
///
/// 64 bits keeps per-wire group generation interactive but is far below a
/// credible security margin; raise it with `--prime-bits` where runtime
/// allows.
pub const DEFAULT_PRIME_BITS: u64 = 64;

const MILLER_RABIN_ROUNDS: usize = 32;

const SMALL_PRIMES: &[u32] = &[
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89,
    97,
];

/// Cyclic multiplicative group modulo a random prime, with a generator of
/// the full group of order p-1. Generated by the OT sender and shipped to
/// the receiver, fresh per OT instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimeGroup {
    /// The prime modulus p.
    pub prime: BigUint,
    /// A generator g with g^((p-1)/q) != 1 for every prime factor q of p-1.
    pub generator: BigUint,
}

impl PrimeGroup {
    /// Sample a fresh group: a random prime of roughly `bits` bits and a
    /// generator found by the factor test on p-1.
    pub fn generate(bits: u64, rng: &mut ChaCha12Rng) -> Self {
        let prime = gen_prime(bits, rng);
        let generator = find_generator(&prime, rng);
        PrimeGroup { prime, generator }
    }

    /// `a * b mod p`.
    pub fn mul(&self, a: &BigUint, b: &BigUint) -> BigUint {
        (a * b) % &self.prime
    }

    /// `base ^ exp mod p`.
    pub fn pow(&self, base: &BigUint, exp: &BigUint) -> BigUint {
        base.modpow(exp, &self.prime)
    }

    /// `g ^ exp mod p`.
    pub fn gen_pow(&self, exp: &BigUint) -> BigUint {
        self.generator.modpow(exp, &self.prime)
    }

    /// Multiplicative inverse by Fermat: `a ^ (p-2) mod p`.
    pub fn inv(&self, a: &BigUint) -> BigUint {
        let exp = &self.prime - 2u32;
        a.modpow(&exp, &self.prime)
    }

    /// Uniform element of `[1, p-1]`.
    pub fn rand_int(&self, rng: &mut ChaCha12Rng) -> BigUint {
        loop {
            let x = rand_below(&self.prime, rng);
            if !x.is_zero() {
                return x;
            }
        }
    }

    /// Whether `x` is a valid group element, i.e. lies in `[1, p-1]`.
    pub fn contains(&self, x: &BigUint) -> bool {
        !x.is_zero() && x < &self.prime
    }
}

impl fmt::Display for PrimeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PrimeGroup(prime={}, generator={})",
            self.prime, self.generator
        )
    }
}

/// Uniform `BigUint` below `bound` by rejection sampling.
fn rand_below(bound: &BigUint, rng: &mut ChaCha12Rng) -> BigUint {
    let bits = bound.bits();
    loop {
        let x = rand_bits(bits, rng);
        if &x < bound {
            return x;
        }
    }
}

/// Random `BigUint` of at most `bits` bits.
fn rand_bits(bits: u64, rng: &mut ChaCha12Rng) -> BigUint {
    let nbytes = ((bits + 7) / 8) as usize;
    let mut buf = vec![0u8; nbytes];
    rng.fill_bytes(&mut buf);
    let excess = nbytes as u64 * 8 - bits;
    if excess > 0 {
        buf[0] &= 0xffu8 >> excess;
    }
    BigUint::from_bytes_be(&buf)
}

/// Random prime of roughly `bits` bits: sample that many random bits and
/// advance to the next prime.
pub fn gen_prime(bits: u64, rng: &mut ChaCha12Rng) -> BigUint {
    let r = rand_bits(bits, rng);
    next_prime(&r, rng)
}

/// Smallest prime strictly greater than `n`, skipping 2.
fn next_prime(n: &BigUint, rng: &mut ChaCha12Rng) -> BigUint {
    let three = BigUint::from(3u32);
    if n < &three {
        return three;
    }
    let mut candidate = n + 1u32;
    if candidate.is_even() {
        candidate += 1u32;
    }
    while !is_prime(&candidate, rng) {
        candidate += 2u32;
    }
    candidate
}

/// Probabilistic primality: small-prime trial division, then Miller-Rabin
/// with random bases.
pub fn is_prime(n: &BigUint, rng: &mut ChaCha12Rng) -> bool {
    let two = BigUint::from(2u32);
    if n < &two {
        return false;
    }
    for &p in SMALL_PRIMES {
        let p = BigUint::from(p);
        if *n == p {
            return true;
        }
        if (n % &p).is_zero() {
            return false;
        }
    }

    // write n-1 as d * 2^s with d odd
    let n_m1 = n - 1u32;
    let s = n_m1.trailing_zeros().unwrap_or(0);
    let d = &n_m1 >> s;

    'witness: for _ in 0..MILLER_RABIN_ROUNDS {
        let a = loop {
            let a = rand_below(&n_m1, rng);
            if a >= two {
                break a;
            }
        };
        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_m1 {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_m1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Distinct prime factors of `n`: small-prime trial division, then
/// Pollard's rho on whatever composite cofactors remain.
pub fn prime_factors(n: &BigUint, rng: &mut ChaCha12Rng) -> Vec<BigUint> {
    let mut remaining = n.clone();
    let mut factors: Vec<BigUint> = Vec::new();
    for &p in SMALL_PRIMES {
        let p = BigUint::from(p);
        if (&remaining % &p).is_zero() {
            while (&remaining % &p).is_zero() {
                remaining /= &p;
            }
            factors.push(p);
        }
    }

    let mut stack = vec![remaining];
    while let Some(m) = stack.pop() {
        if m.is_one() {
            continue;
        }
        if is_prime(&m, rng) {
            if !factors.contains(&m) {
                factors.push(m);
            }
            continue;
        }
        let d = pollard_rho(&m, rng);
        stack.push(&m / &d);
        stack.push(d);
    }
    factors
}

/// Pollard's rho with Floyd cycle detection. `n` must be an odd composite
/// with no small-prime factors, which `prime_factors` guarantees.
fn pollard_rho(n: &BigUint, rng: &mut ChaCha12Rng) -> BigUint {
    let bound = n - 1u32;
    loop {
        let c = rand_below(&bound, rng) + 1u32;
        let mut x = rand_below(n, rng);
        let mut y = x.clone();
        loop {
            x = (&x * &x + &c) % n;
            y = (&y * &y + &c) % n;
            y = (&y * &y + &c) % n;
            let diff = if x > y { &x - &y } else { &y - &x };
            if diff.is_zero() {
                // cycle closed without exposing a factor, retry with new c
                break;
            }
            let d = diff.gcd(n);
            if !d.is_one() {
                if &d < n {
                    return d;
                }
                break;
            }
        }
    }
}

/// Search for a generator of the full group: factor p-1 into distinct
/// primes and accept a candidate c iff c^((p-1)/q) != 1 for every factor q.
pub fn find_generator(prime: &BigUint, rng: &mut ChaCha12Rng) -> BigUint {
    let order = prime - 1u32;
    let factors = prime_factors(&order, rng);
    loop {
        let candidate = loop {
            let c = rand_below(prime, rng);
            if !c.is_zero() {
                break c;
            }
        };
        let passes = factors
            .iter()
            .all(|q| !candidate.modpow(&(&order / q), prime).is_one());
        if passes {
            return candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> ChaCha12Rng {
        ChaCha12Rng::from_seed([7u8; 32])
    }

    #[test]
    fn test_is_prime_known_values() {
        let mut rng = rng();
        for p in [2u32, 3, 5, 97, 101, 7919] {
            assert!(is_prime(&BigUint::from(p), &mut rng), "{p} is prime");
        }
        assert!(is_prime(&BigUint::from(1_000_000_007u64), &mut rng));
        for c in [1u32, 4, 91, 100, 7917] {
            assert!(!is_prime(&BigUint::from(c), &mut rng), "{c} is composite");
        }
    }

    #[test]
    fn test_gen_prime_magnitude() {
        let mut rng = rng();
        let p = gen_prime(40, &mut rng);
        assert!(is_prime(&p, &mut rng));
        assert!(p.bits() <= 48, "prime far larger than requested: {p}");
    }

    #[test]
    fn test_prime_factors_distinct() {
        let mut rng = rng();
        // 1680 = 2^4 * 3 * 5 * 7
        let mut factors = prime_factors(&BigUint::from(1680u32), &mut rng);
        factors.sort();
        let expected: Vec<BigUint> =
            [2u32, 3, 5, 7].iter().map(|&p| BigUint::from(p)).collect();
        assert_eq!(factors, expected);
    }

    #[test]
    fn test_prime_factors_large_semiprime() {
        let mut rng = rng();
        // 1299709 * 1299721, both prime, out of trial-division range
        let n = BigUint::from(1_299_709u64) * BigUint::from(1_299_721u64);
        let mut factors = prime_factors(&n, &mut rng);
        factors.sort();
        assert_eq!(
            factors,
            vec![BigUint::from(1_299_709u64), BigUint::from(1_299_721u64)]
        );
    }

    #[test]
    fn test_generator_hits_every_factor() {
        let mut rng = rng();
        let group = PrimeGroup::generate(32, &mut rng);
        let order = &group.prime - 1u32;
        for q in prime_factors(&order, &mut rng) {
            assert!(
                !group.pow(&group.generator, &(&order / &q)).is_one(),
                "generator killed by factor {q}"
            );
        }
    }

    #[test]
    fn test_inverse_property() {
        let mut rng = rng();
        let group = PrimeGroup::generate(32, &mut rng);
        for _ in 0..16 {
            let a = group.rand_int(&mut rng);
            assert!(group.mul(&a, &group.inv(&a)).is_one());
        }
    }

    #[test]
    fn test_rand_int_range() {
        let mut rng = rng();
        let group = PrimeGroup::generate(24, &mut rng);
        for _ in 0..64 {
            let x = group.rand_int(&mut rng);
            assert!(group.contains(&x));
        }
    }

    #[test]
    fn test_gen_pow_matches_pow() {
        let mut rng = rng();
        let group = PrimeGroup::generate(24, &mut rng);
        let e = group.rand_int(&mut rng);
        assert_eq!(group.gen_pow(&e), group.pow(&group.generator, &e));
    }

    #[test]
    fn test_groups_are_fresh() {
        let mut rng = rng();
        let g1 = PrimeGroup::generate(40, &mut rng);
        let g2 = PrimeGroup::generate(40, &mut rng);
        assert_ne!(g1, g2);
    }
}
