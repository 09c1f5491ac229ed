//! Convergence checks over generated operation pairs.
//!
//! A small deterministic generator builds random edits against random
//! texts; every pair must satisfy the transform property in both priority
//! directions.

use quill_core::{transform, transform_pair, Component, Operation, OtError, Priority};

/// Deterministic linear congruential generator, enough for test data.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, n: usize) -> usize {
        if n == 0 {
            0
        } else {
            (self.next() % n as u64) as usize
        }
    }
}

fn random_text(rng: &mut Lcg, max_len: usize) -> String {
    const ALPHABET: &[char] = &['a', 'b', 'c', ' ', 'é', '\n', 'z'];
    let len = rng.below(max_len + 1);
    (0..len).map(|_| ALPHABET[rng.below(ALPHABET.len())]).collect()
}

fn random_operation(rng: &mut Lcg, base_len: usize) -> Operation {
    let mut op = Operation::new();
    let mut remaining = base_len;
    while remaining > 0 {
        let span = 1 + rng.below(remaining.min(4));
        match rng.below(3) {
            0 => op.push(Component::Retain(span)),
            1 => op.push(Component::Delete(span)),
            _ => {
                op.push(Component::Insert(random_text(rng, 3)));
                continue;
            }
        }
        remaining -= span;
    }
    if rng.below(2) == 0 {
        op.push(Component::Insert(random_text(rng, 3)));
    }
    op
}

#[test]
fn test_generated_pairs_converge() {
    let mut rng = Lcg(0x5eed);
    for _ in 0..2_000 {
        let text = random_text(&mut rng, 12);
        let base_len = text.chars().count();
        let a = random_operation(&mut rng, base_len);
        let b = random_operation(&mut rng, base_len);

        for priority in [Priority::Left, Priority::Right] {
            let a_prime = transform(&a, &b, priority).unwrap();
            let b_prime = transform(&b, &a, priority.opposite()).unwrap();

            let via_a = b_prime.apply(&a.apply(&text).unwrap()).unwrap();
            let via_b = a_prime.apply(&b.apply(&text).unwrap()).unwrap();
            assert_eq!(
                via_a, via_b,
                "diverged on {text:?} with a={a:?} b={b:?} priority={priority:?}"
            );
        }
    }
}

#[test]
fn test_generated_pairs_match_transform_pair() {
    let mut rng = Lcg(42);
    for _ in 0..500 {
        let text = random_text(&mut rng, 10);
        let base_len = text.chars().count();
        let a = random_operation(&mut rng, base_len);
        let b = random_operation(&mut rng, base_len);

        let (a_prime, b_prime) = transform_pair(&a, &b, Priority::Right).unwrap();
        assert_eq!(a_prime.base_len(), b.target_len());
        assert_eq!(b_prime.base_len(), a.target_len());
        assert_eq!(a_prime.target_len(), b_prime.target_len());
    }
}

#[test]
fn test_mismatched_apply_never_writes() {
    let mut rng = Lcg(7);
    for _ in 0..200 {
        let text = random_text(&mut rng, 10);
        let len = text.chars().count();
        let extra = rng.below(3);
        let op = random_operation(&mut rng, len + 1 + extra);
        match op.apply(&text) {
            Err(OtError::LengthMismatch { expected, actual }) => {
                assert_eq!(expected, op.base_len());
                assert_eq!(actual, len);
            }
            other => panic!("expected length mismatch, got {other:?}"),
        }
    }
}

#[test]
fn test_three_way_scenario() {
    // A appends " world" while B deletes "hello"; both end at " world".
    let base = "hello";
    let a = Operation::new().retain(5).insert(" world");
    let b = Operation::new().delete(5);

    let on_a = a.apply(base).unwrap();
    assert_eq!(on_a, "hello world");
    let b_rebased = transform(&b, &a, Priority::Right).unwrap();
    let a_final = b_rebased.apply(&on_a).unwrap();

    let on_b = b.apply(base).unwrap();
    let a_rebased = transform(&a, &b, Priority::Left).unwrap();
    let b_final = a_rebased.apply(&on_b).unwrap();

    assert_eq!(a_final, " world");
    assert_eq!(b_final, " world");
}
