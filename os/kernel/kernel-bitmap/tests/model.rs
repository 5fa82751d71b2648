//! Checks the word-level operations against a naive `Vec<bool>` model.

use kernel_bitmap::{all_clear, all_set, clear_range, find_first_clear, find_first_set, set_range};

const BITS: usize = 200;

/// Small deterministic LCG so the sequence is reproducible.
struct Lcg(u32);

impl Lcg {
    fn next(&mut self, bound: usize) -> usize {
        self.0 = self.0.wrapping_mul(1_103_515_245).wrapping_add(12345);
        (self.0 >> 8) as usize % bound
    }
}

#[test]
fn ranged_updates_match_model() {
    let mut words = [0u32; 7];
    let mut model = vec![false; BITS];
    let mut rng = Lcg(7);

    for step in 0..500 {
        let first = rng.next(BITS);
        let count = rng.next(BITS - first + 1);
        let value = step % 3 != 0;

        if value {
            set_range(&mut words, first, count);
        } else {
            clear_range(&mut words, first, count);
        }
        model[first..first + count].fill(value);

        let probe = rng.next(BITS);
        let len = rng.next(BITS - probe + 1);
        let window = &model[probe..probe + len];
        assert_eq!(all_set(&words, probe, len), window.iter().all(|&b| b));
        assert_eq!(all_clear(&words, probe, len), window.iter().all(|&b| !b));

        assert_eq!(find_first_set(&words, BITS), model.iter().position(|&b| b));
        assert_eq!(find_first_clear(&words, BITS), model.iter().position(|&b| !b));
    }

    // Bits past the logical capacity were never touched.
    assert_eq!(words[6] >> (BITS % 32), 0);
}
