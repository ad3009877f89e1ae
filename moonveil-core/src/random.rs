//! Deterministic randomness and naming
//!
//! Every random decision in a session flows through one [`Random`] value
//! seeded from the session seed. The same seed and the same sequence of
//! calls always yield the same values, so the same input and options always
//! produce byte-identical output. Nothing here is cryptographically strong.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::lexer::KEYWORDS;

/// Which lexical number forms the target's lexer accepts besides decimal/hex
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NumberStyles {
    /// `0b1010` literals
    pub binary: bool,
    /// `1_000` and `0xFF_FF` digit separators
    pub underscores: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameStyle {
    Lower,
    Upper,
    Mixed,
    Underscored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumberForm {
    Decimal,
    LowerHex,
    UpperHex,
    Binary,
    UnderscoreDecimal,
    UnderscoreHex,
}

const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";

/// Seeded generator plus the session's set of taken identifiers
pub struct Random {
    rng: StdRng,
    taken: HashSet<String>,
    suffix: u64,
}

impl Random {
    pub fn new(seed: u64) -> Self {
        let mut taken = HashSet::new();
        taken.extend(KEYWORDS.iter().map(|k| k.to_string()));
        Self {
            rng: StdRng::seed_from_u64(seed),
            taken,
            suffix: 0,
        }
    }

    /// Uniform float in `[0, 1)`
    pub fn next_float(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// Uniform integer in `[min, max]`; the bounds may be given in either order
    pub fn next_int(&mut self, min: i64, max: i64) -> i64 {
        let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
        self.rng.gen_range(lo..=hi)
    }

    /// Uniform index into a collection of `len` items (`len` > 0)
    pub fn index(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }

    pub fn chance(&mut self, p: f64) -> bool {
        self.next_float() < p
    }

    /// Uniform choice; `items` must be non-empty
    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> &'a T {
        let i = self.index(items.len());
        &items[i]
    }

    /// Choice proportional to `weights`; `items` and `weights` must be the same
    /// non-zero length
    pub fn weighted_pick<'a, T>(&mut self, items: &'a [T], weights: &[f64]) -> &'a T {
        debug_assert_eq!(items.len(), weights.len());
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return self.pick(items);
        }
        let mut roll = self.next_float() * total;
        for (item, weight) in items.iter().zip(weights) {
            if roll < *weight {
                return item;
            }
            roll -= weight;
        }
        &items[items.len() - 1]
    }

    /// Fisher-Yates shuffle using the session stream
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.rng.gen_range(0..=i);
            items.swap(i, j);
        }
    }

    pub fn bytes(&mut self, n: usize) -> Vec<u8> {
        (0..n).map(|_| self.rng.gen::<u8>()).collect()
    }

    /// Key bytes for XOR encodings; never zero so no byte passes through unchanged
    pub fn random_key(&mut self, len: usize) -> Vec<u8> {
        (0..len).map(|_| self.rng.gen_range(1..=255u8)).collect()
    }

    /// Mark names as unavailable for generation
    pub fn reserve<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.taken.extend(names.into_iter().map(Into::into));
    }

    pub fn is_taken(&self, name: &str) -> bool {
        self.taken.contains(name)
    }

    /// A short styled identifier never handed out before in this session and
    /// never equal to a reserved or input name
    pub fn unique_name(&mut self, len: Option<usize>) -> String {
        for _ in 0..48 {
            let len = match len {
                Some(n) => n.clamp(1, 3),
                None => *self.weighted_pick(&[1usize, 2, 3], &[1.0, 4.0, 6.0]),
            };
            let candidate = self.styled_name(len);
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
        }

        // Short names exhausted: fall back to a counter suffix
        let base = self.styled_name(len.unwrap_or(2).clamp(1, 3));
        loop {
            self.suffix += 1;
            let candidate = format!("{}{}", base, self.suffix);
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    fn styled_name(&mut self, len: usize) -> String {
        let style = *self.weighted_pick(
            &[
                NameStyle::Lower,
                NameStyle::Upper,
                NameStyle::Mixed,
                NameStyle::Underscored,
            ],
            &[4.0, 2.0, 3.0, 1.0],
        );
        let mut name = String::with_capacity(len);
        for i in 0..len {
            let c = match style {
                NameStyle::Lower => self.name_char(i, LOWER),
                NameStyle::Upper => self.name_char(i, UPPER),
                NameStyle::Mixed => {
                    if self.chance(0.5) {
                        self.name_char(i, LOWER)
                    } else {
                        self.name_char(i, UPPER)
                    }
                }
                NameStyle::Underscored => {
                    if i == 0 || (i == len - 1 && len > 2 && self.chance(0.3)) {
                        '_'
                    } else {
                        let set = if self.chance(0.5) { LOWER } else { UPPER };
                        self.name_char(i, set)
                    }
                }
            };
            name.push(c);
        }
        name
    }

    fn name_char(&mut self, position: usize, letters: &[u8]) -> char {
        if position > 0 && self.chance(0.2) {
            *self.pick(DIGITS) as char
        } else {
            *self.pick(letters) as char
        }
    }

    /// Render a non-negative integer in one of several equivalent lexical
    /// forms. Negative values are rendered in plain decimal.
    pub fn format_number(&mut self, n: i64, styles: NumberStyles) -> String {
        if n < 0 {
            return n.to_string();
        }
        let mut forms = vec![
            NumberForm::Decimal,
            NumberForm::LowerHex,
            NumberForm::UpperHex,
        ];
        let mut weights = vec![4.0, 3.0, 3.0];
        if styles.binary && n < (1 << 20) {
            forms.push(NumberForm::Binary);
            weights.push(1.0);
        }
        if styles.underscores && n >= 1000 {
            forms.push(NumberForm::UnderscoreDecimal);
            weights.push(1.0);
        }
        if styles.underscores && n >= 0x100 {
            forms.push(NumberForm::UnderscoreHex);
            weights.push(1.0);
        }

        match *self.weighted_pick(&forms, &weights) {
            NumberForm::Decimal => n.to_string(),
            NumberForm::LowerHex => format!("0x{:x}", n),
            NumberForm::UpperHex => format!("0x{:X}", n),
            NumberForm::Binary => format!("0b{:b}", n),
            NumberForm::UnderscoreDecimal => group_digits(&n.to_string(), 3),
            NumberForm::UnderscoreHex => format!("0x{}", group_digits(&format!("{:X}", n), 2)),
        }
    }
}

/// Insert `_` every `width` digits counting from the right
fn group_digits(digits: &str, width: usize) -> String {
    let bytes = digits.as_bytes();
    let mut out = String::with_capacity(bytes.len() + bytes.len() / width);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 && (bytes.len() - i) % width == 0 {
            out.push('_');
        }
        out.push(*b as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_lua_int(text: &str) -> i64 {
        let clean: String = text.chars().filter(|c| *c != '_').collect();
        if let Some(hex) = clean.strip_prefix("0x").or_else(|| clean.strip_prefix("0X")) {
            i64::from_str_radix(hex, 16).unwrap()
        } else if let Some(bin) = clean.strip_prefix("0b") {
            i64::from_str_radix(bin, 2).unwrap()
        } else {
            clean.parse().unwrap()
        }
    }

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = Random::new(42);
        let mut b = Random::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_int(-1000, 1000), b.next_int(-1000, 1000));
        }
        assert_eq!(a.unique_name(None), b.unique_name(None));
        assert_eq!(a.bytes(16), b.bytes(16));
    }

    #[test]
    fn test_different_seeds_diverge() {
        let mut a = Random::new(1);
        let mut b = Random::new(2);
        let xs: Vec<i64> = (0..16).map(|_| a.next_int(0, 1 << 30)).collect();
        let ys: Vec<i64> = (0..16).map(|_| b.next_int(0, 1 << 30)).collect();
        assert_ne!(xs, ys);
    }

    #[test]
    fn test_next_int_inclusive_and_swapped_bounds() {
        let mut rng = Random::new(7);
        for _ in 0..500 {
            let v = rng.next_int(5, -5);
            assert!((-5..=5).contains(&v));
        }
        assert_eq!(rng.next_int(3, 3), 3);
    }

    #[test]
    fn test_shuffle_is_permutation() {
        let mut rng = Random::new(9);
        let mut items: Vec<u32> = (0..50).collect();
        rng.shuffle(&mut items);
        let mut sorted = items.clone();
        sorted.sort();
        assert_eq!(sorted, (0..50).collect::<Vec<_>>());
        assert_ne!(items, sorted);
    }

    #[test]
    fn test_weighted_pick_respects_zero_weight() {
        let mut rng = Random::new(3);
        for _ in 0..200 {
            assert_ne!(*rng.weighted_pick(&['a', 'b', 'c'], &[1.0, 0.0, 1.0]), 'b');
        }
    }

    #[test]
    fn test_unique_names_never_repeat_or_hit_keywords() {
        let mut rng = Random::new(11);
        let mut seen = HashSet::new();
        for _ in 0..5000 {
            let name = rng.unique_name(None);
            assert!(!KEYWORDS.contains(&name.as_str()), "{name} is a keyword");
            assert!(!name.as_bytes()[0].is_ascii_digit());
            assert!(seen.insert(name));
        }
    }

    #[test]
    fn test_unique_name_exhaustion_falls_back_to_suffix() {
        let mut rng = Random::new(5);
        // 53 one-character identifiers exist; ask for more than that
        let names: Vec<String> = (0..120).map(|_| rng.unique_name(Some(1))).collect();
        let distinct: HashSet<_> = names.iter().collect();
        assert_eq!(distinct.len(), names.len());
        assert!(names.iter().any(|n| n.len() > 1));
    }

    #[test]
    fn test_reserved_names_are_skipped() {
        let mut rng = Random::new(5);
        let singles: Vec<String> = (b'a'..=b'z').map(|c| (c as char).to_string()).collect();
        rng.reserve(singles.clone());
        for _ in 0..200 {
            let name = rng.unique_name(Some(1));
            assert!(!singles.contains(&name));
        }
    }

    #[test]
    fn test_format_number_round_trips() {
        let mut rng = Random::new(21);
        let styles = NumberStyles {
            binary: true,
            underscores: true,
        };
        for n in [0i64, 1, 9, 255, 256, 1000, 65535, 123456, 1 << 30] {
            for _ in 0..20 {
                let text = rng.format_number(n, styles);
                assert_eq!(parse_lua_int(&text), n, "{text}");
            }
        }
    }

    #[test]
    fn test_format_number_respects_styles() {
        let mut rng = Random::new(21);
        for _ in 0..500 {
            let text = rng.format_number(123456, NumberStyles::default());
            assert!(!text.contains('_'));
            assert!(!text.starts_with("0b"));
        }
    }

    #[test]
    fn test_group_digits() {
        assert_eq!(group_digits("1234567", 3), "1_234_567");
        assert_eq!(group_digits("FFFF", 2), "FF_FF");
        assert_eq!(group_digits("12", 3), "12");
    }

    #[test]
    fn test_random_key_has_no_zero_bytes() {
        let mut rng = Random::new(8);
        assert!(rng.random_key(256).iter().all(|b| *b != 0));
    }
}
