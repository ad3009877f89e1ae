//! Per-call obfuscation state
//!
//! A [`Session`] is built for every `obfuscate` call and handed to each pass
//! by `&mut`. Nothing outlives the call.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::ast::{BinOp, Block, Expr, LocalName, Stmt, UnOp};
use crate::config::{Features, ObfuscateOptions, Tuning};
use crate::random::Random;
use crate::target::{BitwiseStyle, Target, TargetProfile};

/// Counters reported back to the caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub input_size: usize,
    pub output_size: usize,
    #[serde(rename = "time")]
    pub time_ms: u64,
    pub strings_encrypted: usize,
    pub constants_encrypted: usize,
    pub variables_renamed: usize,
    pub junk_injected: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

pub struct Session {
    pub seed: u64,
    pub target: Target,
    pub profile: TargetProfile,
    pub features: Features,
    pub tuning: Tuning,
    pub random: Random,
    /// Original name to generated name, in first-occurrence order
    pub renames: IndexMap<String, String>,
    /// Library paths generated code uses (`type`, `string.char`) and the
    /// locals they are bound to, not yet emitted
    pub globals: IndexMap<String, String>,
    pub stats: Stats,
}

impl Session {
    /// Build a session for one call. `input_names` are reserved so generated
    /// names never collide with anything the program already uses.
    pub fn new(options: &ObfuscateOptions, input_names: &BTreeSet<String>) -> Self {
        let mut random = Random::new(options.seed);
        random.reserve(options.target.builtins());
        random.reserve(input_names.iter().cloned());
        Self {
            seed: options.seed,
            target: options.target,
            profile: options.target.profile(),
            features: options.features.resolve(options.target),
            tuning: options.tuning.clone(),
            random,
            renames: IndexMap::new(),
            globals: IndexMap::new(),
            stats: Stats::default(),
        }
    }

    pub fn fresh_name(&mut self) -> String {
        self.random.unique_name(None)
    }

    /// Integer literal in a randomly chosen lexical form the target accepts
    pub fn number(&mut self, n: i64) -> Expr {
        if n < 0 {
            // Negative forms are written as a negation of the magnitude
            let magnitude = n.unsigned_abs();
            if let Ok(m) = i64::try_from(magnitude) {
                return Expr::paren(Expr::unary(UnOp::Neg, self.number(m)));
            }
            return Expr::int(n);
        }
        let form = self.random.format_number(n, self.profile.number_styles);
        Expr::int_with_form(n, form)
    }

    /// String literal that later passes leave alone
    pub fn plain_string(&self, value: &[u8]) -> Expr {
        Expr::String(crate::ast::StrLit {
            value: value.to_vec(),
            form: Some(crate::printer::quote_string(value)),
        })
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        self.stats.warnings.push(message);
    }

    /// Reference to a library function through a local bound at the chunk
    /// head, so user locals named `type` or `string` cannot hide it
    pub fn global(&mut self, path: &str) -> Expr {
        if let Some(alias) = self.globals.get(path) {
            return Expr::name(alias.as_str());
        }
        let alias = self.fresh_name();
        self.globals.insert(path.to_string(), alias.clone());
        Expr::name(alias)
    }

    /// Prepend `local a, b = type, string.char` for every alias handed out
    /// since the last call
    pub fn bind_globals(&mut self, program: &mut Block) {
        if self.globals.is_empty() {
            return;
        }
        let (names, values): (Vec<LocalName>, Vec<Expr>) = self
            .globals
            .drain(..)
            .map(|(path, alias)| (LocalName::plain(alias), Expr::path(&path)))
            .unzip();
        program.insert(0, Stmt::Local { names, values });
    }

    pub fn bxor(&mut self, a: Expr, b: Expr) -> Expr {
        self.bitwise("bxor", BinOp::BXor, a, b)
    }

    pub fn band(&mut self, a: Expr, b: Expr) -> Expr {
        self.bitwise("band", BinOp::BAnd, a, b)
    }

    pub fn bor(&mut self, a: Expr, b: Expr) -> Expr {
        self.bitwise("bor", BinOp::BOr, a, b)
    }

    fn bitwise(&mut self, function: &str, op: BinOp, a: Expr, b: Expr) -> Expr {
        match self.profile.bitwise {
            BitwiseStyle::Bit32 => {
                let callee = self.global(&format!("bit32.{}", function));
                Expr::call(callee, vec![a, b])
            }
            BitwiseStyle::Native => Expr::paren(Expr::binary(op, a, b)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::printer::print_expr;

    fn session(target: Target) -> Session {
        let options = ObfuscateOptions::new(target, 42, Features::all());
        Session::new(&options, &BTreeSet::new())
    }

    #[test]
    fn test_features_resolved_against_target() {
        assert!(!session(Target::Roblox).features.environment_check);
        assert!(session(Target::Standard).features.environment_check);
    }

    #[test]
    fn test_generated_names_avoid_builtins_and_input() {
        let options = ObfuscateOptions::new(Target::Roblox, 1, Features::default());
        let input: BTreeSet<String> = ["a", "b", "x"].iter().map(|s| s.to_string()).collect();
        let mut s = Session::new(&options, &input);
        for _ in 0..2000 {
            let name = s.fresh_name();
            assert!(!input.contains(&name));
            assert!(!Target::Roblox.builtins().contains(&name.as_str()));
        }
    }

    #[test]
    fn test_bitwise_follows_target() {
        let native = session(Target::Standard).bxor(Expr::name("a"), Expr::name("b"));
        assert_eq!(print_expr(&native), "(a ~ b)");
        let mut s = session(Target::Roblox);
        let luau = s.band(Expr::name("a"), Expr::name("b"));
        let alias = s.globals["bit32.band"].clone();
        assert_eq!(print_expr(&luau), format!("{alias}(a, b)"));
    }

    #[test]
    fn test_globals_bound_once_at_chunk_head() {
        let mut s = session(Target::Standard);
        let first = s.global("string.char");
        assert_eq!(s.global("string.char"), first);
        let kind = s.global("type");

        let mut program = vec![Stmt::Break];
        s.bind_globals(&mut program);
        assert!(s.globals.is_empty());
        let Stmt::Local { names, values } = &program[0] else {
            panic!("binding missing");
        };
        assert_eq!(Expr::name(names[0].name.as_str()), first);
        assert_eq!(Expr::name(names[1].name.as_str()), kind);
        assert_eq!(values[0], Expr::path("string.char"));
        assert_eq!(values[1], Expr::name("type"));

        // nothing pending, nothing added
        s.bind_globals(&mut program);
        assert_eq!(program.len(), 2);
    }

    #[test]
    fn test_number_forms_are_valid_for_target() {
        let mut s = session(Target::Standard);
        for n in [0, 7, 255, 1000, 65535, 1 << 30] {
            let text = print_expr(&s.number(n));
            assert!(!text.contains('_') && !text.starts_with("0b"), "{text}");
        }
        assert!(print_expr(&s.number(-5)).starts_with("(-"));
    }

    #[test]
    fn test_stats_json_field_names() {
        let stats = Stats {
            time_ms: 12,
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["time"], 12);
        assert!(json.get("inputSize").is_some());
        assert!(json.get("warnings").is_none());
    }
}
