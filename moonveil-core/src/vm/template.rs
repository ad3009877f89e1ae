//! Interpreter emitted next to the bytecode
//!
//! The interpreter is written here as readable Lua with a few `$NAME`
//! placeholders, parsed back into an AST and stripped of its local names
//! before it joins the output. Handler registration order follows the
//! session stream, as does every generated name.

use crate::ast::{collect_names, Block};
use crate::error::ObfuscateError;
use crate::parser::parse;
use crate::printer::quote_string;
use crate::random::Random;
use crate::session::Session;
use crate::target::BitwiseStyle;
use crate::transform::{Pass, Renamer};

use super::opcodes::{Op, OpcodeMap};
use super::serialize::{OPERAND_BIAS, TAG_STRING};

/// What the interpreter needs to know about its payload
pub struct TemplateInput<'a> {
    pub hex: &'a str,
    pub key: &'a [u8],
    pub magic: u32,
    pub opcodes: &'a OpcodeMap,
    pub iteration_cap: u64,
    pub bitwise: BitwiseStyle,
}

const PRELUDE: &str = r##"
local unpack = table.unpack or unpack
local env = (getfenv and getfenv()) or _ENV or _G
local data = $DATA
local key = { $KEY }
local cap = $CAP
$BXOR
$UDIV
local function pack(...)
    return { n = select("#", ...), ... }
end
local function decode()
    local out = {}
    local n = #key
    local j = 0
    for i = 1, #data, 2 do
        j = j + 1
        out[j] = string.char(bxor(tonumber(string.sub(data, i, i + 1), 16), key[(j - 1) % n + 1]))
    end
    return table.concat(out)
end
local blob = decode()
local pos = 1
local function u8()
    local v = string.byte(blob, pos)
    pos = pos + 1
    return v
end
local function u32()
    local b1, b2, b3, b4 = string.byte(blob, pos, pos + 3)
    pos = pos + 4
    return b1 + b2 * 256 + b3 * 65536 + b4 * 16777216
end
local function operand()
    return u32() - $BIAS
end
local function text()
    local n = u32()
    local s = string.sub(blob, pos, pos + n - 1)
    pos = pos + n
    return s
end
if u32() ~= #blob - 4 or u32() ~= $MAGIC then
    error("corrupt bytecode", 0)
end
local version = u32()
local flags = u32()
local K = {}
local nk = u32()
for i = 0, nk - 1 do
    local tag = u8()
    local s = text()
    if tag == $TAG_STRING then
        K[i] = s
    else
        K[i] = tonumber(s) or 0 / 0
    end
end
local P = {}
local np = u32()
for p = 0, np - 1 do
    local proto = {}
    proto.np = u32()
    proto.va = u8() == 1
    proto.up = {}
    proto.code = {}
    local nu = u32()
    for i = 1, nu do
        local kind = u8()
        proto.up[i] = { kind, u32() }
    end
    local ni = u32()
    for i = 1, ni do
        local op = u32()
        local a = operand()
        local b = operand()
        local c = operand()
        local decoy = u8() == 1
        proto.code[i] = { op, a, b, c, decoy, u32() }
    end
    P[p] = proto
end
local H = {}
local run
local function closure(index, cells, ups)
    local proto = P[index]
    local captured = {}
    for i, d in ipairs(proto.up) do
        if d[1] == 0 then
            captured[i - 1] = cells[d[2]]
        else
            captured[i - 1] = ups[d[2]]
        end
    end
    return function(...)
        return run(proto, captured, ...)
    end
end
run = function(proto, ups, ...)
    local args = pack(...)
    local F = { S = {}, t = 0, L = {}, U = ups, M = {}, m = 0, p = 1 }
    local count = proto.np
    for i = 1, count do
        F.L[i - 1] = { args[i] }
    end
    if proto.va then
        local V = { n = 0 }
        for i = count + 1, args.n do
            V[i - count] = args[i]
        end
        if args.n > count then
            V.n = args.n - count
        end
        F.V = V
    end
    local code = proto.code
    local steps = 0
    while true do
        local ins = code[F.p]
        if ins == nil then
            return
        end
        F.p = F.p + 1
        if not ins[5] then
            steps = steps + 1
            if steps > cap then
                error("vm iteration limit exceeded", 0)
            end
            H[ins[1]](F, ins[2], ins[3], ins[4])
            if F.r then
                return unpack(F.r, 1, F.r.n)
            end
        end
    end
end
"##;

const EPILOGUE: &str = "return run(P[0], {}, ...)\n";

const PUSH_PREFIX: &str = "local t = F.t + 1\n";
const PUSH_SUFFIX: &str = "\nF.t = t";

fn push(value: &str) -> String {
    format!("{PUSH_PREFIX}F.S[t] = {value}{PUSH_SUFFIX}")
}

/// Pop into `v`, then run `rest`
fn pop(rest: &str) -> String {
    format!("local S, t = F.S, F.t\nlocal v = S[t]\nS[t] = nil\nF.t = t - 1\n{rest}")
}

/// Replace the two top values with `expr` over `x` and `y`
fn binary(expr: &str) -> String {
    format!(
        "local S, t = F.S, F.t\nlocal x, y = S[t - 1], S[t]\nS[t] = nil\nF.t = t - 1\nS[t - 1] = {expr}"
    )
}

fn unary(expr: &str) -> String {
    format!("local S, t = F.S, F.t\nlocal x = S[t]\nS[t] = {expr}")
}

/// Pop the innermost mark into `base`, then run `rest`
fn unmark(rest: &str) -> String {
    format!("local S, m = F.S, F.m\nlocal base = F.M[m]\nF.M[m] = nil\nF.m = m - 1\n{rest}")
}

fn handler(op: Op, bitwise: BitwiseStyle) -> String {
    let bit = |native: &str, library: &str| match bitwise {
        BitwiseStyle::Native => binary(native),
        BitwiseStyle::Bit32 => binary(library),
    };
    match op {
        Op::LoadK => push("K[a]"),
        Op::LoadNil => "local S, t = F.S, F.t\nfor i = 1, a do\nS[t + i] = nil\nend\nF.t = t + a".into(),
        Op::LoadTrue => push("true"),
        Op::LoadFalse => push("false"),
        Op::NewLocal => pop("F.L[a] = { v }"),
        Op::GetLocal => push("F.L[a][1]"),
        Op::SetLocal => pop("F.L[a][1] = v"),
        Op::GetUpval => push("F.U[a][1]"),
        Op::SetUpval => pop("F.U[a][1] = v"),
        Op::GetGlobal => push("env[K[a]]"),
        Op::SetGlobal => pop("env[K[a]] = v"),
        Op::GetTable => binary("x[y]"),
        Op::GetField => unary("x[K[a]]"),
        Op::SetTable => "local S, t = F.S, F.t\nS[t - 2][S[t - 1]] = S[t]\nS[t] = nil\nS[t - 1] = nil\nS[t - 2] = nil\nF.t = t - 3".into(),
        Op::NewTable => push("{}"),
        Op::TSetKV => "local S, t = F.S, F.t\nS[F.M[F.m]][S[t - 1]] = S[t]\nS[t] = nil\nS[t - 1] = nil\nF.t = t - 2".into(),
        Op::SetList => unmark("local tbl = S[base]\nfor i = base + 1, F.t do\ntbl[i - base] = S[i]\nS[i] = nil\nend\nF.t = base"),
        Op::Add => binary("x + y"),
        Op::Sub => binary("x - y"),
        Op::Mul => binary("x * y"),
        Op::Div => binary("x / y"),
        Op::IDiv => match bitwise {
            BitwiseStyle::Native => binary("x // y"),
            BitwiseStyle::Bit32 => binary("math.floor(x / y)"),
        },
        Op::Mod => binary("x % y"),
        Op::Pow => binary("x ^ y"),
        Op::Concat => binary("x .. y"),
        Op::BAnd => bit("x & y", "bit32.band(x, y)"),
        Op::BOr => bit("x | y", "bit32.bor(x, y)"),
        Op::BXor => bit("x ~ y", "bit32.bxor(x, y)"),
        Op::Shl => bit("x << y", "bit32.lshift(x, y)"),
        Op::Shr => bit("x >> y", "bit32.rshift(x, y)"),
        Op::Eq => binary("x == y"),
        Op::Ne => binary("x ~= y"),
        Op::Lt => binary("x < y"),
        Op::Le => binary("x <= y"),
        Op::Gt => binary("x > y"),
        Op::Ge => binary("x >= y"),
        Op::Unm => unary("-x"),
        Op::Not => unary("not x"),
        Op::Len => unary("#x"),
        Op::BNot => match bitwise {
            BitwiseStyle::Native => unary("~x"),
            BitwiseStyle::Bit32 => unary("bit32.bnot(x)"),
        },
        Op::Jmp => "F.p = F.p + b".into(),
        Op::JmpIf => pop("if v then\nF.p = F.p + b\nend"),
        Op::JmpIfNot => pop("if not v then\nF.p = F.p + b\nend"),
        Op::JmpIfKeep => "local S, t = F.S, F.t\nif S[t] then\nF.p = F.p + b\nelse\nS[t] = nil\nF.t = t - 1\nend".into(),
        Op::JmpIfNotKeep => "local S, t = F.S, F.t\nif not S[t] then\nF.p = F.p + b\nelse\nS[t] = nil\nF.t = t - 1\nend".into(),
        Op::Mark => "local m = F.m + 1\nF.M[m] = F.t\nF.m = m".into(),
        Op::Call => unmark(
            "local top = F.t\n\
             local r = pack(S[base + 1](unpack(S, base + 2, top)))\n\
             for i = base + 1, top do\nS[i] = nil\nend\n\
             local n = c - 1\n\
             if c == 0 then\nn = r.n\nend\n\
             for i = 1, n do\nS[base + i] = r[i]\nend\n\
             F.t = base + n",
        ),
        Op::SelfOp => "local S, t = F.S, F.t\nlocal o = S[t]\nS[t] = o[K[a]]\nS[t + 1] = o\nF.t = t + 1".into(),
        Op::Return => unmark(
            "local r = { n = F.t - base }\n\
             for i = 1, r.n do\nr[i] = S[base + i]\nend\n\
             F.r = r",
        ),
        Op::Vararg => "local V, S, t = F.V, F.S, F.t\nlocal n = a - 1\nif a == 0 then\nn = V.n\nend\nfor i = 1, n do\nS[t + i] = V[i]\nend\nF.t = t + n".into(),
        Op::Adjust => unmark(
            "local want = base + a\n\
             for i = want + 1, F.t do\nS[i] = nil\nend\n\
             for i = F.t + 1, want do\nS[i] = nil\nend\n\
             F.t = want",
        ),
        Op::Pop => "local S, t = F.S, F.t\nfor i = t - a + 1, t do\nS[i] = nil\nend\nF.t = t - a".into(),
        Op::Closure => push("closure(b, F.L, F.U)"),
        Op::ForPrep => for_prep(bitwise),
        Op::ForTest => "local L = F.L\n\
             local C = L[a + 1]\n\
             if C.n ~= nil then\nif C.d then\nF.p = F.p + b\nend\n\
             elseif L[a + 2][1] > 0 then\nif L[a][1] > C[1] then\nF.p = F.p + b\nend\n\
             elseif L[a][1] < C[1] then\nF.p = F.p + b\nend"
            .into(),
        Op::ForStep => "local L = F.L\n\
             local C = L[a + 1]\n\
             if C.n == 0 then\nC.d = true\n\
             else\n\
             if C.n ~= nil then\nC.n = C.n - 1\nend\n\
             L[a][1] = L[a][1] + L[a + 2][1]\n\
             end"
            .into(),
        Op::TForTest => "local S, t = F.S, F.t\n\
             local first = t - c + 1\n\
             if S[first] == nil then\n\
             for i = first, t do\nS[i] = nil\nend\n\
             F.t = t - c\nF.p = F.p + b\n\
             else\nF.L[a][1] = S[first]\nend"
            .into(),
        Op::Nop => String::new(),
        Op::DecoyMove => "local S, t = F.S, F.t\nS[t + a] = S[t - b]\nF.t = t + c".into(),
        Op::DecoySwap => "local S = F.S\nS[a], S[b] = S[b], S[a]".into(),
        Op::DecoyCheck => "if F.t < a then\nF.p = F.p + b\nend".into(),
        Op::DecoyMix => "local L = F.L\nL[a] = { (L[b] or {})[1] }".into(),
        Op::DecoyFold => "local S, t = F.S, F.t\nS[t - 1] = K[a]\nF.t = t - 1".into(),
        Op::DecoyProbe => "F.m = F.m + c\nF.M[F.m] = F.t".into(),
    }
}

/// Unsigned `n / d` over 64-bit integers
const UDIV: &str = r#"local function udiv(n, d)
    if d < 0 then
        if math.ult(n, d) then
            return 0
        end
        return 1
    end
    if n >= 0 then
        return n // d
    end
    local q = ((n >> 1) // d) << 1
    if not math.ult(n - q * d, d) then
        q = q + 1
    end
    return q
end"#;

/// Loop setup. With integer start and step the iteration count is fixed up
/// front in the limit cell (`n` left, `d` done) so the control variable never
/// wraps; every other loop runs on floats.
fn for_prep(bitwise: BitwiseStyle) -> String {
    let checks = "local L = F.L\n\
         local i, l, s = L[a][1], L[a + 1][1], L[a + 2][1]\n\
         if type(i) ~= \"number\" then\nerror(\"'for' initial value must be a number\")\nend\n\
         if type(l) ~= \"number\" then\nerror(\"'for' limit must be a number\")\nend\n\
         if type(s) ~= \"number\" then\nerror(\"'for' step must be a number\")\nend\n\
         if s == 0 then\nerror(\"'for' step is zero\")\nend\n\
         local C = L[a + 1]";
    let floats = "L[a][1], C[1], L[a + 2][1] = i + 0.0, l + 0.0, s + 0.0";
    match bitwise {
        BitwiseStyle::Bit32 => format!("{checks}\n{floats}"),
        BitwiseStyle::Native => format!(
            "{checks}\n\
             if math.type(i) == \"integer\" and math.type(s) == \"integer\" then\n\
             local n = l\n\
             if math.type(l) ~= \"integer\" then\n\
             n = math.tointeger(s < 0 and math.ceil(l) or math.floor(l))\n\
             if n == nil then\n\
             if 0 < l then\nn = math.maxinteger\nC.d = s < 0\n\
             else\nn = math.mininteger\nC.d = s > 0\nend\n\
             end\n\
             end\n\
             if (s > 0 and i > n) or (s < 0 and i < n) then\nC.d = true\nend\n\
             if C.d then\nC.n = 0\n\
             elseif s > 0 then\nC.n = udiv(n - i, s)\n\
             else\nC.n = udiv(i - n, -(s + 1) + 1)\nend\n\
             else\n{floats}\nend"
        ),
    }
}

/// Full interpreter source with the payload inlined
pub fn render(input: &TemplateInput, random: &mut Random) -> String {
    let key = input
        .key
        .iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let bxor = match input.bitwise {
        BitwiseStyle::Native => "local function bxor(x, y)\n    return x ~ y\nend",
        BitwiseStyle::Bit32 => "local bxor = bit32.bxor",
    };
    let mut source = PRELUDE
        .replace("$DATA", &quote_string(input.hex.as_bytes()))
        .replace("$KEY", &key)
        .replace("$CAP", &input.iteration_cap.to_string())
        .replace("$BXOR", bxor)
        .replace(
            "$UDIV",
            match input.bitwise {
                BitwiseStyle::Native => UDIV,
                BitwiseStyle::Bit32 => "",
            },
        )
        .replace("$BIAS", &OPERAND_BIAS.to_string())
        .replace("$MAGIC", &input.magic.to_string())
        .replace("$TAG_STRING", &TAG_STRING.to_string());

    let mut handlers: Vec<(u32, Op)> = input.opcodes.iter().map(|(op, code)| (code, op)).collect();
    random.shuffle(&mut handlers);
    for (code, op) in handlers {
        source.push_str(&format!(
            "H[{}] = function(F, a, b, c)\n{}\nend\n",
            code,
            handler(op, input.bitwise)
        ));
    }
    source.push_str(EPILOGUE);
    source
}

/// Parse the rendered interpreter and give its locals generated names
pub fn embed(source: &str, session: &mut Session) -> Result<Block, ObfuscateError> {
    let mut block = parse(source).map_err(|e| ObfuscateError::Assembly(format!("interpreter did not parse: {}", e)))?;

    // Generated names must not land on anything the interpreter mentions
    let names = collect_names(&block);
    session.random.reserve(names.iter().cloned());

    // Interpreter locals are not part of the user's rename map
    let saved_renames = std::mem::take(&mut session.renames);
    let saved_count = session.stats.variables_renamed;
    let result = Renamer.run(&mut block, session);
    session.renames = saved_renames;
    session.stats.variables_renamed = saved_count;
    result?;
    Ok(block)
}
