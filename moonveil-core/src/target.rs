//! Target platforms and their capability profiles

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::random::NumberStyles;

/// Runtime the obfuscated program will be loaded into
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Roblox game scripts (Luau)
    Roblox,
    /// Luau-based script executors loading code through `loadstring`
    Loadstring,
    /// PUC Lua 5.3 / 5.4
    #[default]
    Standard,
}

/// How generated code performs bitwise operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitwiseStyle {
    /// `bit32.bxor(a, b)` and friends
    Bit32,
    /// `a ~ b`, `a & b`, `a | b`
    Native,
}

/// What generated code may rely on for a target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetProfile {
    pub bitwise: BitwiseStyle,
    pub number_styles: NumberStyles,
    pub allows_environment_check: bool,
    pub executor_fingerprints: bool,
}

impl Target {
    pub const ALL: [Target; 3] = [Target::Roblox, Target::Loadstring, Target::Standard];

    pub fn profile(self) -> TargetProfile {
        match self {
            Target::Roblox => TargetProfile {
                bitwise: BitwiseStyle::Bit32,
                number_styles: NumberStyles {
                    binary: true,
                    underscores: true,
                },
                allows_environment_check: false,
                executor_fingerprints: false,
            },
            Target::Loadstring => TargetProfile {
                bitwise: BitwiseStyle::Bit32,
                number_styles: NumberStyles {
                    binary: true,
                    underscores: true,
                },
                allows_environment_check: true,
                executor_fingerprints: true,
            },
            Target::Standard => TargetProfile {
                bitwise: BitwiseStyle::Native,
                number_styles: NumberStyles::default(),
                allows_environment_check: true,
                executor_fingerprints: false,
            },
        }
    }

    /// Global names the renamer must never touch and generated names must
    /// never shadow
    pub fn builtins(self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = LUA_BUILTINS.to_vec();
        match self {
            Target::Roblox => names.extend_from_slice(ROBLOX_BUILTINS),
            Target::Loadstring => {
                names.extend_from_slice(ROBLOX_BUILTINS);
                names.extend_from_slice(EXECUTOR_BUILTINS);
            }
            Target::Standard => {}
        }
        names
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Target::Roblox => "roblox",
            Target::Loadstring => "loadstring",
            Target::Standard => "standard",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "roblox" => Ok(Target::Roblox),
            "loadstring" => Ok(Target::Loadstring),
            "standard" | "lua" => Ok(Target::Standard),
            other => Err(format!("unknown target '{}'", other)),
        }
    }
}

/// Standard library and environment names shared by every target
const LUA_BUILTINS: &[&str] = &[
    "_G", "_ENV", "_VERSION", "self", "arg", "assert", "collectgarbage", "dofile", "error",
    "getmetatable", "ipairs", "load", "loadfile", "loadstring", "next", "pairs", "pcall", "print",
    "rawequal", "rawget", "rawlen", "rawset", "require", "select", "setmetatable", "tonumber",
    "tostring", "type", "unpack", "xpcall", "getfenv", "setfenv", "coroutine", "debug", "io",
    "math", "os", "package", "string", "table", "utf8", "bit32",
];

/// Roblox engine globals and Luau additions
const ROBLOX_BUILTINS: &[&str] = &[
    "game", "workspace", "Workspace", "script", "plugin", "shared", "Game", "Instance", "Enum",
    "Vector2", "Vector3", "Vector2int16", "Vector3int16", "CFrame", "Color3", "BrickColor", "UDim",
    "UDim2", "Rect", "Ray", "Region3", "TweenInfo", "NumberRange", "NumberSequence",
    "NumberSequenceKeypoint", "ColorSequence", "ColorSequenceKeypoint", "PhysicalProperties",
    "Random", "DateTime", "Axes", "Faces", "Font", "OverlapParams", "RaycastParams", "task",
    "wait", "delay", "spawn", "tick", "time", "elapsedTime", "typeof", "warn", "settings",
    "UserSettings", "version", "gcinfo", "newproxy", "buffer",
];

/// Globals exposed by common script executors
const EXECUTOR_BUILTINS: &[&str] = &[
    "getgenv", "getrenv", "getreg", "getgc", "getsenv", "getcallingscript", "hookfunction",
    "hookmetamethod", "getrawmetatable", "setrawmetatable", "setreadonly", "isreadonly",
    "checkcaller", "newcclosure", "islclosure", "iscclosure", "getnamecallmethod",
    "setclipboard", "identifyexecutor", "getexecutorname", "request", "http_request", "syn",
    "fluxus", "Drawing", "firesignal", "fireclickdetector", "getconnections", "readfile",
    "writefile", "isfile", "cloneref", "gethui", "KRNL_LOADED",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_table() {
        assert!(!Target::Roblox.profile().allows_environment_check);
        assert!(Target::Loadstring.profile().executor_fingerprints);
        assert_eq!(Target::Standard.profile().bitwise, BitwiseStyle::Native);
        assert!(!Target::Standard.profile().number_styles.binary);
        assert!(Target::Roblox.profile().number_styles.underscores);
    }

    #[test]
    fn test_builtins_grow_with_target() {
        let standard = Target::Standard.builtins();
        let roblox = Target::Roblox.builtins();
        let loadstring = Target::Loadstring.builtins();
        assert!(standard.contains(&"print") && standard.contains(&"self"));
        assert!(!standard.contains(&"game"));
        assert!(roblox.contains(&"game") && !roblox.contains(&"getgenv"));
        assert!(loadstring.contains(&"getgenv") && loadstring.contains(&"workspace"));
    }

    #[test]
    fn test_parse_and_display() {
        for target in Target::ALL {
            assert_eq!(target.to_string().parse::<Target>(), Ok(target));
        }
        assert!("luajit".parse::<Target>().is_err());
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&Target::Loadstring).unwrap();
        assert_eq!(json, "\"loadstring\"");
        let back: Target = serde_json::from_str("\"roblox\"").unwrap();
        assert_eq!(back, Target::Roblox);
    }
}
