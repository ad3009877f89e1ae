//! Watermark
//!
//! Marks output with the product name, version and a session id derived from
//! the seed. The comment style survives minification through the
//! `--[[!` marker.

use uuid::{Builder, Uuid};

use crate::ast::{Block, Stmt};
use crate::config::{WatermarkPosition, WatermarkStyle};
use crate::error::ObfuscateError;
use crate::minify::PRESERVED_COMMENT;
use crate::session::Session;
use crate::transform::strings::xor_closure;
use crate::transform::Pass;

pub const PRODUCT: &str = "Moonveil";

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct Watermark {
    pub id: Uuid,
    pub text: String,
    style: WatermarkStyle,
    position: WatermarkPosition,
}

impl Watermark {
    /// Draws the session id from the session stream
    pub fn new(session: &mut Session) -> Self {
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&session.random.bytes(16));
        let id = Builder::from_random_bytes(bytes).into_uuid();
        let mut text = format!("{} v{} | {}", PRODUCT, VERSION, id);
        if let Some(extra) = &session.tuning.watermark_text {
            text.push_str(" | ");
            text.push_str(extra);
        }
        Self {
            id,
            text,
            style: session.tuning.watermark_style,
            position: session.tuning.watermark_position,
        }
    }

    /// `--[[! Moonveil v... ]]`
    pub fn comment(&self) -> String {
        // `]]` inside the text would close the comment early
        let safe = self.text.replace("]]", "] ]");
        format!("{} {} ]]", PRESERVED_COMMENT, safe)
    }

    /// Add the comment form to printed code
    pub fn decorate(&self, code: &str) -> String {
        if self.style != WatermarkStyle::Comment {
            return code.to_string();
        }
        let comment = self.comment();
        match self.position {
            WatermarkPosition::Top => format!("{}\n{}", comment, code),
            WatermarkPosition::Bottom => format!("{}\n{}", code, comment),
            WatermarkPosition::Both => format!("{}\n{}\n{}", comment, code, comment),
        }
    }

    fn statement(&self, session: &mut Session) -> Stmt {
        let name = session.fresh_name();
        let value = match self.style {
            WatermarkStyle::Encoded => xor_closure(session, self.text.as_bytes()),
            _ => {
                let hex: String = self.text.bytes().map(|b| format!("{:02x}", b)).collect();
                session.plain_string(hex.as_bytes())
            }
        };
        Stmt::local(&[name.as_str()], vec![value])
    }
}

impl Pass for Watermark {
    fn name(&self) -> &'static str {
        "watermark"
    }

    /// Hidden and encoded styles live in the program itself
    fn run(&self, program: &mut Block, session: &mut Session) -> Result<(), ObfuscateError> {
        if self.style == WatermarkStyle::Comment {
            return Ok(());
        }
        if matches!(self.position, WatermarkPosition::Top | WatermarkPosition::Both) {
            let stmt = self.statement(session);
            program.insert(0, stmt);
        }
        if matches!(self.position, WatermarkPosition::Bottom | WatermarkPosition::Both) {
            let stmt = self.statement(session);
            // Nothing may follow a final `return`
            let at = match program.last() {
                Some(last) if last.is_terminator() => program.len() - 1,
                _ => program.len(),
            };
            program.insert(at, stmt);
        }
        Ok(())
    }
}
