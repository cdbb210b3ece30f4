//! Printers: text and markdown (termimad), written to any `io::Write`.

use std::io::{self, Write};

use owo_colors::OwoColorize;
use termimad::MadSkin;

const RULE: &str = "==================================================";

#[derive(Debug, Clone, Copy, Default)]
pub struct TextPrinter {
    pub color: Option<&'static str>,
}

impl TextPrinter {
    pub fn plain() -> Self {
        Self { color: None }
    }

    pub fn colored(color: &'static str) -> Self {
        Self { color: Some(color) }
    }

    pub fn write<W: Write>(&self, out: &mut W, text: &str) -> io::Result<()> {
        match self.color {
            Some("green") => writeln!(out, "{}", text.green()),
            Some("cyan") => writeln!(out, "{}", text.cyan()),
            Some("magenta") => writeln!(out, "{}", text.magenta()),
            Some("yellow") => writeln!(out, "{}", text.yellow()),
            Some("red") => writeln!(out, "{}", text.red()),
            _ => writeln!(out, "{}", text),
        }
    }

    /// A titled block framed by horizontal rules.
    pub fn banner<W: Write>(&self, out: &mut W, title: &str, body: &str) -> io::Result<()> {
        let text = if body.is_empty() {
            format!("\n{}\n{}\n{}", RULE, title, RULE)
        } else {
            format!("\n{}\n{}\n{}\n{}", RULE, title, body, RULE)
        };
        self.write(out, &text)
    }
}

pub struct MarkdownPrinter {
    pub skin: MadSkin,
    pub width: usize,
}

impl Default for MarkdownPrinter {
    fn default() -> Self {
        Self { skin: MadSkin::default(), width: 100 }
    }
}

impl MarkdownPrinter {
    pub fn write<W: Write>(&self, out: &mut W, text: &str) -> io::Result<()> {
        let fmt = termimad::FmtText::from(&self.skin, text, Some(self.width));
        writeln!(out, "{}", fmt)
    }
}
