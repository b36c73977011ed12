use std::fmt::{self, Formatter};

/// Configuration for printing SSA disassembly.
#[derive(Debug, Clone)]
pub struct PrettyOptions {
    /// Column at which type annotations and block edge counts end.
    pub punchcard: usize,
    /// Include source spans of instructions.
    pub show_spans: bool,
}

impl Default for PrettyOptions {
    fn default() -> Self {
        Self {
            punchcard: 80,
            show_spans: false,
        }
    }
}

/// Formatting context shared across pretty printers.
pub struct PrettyCtx<'a> {
    pub options: &'a PrettyOptions,
}

impl<'a> PrettyCtx<'a> {
    pub fn new(options: &'a PrettyOptions) -> Self {
        Self { options }
    }

    /// Writes `left`, then `right` right-aligned to the punchcard column,
    /// separated by at least one space.
    pub fn write_aligned(&self, f: &mut Formatter<'_>, left: &str, right: &str) -> fmt::Result {
        let used = left.chars().count() + right.chars().count();
        let pad = self.options.punchcard.saturating_sub(used).max(1);
        write!(f, "{left}{:pad$}{right}", "")
    }
}

/// Trait implemented by IR entities that print as disassembly.
pub trait PrettyPrintable {
    fn fmt_pretty(&self, f: &mut Formatter<'_>, ctx: &mut PrettyCtx<'_>) -> fmt::Result;
}

/// Helper wrapper implementing `Display` by delegating to `PrettyPrintable`.
pub struct PrettyDisplay<'a, T> {
    value: &'a T,
    options: PrettyOptions,
}

impl<'a, T> PrettyDisplay<'a, T> {
    pub fn new(value: &'a T, options: PrettyOptions) -> Self {
        Self { value, options }
    }
}

impl<'a, T> fmt::Display for PrettyDisplay<'a, T>
where
    T: PrettyPrintable,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut ctx = PrettyCtx::new(&self.options);
        self.value.fmt_pretty(f, &mut ctx)
    }
}

/// Convenience helper to build a `PrettyDisplay` wrapper.
pub fn pretty<'a, T>(value: &'a T, options: PrettyOptions) -> PrettyDisplay<'a, T>
where
    T: PrettyPrintable,
{
    PrettyDisplay::new(value, options)
}

/// Escapes a string the way Go quotes string literals.
pub fn escape_string(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ch if ch.is_control() => {
                use std::fmt::Write as _;
                let _ = write!(out, "\\x{:02x}", ch as u32);
            }
            _ => out.push(ch),
        }
    }
    out
}
