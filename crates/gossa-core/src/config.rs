use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::Error;

bitflags::bitflags! {
    /// Controls optional behaviour of the SSA builder.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BuilderMode: u32 {
        /// Print package inventory to the log.
        const PRINT_PACKAGES         = 1 << 0;
        /// Print function disassembly to the log.
        const PRINT_FUNCTIONS        = 1 << 1;
        /// Log the builder's entry/exit of each function.
        const LOG_SOURCE             = 1 << 2;
        /// Log each finished function.
        const LOG_FUNCTIONS          = 1 << 3;
        /// Run the sanity checker on every finished function.
        const SANITY_CHECK_FUNCTIONS = 1 << 4;
        /// Keep all Allocs, Loads and Stores; skip register lifting.
        const NAIVE_FORM             = 1 << 5;
        /// Build packages one at a time on the calling thread.
        const BUILD_SERIALLY         = 1 << 6;
    }
}

const MODE_LETTERS: [(char, BuilderMode); 7] = [
    ('P', BuilderMode::PRINT_PACKAGES),
    ('F', BuilderMode::PRINT_FUNCTIONS),
    ('S', BuilderMode::LOG_SOURCE),
    ('L', BuilderMode::LOG_FUNCTIONS),
    ('C', BuilderMode::SANITY_CHECK_FUNCTIONS),
    ('N', BuilderMode::NAIVE_FORM),
    ('B', BuilderMode::BUILD_SERIALLY),
];

impl FromStr for BuilderMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut mode = BuilderMode::empty();
        for ch in s.trim().chars() {
            let Some((_, flag)) = MODE_LETTERS.iter().find(|(letter, _)| *letter == ch) else {
                bail!("unknown builder mode letter {ch:?}");
            };
            mode |= *flag;
        }
        Ok(mode)
    }
}

impl fmt::Display for BuilderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (letter, flag) in MODE_LETTERS {
            if self.contains(flag) {
                write!(f, "{letter}")?;
            }
        }
        Ok(())
    }
}

/// The mode named by `GOSSA_BUILD_MODE`, read once per process.
pub fn default_mode() -> BuilderMode {
    static MODE: OnceLock<BuilderMode> = OnceLock::new();
    *MODE.get_or_init(|| match std::env::var("GOSSA_BUILD_MODE") {
        Ok(letters) => letters.parse().unwrap_or_else(|err| {
            tracing::warn!("ignoring GOSSA_BUILD_MODE: {err}");
            BuilderMode::empty()
        }),
        Err(_) => BuilderMode::empty(),
    })
}
