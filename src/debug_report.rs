use granary::{GranaryError, SettleReport, Stacks, pretty_stack};

pub mod ansi {
    pub const RESET: &str = "\x1b[0m";
    pub const DIM: &str = "\x1b[2m";
    pub const BOLD: &str = "\x1b[1m";

    pub const RED: &str = "\x1b[31m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const BLUE: &str = "\x1b[34m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GRAY: &str = "\x1b[90m";

    #[derive(Debug, Clone, Copy)]
    pub struct Palette {
        enabled: bool,
    }

    impl Palette {
        pub fn new(enabled: bool) -> Self {
            Self { enabled }
        }

        pub fn paint(&self, s: impl AsRef<str>, color: &str) -> String {
            if self.enabled { format!("{}{}{}", color, s.as_ref(), RESET) } else { s.as_ref().to_string() }
        }

        pub fn bold(&self, s: impl AsRef<str>) -> String {
            if self.enabled { format!("{}{}{}", BOLD, s.as_ref(), RESET) } else { s.as_ref().to_string() }
        }

        pub fn dim(&self, s: impl AsRef<str>) -> String {
            if self.enabled { format!("{}{}{}", DIM, s.as_ref(), RESET) } else { s.as_ref().to_string() }
        }
    }
}

use ansi::Palette;

pub fn print_stacks(stacks: &Stacks, palette: &Palette) {
    if stacks.is_empty() {
        println!("{}", palette.dim("  (no stacks)"));
        return;
    }
    let width = stacks.names().map(|name| name.chars().count()).max().unwrap_or(0);
    for (name, entries) in stacks.iter() {
        let pad = width - name.chars().count();
        println!(
            "  {}{} {} {}",
            palette.paint(name, ansi::BLUE),
            " ".repeat(pad),
            palette.dim("│"),
            palette.paint(pretty_stack(Some(entries)), ansi::GREEN),
        );
    }
}

/// `--trace` output: one section per fired step.
pub fn print_step(step: usize, stacks: &Stacks, palette: &Palette) {
    println!("{}", palette.paint(format!("━━━ Step {step} ━━━"), ansi::GRAY));
    print_stacks(stacks, palette);
}

pub fn print_final(stacks: &Stacks, palette: &Palette) {
    println!("{}", palette.paint("━━━ Stacks ━━━", ansi::GRAY));
    print_stacks(stacks, palette);
}

pub fn print_timing(report: &SettleReport, palette: &Palette) {
    println!("{}", palette.paint("━━━ Timing ━━━", ansi::GRAY));
    println!(
        "  Total: {}  │  Steps: {}  │  Fired: {}{}",
        palette.paint(format!("{:?}", report.duration), ansi::GREEN),
        palette.paint(report.steps.to_string(), ansi::CYAN),
        palette.paint(report.fired.to_string(), ansi::YELLOW),
        if report.initialized { palette.dim("  (initialized)") } else { String::new() },
    );
}

pub fn print_error(err: &GranaryError, palette: &Palette) {
    eprintln!("{} {err}", palette.bold(palette.paint("error:", ansi::RED)));
    if matches!(err, GranaryError::NonTermination { .. }) {
        eprintln!("{}", palette.dim("  Tip: raise the ceiling with --max-steps or set GRANARY_DEBUG_RULES=1 to see which rule keeps firing"));
    }
}
