mod debug_report;
mod host_ops;

use bitflags::bitflags;
use debug_report::ansi::Palette;
use granary::{ExecutionState, Host, Options, Overlay, Phase, parse};
use std::io::{self, BufRead, IsTerminal, Read, Write};
use tracing_subscriber::EnvFilter;

bitflags! {
    /// What the front end prints besides the final stacks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Report: u8 {
        const TRACE = 1 << 0;
        const TIMING = 1 << 1;
        const COLOR = 1 << 2;
    }
}

const DEBUG_ENV: &str = "GRANARY_DEBUG_RULES";
const MAX_STEPS_ENV: &str = "GRANARY_MAX_STEPS";

fn main() {
    let config = match parse_args() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    init_tracing();

    let source = match load_program(&config) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    let palette = Palette::new(config.report.contains(Report::COLOR));
    let options = Options { max_iterations: config.max_steps };
    let mut host = Host::new(ExecutionState::with_options(parse(&source), options));
    host_ops::install(&mut host);

    if config.report.contains(Report::TRACE) {
        let mut step = 0usize;
        host.on_stepped(Box::new(move |state| {
            step += 1;
            debug_report::print_step(step, state.stacks(), &palette);
            Ok(())
        }));
    }

    let code = if config.repl { run_repl(&mut host, &config, &palette) } else { run_once(&mut host, &config, &palette) };
    std::process::exit(code);
}

fn run_once(host: &mut Host, config: &CliConfig, palette: &Palette) -> i32 {
    match host.settle() {
        Ok(report) => {
            debug_report::print_final(host.state().stacks(), palette);
            if config.report.contains(Report::TIMING) {
                debug_report::print_timing(&report, palette);
            }
            0
        }
        Err(err) => {
            debug_report::print_error(&err, palette);
            debug_report::print_final(host.state().stacks(), palette);
            1
        }
    }
}

/// Settle the program, then treat every input line as temporary rules.
///
/// Errors are reported and the loop continues; a faulted state is recovered
/// first. Returns 1 if any command failed.
fn run_repl(host: &mut Host, config: &CliConfig, palette: &Palette) -> i32 {
    let interactive = io::stdin().is_terminal();
    let mut failed = false;

    if let Err(err) = host.settle() {
        debug_report::print_error(&err, palette);
        failed = true;
    }
    debug_report::print_final(host.state().stacks(), palette);

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        if interactive {
            if let Err(err) = write_prompt(&mut io::stdout(), &palette.bold("granary> ")) {
                eprintln!("{err}");
                return 2;
            }
        }
        let line = match lines.next() {
            Some(Ok(line)) => line,
            Some(Err(err)) => {
                eprintln!("error: failed to read stdin: {err}");
                return 2;
            }
            None => break,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, ":q" | ":quit") {
            break;
        }

        if matches!(host.state().phase(), Phase::Faulted(_)) {
            host.state_mut().recover();
        }
        let overlay = Overlay::prepend(parse(line).rules);
        match host.settle_with(overlay) {
            Ok(report) => {
                debug_report::print_final(host.state().stacks(), palette);
                if config.report.contains(Report::TIMING) {
                    debug_report::print_timing(&report, palette);
                }
            }
            Err(err) => {
                debug_report::print_error(&err, palette);
                failed = true;
            }
        }
    }

    if failed { 1 } else { 0 }
}

fn write_prompt(out: &mut impl Write, prompt: &str) -> Result<(), String> {
    write!(out, "{prompt}")
        .and_then(|()| out.flush())
        .map_err(|err| format!("error: failed to write stdout: {err}"))
}

/// Install the stderr subscriber when `GRANARY_DEBUG_RULES` is set.
///
/// A value that is a filter directive (`granary=trace`) is used as is; a
/// switch value (`1`, `true`, empty) enables `debug`.
fn init_tracing() {
    let Ok(value) = std::env::var(DEBUG_ENV) else {
        return;
    };
    let filter = match value.trim() {
        "" | "1" | "true" | "on" => EnvFilter::new("debug"),
        directive => EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("debug")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).with_target(false).init();
}

#[derive(Debug)]
enum Source {
    Inline(String),
    File(String),
}

#[derive(Debug)]
struct CliConfig {
    sources: Vec<Source>,
    repl: bool,
    max_steps: usize,
    report: Report,
}

fn parse_args() -> Result<CliConfig, String> {
    let mut sources = Vec::new();
    let mut repl = false;
    let mut max_steps = match std::env::var(MAX_STEPS_ENV) {
        Ok(value) => parse_max_steps(&value, MAX_STEPS_ENV)?,
        Err(_) => Options::default().max_iterations,
    };
    let mut report = Report::empty();
    report.set(Report::COLOR, io::stdout().is_terminal());
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-V" | "--version" => {
                println!("granary {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--color" => report.insert(Report::COLOR),
            "--no-color" => report.remove(Report::COLOR),
            "--trace" => report.insert(Report::TRACE),
            "--timing" => report.insert(Report::TIMING),
            "--repl" => repl = true,
            "--max-steps" => {
                let value = args.next().ok_or_else(|| "error: --max-steps expects a value".to_string())?;
                max_steps = parse_max_steps(&value, "--max-steps")?;
            }
            "-e" | "--eval" => {
                let value = args.next().ok_or_else(|| "error: --eval expects a program".to_string())?;
                sources.push(Source::Inline(value));
            }
            "--" => {
                sources.extend(args.by_ref().map(Source::File));
                break;
            }
            _ if arg.starts_with("--max-steps=") => {
                max_steps = parse_max_steps(arg.trim_start_matches("--max-steps="), "--max-steps")?;
            }
            _ if arg.starts_with("--eval=") => {
                sources.push(Source::Inline(arg.trim_start_matches("--eval=").to_string()));
            }
            "-" => sources.push(Source::File(arg)),
            _ if arg.starts_with('-') => {
                return Err(format!("error: unknown option '{arg}'"));
            }
            _ => sources.push(Source::File(arg)),
        }
    }

    Ok(CliConfig { sources, repl, max_steps, report })
}

/// A ceiling of zero would fault before initialization, so it is refused.
fn parse_max_steps(value: &str, origin: &str) -> Result<usize, String> {
    match value.trim().parse::<usize>() {
        Ok(steps) if steps > 0 => Ok(steps),
        _ => Err(format!("error: invalid {origin} '{value}' (expected a positive integer)")),
    }
}

/// Concatenate every source in order. Without sources the program is read
/// from stdin, unless the REPL needs stdin for commands.
fn load_program(config: &CliConfig) -> Result<String, String> {
    if config.sources.is_empty() {
        return if config.repl { Ok(String::new()) } else { read_stdin() };
    }
    if config.repl && config.sources.iter().any(|s| matches!(s, Source::File(path) if path == "-")) {
        return Err("error: '-' cannot be combined with --repl".to_string());
    }

    let mut program = String::new();
    for source in &config.sources {
        let text = match source {
            Source::Inline(text) => text.clone(),
            Source::File(path) if path == "-" => read_stdin()?,
            Source::File(path) => {
                std::fs::read_to_string(path).map_err(|err| format!("error: failed to read '{path}': {err}"))?
            }
        };
        program.push_str(&text);
        program.push('\n');
    }
    Ok(program)
}

fn read_stdin() -> Result<String, String> {
    let mut buffer = String::new();
    io::stdin().read_to_string(&mut buffer).map_err(|err| format!("error: failed to read stdin: {err}"))?;
    Ok(buffer)
}

fn print_help() {
    println!("{}", help_text());
}

fn help_text() -> String {
    format!(
        "granary {version}

Multi-stack rewriting language.

Usage:
  granary [OPTIONS] [FILE...]
  granary [OPTIONS] -e <program>
  granary [OPTIONS] --repl [FILE...]

Program sources are concatenated in order. With no source the program is
read from stdin ('-' reads stdin explicitly).

Options:
  -e, --eval <program>       Program text given inline. May be repeated.
  --repl                     After settling, read rules line by line from
                             stdin and run each line as temporary rules.
  --max-steps <n>            Steps allowed before non-termination.
                             Default: {default_steps} (env: {steps_env})
  --trace                    Print the stacks after every fired step.
  --timing                   Print settle timing and step counts.
  --color                    Force ANSI color output.
  --no-color                 Disable ANSI color output.
  -h, --help                 Show this help message.
  -V, --version              Print version information.

Environment:
  {debug_env}        Print engine debug events on stderr. Accepts a
                             tracing filter directive (e.g. granary=trace).

Exit codes:
  0  Success.
  1  The program faulted (or a REPL command failed).
  2  Invalid arguments or unreadable input.
",
        version = env!("CARGO_PKG_VERSION"),
        default_steps = granary::DEFAULT_MAX_ITERATIONS,
        steps_env = MAX_STEPS_ENV,
        debug_env = DEBUG_ENV,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_steps_must_be_a_positive_integer() {
        assert_eq!(parse_max_steps(" 250 ", "--max-steps"), Ok(250));
        assert_eq!(parse_max_steps("1", MAX_STEPS_ENV), Ok(1));
        assert_eq!(
            parse_max_steps("0", "--max-steps"),
            Err("error: invalid --max-steps '0' (expected a positive integer)".to_string())
        );
        assert!(parse_max_steps("-3", "--max-steps").is_err());
        assert!(parse_max_steps("lots", MAX_STEPS_ENV).is_err());
    }

    /// Accepts writes, fails every flush.
    struct Unflushable;

    impl Write for Unflushable {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"))
        }
    }

    #[test]
    fn prompt_reports_a_failed_flush() {
        let mut out = Vec::new();
        write_prompt(&mut out, "granary> ").unwrap();
        assert_eq!(out, b"granary> ");
        assert_eq!(
            write_prompt(&mut Unflushable, "granary> "),
            Err("error: failed to write stdout: pipe closed".to_string())
        );
    }

    #[test]
    fn help_mentions_every_flag() {
        let help = help_text();
        for flag in ["--eval", "--repl", "--max-steps", "--trace", "--timing", "--no-color", DEBUG_ENV, MAX_STEPS_ENV] {
            assert!(help.contains(flag), "help text is missing {flag}");
        }
    }
}
