use anyhow::{Context, Result, bail};
use clap::{Parser as ClapParser, Subcommand};
use rivet::diag;
use rivet::jot::{self, LocalExecutor};
use rivet::{Config, Engine, EvalFailure, Key, SnippetEvent, SnippetId, Status};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(ClapParser)]
#[command(name = "rivet")]
#[command(about = "Incremental snippet evaluation for jot")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML file with [engine] and [executor] tables
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log more (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive session
    Repl,
    /// Evaluate each argument as one snippet and print the events as JSON
    Eval {
        /// Snippets, in order
        #[arg(required = true)]
        sources: Vec<String>,
    },
    /// Evaluate a file of snippets separated by blank lines
    Run {
        /// Path to the snippet file
        file: PathBuf,
        /// Print events as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).parse_default_env().init();

    let config = match &cli.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    let (engine, executor) = jot::engine(&config)?;
    let mut session = Session { engine, executor };

    match cli.command {
        Commands::Repl => session.repl(),
        Commands::Eval { sources } => {
            for source in &sources {
                let events = session.engine.evaluate(source)?;
                session.flush_output();
                println!("{}", serde_json::to_string(&events)?);
            }
            Ok(())
        }
        Commands::Run { file, json } => session.run_file(&file, json),
    }
}

struct Session {
    engine: Engine,
    executor: Arc<LocalExecutor>,
}

impl Session {
    fn repl(&mut self) -> Result<()> {
        let stdin = io::stdin();
        let mut lines = stdin.lock().lines();
        let mut pending = Snippet::default();
        loop {
            print!("{}", if pending.is_empty() { "rivet> " } else { "   ...> " });
            io::stdout().flush()?;
            let Some(line) = lines.next() else {
                break;
            };
            let line = line?;
            if pending.is_empty() {
                match line.trim() {
                    "" => continue,
                    "/exit" => break,
                    command if command.starts_with('/') => {
                        if let Err(error) = self.command(command) {
                            eprintln!("error: {error:#}");
                        }
                        continue;
                    }
                    _ => {}
                }
            }
            pending.push(&line);
            if pending.is_complete() {
                let source = pending.take();
                if let Err(error) = self.evaluate(&source) {
                    eprintln!("error: {error:#}");
                }
            }
        }
        Ok(())
    }

    fn command(&mut self, command: &str) -> Result<()> {
        let mut words = command.split_whitespace();
        let name = words.next().unwrap_or_default();
        let argument = words.next();
        match name {
            "/list" => {
                for snippet in self.engine.active() {
                    println!("{:>5} : {}", format!("#{}", snippet.id), snippet.source.trim());
                }
            }
            "/vars" => {
                for snippet in self.engine.vars() {
                    println!("  #{} {}", snippet.id, snippet.source.trim());
                }
            }
            "/methods" => {
                for snippet in self.engine.methods() {
                    println!("  #{} {}", snippet.id, snippet.signature().unwrap_or(snippet.source.trim()));
                }
            }
            "/types" => {
                for snippet in self.engine.types() {
                    println!("  #{} {}", snippet.id, snippet.declared_name().unwrap_or_default());
                }
            }
            "/imports" => {
                for snippet in self.engine.imports() {
                    println!("  {}", snippet.source.trim());
                }
            }
            "/drop" => {
                let key = droppable(&self.engine, snippet_id(argument)?)?;
                let events = self.engine.drop(key)?;
                self.report(&events);
            }
            "/status" => {
                let id = snippet_id(argument)?;
                let source = self.engine.snippet(id).map(|snippet| snippet.source.clone()).context("no such snippet")?;
                println!("#{id} {}", self.engine.snippet_status(id));
                let unresolved = self.engine.unresolved(id);
                if !unresolved.is_empty() {
                    println!("  unresolved: {}", unresolved.join(", "));
                }
                for diag in self.engine.diagnostics(id) {
                    eprint!("{}", diag::render(diag, &format!("#{id}"), &source));
                }
            }
            other => bail!("unknown command {other}"),
        }
        Ok(())
    }

    fn evaluate(&mut self, source: &str) -> Result<()> {
        let events = self.engine.evaluate(source)?;
        self.flush_output();
        self.report(&events);
        Ok(())
    }

    fn run_file(&mut self, file: &Path, json: bool) -> Result<()> {
        let text = fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
        let mut failed = false;
        for source in split_snippets(&text) {
            let events = self.engine.evaluate(&source)?;
            self.flush_output();
            if json {
                println!("{}", serde_json::to_string(&events)?);
            } else {
                self.report(&events);
            }
            failed |= events.iter().any(|event| event.status == Status::Rejected);
        }
        if failed {
            bail!("some snippets were rejected");
        }
        Ok(())
    }

    fn flush_output(&self) {
        print!("{}", self.executor.take_output());
    }

    fn report(&self, events: &[SnippetEvent]) {
        for event in events {
            self.report_event(event);
        }
    }

    fn report_event(&self, event: &SnippetEvent) {
        let id = event.snippet;
        let source = self.engine.snippet(id).map(|snippet| snippet.source.as_str()).unwrap_or_default();
        if event.caused_by.is_some() || event.status == Status::Overwritten {
            if event.is_transition() {
                println!("|  #{id} is now {}", describe(event.status));
            }
            return;
        }
        match event.status {
            Status::Rejected => {
                for diag in self.engine.diagnostics(id) {
                    eprint!("{}", diag::render(diag, &format!("#{id}"), source));
                }
            }
            Status::Dropped => println!("|  dropped #{id}"),
            Status::RecoverableDefined | Status::RecoverableNotDefined => {
                let names = self.engine.unresolved(id).join(", ");
                println!("|  #{id} {}, until {names} is declared", describe(event.status));
            }
            _ => {}
        }
        match &event.exception {
            Some(EvalFailure::Exception { class_name, message, stack }) => {
                match message {
                    Some(message) => println!("|  exception {class_name}: {message}"),
                    None => println!("|  exception {class_name}"),
                }
                for frame in stack {
                    println!("|        at {}.{}", frame.class_name, frame.method);
                }
            }
            Some(EvalFailure::Unresolved { snippet, names }) => {
                println!("|  attempted to use #{snippet}, which cannot run until {} is declared", names.join(", "));
            }
            Some(EvalFailure::Stopped) => println!("|  stopped"),
            Some(EvalFailure::Executor { message }) => println!("|  executor failed: {message}"),
            None => {
                if let Some(value) = &event.value {
                    match self.engine.snippet(id).and_then(|snippet| snippet.declared_name()) {
                        Some(name) => println!("{name} ==> {value}"),
                        None => println!("==> {value}"),
                    }
                }
            }
        }
    }
}

fn describe(status: Status) -> &'static str {
    match status {
        Status::Valid => "valid",
        Status::RecoverableDefined => "defined but not runnable",
        Status::RecoverableNotDefined => "declared but not usable",
        Status::Rejected => "rejected",
        Status::Overwritten => "overwritten",
        Status::Dropped => "dropped",
        Status::Nonexistent => "gone",
    }
}

fn snippet_id(argument: Option<&str>) -> Result<SnippetId> {
    let argument = argument.context("expected a snippet id")?;
    let number = argument.trim_start_matches('#').parse().with_context(|| format!("bad snippet id {argument}"))?;
    Ok(SnippetId(number))
}

/// Key of `id`, provided `id` is the live snippet of that key.
fn droppable(engine: &Engine, id: SnippetId) -> Result<Key> {
    let key = engine.snippet(id).map(|snippet| snippet.key).context("no such snippet")?;
    if engine.current(key) != Some(id) || !engine.snippet_status(id).is_active() {
        bail!("#{id} is not active");
    }
    Ok(key)
}

/// Source lines collected until braces balance.
#[derive(Default)]
struct Snippet {
    text: String,
    depth: i32,
}

impl Snippet {
    fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    fn push(&mut self, line: &str) {
        let mut quoted = false;
        let mut escaped = false;
        for character in line.chars() {
            match character {
                _ if escaped => escaped = false,
                '\\' if quoted => escaped = true,
                '"' => quoted = !quoted,
                '{' if !quoted => self.depth += 1,
                '}' if !quoted => self.depth -= 1,
                _ => {}
            }
        }
        if !self.text.is_empty() {
            self.text.push('\n');
        }
        self.text.push_str(line);
    }

    fn is_complete(&self) -> bool {
        self.depth <= 0 && !self.is_empty()
    }

    fn take(&mut self) -> String {
        self.depth = 0;
        std::mem::take(&mut self.text)
    }
}

/// Splits a file into snippets at blank lines outside braces.
fn split_snippets(text: &str) -> Vec<String> {
    let mut snippets = Vec::new();
    let mut pending = Snippet::default();
    for line in text.lines() {
        if line.trim().is_empty() && pending.depth <= 0 {
            if !pending.is_empty() {
                snippets.push(pending.take());
            }
            continue;
        }
        pending.push(line);
    }
    if !pending.is_empty() {
        snippets.push(pending.take());
    }
    snippets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_lines_separate_snippets_outside_braces() {
        let text = "int x = 1;\n\nint f() {\n  int y = 2;\n\n  return y;\n}\n\n\nx + f()\n";
        let snippets = split_snippets(text);
        assert_eq!(snippets.len(), 3);
        assert_eq!(snippets[0], "int x = 1;");
        assert!(snippets[1].starts_with("int f() {") && snippets[1].ends_with('}'));
        assert_eq!(snippets[2], "x + f()");
    }

    #[test]
    fn braces_in_strings_do_not_count() {
        let mut snippet = Snippet::default();
        snippet.push("String s = \"{\";");
        assert!(snippet.is_complete());
        let mut snippet = Snippet::default();
        snippet.push("int f() {");
        assert!(!snippet.is_complete());
        snippet.push("return 1; }");
        assert!(snippet.is_complete());
    }

    #[test]
    fn only_live_snippets_can_be_dropped() {
        let (mut engine, _) = jot::engine(&Config::default()).unwrap();
        let first = engine.evaluate("int f() { return 1; }").unwrap()[0].snippet;
        let second = engine.evaluate("int f() { return 2; }").unwrap();
        let second = second.iter().find(|event| event.caused_by.is_none()).unwrap().snippet;
        let rejected = engine.evaluate("int f() { return \"no\"; }").unwrap()[0].snippet;
        assert_eq!(engine.snippet_status(rejected), Status::Rejected);

        let error = droppable(&engine, first).unwrap_err();
        assert_eq!(error.to_string(), format!("#{first} is not active"));
        assert!(droppable(&engine, rejected).is_err());
        assert!(droppable(&engine, SnippetId(99)).is_err());

        let key = droppable(&engine, second).unwrap();
        let events = engine.drop(key).unwrap();
        assert_eq!(events[0].snippet, second);
        assert_eq!(events[0].status, Status::Dropped);
        assert_eq!(engine.snippet_status(first), Status::Overwritten);
    }

    #[test]
    fn snippet_ids_accept_a_hash() {
        assert_eq!(snippet_id(Some("#4")).unwrap(), SnippetId(4));
        assert_eq!(snippet_id(Some("7")).unwrap(), SnippetId(7));
        assert!(snippet_id(None).is_err());
        assert!(snippet_id(Some("x")).is_err());
    }
}
