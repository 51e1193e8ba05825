//! REPL – the interactive `capgate` shell.
//!
//! Supported slash-commands:
//!   /help                    – show this list
//!   /whoami                  – identity, session and effective capabilities
//!   /grant <cap>             – grant e.g. `delete(/notes)` at runtime
//!   /revoke <cap>            – revoke a runtime grant
//!   /read <path>             – dispatch `ReadFile`
//!   /write <path> <text…>    – dispatch `WriteFile`
//!   /delete <path>           – dispatch `DeleteFile`
//!   /schedule <secs> <cmd…>  – schedule read/write/delete `secs` from now
//!   /cancel <id>             – cancel a scheduled operation
//!   /ops                     – list scheduled operations
//!   /metrics                 – scheduler counters
//!   /state                   – files held by the store
//!   /override on|off         – set the temporal override flag
//!   /quit | /exit            – gracefully exit the CLI

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use capgate_kernel::{CapabilityGate, CapabilityManager, Context, file_algebra};
use capgate_runtime::files::{FileIntent, FileStore, FileStoreReactor};
use capgate_runtime::{DispatchTarget, Effect, Intent, ReactorHandle, Router};
use capgate_scheduler::{
    CancelResult, ConstraintSet, DEFAULT_OVERRIDE_KEY, OperationStatus, Scheduler, SchedulerConfig,
};
use capgate_types::{FileCap, GateError};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::config::Settings;

const FILES_REACTOR: &str = "files";

// ─────────────────────────────────────────────────────────────────────────────
// Command parsing
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    WhoAmI,
    Grant(FileCap),
    Revoke(FileCap),
    Dispatch(FileIntent),
    Schedule { secs: u64, intent: FileIntent },
    Cancel(Uuid),
    Ops,
    Metrics,
    State,
    Override(bool),
    Quit,
}

/// Parse one input line.  The error is the message shown to the user.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    match head {
        "/help" => Ok(Command::Help),
        "/whoami" => Ok(Command::WhoAmI),
        "/grant" => parse_cap(rest, "/grant <cap>").map(Command::Grant),
        "/revoke" => parse_cap(rest, "/revoke <cap>").map(Command::Revoke),
        "/read" | "/write" | "/delete" => {
            parse_intent(head.trim_start_matches('/'), rest).map(Command::Dispatch)
        }
        "/schedule" => {
            let usage = "usage: /schedule <secs> read|write|delete <path> [text…]";
            let (secs, cmd) = rest.split_once(char::is_whitespace).ok_or(usage)?;
            let secs = secs
                .parse()
                .map_err(|_| format!("not a number of seconds: '{secs}'"))?;
            let cmd = cmd.trim();
            let (verb, args) = cmd.split_once(char::is_whitespace).unwrap_or((cmd, ""));
            let intent = parse_intent(verb.trim_start_matches('/'), args.trim())?;
            Ok(Command::Schedule { secs, intent })
        }
        "/cancel" => rest
            .parse()
            .map(Command::Cancel)
            .map_err(|_| format!("not an operation id: '{rest}'")),
        "/ops" => Ok(Command::Ops),
        "/metrics" => Ok(Command::Metrics),
        "/state" => Ok(Command::State),
        "/override" => match rest {
            "on" => Ok(Command::Override(true)),
            "off" => Ok(Command::Override(false)),
            _ => Err("usage: /override on|off".to_string()),
        },
        "/quit" | "/exit" => Ok(Command::Quit),
        other => Err(format!("Unknown command: '{other}'")),
    }
}

fn parse_cap(arg: &str, usage: &str) -> Result<FileCap, String> {
    if arg.is_empty() {
        return Err(format!("usage: {usage}"));
    }
    arg.parse()
}

fn parse_intent(verb: &str, args: &str) -> Result<FileIntent, String> {
    let (path, text) = args.split_once(char::is_whitespace).unwrap_or((args, ""));
    if path.is_empty() {
        return Err(format!("usage: {verb} <path>"));
    }
    match verb {
        "read" => Ok(FileIntent::read(path)),
        "write" => Ok(FileIntent::write(path, text.trim())),
        "delete" => Ok(FileIntent::delete(path)),
        other => Err(format!("cannot dispatch '{other}' (expected read, write or delete)")),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shell
// ─────────────────────────────────────────────────────────────────────────────

/// What the loop should do after a command.
#[derive(Debug, PartialEq)]
pub enum Flow {
    Continue(String),
    Quit,
}

/// Everything one interactive session needs.
pub struct Shell {
    rt: Runtime,
    settings: Settings,
    files: ReactorHandle<FileStoreReactor>,
    router: Arc<Router<FileIntent>>,
    scheduler: Scheduler<FileIntent>,
    /// Runtime grants (`/grant`, `/revoke`).
    manager: CapabilityManager<FileCap>,
    /// Configured grants plus session metadata.
    session: Context<FileCap>,
    janitor: JoinHandle<()>,
}

impl Shell {
    pub fn new(settings: Settings) -> io::Result<Self> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        let (files, router, scheduler, janitor) = {
            let _guard = rt.enter();
            Self::wire(&settings)
        };

        let session = Context::builder(settings.identity.as_str())
            .session(Uuid::new_v4().to_string())
            .capabilities(settings.grants.iter().cloned())
            .build();

        info!(
            identity = %settings.identity,
            strategy = %settings.strategy,
            composition = %settings.composition,
            "shell ready"
        );

        Ok(Self {
            rt,
            settings,
            files,
            router,
            scheduler,
            manager: CapabilityManager::new(),
            session,
            janitor,
        })
    }

    /// Spawn the file reactor, its router and the scheduler.  Needs an
    /// entered runtime.
    #[allow(clippy::type_complexity)]
    fn wire(
        settings: &Settings,
    ) -> (
        ReactorHandle<FileStoreReactor>,
        Arc<Router<FileIntent>>,
        Scheduler<FileIntent>,
        JoinHandle<()>,
    ) {
        let files = ReactorHandle::builder(
            FileStoreReactor,
            FileStore::default(),
            CapabilityGate::new(file_algebra()),
        )
        .name(FILES_REACTOR)
        .default_timeout(settings.dispatch_timeout)
        .mailbox_capacity(settings.mailbox_capacity)
        .spawn();

        let mut router = Router::new("shell").with_default_timeout(settings.dispatch_timeout);
        router.register(Arc::new(files.clone()));
        for intent in ["ReadFile", "WriteFile", "DeleteFile"] {
            router.bind(intent, FILES_REACTOR);
        }
        let router = Arc::new(router);

        let mut constraints = ConstraintSet::<FileCap>::new();
        if let Some(hours) = &settings.business_hours {
            constraints = constraints.with(hours.clone());
        }
        let target: Arc<dyn DispatchTarget<FileIntent>> = router.clone();
        let scheduler = Scheduler::builder(target)
            .constraints(constraints)
            .config(SchedulerConfig {
                strategy: settings.strategy,
                dispatch_timeout: Some(settings.dispatch_timeout),
                defer_to_next_window: settings.defer_to_next_window,
            })
            .build();
        let janitor = scheduler.spawn_janitor(settings.cleanup_interval, settings.retention);
        (files, router, scheduler, janitor)
    }

    /// Session context composed with the runtime grants.
    fn context(&self) -> Context<FileCap> {
        let runtime = Context::builder(self.settings.identity.as_str())
            .correlation_id(self.session.correlation_id())
            .resolve_with(&self.manager)
            .build();
        self.session.compose(&runtime, self.settings.composition)
    }

    pub fn handle(&mut self, cmd: Command) -> Flow {
        let out = match cmd {
            Command::Help => help_text(),
            Command::WhoAmI => self.cmd_whoami(),
            Command::Grant(cap) => {
                self.manager.grant(&self.settings.identity, cap.clone());
                format!("{} {}", "✓ granted".green(), cap.to_string().bold())
            }
            Command::Revoke(cap) => {
                self.manager.revoke(&self.settings.identity, &cap);
                format!("{} {}", "✓ revoked".green(), cap.to_string().bold())
            }
            Command::Dispatch(intent) => self.cmd_dispatch(intent),
            Command::Schedule { secs, intent } => self.cmd_schedule(secs, intent),
            Command::Cancel(id) => match self.scheduler.cancel(id) {
                CancelResult::Cancelled => format!("{} {id}", "✓ cancelled".green()),
                CancelResult::AlreadyExecuting => {
                    format!("{} {id}", "already executing:".yellow())
                }
                CancelResult::NotFound => format!("{} {id}", "no such operation:".red()),
            },
            Command::Ops => self.cmd_ops(),
            Command::Metrics => self.cmd_metrics(),
            Command::State => self.cmd_state(),
            Command::Override(on) => {
                self.session = self
                    .session
                    .with_metadata(DEFAULT_OVERRIDE_KEY, serde_json::Value::Bool(on));
                format!("temporal override {}", if on { "on".yellow() } else { "off".green() })
            }
            Command::Quit => return Flow::Quit,
        };
        Flow::Continue(out)
    }

    fn cmd_whoami(&self) -> String {
        let ctx = self.context();
        let mut caps: Vec<String> = ctx.capabilities().iter().map(ToString::to_string).collect();
        caps.sort();
        let mut out = format!(
            "  identity     : {}\n  session      : {}\n  composition  : {}\n  capabilities : ",
            ctx.identity().bold(),
            ctx.session_id().unwrap_or("-").dimmed(),
            self.settings.composition,
        );
        if caps.is_empty() {
            out.push_str(&"none".dimmed().to_string());
        } else {
            out.push_str(&caps.join(", "));
        }
        if ctx.metadata_value(DEFAULT_OVERRIDE_KEY) == Some(&serde_json::Value::Bool(true)) {
            out.push_str(&format!("\n  {}", "temporal override is on".yellow()));
        }
        out
    }

    fn cmd_dispatch(&self, intent: FileIntent) -> String {
        let ctx = self.context();
        match self.rt.block_on(self.router.dispatch(intent, ctx)) {
            Ok(effects) => render_effects(&effects),
            Err(e) => render_error(&e),
        }
    }

    fn cmd_schedule(&self, secs: u64, intent: FileIntent) -> String {
        let ctx = self.context();
        let Some(at) = i64::try_from(secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|delay| self.scheduler.now().checked_add_signed(delay))
        else {
            return format!("{} delay of {secs}s is out of range", "✗ failed:".red().bold());
        };
        let name = intent.name();
        match self.rt.block_on(self.scheduler.schedule_intent(intent, ctx, at)) {
            Ok(id) => {
                let status = self
                    .scheduler
                    .get(id)
                    .map(|op| op.status)
                    .unwrap_or(OperationStatus::Scheduled);
                format!(
                    "{} {} {} ({}, {})",
                    "✓ scheduled".green(),
                    name.bold(),
                    id,
                    at.format("%H:%M:%S"),
                    status
                )
            }
            Err(e) => render_error(&e),
        }
    }

    fn cmd_ops(&self) -> String {
        let ops = self.scheduler.list();
        if ops.is_empty() {
            return "  no operations".dimmed().to_string();
        }
        ops.iter()
            .map(|op| {
                let status = match op.status {
                    OperationStatus::Executed => op.status.to_string().green(),
                    OperationStatus::Failed => op.status.to_string().red(),
                    OperationStatus::Running => op.status.to_string().yellow(),
                    OperationStatus::Scheduled => op.status.to_string().cyan(),
                };
                let mut line = format!(
                    "  {} {:<10} {:<9} {} {}",
                    op.id,
                    op.intent.name(),
                    status,
                    op.execution_time.format("%H:%M:%S"),
                    op.intent.path()
                );
                if let Some(err) = op.error() {
                    line.push_str(&format!("  {}", err.to_string().dimmed()));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn cmd_metrics(&self) -> String {
        let m = self.scheduler.metrics();
        format!(
            "  strategy  : {}\n  scheduled : {}\n  pending   : {}\n  running   : {}\n  executed  : {}\n  failed    : {}\n  cancelled : {}\n  avg delay : {:.1} ms",
            self.scheduler.strategy(),
            m.scheduled,
            m.pending,
            m.running,
            m.executed,
            m.failed,
            m.cancelled,
            m.avg_delay_ms
        )
    }

    fn cmd_state(&self) -> String {
        match self.rt.block_on(self.files.state()) {
            Ok(store) if store.is_empty() => "  store is empty".dimmed().to_string(),
            Ok(store) => store
                .paths()
                .map(|p| format!("  {} {}", p.bold(), store.get(p).unwrap_or_default().dimmed()))
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => render_error(&e),
        }
    }
}

impl Drop for Shell {
    fn drop(&mut self) {
        self.janitor.abort();
    }
}

fn render_effects(effects: &[Effect<FileCap>]) -> String {
    if effects.is_empty() {
        return format!("{}", "✓ ok (no effects)".green());
    }
    effects
        .iter()
        .map(|e| format!("{} {} {}", "✓".green(), e.kind.bold(), e.payload))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_error(e: &GateError<FileCap>) -> String {
    let label = match e {
        GateError::InsufficientCapabilities { missing } => {
            let missing: Vec<String> = missing.iter().map(ToString::to_string).collect();
            return format!("{} missing {}", "✗ rejected:".red().bold(), missing.join(", "));
        }
        GateError::TemporalConstraintViolation(_) => "✗ not now:",
        _ => "✗ failed:",
    };
    format!("{} {}", label.red().bold(), e)
}

fn help_text() -> String {
    let rows = [
        ("/whoami", "identity and effective capabilities"),
        ("/grant <cap>", "grant a capability, e.g. delete(/notes)"),
        ("/revoke <cap>", "revoke a runtime grant"),
        ("/read <path>", "read a file"),
        ("/write <path> <text>", "write a file"),
        ("/delete <path>", "delete a file"),
        ("/schedule <secs> <cmd>", "run read/write/delete later"),
        ("/cancel <id>", "cancel a scheduled operation"),
        ("/ops", "list scheduled operations"),
        ("/metrics", "scheduler counters"),
        ("/state", "files in the store"),
        ("/override on|off", "lift time windows for this session"),
        ("/quit  /exit", "exit the CLI"),
    ];
    let mut out = format!("{}\n", "capgate Commands".bold().underline());
    for (cmd, what) in rows {
        out.push_str(&format!("  {:<24} – {}\n", cmd.bold().cyan(), what));
    }
    out
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(mut shell: Shell, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "capgate>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }
        if line.trim().is_empty() {
            continue;
        }

        match parse_command(&line) {
            Ok(cmd) => match shell.handle(cmd) {
                Flow::Continue(out) => println!("{out}"),
                Flow::Quit => {
                    println!("{}", "Goodbye.".green());
                    shutdown.store(true, Ordering::SeqCst);
                    break;
                }
            },
            Err(msg) => println!(
                "{} Type {} for available commands.",
                msg.red(),
                "/help".bold()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn shell() -> Shell {
        colored::control::set_override(false);
        let settings = Config {
            grants: vec!["write(/x)".into()],
            ..Config::default()
        }
        .validate()
        .expect("valid");
        Shell::new(settings).expect("runtime")
    }

    fn text(flow: Flow) -> String {
        match flow {
            Flow::Continue(out) => out,
            Flow::Quit => panic!("unexpected quit"),
        }
    }

    fn run_line(shell: &mut Shell, line: &str) -> String {
        text(shell.handle(parse_command(line).expect("parses")))
    }

    #[test]
    fn parses_dispatch_commands() {
        assert_eq!(
            parse_command("/write /x hello  world"),
            Ok(Command::Dispatch(FileIntent::write("/x", "hello  world")))
        );
        assert_eq!(
            parse_command("  /read /x "),
            Ok(Command::Dispatch(FileIntent::read("/x")))
        );
        assert_eq!(
            parse_command("/delete /x"),
            Ok(Command::Dispatch(FileIntent::delete("/x")))
        );
        assert!(parse_command("/read").is_err());
    }

    #[test]
    fn parses_schedule() {
        assert_eq!(
            parse_command("/schedule 30 write /x later"),
            Ok(Command::Schedule {
                secs: 30,
                intent: FileIntent::write("/x", "later")
            })
        );
        assert_eq!(
            parse_command("/schedule 0 /delete /x"),
            Ok(Command::Schedule {
                secs: 0,
                intent: FileIntent::delete("/x")
            })
        );
        assert!(parse_command("/schedule soon read /x").is_err());
        assert!(parse_command("/schedule 5 grant /x").is_err());
    }

    #[test]
    fn parses_admin_commands() {
        assert_eq!(
            parse_command("/grant delete(/x)"),
            Ok(Command::Grant(FileCap::delete("/x")))
        );
        assert!(parse_command("/grant").is_err());
        assert!(parse_command("/cancel nope").is_err());
        let id = Uuid::new_v4();
        assert_eq!(parse_command(&format!("/cancel {id}")), Ok(Command::Cancel(id)));
        assert_eq!(parse_command("/override on"), Ok(Command::Override(true)));
        assert_eq!(parse_command("/exit"), Ok(Command::Quit));
        assert!(parse_command("/fly").is_err());
    }

    #[test]
    fn write_then_read_through_the_shell() {
        let mut sh = shell();
        let out = run_line(&mut sh, "/write /x hi");
        assert!(out.contains("file.written"), "{out}");
        let out = run_line(&mut sh, "/read /x");
        assert!(out.contains("\"contents\":\"hi\""), "{out}");
        let out = run_line(&mut sh, "/state");
        assert!(out.contains("/x"), "{out}");
    }

    #[test]
    fn delete_needs_a_runtime_grant() {
        let mut sh = shell();
        run_line(&mut sh, "/write /x hi");

        let out = run_line(&mut sh, "/delete /x");
        assert!(out.contains("rejected"), "{out}");
        assert!(out.contains("delete(/x)"), "{out}");

        run_line(&mut sh, "/grant delete(/x)");
        let out = run_line(&mut sh, "/delete /x");
        assert!(out.contains("file.deleted"), "{out}");

        run_line(&mut sh, "/revoke delete(/x)");
        let out = run_line(&mut sh, "/whoami");
        assert!(!out.contains("delete(/x)"), "{out}");
        assert!(out.contains("write(/x)"), "{out}");
    }

    #[test]
    fn schedule_then_cancel() {
        let mut sh = shell();
        let out = run_line(&mut sh, "/schedule 600 write /x later");
        assert!(out.contains("scheduled"), "{out}");

        let op = sh.scheduler.list().pop().expect("one op");
        let out = run_line(&mut sh, &format!("/cancel {}", op.id));
        assert!(out.contains("cancelled"), "{out}");
        let out = run_line(&mut sh, &format!("/cancel {}", op.id));
        assert!(out.contains("no such operation"), "{out}");

        let out = run_line(&mut sh, "/metrics");
        assert!(out.contains("cancelled : 1"), "{out}");
    }

    #[test]
    fn quit_ends_the_loop() {
        let mut sh = shell();
        assert_eq!(sh.handle(Command::Quit), Flow::Quit);
    }
}
