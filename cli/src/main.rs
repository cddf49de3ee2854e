use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once};

static TRACE_INIT: Once = Once::new();
const DEFAULT_TRACE_FILTER: &str =
    "umbra::generator=debug,umbra::walk=debug,umbra::frame=debug,umbra::config=debug,umbra_core=info,umbra_cli=info";

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use umbra_core::{
    code::CodeObject,
    config::RuntimeConfig,
    frame::{FrameRecord, MaterializeFrame, ShadowFrame, ShadowStack},
    generator::{Exception, GeneratorContext, GeneratorKind, Injection, ResumeOutcome, Step, body_fn},
    gil::Gil,
    object::{ObjRef, ObjectHeader, ref_total},
    walk::{self, CallStackSnapshot, SnapshotDetail, WalkError},
};

#[cfg(test)]
mod main_test;

#[derive(Debug, Parser)]
#[command(
    name = "umbra",
    author,
    version,
    about = "Diagnostic driver for the Umbra frame tracking core",
    long_about = None
)]
struct CliArgs {
    /// TOML configuration file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DetailArg {
    Names,
    Lines,
    Frames,
}

impl From<DetailArg> for SnapshotDetail {
    fn from(value: DetailArg) -> Self {
        match value {
            DetailArg::Names => SnapshotDetail::Names,
            DetailArg::Lines => SnapshotDetail::NamesAndLines,
            DetailArg::Frames => SnapshotDetail::NamesLinesAndFrames,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum KindArg {
    Generator,
    Coroutine,
}

impl From<KindArg> for GeneratorKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Generator => GeneratorKind::Generator,
            KindArg::Coroutine => GeneratorKind::Coroutine,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the logical call stack seen from inside an awaited coroutine.
    Stack {
        #[arg(long, value_enum, default_value_t = DetailArg::Names)]
        detail: DetailArg,
        /// Emit the snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a retain/release loop and report the counts.
    Refcount {
        /// Mark the object immortal before the loop
        #[arg(long)]
        immortal: bool,
        #[arg(long, default_value_t = 1000)]
        ops: usize,
    },
    /// Drive a generator to completion, printing every state transition.
    Generator {
        #[arg(long, value_enum, default_value_t = KindArg::Generator)]
        kind: KindArg,
        #[arg(long, default_value_t = 3)]
        yields: u32,
        /// Back the generator with an interpreter frame instead of compiled state
        #[arg(long)]
        interpreted: bool,
    },
    /// Release an object header past zero. The process aborts.
    Underflow,
}

/// What an `UMBRA_TRACE` value asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TraceSetting {
    Off,
    /// Switched on without naming a filter.
    DefaultFilter,
    Filter(String),
}

impl TraceSetting {
    fn parse(raw: &str) -> Self {
        let value = raw.trim();
        let is = |word: &str| value.eq_ignore_ascii_case(word);
        if value.is_empty() || is("0") || is("false") || is("off") {
            TraceSetting::Off
        } else if is("1") || is("true") || is("on") {
            TraceSetting::DefaultFilter
        } else {
            TraceSetting::Filter(value.to_string())
        }
    }
}

/// Install a stderr subscriber when `UMBRA_TRACE` is set, or when the config
/// names a filter.
fn maybe_init_tracing(config_filter: Option<&str>) {
    let setting = match std::env::var("UMBRA_TRACE") {
        Ok(raw) => TraceSetting::parse(&raw),
        Err(_) => match config_filter {
            Some(filter) => TraceSetting::Filter(filter.to_string()),
            None => TraceSetting::Off,
        },
    };
    if setting == TraceSetting::Off {
        return;
    }

    TRACE_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        use tracing_subscriber::fmt;

        let filter_expr = match setting {
            TraceSetting::Filter(expr) => Some(expr),
            _ => config_filter.map(str::to_string).or_else(|| std::env::var("RUST_LOG").ok()),
        };

        let builder = fmt().with_writer(std::io::stderr);

        let builder = match filter_expr.and_then(|expr| EnvFilter::try_new(expr).ok()) {
            Some(filter) => builder.with_env_filter(filter),
            None => builder.with_env_filter(DEFAULT_TRACE_FILTER),
        };

        let _ = builder.try_init();
    });
}

fn load_config(path: Option<&Path>) -> anyhow::Result<RuntimeConfig> {
    let config = match path {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::default(),
    };
    config
        .with_env_overrides()
        .context("invalid UMBRA_* environment override")
}

fn main() -> anyhow::Result<()> {
    let CliArgs { config, command } = CliArgs::parse();

    let config = load_config(config.as_deref())?;
    maybe_init_tracing(config.log.filter.as_deref());
    config.apply();
    tracing::debug!(target: "umbra::cli", ?command, "dispatching");

    match command {
        Commands::Stack { detail, json } => run_stack(detail.into(), json),
        Commands::Refcount { immortal, ops } => run_refcount(immortal, ops),
        Commands::Generator {
            kind,
            yields,
            interpreted,
        } => run_generator(kind.into(), yields, interpreted),
        Commands::Underflow => run_underflow(),
    }
}

fn demo_code(module: &str, name: &str, first_line: u32) -> Arc<CodeObject> {
    CodeObject::new(module, name)
        .with_qualname(name)
        .with_arg_count(1)
        .with_first_line(first_line)
        .with_lines(&[(0, first_line + 1), (8, first_line + 2)])
        .into_arc()
}

fn record_materializer() -> Arc<dyn MaterializeFrame> {
    Arc::new(|code: &Arc<CodeObject>, _ip: isize| FrameRecord::new(Arc::clone(code)))
}

/// `main -> run_until_complete -> fetch`, where `fetch` is awaited by the
/// suspended `handler`. The snapshot is taken inside `fetch`.
pub(crate) fn capture_demo_stack(detail: SnapshotDetail) -> anyhow::Result<CallStackSnapshot> {
    let guard = Gil::acquire();
    let gil = guard.token();

    let main_frame = ShadowFrame::interpreted(FrameRecord::new(demo_code("__main__", "main", 1)).into_handle());
    let _main = ShadowStack::enter(main_frame);
    let loop_frame = ShadowFrame::compiled(demo_code("events", "run_until_complete", 40), Some(record_materializer()));
    loop_frame.set_ip(8);
    let _loop = ShadowStack::enter(loop_frame);

    let captured: Arc<Mutex<Option<Result<CallStackSnapshot, WalkError>>>> = Arc::default();
    let slot = Arc::clone(&captured);
    let fetch = GeneratorContext::compiled(
        GeneratorKind::Coroutine,
        demo_code("demo", "fetch", 20),
        None,
        body_fn(move |cx, input| {
            if let Injection::Throw(exception) = input {
                return Step::Raise(exception);
            }
            cx.set_ip(8);
            let snapshot = walk::snapshot(detail);
            *slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(snapshot);
            Step::Return(ObjRef::int(200))
        }),
    );

    let awaited = Arc::clone(&fetch);
    let handler = GeneratorContext::interpreted(
        GeneratorKind::Coroutine,
        FrameRecord::new(demo_code("demo", "handler", 10)).into_handle(),
        body_fn(move |cx, input| {
            if let Injection::Throw(exception) = input {
                return Step::Raise(exception);
            }
            cx.set_ip(0);
            match cx.awaiting(&awaited) {
                Ok(()) => Step::Yield(ObjRef::none()),
                Err(err) => Step::Raise(Exception::runtime_error(err.to_string())),
            }
        }),
    );

    let first = handler.resume(gil, Injection::Send(ObjRef::none()), None)?;
    anyhow::ensure!(first.is_yield(), "handler did not suspend: {:?}", first);
    let done = fetch.resume(gil, Injection::Send(ObjRef::none()), None)?;
    anyhow::ensure!(matches!(done, ResumeOutcome::Returned(_)), "fetch did not finish: {:?}", done);

    let snapshot = captured
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take()
        .context("fetch never captured a stack")??;
    Ok(snapshot)
}

fn run_stack(detail: SnapshotDetail, json: bool) -> anyhow::Result<()> {
    let snapshot = capture_demo_stack(detail)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }
    for (idx, entry) in snapshot.entries().iter().enumerate() {
        let line = entry.line.map(|line| format!(" line {}", line)).unwrap_or_default();
        let frame = if entry.frame.is_some() { " [frame]" } else { "" };
        println!("{:>3} {}{}{}", idx, entry.qualname, line, frame);
    }
    Ok(())
}

fn run_refcount(immortal: bool, ops: usize) -> anyhow::Result<()> {
    let guard = Gil::acquire();
    let gil = guard.token();
    let before = ref_total();

    let obj = ObjRef::string("payload");
    if immortal {
        obj.mark_immortal(gil);
    }
    let handles: Vec<ObjRef> = (0..ops).map(|_| obj.clone_ref(gil)).collect();
    println!("refcnt after {} retains: {}", ops, obj.refcnt());
    for handle in handles {
        handle.release(gil);
    }
    println!("refcnt after releases: {}", obj.refcnt());
    println!("immortal: {}", obj.is_immortal());
    obj.release(gil);

    match (before, ref_total()) {
        (Some(before), Some(after)) => println!("ref total delta: {}", after - before),
        _ => println!("ref total: untracked"),
    }
    Ok(())
}

fn print_generator_state(generator: &GeneratorContext) {
    println!(
        "state={:?} yield_point={} runnable={} executing={}",
        generator.state(),
        generator.yield_point().map_or(0, |point| point.get()),
        generator.is_runnable(),
        generator.is_executing()
    );
}

fn run_generator(kind: GeneratorKind, yields: u32, interpreted: bool) -> anyhow::Result<()> {
    let code = demo_code("demo", "ticker", 1);
    let mut produced = 0u32;
    let body = body_fn(move |cx, input| {
        match input {
            Injection::Send(value) => value.release(cx.gil()),
            Injection::Throw(exception) => return Step::Raise(exception),
            Injection::Close => return Step::Return(ObjRef::none()),
        }
        if produced < yields {
            produced += 1;
            Step::Yield(ObjRef::int(i64::from(produced)))
        } else {
            Step::Return(ObjRef::int(i64::from(yields)))
        }
    });
    let generator = if interpreted {
        GeneratorContext::interpreted(kind, FrameRecord::new(code).into_handle(), body)
    } else {
        GeneratorContext::compiled(kind, code, None, body)
    };

    let guard = Gil::acquire();
    let gil = guard.token();
    print_generator_state(&generator);
    loop {
        match generator.resume(gil, Injection::Send(ObjRef::none()), None)? {
            ResumeOutcome::Yielded(value) => {
                println!("yielded {}", value.as_int().unwrap_or_default());
                value.release(gil);
            }
            ResumeOutcome::Returned(value) => {
                println!("returned {}", value.as_int().unwrap_or_default());
                value.release(gil);
                break;
            }
            ResumeOutcome::Raised(exception) => {
                println!("raised {}", exception);
                break;
            }
        }
        print_generator_state(&generator);
    }
    print_generator_state(&generator);

    if let Err(err) = generator.resume(gil, Injection::Send(ObjRef::none()), None) {
        println!("resume after completion: {}", err);
    }
    Ok(())
}

fn run_underflow() -> anyhow::Result<()> {
    let guard = Gil::acquire();
    let header = ObjectHeader::new();
    header.release(guard.token());
    header.release(guard.token());
    anyhow::bail!("reference count underflow went undetected")
}
