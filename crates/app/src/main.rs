use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use exam_core::model::{
    Answer, ExamChain, ExamKey, ExamOrderEntry, QuestionId, QuizId, ScheduleId, TopicId,
};
use exam_services::{
    Clock, CourseLink, ElapsedTimeTracker, ExamServices, ExamSession, PartView, RuntimeConfig,
    SessionOptions,
};
use exam_storage::{SessionStore, Storage};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt as log_fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingChain,
    UnknownArg(String),
    InvalidId { flag: &'static str, raw: String },
    InvalidDbUrl { raw: String },
    HalfCourse,
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingChain => write!(f, "--chain is required"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidId { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::HalfCourse => write!(f, "--topic-id and --quiz-id go together"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn parse_id(args: &mut impl Iterator<Item = String>, flag: &'static str) -> Result<u64, ArgsError> {
    let value = require_value(args, flag)?;
    value
        .parse()
        .map_err(|_| ArgsError::InvalidId { flag, raw: value })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p exam-app -- take    --chain <file.json> [options]");
    eprintln!("  cargo run -p exam-app -- inspect --chain <file.json> [--db <sqlite_url>]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>      local session store");
    eprintln!("  --api <base_url>       remote authority");
    eprintln!("  --schedule-id <id>     schedule the chain belongs to");
    eprintln!("  --part <key>           start at this part instead of resuming");
    eprintln!("  --topic-id <id> --quiz-id <id>   course to complete afterwards");
    eprintln!();
    eprintln!("Commands while taking a part:");
    eprintln!("  next | prev | goto <n> | answer <qid> <json> | clear <qid>");
    eprintln!("  submit | retry | reload | recheck | status | quit");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  EXAM_API_BASE_URL, EXAM_API_TOKEN, EXAM_DB_URL, EXAM_TICK_MS,");
    eprintln!("  EXAM_CHECKPOINT_EVERY_SECS, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Take,
    Inspect,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "take" => Some(Self::Take),
            "inspect" => Some(Self::Inspect),
            _ => None,
        }
    }
}

struct Args {
    chain: PathBuf,
    db_url: Option<String>,
    api: Option<String>,
    schedule_id: Option<ScheduleId>,
    part: Option<ExamKey>,
    course: Option<CourseLink>,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut chain = None;
        let mut db_url = None;
        let mut api = None;
        let mut schedule_id = None;
        let mut part = None;
        let mut topic_id = None;
        let mut quiz_id = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--chain" => chain = Some(PathBuf::from(require_value(args, "--chain")?)),
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = Some(normalize_sqlite_url(value));
                }
                "--api" => api = Some(require_value(args, "--api")?),
                "--schedule-id" => {
                    schedule_id = Some(ScheduleId::new(parse_id(args, "--schedule-id")?));
                }
                "--part" => part = Some(ExamKey::new(require_value(args, "--part")?)),
                "--topic-id" => topic_id = Some(TopicId::new(parse_id(args, "--topic-id")?)),
                "--quiz-id" => quiz_id = Some(QuizId::new(parse_id(args, "--quiz-id")?)),
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        let course = match (topic_id, quiz_id) {
            (Some(topic_id), Some(quiz_id)) => Some(CourseLink { topic_id, quiz_id }),
            (None, None) => None,
            _ => return Err(ArgsError::HalfCourse),
        };

        Ok(Self {
            chain: chain.ok_or(ArgsError::MissingChain)?,
            db_url,
            api,
            schedule_id,
            part,
            course,
        })
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }
    Ok(())
}

fn load_chain(path: &Path) -> Result<ExamChain, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    let parts: Vec<ExamOrderEntry> = serde_json::from_str(&raw)?;
    Ok(ExamChain::new(parts)?)
}

fn init_tracing() {
    // stdout carries the exam view, so logs go to stderr.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(log_fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

fn print_view(key: &ExamKey, view: &PartView) {
    let marks: String = view
        .answered
        .iter()
        .enumerate()
        .map(|(i, answered)| match (i == view.current_index, answered) {
            (true, _) => '>',
            (false, true) => '#',
            (false, false) => '.',
        })
        .collect();
    println!(
        "[{key}] {} | {} | {}/{} answered | {marks}",
        view.part_name,
        view.state,
        view.answered_count(),
        view.question_count,
    );
    if let Some(remaining) = &view.remaining {
        println!("  time left {remaining}");
    }
    if let Some(opens_in) = &view.opens_in {
        println!("  opens in {opens_in} (recheck to try now)");
    }
    if let Some(error) = &view.last_error {
        let hint = if view.can_retry_submit {
            "retry"
        } else {
            "reload"
        };
        println!("  error: {error} ({hint} to try again)");
    }
}

fn parse_answer(
    session: &ExamSession,
    qid: &str,
    raw: &str,
) -> Result<(QuestionId, Answer), Box<dyn std::error::Error>> {
    let question_id: QuestionId = qid.parse()?;
    let question = session
        .runtime()
        .payload()
        .and_then(|p| p.question(question_id))
        .ok_or_else(|| format!("unknown question {question_id}"))?;
    let value: serde_json::Value =
        serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
    Ok((question_id, Answer::resolve(question.kind, &value)?))
}

/// Outcome of one line typed by the candidate.
enum Input {
    Continue,
    Quit,
}

async fn handle_line(
    session: &mut ExamSession,
    line: &str,
) -> Result<Input, Box<dyn std::error::Error>> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(Input::Continue);
    };
    match command {
        "next" => session.next().await?,
        "prev" => session.previous().await?,
        "goto" => {
            let index: usize = words.next().ok_or("goto needs a question number")?.parse()?;
            session.go_to(index.saturating_sub(1)).await?;
        }
        "answer" => {
            let qid = words.next().ok_or("answer needs a question id")?;
            let raw = words.collect::<Vec<_>>().join(" ");
            let (question_id, answer) = parse_answer(session, qid, &raw)?;
            session.record_answer(question_id, Some(answer)).await?;
        }
        "clear" => {
            let question_id: QuestionId =
                words.next().ok_or("clear needs a question id")?.parse()?;
            session.record_answer(question_id, None).await?;
        }
        "submit" => session.submit().await?,
        "retry" => session.retry_submit().await?,
        "reload" => session.retry_load().await?,
        "recheck" => session.recheck().await?,
        "status" => {}
        "quit" | "exit" => return Ok(Input::Quit),
        other => return Err(format!("unknown command: {other}").into()),
    }
    Ok(Input::Continue)
}

async fn take(
    services: ExamServices,
    chain: ExamChain,
    args: Args,
) -> Result<(), Box<dyn std::error::Error>> {
    let options = SessionOptions {
        explicit_part: args.part,
        schedule_id: args.schedule_id,
        course: args.course,
        checkpoint_every_secs: 0,
    };
    let back = Box::new(|| println!("All parts submitted. Returning to the exam list."));
    let mut session = services.start_session(chain, options, back).await?;

    let mut interval = tokio::time::interval(services.config().tick_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut last_view = None;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(err) = session.tick().await {
                    tracing::error!(error = %err, "tick failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted; leaving the session");
                break;
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(err) => {
                        tracing::error!(error = %err, "reading stdin failed");
                        break;
                    }
                };
                match handle_line(&mut session, &line).await {
                    Ok(Input::Quit) => break,
                    Ok(Input::Continue) => {}
                    Err(err) => println!("  ! {err}"),
                }
                if line.trim() == "status" {
                    last_view = None;
                }
            }
        }

        if session.is_finished() {
            break;
        }
        let view = session.view();
        // Redraw on change only; the countdown alone redraws once per second.
        if last_view.as_ref() != Some(&view) {
            print_view(session.current_key(), &view);
            last_view = Some(view);
        }
    }

    // Every exit path lands here so the trailing visit is folded.
    session.teardown().await;
    session.settle().await;
    Ok(())
}

async fn inspect(
    store: Arc<dyn SessionStore>,
    chain: ExamChain,
) -> Result<(), Box<dyn std::error::Error>> {
    let tracker = ElapsedTimeTracker::new(store);
    for part in chain.parts() {
        match tracker.record(&part.key).await? {
            Some(record) => println!(
                "{}: started {}, {} answers, {}s on questions{}",
                part.key,
                record.start_time(),
                record.answers().len(),
                record.total_elapsed(),
                record
                    .last_question_visit()
                    .map(|v| format!(", question {} open", v.question_id))
                    .unwrap_or_default(),
            ),
            None => println!("{}: no local data", part.key),
        }
    }
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv: Vec<String> = std::env::args().skip(1).collect();

    let cmd = match argv.first().map(String::as_str) {
        None | Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) if first.starts_with("--") => Command::Take,
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };
    if !argv[0].starts_with("--") {
        argv.remove(0);
    }

    let mut iter = argv.into_iter();
    let mut args = Args::parse(&mut iter).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let chain = load_chain(&args.chain)?;
    match cmd {
        Command::Take => {
            let mut config = RuntimeConfig::from_env_with(args.api.take())?;
            if let Some(db_url) = args.db_url.take() {
                config.db_url = db_url;
            }
            tracing::info!(db = %config.db_url, api = %config.remote.base_url, "configuration loaded");

            // Open + migrate SQLite at startup so the services layer stays storage-agnostic.
            prepare_sqlite_file(&config.db_url)?;
            let services = ExamServices::new_sqlite(config, Clock::system()).await?;
            take(services, chain, args).await
        }
        Command::Inspect => {
            // Local records only; no remote authority needed.
            let db_url = args
                .db_url
                .take()
                .unwrap_or_else(RuntimeConfig::db_url_from_env);
            tracing::info!(db = %db_url, "inspecting local records");
            prepare_sqlite_file(&db_url)?;
            let storage = Storage::sqlite(&db_url).await?;
            inspect(storage.sessions, chain).await
        }
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
