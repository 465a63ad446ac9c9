use std::fmt;
use std::time::Duration;

use chrono::Duration as Delta;
use exam_backend::{Backend, HttpBackendConfig, InMemoryBackend};
use exam_core::model::{
    Answer, AnswerValue, ExamId, Question, QuestionId, QuestionOption, SessionState,
};
use exam_services::{
    Clock, EnvironmentFeed, ExamSession, SessionConfig, SessionError, SessionHandle, SessionView,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod console;

use console::{HELP, Input};

const FLUSH_WAIT: Duration = Duration::from_secs(15);

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidExamId { raw: String },
    InvalidMinutes { raw: String },
    InvalidApiUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidExamId { raw } => write!(f, "invalid --exam-id value: {raw}"),
            ArgsError::InvalidMinutes { raw } => write!(f, "invalid --minutes value: {raw}"),
            ArgsError::InvalidApiUrl { raw } => write!(f, "invalid --api value: {raw}"),
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

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  exam-runner [--exam-id <id>] [--minutes <n>] [--api <base_url>] [--demo]");
    eprintln!();
    eprintln!("Without --api (or EXAM_API_BASE_URL) a built-in demo exam is served in memory.");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  EXAM_ID, EXAM_MINUTES, EXAM_API_BASE_URL, EXAM_API_TOKEN, RUST_LOG");
    eprintln!("  EXAM_SAVE_DEBOUNCE_MS, EXAM_REQUEST_TIMEOUT_MS and friends tune the session");
}

struct Args {
    exam_id: ExamId,
    minutes: u32,
    api: Option<HttpBackendConfig>,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut exam_id = std::env::var("EXAM_ID")
            .ok()
            .and_then(|value| value.parse::<ExamId>().ok())
            .unwrap_or(ExamId::new(1));
        let mut minutes = std::env::var("EXAM_MINUTES")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(30);
        let mut api = HttpBackendConfig::from_env();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--exam-id" => {
                    let value = require_value(args, "--exam-id")?;
                    exam_id = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidExamId { raw: value.clone() })?;
                }
                "--minutes" => {
                    let value = require_value(args, "--minutes")?;
                    minutes = match value.parse::<u32>() {
                        Ok(n) if n > 0 => n,
                        _ => return Err(ArgsError::InvalidMinutes { raw: value }),
                    };
                }
                "--api" => {
                    let value = require_value(args, "--api")?;
                    if !value.starts_with("http://") && !value.starts_with("https://") {
                        return Err(ArgsError::InvalidApiUrl { raw: value });
                    }
                    let token = api.and_then(|config| config.token);
                    let mut config = HttpBackendConfig::new(value);
                    config.token = token;
                    api = Some(config);
                }
                "--demo" => api = None,
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            exam_id,
            minutes,
            api,
        })
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn demo_backend(exam_id: ExamId) -> Result<InMemoryBackend, Box<dyn std::error::Error>> {
    let repo = InMemoryBackend::new();
    repo.insert_exam(
        exam_id,
        vec![
            Question::multiple_choice(
                QuestionId::new(101),
                0,
                "Which trait lets a value be sent to another thread?",
                1,
                vec![
                    QuestionOption::new("a", "Sync"),
                    QuestionOption::new("b", "Send"),
                    QuestionOption::new("c", "Unpin"),
                    QuestionOption::new("d", "Copy"),
                ],
            )?,
            Question::multiple_choice(
                QuestionId::new(102),
                1,
                "What does `?` do on an `Err` value?",
                1,
                vec![
                    QuestionOption::new("a", "Panics"),
                    QuestionOption::new("b", "Returns it from the enclosing function"),
                    QuestionOption::new("c", "Ignores it"),
                ],
            )?,
            Question::subjective(
                QuestionId::new(103),
                2,
                "Explain the difference between `&T` and `&mut T`.",
                5,
            )?,
            Question::subjective(
                QuestionId::new(104),
                3,
                "When would you reach for `Arc<Mutex<T>>`?",
                5,
            )?,
        ],
    );
    // one answer left over from an earlier sitting
    repo.seed_draft(
        exam_id,
        vec![Answer::new(QuestionId::new(101), &AnswerValue::option("b"))],
    );
    Ok(repo)
}

fn print_question(view: &SessionView) {
    let total = view.questions.len();
    println!(
        "[{}] {} left, {} of {} answered, {} unsaved{}",
        view.session_state,
        view.timer.remaining,
        view.answered_count,
        total,
        view.pending_count,
        if view.is_online { "" } else { ", offline" }
    );
    let Some(question) = view.current_question() else {
        return;
    };
    println!(
        "Question {} of {} (id {}, {} marks){}",
        view.current_index + 1,
        total,
        question.id(),
        question.max_marks(),
        if view.is_marked(question.id()) { " [marked]" } else { "" }
    );
    println!("  {}", question.prompt());
    for option in question.options() {
        println!("    {}) {}", option.id, option.text);
    }
    if let Some(answer) = view.answer(question.id()) {
        match (&answer.response_text, &answer.response_option) {
            (Some(text), _) => println!("  your answer: {text}"),
            (_, Some(option)) => println!("  your answer: {option}"),
            _ => {}
        }
    }
}

async fn apply(session: &SessionHandle, input: Input) -> Result<bool, SessionError> {
    match input {
        Input::Answer { question_id, value } => session.set_answer(question_id, value).await?,
        Input::Mark(question_id) => {
            let marked = session.toggle_review(question_id).await?;
            println!("question {question_id} {}", if marked { "marked" } else { "unmarked" });
        }
        Input::Next => {
            session.next().await?;
            print_question(&session.view());
        }
        Input::Prev => {
            session.prev().await?;
            print_question(&session.view());
        }
        Input::GoTo(n) => {
            session.go_to(n - 1).await?;
            print_question(&session.view());
        }
        Input::Online(online) => session.set_online(online).await?,
        Input::Signal(kind) => {
            let outcome = session.report_violation(kind).await?;
            println!("{kind:?}: {outcome:?}");
        }
        Input::Flush => match tokio::time::timeout(FLUSH_WAIT, session.flush_now()).await {
            Ok(status) => println!("saved; {} pending", status?.pending_count),
            Err(_) => println!("still saving in the background"),
        },
        Input::Submit => {
            session.submit().await?;
            println!("submission started");
        }
        Input::Show => print_question(&session.view()),
        Input::View => match serde_json::to_string_pretty(&session.view()) {
            Ok(json) => println!("{json}"),
            Err(err) => warn!(error = %err, "could not render session view"),
        },
        Input::Help => println!("{HELP}"),
        Input::Quit => return Ok(false),
    }
    Ok(true)
}

/// Print state changes as they happen, independent of console input.
fn watch_state(session: &SessionHandle) {
    let mut views = session.subscribe();
    tokio::spawn(async move {
        let mut last = views.borrow().session_state;
        let mut warned = false;
        while views.changed().await.is_ok() {
            let (state, low_time, remaining, submit_error) = {
                let view = views.borrow_and_update();
                (
                    view.session_state,
                    view.timer.low_time,
                    view.timer.remaining,
                    view.submit_error.clone(),
                )
            };
            if state != last {
                println!("session is now {state}");
                if let Some(reason) = submit_error.as_deref() {
                    println!("submission failed: {reason} (type `submit` to retry)");
                }
                last = state;
            }
            if low_time && !warned && state == SessionState::Active {
                println!("only {remaining} left");
                warned = true;
            }
        }
    });
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);
    let args = Args::parse(&mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let config = SessionConfig::from_env()?;
    let backend = match args.api {
        Some(api) => {
            info!(base_url = %api.base_url, "using exam API");
            Backend::http(api)?
        }
        None => {
            info!(exam_id = %args.exam_id, "serving demo exam from memory");
            Backend::in_memory(demo_backend(args.exam_id)?)
        }
    };

    let clock = Clock::default();
    let deadline = clock.now() + Delta::minutes(i64::from(args.minutes));
    let feed = EnvironmentFeed::new();
    let session = ExamSession::new(args.exam_id, deadline, backend)
        .with_config(config)
        .with_clock(clock)
        .start(&feed)?;

    let view = session.ready().await?;
    println!("{HELP}");
    println!();
    print_question(&view);
    watch_state(&session);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = match console::parse(&line) {
            Ok(input) => input,
            Err(console::InputError::Empty) => continue,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };
        match apply(&session, input).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(SessionError::Closed) => break,
            Err(err) => println!("error: {err}"),
        }
    }

    if session.view().session_state == SessionState::Submitting {
        // give an in-progress submission a moment to land
        let _ = tokio::time::timeout(Duration::from_secs(5), session.wait_for_submitted()).await;
    }
    session.close().await?;
    let view = session.view();
    match view.submitted_at {
        Some(at) => println!("submitted at {at}"),
        None => println!(
            "exited without submitting ({} answers saved as draft)",
            view.answered_count
        ),
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
