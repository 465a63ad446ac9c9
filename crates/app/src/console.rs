use std::fmt;

use exam_core::model::{AnswerValue, QuestionId, ViolationKind};

/// One line typed at the exam console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Answer { question_id: QuestionId, value: AnswerValue },
    Mark(QuestionId),
    Next,
    Prev,
    /// 1-based, as shown to the student.
    GoTo(usize),
    Online(bool),
    Signal(ViolationKind),
    Flush,
    Submit,
    Show,
    View,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    Empty,
    Unknown(String),
    MissingArgument { command: &'static str, what: &'static str },
    InvalidQuestion(String),
    InvalidIndex(String),
    InvalidSignal(String),
}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputError::Empty => write!(f, "empty command"),
            InputError::Unknown(cmd) => write!(f, "unknown command: {cmd} (try `help`)"),
            InputError::MissingArgument { command, what } => {
                write!(f, "{command} requires {what}")
            }
            InputError::InvalidQuestion(raw) => write!(f, "invalid question id: {raw}"),
            InputError::InvalidIndex(raw) => write!(f, "invalid question number: {raw}"),
            InputError::InvalidSignal(raw) => write!(
                f,
                "unknown signal: {raw} (expected one of {})",
                ViolationKind::ALL.map(ViolationKind::as_str).join(", ")
            ),
        }
    }
}

impl std::error::Error for InputError {}

pub const HELP: &str = "\
commands:
  answer <question-id> <text...>   write a free-text answer
  choose <question-id> <option>    pick a multiple-choice option
  mark <question-id>               toggle the review mark
  next | prev | goto <n>           move between questions
  online | offline                 simulate connectivity changes
  signal <kind>                    report an integrity signal
  flush                            save queued answers now
  submit                           submit the exam
  show                             print the current question and timer
  view                             print the full session snapshot as JSON
  quit                             close the session and exit";

fn question_id(raw: Option<&str>, command: &'static str) -> Result<QuestionId, InputError> {
    let raw = raw.ok_or(InputError::MissingArgument {
        command,
        what: "a question id",
    })?;
    raw.parse()
        .map_err(|_| InputError::InvalidQuestion(raw.to_string()))
}

/// Parse one console line.
///
/// # Errors
///
/// Returns `InputError` for unknown commands or malformed arguments.
pub fn parse(line: &str) -> Result<Input, InputError> {
    let line = line.trim();
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };
    let mut args = rest.split_whitespace();

    match command {
        "" => Err(InputError::Empty),
        "answer" => {
            let question_id = question_id(args.next(), "answer")?;
            let text = rest
                .split_once(char::is_whitespace)
                .map_or("", |(_, text)| text.trim());
            Ok(Input::Answer {
                question_id,
                value: AnswerValue::text(text),
            })
        }
        "choose" => {
            let question_id = question_id(args.next(), "choose")?;
            let option = args.next().ok_or(InputError::MissingArgument {
                command: "choose",
                what: "an option id",
            })?;
            Ok(Input::Answer {
                question_id,
                value: AnswerValue::option(option),
            })
        }
        "mark" => Ok(Input::Mark(question_id(args.next(), "mark")?)),
        "next" | "n" => Ok(Input::Next),
        "prev" | "p" => Ok(Input::Prev),
        "goto" => {
            let raw = args.next().ok_or(InputError::MissingArgument {
                command: "goto",
                what: "a question number",
            })?;
            match raw.parse::<usize>() {
                Ok(n) if n > 0 => Ok(Input::GoTo(n)),
                _ => Err(InputError::InvalidIndex(raw.to_string())),
            }
        }
        "online" => Ok(Input::Online(true)),
        "offline" => Ok(Input::Online(false)),
        "signal" => {
            let raw = args.next().ok_or(InputError::MissingArgument {
                command: "signal",
                what: "a signal kind",
            })?;
            ViolationKind::parse(raw)
                .map(Input::Signal)
                .ok_or_else(|| InputError::InvalidSignal(raw.to_string()))
        }
        "flush" => Ok(Input::Flush),
        "submit" => Ok(Input::Submit),
        "show" | "s" => Ok(Input::Show),
        "view" => Ok(Input::View),
        "help" | "?" => Ok(Input::Help),
        "quit" | "exit" | "q" => Ok(Input::Quit),
        other => Err(InputError::Unknown(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_keeps_the_whole_text() {
        assert_eq!(
            parse("answer 2   borrowed for  'a"),
            Ok(Input::Answer {
                question_id: QuestionId::new(2),
                value: AnswerValue::text("borrowed for  'a"),
            })
        );
    }

    #[test]
    fn answer_without_text_clears() {
        assert_eq!(
            parse("answer 3"),
            Ok(Input::Answer {
                question_id: QuestionId::new(3),
                value: AnswerValue::text(""),
            })
        );
    }

    #[test]
    fn choose_needs_an_option() {
        assert_eq!(
            parse("choose 1 b"),
            Ok(Input::Answer {
                question_id: QuestionId::new(1),
                value: AnswerValue::option("b"),
            })
        );
        assert_eq!(
            parse("choose 1"),
            Err(InputError::MissingArgument {
                command: "choose",
                what: "an option id",
            })
        );
    }

    #[test]
    fn goto_is_one_based() {
        assert_eq!(parse("goto 3"), Ok(Input::GoTo(3)));
        assert_eq!(parse("goto 0"), Err(InputError::InvalidIndex("0".into())));
    }

    #[test]
    fn signals_use_kebab_case_names() {
        assert_eq!(
            parse("signal focus-loss"),
            Ok(Input::Signal(ViolationKind::FocusLoss))
        );
        assert!(matches!(
            parse("signal sneeze"),
            Err(InputError::InvalidSignal(_))
        ));
    }

    #[test]
    fn rejects_unknown_and_empty_lines() {
        assert_eq!(parse("   "), Err(InputError::Empty));
        assert_eq!(parse("dance"), Err(InputError::Unknown("dance".into())));
        assert_eq!(
            parse("mark x"),
            Err(InputError::InvalidQuestion("x".into()))
        );
    }
}
