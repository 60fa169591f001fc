//! Interactive question loop (`kopi chat`).
//!
//! Reads one question per line from stdin. Blank lines are ignored,
//! `exit`/`quit` ends the loop, overlong questions are rejected, and
//! Ctrl-C ends it with a goodbye, both at the prompt and while a question
//! is being answered. A failing question is logged and printed; the loop
//! keeps going.

use anyhow::Result;
use async_trait::async_trait;
use std::future::Future;
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::app::{format_answer, print_answer, Answer, RagApp};
use crate::config::Config;

pub const TOO_LONG_MESSAGE: &str = "Pertanyaan terlalu panjang. Maksimal 1000 karakter.";
pub const GOODBYE: &str = "Sampai jumpa";

/// What to do with one line of input.
#[derive(Debug, PartialEq, Eq)]
pub enum LineAction<'a> {
    Skip,
    Exit,
    TooLong,
    Ask(&'a str),
}

pub fn classify_line(line: &str, max_chars: usize) -> LineAction<'_> {
    let question = line.trim();
    if question.eq_ignore_ascii_case("exit") || question.eq_ignore_ascii_case("quit") {
        return LineAction::Exit;
    }
    if question.is_empty() {
        return LineAction::Skip;
    }
    if question.chars().count() > max_chars {
        return LineAction::TooLong;
    }
    LineAction::Ask(question)
}

fn too_long_message(max_chars: usize) -> String {
    if max_chars == 1000 {
        TOO_LONG_MESSAGE.to_string()
    } else {
        format!(
            "Pertanyaan terlalu panjang. Maksimal {} karakter.",
            max_chars
        )
    }
}

/// Anything that can answer one question of the chat loop.
#[async_trait]
pub trait Answerer: Send + Sync {
    async fn answer(&self, question: &str) -> Result<Answer>;
}

#[async_trait]
impl Answerer for RagApp {
    async fn answer(&self, question: &str) -> Result<Answer> {
        self.ask(question).await
    }
}

/// Why [`chat_loop`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatExit {
    /// `exit` or `quit`.
    Quit,
    EndOfInput,
    /// `shutdown` completed.
    Interrupted,
}

/// Drive the question loop over `input`, writing to `out`, until the user
/// quits, input ends, or `shutdown` completes. `shutdown` is polled while
/// waiting for a line and while answering.
pub async fn chat_loop<R, W, S>(
    answerer: &dyn Answerer,
    input: R,
    out: &mut W,
    max_chars: usize,
    shutdown: S,
) -> Result<ChatExit>
where
    R: AsyncBufRead + Unpin,
    W: Write,
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut lines = input.lines();

    loop {
        write!(out, ">> ")?;
        out.flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = &mut shutdown => {
                writeln!(out, "\n\n{}", GOODBYE)?;
                return Ok(ChatExit::Interrupted);
            }
        };
        let Some(line) = line else {
            return Ok(ChatExit::EndOfInput);
        };

        match classify_line(&line, max_chars) {
            LineAction::Skip => continue,
            LineAction::Exit => return Ok(ChatExit::Quit),
            LineAction::TooLong => writeln!(out, "{}", too_long_message(max_chars))?,
            LineAction::Ask(question) => {
                writeln!(out, "Query: {}", question)?;
                writeln!(out, "{}", "-".repeat(60))?;

                let result = tokio::select! {
                    result = answerer.answer(question) => result,
                    _ = &mut shutdown => {
                        writeln!(out, "\n\n{}", GOODBYE)?;
                        return Ok(ChatExit::Interrupted);
                    }
                };
                match result {
                    Ok(answer) => write!(out, "{}", format_answer(&answer))?,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to answer question");
                        writeln!(out, "Error: {:#}", e)?;
                        writeln!(out, "Silakan coba lagi.")?;
                    }
                }
            }
        }
    }
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

pub async fn run_chat(config: &Config) -> Result<()> {
    println!("{}", "=".repeat(60));
    println!("Sistem RAG Coffee Shop");
    println!();

    let app = RagApp::from_config(config).await?;

    println!("{}", "=".repeat(60));
    println!("Ketik pertanyaan tentang coffee shop");
    println!("Ketik 'exit' atau 'quit' untuk keluar");
    println!("{}", "=".repeat(60));
    println!();

    let exit = chat_loop(
        &app,
        BufReader::new(tokio::io::stdin()),
        &mut std::io::stdout(),
        config.retrieval.max_question_chars,
        interrupted(),
    )
    .await?;
    tracing::debug!(?exit, "chat ended");
    Ok(())
}

/// `kopi ask`: answer one question and exit.
pub async fn run_ask(config: &Config, question: &str) -> Result<()> {
    match classify_line(question, config.retrieval.max_question_chars) {
        LineAction::Ask(q) => {
            let app = RagApp::from_config(config).await?;
            let answer = app.ask(q).await?;
            print_answer(&answer);
            Ok(())
        }
        LineAction::TooLong => {
            anyhow::bail!("{}", too_long_message(config.retrieval.max_question_chars))
        }
        LineAction::Skip | LineAction::Exit => anyhow::bail!("Question must not be empty"),
    }
}
