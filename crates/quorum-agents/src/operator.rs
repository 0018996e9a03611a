//! Interactive operator confirmation for tools outside the allow-list.

use async_trait::async_trait;
use coordination::tools::{OperatorPrompt, ToolCallRequest};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin};
use tokio::sync::Mutex;
use tracing::warn;

/// Asks on stderr, reads the answer from stdin. Anything but `y`/`yes`
/// declines, as does a closed stdin.
///
/// The reader lives as long as the operator, so answers typed ahead of a
/// prompt are kept for the next one.
pub struct ConsoleOperator<R = BufReader<Stdin>> {
    // One prompt at a time.
    input: Mutex<R>,
}

impl ConsoleOperator<BufReader<Stdin>> {
    pub fn new() -> Self {
        Self::with_input(BufReader::new(tokio::io::stdin()))
    }
}

impl Default for ConsoleOperator<BufReader<Stdin>> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> ConsoleOperator<R> {
    pub fn with_input(input: R) -> Self {
        Self {
            input: Mutex::new(input),
        }
    }
}

/// Whether an operator's answer approves the call.
pub fn is_approval(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn describe(request: &ToolCallRequest) -> String {
    let args: Vec<String> = request
        .args
        .iter()
        .map(|(k, v)| format!("{k}={v:?}"))
        .collect();
    format!("{} {}({})", request.mode, request.name, args.join(", "))
}

#[async_trait]
impl<R> OperatorPrompt for ConsoleOperator<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn confirm(&self, request: &ToolCallRequest) -> bool {
        let mut input = self.input.lock().await;

        let mut stderr = tokio::io::stderr();
        let prompt = format!("Model requests tool call: {}\nAllow? [y/N] ", describe(request));
        if let Err(e) = stderr.write_all(prompt.as_bytes()).await {
            warn!(error = %e, "Could not write operator prompt");
            return false;
        }
        let _ = stderr.flush().await;

        let mut line = String::new();
        match input.read_line(&mut line).await {
            Ok(0) => false,
            Ok(_) => is_approval(&line),
            Err(e) => {
                warn!(error = %e, "Could not read operator answer");
                false
            }
        }
    }
}
