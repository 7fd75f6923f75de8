//! Call counters from `core show channels` output
//!
//! Asterisk has answered this command in two incompatible shapes over the
//! years. Each shape is a named [`SummaryFormat`]; [`parse_call_summary`]
//! asks every registered format whether it recognizes the response and lets
//! the first match parse it.
//!
//! - **current**: a multi-line `CommandResponse` whose last two lines are
//!   `"<n> active call(s)"` and `"<n> call(s) processed"`
//! - **legacy**: a single `Output` line whose first token is the channel
//!   count; the active-call count cannot be derived from it

use tracing::trace;

use crate::ami::Response;
use crate::error::{QueryError, QueryResult};

/// Multi-line command output field
pub const COMMAND_RESPONSE: &str = "CommandResponse";

/// Single-line command output field
pub const OUTPUT: &str = "Output";

/// Active and processed call counters of one switch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSummary {
    /// `None` when the server version does not report it
    pub active: Option<u64>,

    pub total: u64,
}

/// One known shape of the command output
pub trait SummaryFormat: Send + Sync {
    fn name(&self) -> &'static str;

    /// Does this response look like this format?
    fn detect(&self, response: &Response) -> bool;

    fn parse(&self, response: &Response) -> QueryResult<CallSummary>;
}

/// Multi-line output with trailing active/processed summary lines
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentFormat;

/// Single summary line, active calls unknown
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyFormat;

/// Formats tried in order
pub static FORMATS: &[&dyn SummaryFormat] = &[&CurrentFormat, &LegacyFormat];

impl CurrentFormat {
    pub fn parse_text(&self, text: &str) -> QueryResult<CallSummary> {
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();

        let [.., active_line, total_line] = lines.as_slice() else {
            return Err(QueryError::Parse(format!(
                "expected at least two summary lines, got {}",
                lines.len()
            )));
        };

        let active = leading_number(active_line)?;
        let total = leading_number(total_line)?;

        Ok(CallSummary {
            active: Some(active),
            total,
        })
    }
}

impl SummaryFormat for CurrentFormat {
    fn name(&self) -> &'static str {
        "current"
    }

    fn detect(&self, response: &Response) -> bool {
        response.get(COMMAND_RESPONSE).is_some()
    }

    fn parse(&self, response: &Response) -> QueryResult<CallSummary> {
        let text = response
            .get(COMMAND_RESPONSE)
            .ok_or_else(|| QueryError::Parse(format!("missing {COMMAND_RESPONSE} field")))?;
        self.parse_text(text)
    }
}

impl LegacyFormat {
    pub fn parse_text(&self, text: &str) -> QueryResult<CallSummary> {
        let text = text.trim();
        let text = text.strip_prefix("Output:").unwrap_or(text);
        let total = leading_number(text)?;

        Ok(CallSummary {
            active: None,
            total,
        })
    }
}

impl SummaryFormat for LegacyFormat {
    fn name(&self) -> &'static str {
        "legacy"
    }

    fn detect(&self, response: &Response) -> bool {
        response.get(COMMAND_RESPONSE).is_none() && response.get(OUTPUT).is_some()
    }

    fn parse(&self, response: &Response) -> QueryResult<CallSummary> {
        let text = response
            .get(OUTPUT)
            .ok_or_else(|| QueryError::Parse(format!("missing {OUTPUT} field")))?;
        self.parse_text(text)
    }
}

/// Parse the call summary out of a `Command` acknowledgement
pub fn parse_call_summary(response: &Response) -> QueryResult<CallSummary> {
    parse_with(FORMATS, response)
}

/// Parse raw command text, multi-line text is read as the current format
pub fn parse_call_summary_text(raw: &str) -> QueryResult<CallSummary> {
    let field = if raw.trim().contains('\n') {
        COMMAND_RESPONSE
    } else {
        OUTPUT
    };
    let mut response = Response::default();
    response.fields.insert(field.to_string(), raw.to_string());
    parse_call_summary(&response)
}

pub fn parse_with(
    formats: &[&dyn SummaryFormat],
    response: &Response,
) -> QueryResult<CallSummary> {
    let format = formats
        .iter()
        .find(|format| format.detect(response))
        .ok_or_else(|| QueryError::Parse("command output in unknown format".to_string()))?;
    trace!("reading call summary as the {} format", format.name());

    format.parse(response)
}

fn leading_number(line: &str) -> QueryResult<u64> {
    let token = line.split_whitespace().next().unwrap_or_default();
    token
        .parse()
        .map_err(|_| QueryError::Parse(format!("expected a count at the start of {line:?}")))
}
