//! Two-step prompt protocol spoken by the agent process.
//!
//! The agent prints a query prompt, reads one line, runs the task, then prints
//! a "run another query?" prompt and reads the answer. [`ProtocolDriver`] is a
//! pure state machine over the streamed output text: it never touches the
//! process itself, it only tells the caller what to write and when.

/// Prompt markers and the answer sent to the continue prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptScript {
    pub query_marker: String,
    pub continue_marker: String,
    pub continue_answer: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    AwaitingQueryPrompt,
    AwaitingContinuePrompt,
    Finished,
}

/// A line the caller must write to the agent's stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Injection {
    Query(String),
    ContinueAnswer(String),
}

impl Injection {
    /// The bytes to write, including the line terminator.
    pub fn line(&self) -> String {
        match self {
            Injection::Query(text) | Injection::ContinueAnswer(text) => format!("{text}\n"),
        }
    }
}

pub struct ProtocolDriver {
    script: PromptScript,
    query: String,
    state: DriverState,
    // Unmatched tail of the output, long enough to catch a marker split across chunks.
    window: String,
}

impl ProtocolDriver {
    pub fn new(script: PromptScript, query: &str) -> Self {
        Self {
            script,
            query: sanitize_query(query),
            state: DriverState::AwaitingQueryPrompt,
            window: String::new(),
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Feed a chunk of output and collect the injections it triggers, in order.
    ///
    /// Each prompt occurrence advances the state exactly once, so a repeated
    /// query prompt after the query was sent produces nothing.
    pub fn observe(&mut self, chunk: &str) -> Vec<Injection> {
        let mut injections = Vec::new();
        if self.state == DriverState::Finished {
            return injections;
        }
        self.window.push_str(chunk);

        loop {
            let marker = match self.state {
                DriverState::AwaitingQueryPrompt => &self.script.query_marker,
                DriverState::AwaitingContinuePrompt => &self.script.continue_marker,
                DriverState::Finished => break,
            };
            let Some(pos) = self.window.find(marker.as_str()) else {
                break;
            };
            let consumed = pos + marker.len();
            self.window.drain(..consumed);

            match self.state {
                DriverState::AwaitingQueryPrompt => {
                    injections.push(Injection::Query(self.query.clone()));
                    self.state = DriverState::AwaitingContinuePrompt;
                }
                DriverState::AwaitingContinuePrompt => {
                    injections.push(Injection::ContinueAnswer(
                        self.script.continue_answer.clone(),
                    ));
                    self.state = DriverState::Finished;
                }
                DriverState::Finished => break,
            }
        }

        if self.state == DriverState::Finished {
            self.window.clear();
        } else {
            let keep = match self.state {
                DriverState::AwaitingQueryPrompt => self.script.query_marker.len(),
                _ => self.script.continue_marker.len(),
            }
            .saturating_sub(1);
            trim_to_tail(&mut self.window, keep);
        }
        injections
    }
}

/// Line terminators inside the query would be read as the continue answer.
fn sanitize_query(query: &str) -> String {
    query
        .trim()
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect()
}

/// Keep at most the last `max_bytes` bytes of `s`, cut on a char boundary.
pub(crate) fn trim_to_tail(s: &mut String, max_bytes: usize) {
    if s.len() <= max_bytes {
        return;
    }
    let mut start = s.len() - max_bytes;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    s.drain(..start);
}
