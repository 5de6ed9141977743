use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// Kind of status line shown to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Step,
    Info,
    Success,
    Warning,
    Error,
}

/// The person at the keyboard.
///
/// Every interactive decision of a recovery run goes through this trait so
/// the flow can be driven by a terminal or by a script.
#[async_trait]
pub trait Operator: Send + Sync {
    /// Yes/no question. Blocks until answered; anything but yes is a no.
    async fn confirm(&self, question: &str) -> bool;

    /// Free-form line of input, `None` on end of input.
    async fn ask(&self, prompt: &str) -> Option<String>;

    fn notify(&self, notice: Notice, message: &str);
}

/// Replays canned answers in order and records what was asked.
///
/// Runs out of answers as "no" / end of input.
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    answers: Mutex<VecDeque<String>>,
    questions: Mutex<Vec<String>>,
    notices: Mutex<Vec<(Notice, String)>>,
}

impl ScriptedOperator {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    /// Questions and prompts seen so far, in order
    pub fn questions(&self) -> Vec<String> {
        lock(&self.questions).clone()
    }

    pub fn notices(&self) -> Vec<(Notice, String)> {
        lock(&self.notices).clone()
    }

    fn next_answer(&self, question: &str) -> Option<String> {
        lock(&self.questions).push(question.to_string());
        lock(&self.answers).pop_front()
    }
}

#[async_trait]
impl Operator for ScriptedOperator {
    async fn confirm(&self, question: &str) -> bool {
        self.next_answer(question)
            .map(|answer| is_yes(&answer))
            .unwrap_or(false)
    }

    async fn ask(&self, prompt: &str) -> Option<String> {
        self.next_answer(prompt)
    }

    fn notify(&self, notice: Notice, message: &str) {
        lock(&self.notices).push((notice, message.to_string()));
    }
}

/// `y` / `yes`, case-insensitive
pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
