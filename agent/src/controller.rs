use async_trait::async_trait;
use tracing::debug;
use tracing::warn;

use crate::conversation::Conversation;
use crate::instruction::ParsedReply;
use crate::instruction::parse_reply;

/// The model boundary: given the conversation so far, produce the next
/// free-form reply. The wire client behind it is the embedder's concern.
#[async_trait]
pub trait InstructionSource: Send + Sync {
    async fn complete(&self, conversation: &Conversation) -> anyhow::Result<String>;
}

/// The tool boundary: run one extracted instruction and describe the result
/// as text. Always yields text, even on failure.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: &str) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneReason {
    /// The source ended the loop with the sentinel.
    Final,
    /// The reply had no extractable instruction and no sentinel; its raw
    /// text became the answer (the fail-safe path).
    ImplicitFinal,
    /// The step budget ran out. Not a failure of any component: callers can
    /// tell "the model finished" from "we gave up".
    MaxSteps,
    /// The instruction source itself failed; the error text is the answer.
    SourceError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Done {
    pub text: String,
    pub reason: DoneReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    /// One instruction was executed and its observation appended; the loop
    /// may continue.
    Continue { executed: String, observation: String },
    Done(Done),
}

/// Drives the bounded model ↔ tool loop: ask the source for a reply, extract
/// either a terminal answer or exactly one instruction, execute it, feed the
/// observation back, repeat up to `max_steps`.
pub struct StepController<E> {
    executor: E,
    max_steps: usize,
}

impl<E: CommandExecutor> StepController<E> {
    pub fn new(executor: E, max_steps: usize) -> Self {
        Self {
            executor,
            max_steps,
        }
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// One protocol round. Source failures become a `Done` with the error as
    /// the final text; they never propagate as panics or `Err` out of the
    /// loop.
    pub async fn step(
        &self,
        conversation: &mut Conversation,
        source: &dyn InstructionSource,
    ) -> StepResult {
        let reply = match source.complete(conversation).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!("instruction source failed: {err}");
                return StepResult::Done(Done {
                    text: format!("instruction source failed: {err}"),
                    reason: DoneReason::SourceError,
                });
            }
        };
        conversation.push_assistant(reply.clone());

        match parse_reply(&reply) {
            ParsedReply::Final { text, explicit } => StepResult::Done(Done {
                text,
                reason: if explicit {
                    DoneReason::Final
                } else {
                    DoneReason::ImplicitFinal
                },
            }),
            ParsedReply::Instruction(command) => {
                debug!(command = command.as_str(), "executing instruction");
                let observation = self.executor.execute(&command).await;
                conversation.push_observation(&observation);
                StepResult::Continue {
                    executed: command,
                    observation,
                }
            }
        }
    }

    /// Run `step` until the source finishes or the budget is exhausted. A
    /// source that always returns an instruction executes exactly
    /// `max_steps` instructions before the loop gives up.
    pub async fn run(
        &self,
        conversation: &mut Conversation,
        source: &dyn InstructionSource,
    ) -> Done {
        for _ in 0..self.max_steps {
            match self.step(conversation, source).await {
                StepResult::Continue { .. } => {}
                StepResult::Done(done) => return done,
            }
        }
        Done {
            text: "max steps reached".to_string(),
            reason: DoneReason::MaxSteps,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use pretty_assertions::assert_eq;

    use super::*;

    /// Counts what it runs; replies "done" to everything.
    #[derive(Clone, Default)]
    struct CountingExecutor {
        executed: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl CommandExecutor for CountingExecutor {
        async fn execute(&self, command: &str) -> String {
            self.executed.lock().unwrap().push(command.to_string());
            "done".to_string()
        }
    }

    struct ScriptedSource {
        replies: Vec<String>,
        next: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: replies.iter().map(ToString::to_string).collect(),
                next: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl InstructionSource for ScriptedSource {
        async fn complete(&self, _conversation: &Conversation) -> anyhow::Result<String> {
            let i = self.next.fetch_add(1, Ordering::SeqCst);
            match self.replies.get(i) {
                Some(reply) => Ok(reply.clone()),
                None => anyhow::bail!("scripted source ran out of replies"),
            }
        }
    }

    struct AlwaysInstruct;

    #[async_trait]
    impl InstructionSource for AlwaysInstruct {
        async fn complete(&self, _conversation: &Conversation) -> anyhow::Result<String> {
            Ok("```\nlook\n```".to_string())
        }
    }

    #[tokio::test]
    async fn budget_exhaustion_executes_exactly_max_steps() {
        let executor = CountingExecutor::default();
        let controller = StepController::new(executor.clone(), 4);
        let mut conversation = Conversation::with_system("play");

        let done = controller.run(&mut conversation, &AlwaysInstruct).await;
        assert_eq!(done.reason, DoneReason::MaxSteps);
        assert_eq!(done.text, "max steps reached");
        assert_eq!(executor.executed.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn sentinel_ends_the_loop() {
        let executor = CountingExecutor::default();
        let controller = StepController::new(executor.clone(), 10);
        let mut conversation = Conversation::with_system("play");
        let source = ScriptedSource::new(&[
            "```\nnorth\n```",
            "FINAL: reached the grate",
        ]);

        let done = controller.run(&mut conversation, &source).await;
        assert_eq!(done.reason, DoneReason::Final);
        assert_eq!(done.text, "reached the grate");
        assert_eq!(
            executor.executed.lock().unwrap().as_slice(),
            ["north".to_string()]
        );
        // system + assistant + observation + assistant
        assert_eq!(conversation.len(), 4);
    }

    #[tokio::test]
    async fn protocol_breaking_reply_is_an_implicit_final() {
        let executor = CountingExecutor::default();
        let controller = StepController::new(executor.clone(), 10);
        let mut conversation = Conversation::with_system("play");
        let source = ScriptedSource::new(&["I would simply go north."]);

        let done = controller.run(&mut conversation, &source).await;
        assert_eq!(done.reason, DoneReason::ImplicitFinal);
        assert_eq!(done.text, "I would simply go north.");
        assert!(executor.executed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn source_failure_is_surfaced_not_panicked() {
        let executor = CountingExecutor::default();
        let controller = StepController::new(executor.clone(), 10);
        let mut conversation = Conversation::with_system("play");
        let source = ScriptedSource::new(&[]);

        let done = controller.run(&mut conversation, &source).await;
        assert_eq!(done.reason, DoneReason::SourceError);
        assert!(done.text.contains("ran out of replies"));
    }

    #[tokio::test]
    async fn observations_accumulate_between_steps() {
        let executor = CountingExecutor::default();
        let controller = StepController::new(executor.clone(), 10);
        let mut conversation = Conversation::with_system("play");
        let source = ScriptedSource::new(&["```\nlook\n```"]);

        let result = controller.step(&mut conversation, &source).await;
        match result {
            StepResult::Continue {
                executed,
                observation,
            } => {
                assert_eq!(executed, "look");
                assert_eq!(observation, "done");
            }
            other => panic!("expected Continue, got {other:?}"),
        }
        let last = conversation.messages().last().unwrap();
        assert_eq!(last.content, "Observation:\ndone");
    }
}
