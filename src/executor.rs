//! The command retry state machine.

use tracing::debug;

use crate::append::{append, AppendOutcome};
use crate::context::load_context;
use crate::error::EngineError;
use crate::fact::Fact;
use crate::store::EventStore;
use crate::EventCodec;

/// Retry budget used by callers that have no reason to pick another one.
pub const DEFAULT_RETRY_BUDGET: u32 = 3;

/// A command: which facts it reads, and pure business logic from the
/// resulting context to new events.
///
/// `handle` must be a pure function of the context -- the insert is the
/// only side effect of a command, and it lives in the append path, which
/// is what makes re-running an attempt after a conflict safe. `facts` is
/// called fresh for every attempt; the same fact list drives both the
/// load and the append-time consistency check.
pub trait CommandHandler {
    type Context;
    type Event;
    type Rejection: std::error::Error + Send + Sync + 'static;

    fn facts(&self) -> Vec<Fact<Self::Context, Self::Event>>;

    fn initial_context(&self) -> Self::Context;

    fn handle(&self, context: Self::Context) -> Result<Vec<Self::Event>, Self::Rejection>;
}

/// Terminal outcome of [`execute`]. Retries are an implementation detail:
/// a success on attempt three is indistinguishable from a first-try
/// success.
#[derive(Debug)]
#[must_use]
pub enum CommandResult<Event, Rejection> {
    /// The command's events were persisted.
    Accepted(Vec<Event>),
    /// Business logic refused the command. Deterministic given the
    /// context, therefore never retried.
    Rejected(Rejection),
    /// A system failure: storage, decoding, or an exhausted retry budget.
    Failed(EngineError),
}

impl<Event, Rejection> CommandResult<Event, Rejection> {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// Run a command to completion: load, decide, append, and retry on
/// conflict with a fully fresh load each time.
///
/// Every attempt re-executes the read composition and rebuilds the
/// context from scratch, so each attempt's decision is consistent with
/// its own snapshot. Only conflicts loop; rejections and system failures
/// return immediately.
pub async fn execute<Handler>(
    store: &impl EventStore,
    codec: &impl EventCodec<Handler::Event>,
    handler: &Handler,
    metadata: &serde_json::Value,
    retry_budget: u32,
) -> CommandResult<Handler::Event, Handler::Rejection>
where
    Handler: CommandHandler,
{
    let mut retries_left = retry_budget;

    loop {
        let facts = handler.facts();

        let snapshot =
            match load_context(store, codec, &facts, handler.initial_context()).await {
                Ok(snapshot) => snapshot,
                Err(error) => return CommandResult::Failed(error),
            };

        let events = match handler.handle(snapshot.context) {
            Ok(events) => events,
            Err(rejection) => return CommandResult::Rejected(rejection),
        };

        match append(
            store,
            codec,
            &events,
            metadata,
            &facts,
            snapshot.last_seen_sequence,
        )
        .await
        {
            Ok(AppendOutcome::Success) => return CommandResult::Accepted(events),
            Ok(AppendOutcome::Conflict { matched_count }) => {
                if retries_left == 0 {
                    return CommandResult::Failed(EngineError::RetriesExhausted {
                        attempts: retry_budget + 1,
                    });
                }
                retries_left -= 1;
                debug!(matched_count, retries_left, "append conflicted, reloading");
            }
            Err(error) => return CommandResult::Failed(error),
        }
    }
}
