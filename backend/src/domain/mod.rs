//! Domain primitives, services and ports.
//!
//! Purpose: own the venue access-code lifecycle, visitor presence and live chat
//! without knowing about HTTP, WebSockets or databases. Adapters reach the
//! domain through the services re-exported here and implement the traits in
//! [`ports`].
//!
//! Public surface:
//! - Entities: [`Venue`], [`TokenEpoch`], [`VisitorSession`], [`ChatMessage`].
//! - Services: [`TokenEpochManager`], [`RotationScheduler`],
//!   [`AccessResolver`], [`PresenceTracker`], [`ChatGateway`].
//! - [`Error`] and [`ErrorCode`]: transport-agnostic failure payload.

pub mod access_payload;
pub mod access_resolver;
pub mod chat_gateway;
pub mod chat_message;
pub mod epoch_manager;
pub mod error;
pub mod events;
pub mod ports;
pub mod presence;
pub mod rotation_scheduler;
pub mod token_epoch;
pub mod trace_id;
pub mod venue;
pub mod visitor_session;

pub use self::access_payload::{AccessPayload, AccessPayloadError};
pub use self::access_resolver::{
    AccessDenied, AccessResolver, AccessResolverConfig, RESCAN_MESSAGE, ScanOutcome,
};
pub use self::chat_gateway::{
    ChatConnection, ChatDelivery, ChatGateway, ChatGatewayConfig, ChatGatewayPorts,
    ConnectError, ConnectionId, HistoryError, SendError,
};
pub use self::chat_message::{
    ChatMessage, ChatMessageId, ChatText, ChatTextError, HistoryPage, HistoryQuery,
    SequenceNumber,
};
pub use self::epoch_manager::{
    BackoffJitter, RandomJitter, RetryPolicy, RetryRuntime, RetrySleeper, RotationError,
    TickOutcome, TokenEpochManager, TokenEpochManagerConfig, TokenEpochManagerPorts,
    TokioSleeper,
};
pub use self::error::{Error, ErrorCode, ErrorValidationError};
pub use self::events::{DomainEvent, RotationTrigger};
pub use self::presence::{
    OpenedSession, PresenceConfig, PresenceCounters, PresenceError, PresenceSweeper,
    PresenceTracker, SessionClosure, SweepReport,
};
pub use self::rotation_scheduler::{
    DueRotation, RotationScheduleHandle, RotationScheduleInbox, RotationScheduler,
    RotationSchedulerConfig, rotation_schedule_channel,
};
pub use self::token_epoch::{
    EpochSequence, EpochSnapshot, EpochStatus, TokenEpoch, TokenValue, TokenValueError,
    TokenWidth,
};
pub use self::trace_id::{TRACE_ID_HEADER, TraceId};
pub use self::venue::{ParseRotationFrequencyError, RotationFrequency, Venue, VenueId};
pub use self::visitor_session::{
    ParseCloseReasonError, SessionCloseReason, SessionState, SessionTransitionError, VisitorId,
    VisitorSession, VisitorSessionId,
};

/// Convenient API result alias.
///
/// # Examples
/// ```
/// use actix_web::HttpResponse;
/// use venue_gateway::domain::{ApiResult, Error};
///
/// fn handler() -> ApiResult<HttpResponse> {
///     Err(Error::forbidden("nope"))
/// }
/// ```
pub type ApiResult<T> = Result<T, Error>;
