//! Response correlation for the OAuth2/OpenID Connect implicit flow
//!
//! Matches authorization responses arriving as URL fragments to the request
//! that produced them: the interactive login or one of several concurrent
//! silent token renewals. Every request carries a single-use correlation
//! token in its `state` parameter; a response is only ever attributed once.
//!
//! Request lifecycle:
//! 1. Host calls `login` or `acquire_token_silent` → token minted, state persisted
//! 2. Transport loads the returned URL (full redirect, popup or hidden frame)
//! 3. Authority redirects back with `#...&state=<token>`
//! 4. `handle_response` parses the fragment and consumes the token
//! 5. The matched request's waiter receives the token or error
//! 6. Renewals never answered are expired after the frame load timeout

pub mod callbacks;
pub mod classifier;
pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod expiry;
pub mod metrics;
pub mod navigate;
pub mod parser;
pub mod registry;
pub mod storage;
pub mod token;

pub use callbacks::{PendingCallbackTable, RenewalReceiver, TokenReply};
pub use classifier::{FrameProbe, NestedFrame, ResponseEnvelope, TopLevelFrame, classify};
pub use config::AuthConfig;
pub use context::{
    AuthenticationContext, ContextRegistry, LoginRequest, SilentRenewal, StoredError,
};
pub use error::{Error, Result};
pub use expiry::{spawn_renewal_timeout, spawn_sweeper};
pub use parser::{Parameters, is_callback, parse};
pub use registry::{ConsumeResult, CorrelationRegistry, LoginMode, RequestKind};
pub use storage::{DurableStore, FileStore, MemoryStore};
pub use token::{CorrelationToken, ReplayNonce};
