//! GitHub OAuth device-flow client.
//!
//! Implements the client half of the OAuth 2.0 device authorization grant
//! (RFC 8628) against GitHub-shaped endpoints: request a device code, show
//! the user code and verification URL through a caller-supplied [`Prompter`],
//! poll the token endpoint honoring server-directed backoff, and transparently
//! request a fresh code if the user takes too long. The flow returns exactly
//! one bearer token or exactly one error.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ghdevice::{DeviceFlow, WriterPrompter};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), ghdevice::FlowError> {
//! let flow = DeviceFlow::new("Iv1.cafe1234")
//!     .with_scopes(["repo"])
//!     .with_prompter(Arc::new(WriterPrompter::new(std::io::stderr())));
//! let token = flow.run(CancellationToken::new()).await?;
//! println!("token: {token}");
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod flow;

mod exchange;

pub use error::{ExchangeError, FlowError, OAuthError};
pub use flow::{DeviceFlow, Prompt, Prompter, WriterPrompter};
