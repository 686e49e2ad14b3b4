//! Request dispatch for one content API.
//!
//! Keep the public surface small: [`ContentClient`] and its builder.
//! The layers it composes live in submodules under `src/client/`:
//! the [`dispatcher`] queue, the [`auth`] guard around the
//! [`executor`], and the [`reporter`] that delivers results.

pub mod auth;
pub mod builder;
pub mod core;
pub mod dispatcher;
pub mod executor;
pub mod reporter;

pub use auth::{AuthGuard, SessionHolder};
pub use builder::ContentClientBuilder;
pub use self::core::ContentClient;
pub use dispatcher::{Dispatcher, DispatcherState, DispatcherStats, Handled, RequestHandler};
pub use executor::{Endpoints, NetworkExecutor};
pub use reporter::{listener_channel, ChannelListener, ListenerEvent, ReporterStats, ResultListener, ResultReporter};
