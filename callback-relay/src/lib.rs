pub mod config;
pub mod dispatcher;
pub mod notification;
pub mod rate_limit;
pub mod routes;
pub mod secrets;
pub mod security_headers;
pub mod submission;

pub use config::{load_settings, HttpSettings, RateLimitSettings, RelayConfig, Settings};
pub use dispatcher::{DispatchError, Dispatcher, SmtpDispatcher};
pub use notification::{render_notification, Notification};
pub use routes::{router, AppState, CallbackError, CALLBACK_PATH, HEALTH_PATH};
pub use submission::{CallbackRequest, Submission, ValidationError};
