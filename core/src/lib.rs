pub mod api;
pub mod chat;
pub mod config;
pub mod error;
pub mod models;
pub mod oauth;
pub mod preferences;
pub mod project;
pub mod routes;
pub mod session;
pub mod storage;
pub mod stream;
pub mod telemetry;

pub use api::{ApiClient, ClientContext};
pub use chat::{ChatBackend, ChatMessage, ChatSession, MessageRole, Transcript};
pub use config::{ClientSettings, ConfigError};
pub use error::{ClientError, ClientResult};
pub use models::{LinkedAccount, Registration, TokenPair, User};
pub use oauth::{CallbackMessage, CallbackPayload, OAuthProvider, Platform};
pub use preferences::ThemeMode;
pub use project::{NewProject, Project, ProjectList, ProjectStatus};
pub use routes::{Route, RouteDecision};
pub use session::{
    AuthBackend, CallbackSource, Session, SessionEvent, SessionManager, SessionStatus,
};
pub use storage::{FileStore, KeyValueStore, LayeredStore, MemoryStore};
pub use stream::{DeltaStream, EventStreamDecoder, StreamEvent};
