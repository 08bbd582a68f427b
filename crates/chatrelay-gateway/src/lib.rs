pub mod api;
pub mod middleware;
pub mod server;
pub mod webhook;

pub use middleware::{WebhookAuth, TELEGRAM_SECRET_HEADER};
pub use server::{AppState, GatewayServer};
pub use webhook::{validate_secret, Command};
