pub mod handlers;
pub mod server;
pub mod sse;
pub mod state;

pub use server::serve;
pub use state::AppState;
