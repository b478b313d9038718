mod server;
mod stream;

pub use server::{router, start_server, AppState};
