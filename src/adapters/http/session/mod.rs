//! HTTP adapter for session endpoints.

mod dto;
mod handlers;
mod routes;

pub use dto::{
    CreateSessionRequest, DeleteSessionQuery, DeleteSessionResponse, ErrorResponse,
    SessionCommandResponse, SessionResponse, TouchSessionRequest, UpdateSessionRequest,
    WarningResponse,
};
pub use handlers::SessionHandlers;
pub use routes::session_routes;
