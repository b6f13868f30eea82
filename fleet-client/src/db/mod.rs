pub mod analytics_queries;
pub mod schema;
pub mod session_queries;
pub mod state_queries;
