mod cli;
mod error;
mod infra;
mod routes;
mod server;

pub use crate::error::ApiError;

pub async fn run() -> Result<(), ApiError> {
    cli::run().await
}
