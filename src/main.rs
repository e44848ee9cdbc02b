use hemmer_provider_azurerm_eventgrid::{init_logging, serve, EventGridProvider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Event Grid provider");
    serve(EventGridProvider::new()).await
}
