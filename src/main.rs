/// Entry point for Engine Watch.
///
/// Watches the configured container engine and serves the current container
/// snapshot over HTTP.
///
/// # Examples
///
/// ```bash
/// ENGINE_COMMAND="podman --remote" RUST_LOG=debug cargo run
/// ```
#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    engine_watch::run().await
}
