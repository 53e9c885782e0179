#[tokio::main]
async fn main() -> std::io::Result<()> {
    nowhere_server::run_with_config().await
}
