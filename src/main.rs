use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    postpilot::cli::run().await
}
