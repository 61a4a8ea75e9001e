use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    deskpilot_cli::run().await
}
