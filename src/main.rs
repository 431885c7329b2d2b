#[tokio::main]
async fn main() -> anyhow::Result<()> {
    audio_share_lib::run().await
}
