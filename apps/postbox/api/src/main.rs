#[tokio::main]
async fn main() -> eyre::Result<()> {
    postbox_api::run().await
}
