#[tokio::main]
async fn main() -> eyre::Result<()> {
    postbox_email_worker::run().await
}
