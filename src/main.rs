#[cfg(feature = "server")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mindspero_billing::server::run().await
}
